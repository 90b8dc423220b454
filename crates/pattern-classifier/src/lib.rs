use signal_core::{Divergence, IndicatorSnapshot, PatternKind, PatternMatch};

/// Confluence confidence grows with the number of corroborating patterns,
/// capped at 0.95.
const CONFLUENCE_BASE: f64 = 0.60;
const CONFLUENCE_STEP: f64 = 0.08;
const CONFLUENCE_CAP: f64 = 0.95;
const CONFLUENCE_MIN_PATTERNS: usize = 3;

/// Proximity band (as a fraction of price) for support/resistance checks.
const LEVEL_PROXIMITY: f64 = 0.01;

fn rsi_oversold_reversal(s: &IndicatorSnapshot) -> Option<PatternMatch> {
    let rsi = s.rsi?;
    let prev = s.prev_price?;
    if rsi < 30.0 && s.price > prev {
        return Some(PatternMatch {
            kind: PatternKind::RsiOversoldReversal,
            confidence: 0.72,
            strength: 70.0,
            reasoning: format!("RSI {:.1} oversold with price turning up", rsi),
        });
    }
    None
}

fn rsi_overbought_reversal(s: &IndicatorSnapshot) -> Option<PatternMatch> {
    let rsi = s.rsi?;
    let prev = s.prev_price?;
    if rsi > 70.0 && s.price < prev {
        return Some(PatternMatch {
            kind: PatternKind::RsiOverboughtReversal,
            confidence: 0.72,
            strength: 70.0,
            reasoning: format!("RSI {:.1} overbought with price turning down", rsi),
        });
    }
    None
}

fn macd_bullish_cross(s: &IndicatorSnapshot) -> Option<PatternMatch> {
    let line = s.macd_line?;
    let signal = s.macd_signal?;
    let hist = s.macd_histogram?;
    if line > signal && hist > 0.0 {
        return Some(PatternMatch {
            kind: PatternKind::MacdBullishCross,
            confidence: 0.68,
            strength: 65.0,
            reasoning: "MACD line above signal with positive histogram".to_string(),
        });
    }
    None
}

fn macd_bearish_cross(s: &IndicatorSnapshot) -> Option<PatternMatch> {
    let line = s.macd_line?;
    let signal = s.macd_signal?;
    let hist = s.macd_histogram?;
    if line < signal && hist < 0.0 {
        return Some(PatternMatch {
            kind: PatternKind::MacdBearishCross,
            confidence: 0.68,
            strength: 65.0,
            reasoning: "MACD line below signal with negative histogram".to_string(),
        });
    }
    None
}

fn ema_golden_cross(s: &IndicatorSnapshot) -> Option<PatternMatch> {
    let ema20 = s.ema_20?;
    let ema50 = s.ema_50?;
    if ema20 > ema50 && s.price > ema20 {
        return Some(PatternMatch {
            kind: PatternKind::EmaGoldenCross,
            confidence: 0.70,
            strength: 72.0,
            reasoning: "EMA20 above EMA50 with price leading both".to_string(),
        });
    }
    None
}

fn ema_death_cross(s: &IndicatorSnapshot) -> Option<PatternMatch> {
    let ema20 = s.ema_20?;
    let ema50 = s.ema_50?;
    if ema20 < ema50 && s.price < ema20 {
        return Some(PatternMatch {
            kind: PatternKind::EmaDeathCross,
            confidence: 0.70,
            strength: 72.0,
            reasoning: "EMA20 below EMA50 with price trailing both".to_string(),
        });
    }
    None
}

fn support_bounce(s: &IndicatorSnapshot) -> Option<PatternMatch> {
    let support = s.support?;
    let prev = s.prev_price?;
    if support > 0.0
        && s.price >= support
        && (s.price - support) / support <= LEVEL_PROXIMITY
        && s.price > prev
    {
        return Some(PatternMatch {
            kind: PatternKind::SupportBounce,
            confidence: 0.66,
            strength: 60.0,
            reasoning: format!("Price bouncing off support at {:.2}", support),
        });
    }
    None
}

fn resistance_rejection(s: &IndicatorSnapshot) -> Option<PatternMatch> {
    let resistance = s.resistance?;
    let prev = s.prev_price?;
    if resistance > 0.0
        && s.price <= resistance
        && (resistance - s.price) / resistance <= LEVEL_PROXIMITY
        && s.price < prev
    {
        return Some(PatternMatch {
            kind: PatternKind::ResistanceRejection,
            confidence: 0.66,
            strength: 60.0,
            reasoning: format!("Price rejected at resistance {:.2}", resistance),
        });
    }
    None
}

fn breakout_high(s: &IndicatorSnapshot) -> Option<PatternMatch> {
    let resistance = s.resistance?;
    if resistance > 0.0 && s.price > resistance {
        return Some(PatternMatch {
            kind: PatternKind::BreakoutHigh,
            confidence: 0.78,
            strength: 80.0,
            reasoning: format!("Price broke above resistance {:.2}", resistance),
        });
    }
    None
}

fn breakdown_low(s: &IndicatorSnapshot) -> Option<PatternMatch> {
    let support = s.support?;
    if support > 0.0 && s.price < support {
        return Some(PatternMatch {
            kind: PatternKind::BreakdownLow,
            confidence: 0.78,
            strength: 80.0,
            reasoning: format!("Price broke below support {:.2}", support),
        });
    }
    None
}

fn volume_spike(s: &IndicatorSnapshot) -> Option<PatternMatch> {
    let volume = s.volume?;
    let prev_volume = s.prev_volume?;
    if prev_volume > 0.0 && volume > prev_volume * 2.0 {
        return Some(PatternMatch {
            kind: PatternKind::VolumeSpike,
            confidence: 0.60,
            strength: 55.0,
            reasoning: format!("Volume {:.1}x the prior bar", volume / prev_volume),
        });
    }
    None
}

fn divergence(s: &IndicatorSnapshot) -> Option<PatternMatch> {
    match s.divergence? {
        Divergence::Bullish => Some(PatternMatch {
            kind: PatternKind::BullishDivergence,
            confidence: 0.74,
            strength: 68.0,
            reasoning: "Bullish divergence between price and momentum".to_string(),
        }),
        Divergence::Bearish => Some(PatternMatch {
            kind: PatternKind::BearishDivergence,
            confidence: 0.74,
            strength: 68.0,
            reasoning: "Bearish divergence between price and momentum".to_string(),
        }),
    }
}

/// Detect all patterns whose trigger condition holds in one snapshot.
///
/// Every check is independent and non-exclusive; a missing optional
/// indicator silently skips only the checks that need it. Three or more
/// fired patterns synthesize an additional Confluence pseudo-pattern.
/// Deterministic: identical inputs yield identical matches in the same
/// order.
pub fn classify(snapshot: &IndicatorSnapshot) -> Vec<PatternMatch> {
    let checks: [fn(&IndicatorSnapshot) -> Option<PatternMatch>; 12] = [
        rsi_oversold_reversal,
        rsi_overbought_reversal,
        macd_bullish_cross,
        macd_bearish_cross,
        ema_golden_cross,
        ema_death_cross,
        support_bounce,
        resistance_rejection,
        breakout_high,
        breakdown_low,
        volume_spike,
        divergence,
    ];

    let mut matches: Vec<PatternMatch> = checks.iter().filter_map(|c| c(snapshot)).collect();

    if matches.len() >= CONFLUENCE_MIN_PATTERNS {
        let extra = (matches.len() - CONFLUENCE_MIN_PATTERNS) as f64;
        let confidence = (CONFLUENCE_BASE + CONFLUENCE_STEP * extra).min(CONFLUENCE_CAP);
        matches.push(PatternMatch {
            kind: PatternKind::Confluence,
            confidence,
            strength: 85.0,
            reasoning: format!("{} independent patterns in agreement", matches.len()),
        });
    }

    matches
}

/// The primary pattern: highest confidence, detection order breaks ties.
pub fn primary(matches: &[PatternMatch]) -> Option<&PatternMatch> {
    matches
        .iter()
        .fold(None, |best: Option<&PatternMatch>, m| match best {
            Some(b) if m.confidence > b.confidence => Some(m),
            Some(b) => Some(b),
            None => Some(m),
        })
}
