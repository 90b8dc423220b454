//! Holding-period classification and velocity-profile-driven targets.

pub mod velocity;

pub use velocity::{AssetTier, LookbackWindow, VelocityProfile, VelocityProfiler, WindowStats};

use serde::{Deserialize, Serialize};
use signal_core::{
    EntryStrategy, MarketRegime, PatternKind, TradeClassification, TradeKind,
};

/// Inputs to the holding-period decision tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationFactors {
    /// Recent volatility relative to the longer-run baseline.
    pub volatility_ratio: f64,
    /// Trend strength (ADX); below ~20 reads as no trend.
    pub adx: f64,
    /// Current volume relative to its average.
    pub volume_ratio: f64,
    pub pattern: Option<PatternKind>,
    pub regime: Option<MarketRegime>,
}

fn is_breakout_pattern(kind: PatternKind) -> bool {
    matches!(
        kind,
        PatternKind::BreakoutHigh
            | PatternKind::BreakdownLow
            | PatternKind::EmaGoldenCross
            | PatternKind::EmaDeathCross
    )
}

/// Ordered decision tree over volatility, trend strength, volume, pattern
/// and regime; first matching rule wins, default is a conservative swing.
pub fn classify(factors: &ClassificationFactors) -> TradeClassification {
    // High volatility, no trend, volume spike: get in and out fast.
    if factors.volatility_ratio > 1.8 && factors.adx < 20.0 && factors.volume_ratio > 2.0 {
        return TradeClassification {
            kind: TradeKind::Scalp,
            holding_period_hours: 2.0,
            profit_target_pct: 0.5,
            profit_target_usd: None,
            stop_loss_pct: 0.3,
            stop_loss_usd: None,
            trailing_stop: false,
            entry: EntryStrategy::AllAtOnce,
            confidence: 0.75,
            reasoning: "High volatility burst without trend; scalping the spike".to_string(),
        };
    }

    // Elevated volatility without a confirmed trend: intraday only.
    if factors.volatility_ratio > 1.5 && factors.adx < 25.0 {
        return TradeClassification {
            kind: TradeKind::Day,
            holding_period_hours: 8.0,
            profit_target_pct: 1.2,
            profit_target_usd: None,
            stop_loss_pct: 0.8,
            stop_loss_usd: None,
            trailing_stop: false,
            entry: EntryStrategy::AllAtOnce,
            confidence: 0.65,
            reasoning: "Elevated volatility, weak trend; closing intraday".to_string(),
        };
    }

    // Very strong trend in calm conditions with a confirmed trending
    // regime: longest hold.
    if factors.adx > 35.0
        && factors.volatility_ratio < 1.0
        && factors.regime.map(|r| r.is_trending()).unwrap_or(false)
    {
        return TradeClassification {
            kind: TradeKind::Position,
            holding_period_hours: 240.0,
            profit_target_pct: 10.0,
            profit_target_usd: None,
            stop_loss_pct: 4.0,
            stop_loss_usd: None,
            trailing_stop: true,
            entry: EntryStrategy::Pyramid3,
            confidence: 0.85,
            reasoning: "Strong confirmed trend in calm conditions; position hold".to_string(),
        };
    }

    // Strong trend plus a breakout-class pattern: multi-day swing with
    // staged entries.
    if factors.adx > 25.0 && factors.pattern.map(is_breakout_pattern).unwrap_or(false) {
        return TradeClassification {
            kind: TradeKind::Swing,
            holding_period_hours: 72.0,
            profit_target_pct: 4.0,
            profit_target_usd: None,
            stop_loss_pct: 2.0,
            stop_loss_usd: None,
            trailing_stop: true,
            entry: EntryStrategy::Pyramid3,
            confidence: 0.8,
            reasoning: "Breakout with trend confirmation; pyramided swing".to_string(),
        };
    }

    TradeClassification {
        kind: TradeKind::Swing,
        holding_period_hours: 48.0,
        profit_target_pct: 2.5,
        profit_target_usd: None,
        stop_loss_pct: 1.5,
        stop_loss_usd: None,
        trailing_stop: false,
        entry: EntryStrategy::AllAtOnce,
        confidence: 0.5,
        reasoning: "No rule matched; conservative swing default".to_string(),
    }
}

/// Dollar-denominated profit target from the velocity profile: each holding
/// category maps to a percentile of its matching lookback window.
pub fn profit_target(kind: TradeKind, profile: &VelocityProfile, entry_price: f64) -> f64 {
    let distance = match kind {
        TradeKind::Scalp => profile.window(LookbackWindow::D1).p75_dollar * 0.5,
        TradeKind::Day => profile.window(LookbackWindow::D3).p75_dollar,
        TradeKind::Swing => profile.window(LookbackWindow::D7).p75_dollar,
        TradeKind::Position => profile.window(LookbackWindow::D21).p90_dollar,
    };
    entry_price + distance
}

/// Stop distance uses the 25th percentile of the matching window with a
/// 20% buffer so ordinary noise does not shake the position out.
pub fn stop_loss(kind: TradeKind, profile: &VelocityProfile, entry_price: f64) -> f64 {
    let window = match kind {
        TradeKind::Scalp => LookbackWindow::D1,
        TradeKind::Day => LookbackWindow::D3,
        TradeKind::Swing => LookbackWindow::D7,
        TradeKind::Position => LookbackWindow::D21,
    };
    let distance = profile.window(window).p25_dollar * 1.2;
    (entry_price - distance).max(0.0)
}

/// Attach velocity-profile dollar targets to a classification.
pub fn with_velocity_targets(
    mut classification: TradeClassification,
    profile: &VelocityProfile,
    entry_price: f64,
) -> TradeClassification {
    let tp = profit_target(classification.kind, profile, entry_price);
    let sl = stop_loss(classification.kind, profile, entry_price);
    classification.profit_target_usd = Some(tp - entry_price);
    classification.stop_loss_usd = Some(entry_price - sl);
    classification
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_factors() -> ClassificationFactors {
        ClassificationFactors {
            volatility_ratio: 1.0,
            adx: 20.0,
            volume_ratio: 1.0,
            pattern: None,
            regime: None,
        }
    }

    #[test]
    fn volatility_spike_without_trend_scalps() {
        let factors = ClassificationFactors {
            volatility_ratio: 2.0,
            adx: 15.0,
            volume_ratio: 2.5,
            ..base_factors()
        };
        let c = classify(&factors);
        assert_eq!(c.kind, TradeKind::Scalp);
        assert_eq!(c.entry, EntryStrategy::AllAtOnce);
        assert!(!c.trailing_stop);
    }

    #[test]
    fn breakout_with_trend_swings_pyramided() {
        let factors = ClassificationFactors {
            adx: 30.0,
            pattern: Some(PatternKind::BreakoutHigh),
            ..base_factors()
        };
        let c = classify(&factors);
        assert_eq!(c.kind, TradeKind::Swing);
        assert_eq!(c.entry, EntryStrategy::Pyramid3);
        assert!(c.trailing_stop);
    }

    #[test]
    fn strong_calm_trend_takes_position() {
        let factors = ClassificationFactors {
            adx: 40.0,
            volatility_ratio: 0.8,
            regime: Some(MarketRegime::TrendingBull),
            ..base_factors()
        };
        let c = classify(&factors);
        assert_eq!(c.kind, TradeKind::Position);
        assert_eq!(c.holding_period_hours, 240.0);
    }

    #[test]
    fn first_matching_rule_wins() {
        // Qualifies for both scalp and position inputs; scalp is checked
        // first.
        let factors = ClassificationFactors {
            volatility_ratio: 2.0,
            adx: 15.0,
            volume_ratio: 3.0,
            pattern: Some(PatternKind::BreakoutHigh),
            regime: Some(MarketRegime::TrendingBull),
        };
        assert_eq!(classify(&factors).kind, TradeKind::Scalp);
    }

    #[test]
    fn default_is_conservative_swing() {
        let c = classify(&base_factors());
        assert_eq!(c.kind, TradeKind::Swing);
        assert_eq!(c.confidence, 0.5);
        assert_eq!(c.entry, EntryStrategy::AllAtOnce);
    }
}
