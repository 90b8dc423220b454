//! Market regime classification and regime-adaptive pattern weighting.
//!
//! Breakout and crossover patterns earn their keep in trending markets;
//! reversal and bounce patterns earn theirs in choppy ones. The weight
//! table here is a fixed, hand-authored prior that can be slowly blended
//! toward observed per-pattern win rates.

pub mod metrics;

use signal_core::{
    Bar, MarketRegime, PatternKind, RegimeSnapshot, TrendLabel, VolatilityBucket,
};

/// Bars required before a regime call is trusted; fewer defaults to Choppy.
pub const MIN_REGIME_BARS: usize = 20;

const VOLATILE_THRESHOLD: f64 = 0.03;
const CALM_THRESHOLD: f64 = 0.01;
const TREND_SLOPE_THRESHOLD: f64 = 0.0015;

/// Classify the current regime from recent bars. Recomputed fresh on every
/// evaluation; never stored.
pub fn classify_regime(bars: &[Bar]) -> RegimeSnapshot {
    if bars.len() < MIN_REGIME_BARS {
        return RegimeSnapshot {
            regime: MarketRegime::Choppy,
            volatility_bucket: VolatilityBucket::Normal,
            momentum: 0.0,
            trend: TrendLabel::Flat,
        };
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volatility = metrics::return_volatility(&closes);
    let momentum = metrics::normalized_slope(&closes, MIN_REGIME_BARS);
    let efficiency = metrics::range_efficiency(&closes);

    let volatility_bucket = if volatility > VOLATILE_THRESHOLD {
        VolatilityBucket::High
    } else if volatility < CALM_THRESHOLD {
        VolatilityBucket::Low
    } else {
        VolatilityBucket::Normal
    };

    let trend = if momentum > TREND_SLOPE_THRESHOLD {
        TrendLabel::Up
    } else if momentum < -TREND_SLOPE_THRESHOLD {
        TrendLabel::Down
    } else {
        TrendLabel::Flat
    };

    let regime = if volatility > VOLATILE_THRESHOLD {
        MarketRegime::Volatile
    } else if trend == TrendLabel::Up && efficiency > 0.5 {
        MarketRegime::TrendingBull
    } else if trend == TrendLabel::Down && efficiency > 0.5 {
        MarketRegime::TrendingBear
    } else {
        MarketRegime::Choppy
    };

    RegimeSnapshot {
        regime,
        volatility_bucket,
        momentum,
        trend,
    }
}

/// Per-pattern weight multiplier for the given regime. Total over the
/// closed pattern set; the exhaustive match keeps the table checkable at
/// compile time.
pub fn pattern_weight(regime: MarketRegime, kind: PatternKind) -> f64 {
    use MarketRegime::*;
    use PatternKind::*;

    match (regime, kind) {
        // Trending: continuation patterns up, mean-reversion down.
        (TrendingBull | TrendingBear, BreakoutHigh | BreakdownLow) => 1.3,
        (TrendingBull | TrendingBear, EmaGoldenCross | EmaDeathCross) => 1.25,
        (TrendingBull | TrendingBear, MacdBullishCross | MacdBearishCross) => 1.15,
        (TrendingBull | TrendingBear, SupportBounce | ResistanceRejection) => 0.75,
        (
            TrendingBull | TrendingBear,
            RsiOversoldReversal | RsiOverboughtReversal | BullishDivergence | BearishDivergence,
        ) => 0.8,

        // Choppy: the inverse.
        (Choppy, BreakoutHigh | BreakdownLow) => 0.75,
        (Choppy, EmaGoldenCross | EmaDeathCross) => 0.8,
        (Choppy, MacdBullishCross | MacdBearishCross) => 0.9,
        (Choppy, SupportBounce | ResistanceRejection) => 1.3,
        (
            Choppy,
            RsiOversoldReversal | RsiOverboughtReversal | BullishDivergence | BearishDivergence,
        ) => 1.2,

        // Volatile: distrust levels, lean on momentum confirmation.
        (Volatile, BreakoutHigh | BreakdownLow) => 0.9,
        (Volatile, SupportBounce | ResistanceRejection) => 0.7,
        (Volatile, _) => 1.0,

        (_, VolumeSpike) => 1.0,
        (_, Confluence) => 1.1,
    }
}

/// ML-prediction weight multiplier: the models carry more of the vote when
/// price action is too noisy for levels.
pub fn ml_weight(regime: MarketRegime) -> f64 {
    match regime {
        MarketRegime::Volatile => 1.25,
        MarketRegime::Choppy => 1.0,
        MarketRegime::TrendingBull | MarketRegime::TrendingBear => 0.95,
    }
}

/// Confluence boost: +15% when three or more patterns each score strength
/// above 70, +8% for exactly two. The boosted score is capped at 95.
pub fn confluence_boost(score: f64, pattern_strengths: &[f64]) -> f64 {
    let strong = pattern_strengths.iter().filter(|&&s| s > 70.0).count();
    let boosted = if strong >= 3 {
        score * 1.15
    } else if strong == 2 {
        score * 1.08
    } else {
        score
    };
    boosted.min(95.0)
}

/// Blend the fixed regime weight with an empirically observed win rate
/// (0.50 -> 1.0, 0.60 -> 1.3, 0.40 -> 0.7, linear in between) by simple
/// averaging, adapting the static table toward observed performance without
/// discarding the regime prior.
pub fn blended_weight(regime: MarketRegime, kind: PatternKind, observed_win_rate: f64) -> f64 {
    let table = pattern_weight(regime, kind);
    let empirical = 1.0 + (observed_win_rate - 0.5) * 3.0;
    (table + empirical.clamp(0.4, 1.6)) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .map(|&c| Bar {
                timestamp: Utc::now(),
                open: c,
                high: c * 1.01,
                low: c * 0.99,
                close: c,
                volume: 1_000_000.0,
            })
            .collect()
    }

    #[test]
    fn steady_uptrend_classifies_bullish() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 * 0.5).collect();
        let snap = classify_regime(&bars(&closes));
        assert_eq!(snap.regime, MarketRegime::TrendingBull);
        assert_eq!(snap.trend, TrendLabel::Up);
        assert!(snap.momentum > 0.0);
    }

    #[test]
    fn steady_downtrend_classifies_bearish() {
        let closes: Vec<f64> = (0..40).map(|i| 120.0 - i as f64 * 0.5).collect();
        let snap = classify_regime(&bars(&closes));
        assert_eq!(snap.regime, MarketRegime::TrendingBear);
        assert_eq!(snap.trend, TrendLabel::Down);
    }

    #[test]
    fn noisy_flat_series_classifies_choppy() {
        let closes: Vec<f64> = (0..40)
            .map(|i| 100.0 + if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let snap = classify_regime(&bars(&closes));
        assert_eq!(snap.regime, MarketRegime::Choppy);
    }

    #[test]
    fn wild_swings_classify_volatile() {
        let closes: Vec<f64> = (0..40)
            .map(|i| 100.0 * if i % 2 == 0 { 1.05 } else { 0.95 })
            .collect();
        let snap = classify_regime(&bars(&closes));
        assert_eq!(snap.regime, MarketRegime::Volatile);
        assert_eq!(snap.volatility_bucket, VolatilityBucket::High);
    }

    #[test]
    fn insufficient_bars_default_to_choppy() {
        let closes = [100.0, 101.0, 100.5];
        let snap = classify_regime(&bars(&closes));
        assert_eq!(snap.regime, MarketRegime::Choppy);
        assert_eq!(snap.momentum, 0.0);
    }

    #[test]
    fn trending_favors_breakouts_choppy_favors_bounces() {
        assert!(
            pattern_weight(MarketRegime::TrendingBull, PatternKind::BreakoutHigh)
                > pattern_weight(MarketRegime::TrendingBull, PatternKind::SupportBounce)
        );
        assert!(
            pattern_weight(MarketRegime::Choppy, PatternKind::SupportBounce)
                > pattern_weight(MarketRegime::Choppy, PatternKind::BreakoutHigh)
        );
        assert!(ml_weight(MarketRegime::Volatile) > ml_weight(MarketRegime::Choppy));
    }

    #[test]
    fn confluence_boost_tiers_and_cap() {
        assert_relative_eq!(confluence_boost(60.0, &[80.0, 75.0, 72.0]), 69.0);
        assert_relative_eq!(confluence_boost(60.0, &[80.0, 75.0]), 64.8);
        assert_relative_eq!(confluence_boost(60.0, &[80.0]), 60.0);
        assert_relative_eq!(confluence_boost(90.0, &[80.0, 75.0, 72.0]), 95.0);
    }

    #[test]
    fn blended_weight_tracks_observed_win_rate() {
        let table = pattern_weight(MarketRegime::Choppy, PatternKind::SupportBounce);
        assert_relative_eq!(
            blended_weight(MarketRegime::Choppy, PatternKind::SupportBounce, 0.5),
            (table + 1.0) / 2.0
        );
        assert_relative_eq!(
            blended_weight(MarketRegime::Choppy, PatternKind::SupportBounce, 0.6),
            (table + 1.3) / 2.0
        );
        assert_relative_eq!(
            blended_weight(MarketRegime::Choppy, PatternKind::SupportBounce, 0.4),
            (table + 0.7) / 2.0
        );
    }
}
