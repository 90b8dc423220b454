//! Empirical distribution of historical price-move magnitude per lookback
//! window, used to size realistic profit targets and stops.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signal_core::TtlCache;
use statrs::statistics::{Data, OrderStatistics};

/// Profiles change slowly; a day of reuse is fine.
const PROFILE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Minimum history before an empirical profile beats the tier default.
pub const MIN_HISTORY_POINTS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LookbackWindow {
    D1,
    D3,
    D7,
    D14,
    D21,
    D30,
}

impl LookbackWindow {
    pub fn days(&self) -> usize {
        match self {
            LookbackWindow::D1 => 1,
            LookbackWindow::D3 => 3,
            LookbackWindow::D7 => 7,
            LookbackWindow::D14 => 14,
            LookbackWindow::D21 => 21,
            LookbackWindow::D30 => 30,
        }
    }

    pub fn all() -> [LookbackWindow; 6] {
        [
            LookbackWindow::D1,
            LookbackWindow::D3,
            LookbackWindow::D7,
            LookbackWindow::D14,
            LookbackWindow::D21,
            LookbackWindow::D30,
        ]
    }
}

/// Percentile statistics of absolute dollar/percent moves over one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub avg_dollar_move: f64,
    pub median_dollar_move: f64,
    pub avg_pct_move: f64,
    pub median_pct_move: f64,
    pub p25_dollar: f64,
    pub p75_dollar: f64,
    pub p90_dollar: f64,
    pub max_dollar_move: f64,
    /// Fraction of windows that closed higher than they opened.
    pub up_fraction: f64,
}

/// Hand-specified fallbacks by asset tier when history is too thin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetTier {
    LargeCap,
    MidCap,
    SmallCap,
}

impl AssetTier {
    /// Price is the proxy for tier when no listing metadata is available.
    pub fn from_price(last_price: f64) -> Self {
        if last_price >= 250.0 {
            AssetTier::LargeCap
        } else if last_price >= 50.0 {
            AssetTier::MidCap
        } else {
            AssetTier::SmallCap
        }
    }

    /// Baseline one-day dollar move for the tier; longer windows scale by
    /// roughly the square root of elapsed days.
    fn base_daily_move(&self) -> f64 {
        match self {
            AssetTier::LargeCap => 4.0,
            AssetTier::MidCap => 1.5,
            AssetTier::SmallCap => 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileSource {
    Empirical { points: usize },
    TierDefault { tier: AssetTier },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityProfile {
    pub symbol: String,
    pub windows: BTreeMap<LookbackWindow, WindowStats>,
    pub source: ProfileSource,
    pub computed_at: DateTime<Utc>,
}

impl VelocityProfile {
    pub fn window(&self, window: LookbackWindow) -> WindowStats {
        // The constructor fills every window; the fallback is unreachable
        // for profiles built here but keeps lookups total.
        self.windows
            .get(&window)
            .copied()
            .unwrap_or_else(|| tier_window_stats(AssetTier::SmallCap, window))
    }
}

fn window_stats_from_closes(closes: &[f64], days: usize) -> Option<WindowStats> {
    if closes.len() <= days {
        return None;
    }
    let mut dollar_moves = Vec::with_capacity(closes.len() - days);
    let mut pct_moves = Vec::with_capacity(closes.len() - days);
    let mut ups = 0usize;
    for i in days..closes.len() {
        let delta = closes[i] - closes[i - days];
        if delta > 0.0 {
            ups += 1;
        }
        dollar_moves.push(delta.abs());
        if closes[i - days] != 0.0 {
            pct_moves.push((delta / closes[i - days]).abs() * 100.0);
        }
    }

    let n = dollar_moves.len() as f64;
    let avg_dollar = dollar_moves.iter().sum::<f64>() / n;
    let avg_pct = if pct_moves.is_empty() {
        0.0
    } else {
        pct_moves.iter().sum::<f64>() / pct_moves.len() as f64
    };
    let max_dollar = dollar_moves.iter().cloned().fold(0.0, f64::max);

    let mut dollars = Data::new(dollar_moves);
    let mut pcts = Data::new(pct_moves);

    Some(WindowStats {
        avg_dollar_move: avg_dollar,
        median_dollar_move: dollars.percentile(50),
        avg_pct_move: avg_pct,
        median_pct_move: if pcts.len() == 0 { 0.0 } else { pcts.percentile(50) },
        p25_dollar: dollars.percentile(25),
        p75_dollar: dollars.percentile(75),
        p90_dollar: dollars.percentile(90),
        max_dollar_move: max_dollar,
        up_fraction: ups as f64 / n,
    })
}

fn tier_window_stats(tier: AssetTier, window: LookbackWindow) -> WindowStats {
    let scale = (window.days() as f64).sqrt();
    let median = tier.base_daily_move() * scale;
    WindowStats {
        avg_dollar_move: median * 1.1,
        median_dollar_move: median,
        avg_pct_move: 1.2 * scale,
        median_pct_move: 1.0 * scale,
        p25_dollar: median * 0.6,
        p75_dollar: median * 1.5,
        p90_dollar: median * 2.2,
        max_dollar_move: median * 3.5,
        up_fraction: 0.5,
    }
}

fn build_profile(symbol: &str, closes: &[f64]) -> VelocityProfile {
    if closes.len() < MIN_HISTORY_POINTS {
        let tier = AssetTier::from_price(closes.last().copied().unwrap_or(0.0));
        tracing::debug!(
            symbol,
            points = closes.len(),
            ?tier,
            "insufficient history, using tier default velocity profile"
        );
        let windows = LookbackWindow::all()
            .into_iter()
            .map(|w| (w, tier_window_stats(tier, w)))
            .collect();
        return VelocityProfile {
            symbol: symbol.to_string(),
            windows,
            source: ProfileSource::TierDefault { tier },
            computed_at: Utc::now(),
        };
    }

    let tier = AssetTier::from_price(closes[closes.len() - 1]);
    let windows = LookbackWindow::all()
        .into_iter()
        .map(|w| {
            let stats = window_stats_from_closes(closes, w.days())
                .unwrap_or_else(|| tier_window_stats(tier, w));
            (w, stats)
        })
        .collect();

    VelocityProfile {
        symbol: symbol.to_string(),
        windows,
        source: ProfileSource::Empirical {
            points: closes.len(),
        },
        computed_at: Utc::now(),
    }
}

/// Computes and caches velocity profiles, keyed by normalized symbol with a
/// long TTL.
pub struct VelocityProfiler {
    cache: TtlCache<String, VelocityProfile>,
}

impl Default for VelocityProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl VelocityProfiler {
    pub fn new() -> Self {
        Self {
            cache: TtlCache::new(PROFILE_TTL),
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
        }
    }

    /// Cached per-window percentile statistics for a symbol, computed from
    /// a rolling scan over historical closes.
    pub fn profile(&self, symbol: &str, closes: &[f64]) -> VelocityProfile {
        let key = symbol.trim().to_ascii_uppercase();
        self.cache
            .get_or_insert_with(key.clone(), || build_profile(&key, closes))
    }

    /// Drop a cached profile (e.g. after a split or a data correction).
    pub fn invalidate(&self, symbol: &str) {
        self.cache.invalidate(&symbol.trim().to_ascii_uppercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trending_closes(n: usize) -> Vec<f64> {
        // Deterministic pseudo-noise around a rising line.
        (0..n)
            .map(|i| 100.0 + i as f64 * 0.3 + ((i * 7919) % 13) as f64 * 0.2)
            .collect()
    }

    #[test]
    fn percentiles_are_ordered_in_every_window() {
        let profile = build_profile("AAPL", &trending_closes(120));
        assert!(matches!(profile.source, ProfileSource::Empirical { points: 120 }));
        for window in LookbackWindow::all() {
            let s = profile.window(window);
            assert!(
                s.p25_dollar <= s.median_dollar_move
                    && s.median_dollar_move <= s.p75_dollar
                    && s.p75_dollar <= s.p90_dollar
                    && s.p90_dollar <= s.max_dollar_move,
                "percentile ordering violated for {window:?}: {s:?}"
            );
        }
    }

    #[test]
    fn thin_history_falls_back_to_tier_default() {
        let closes = vec![300.0; 10];
        let profile = build_profile("NVDA", &closes);
        assert_eq!(
            profile.source,
            ProfileSource::TierDefault {
                tier: AssetTier::LargeCap
            }
        );
        // Tier defaults also honor the percentile ordering.
        for window in LookbackWindow::all() {
            let s = profile.window(window);
            assert!(s.p25_dollar <= s.median_dollar_move && s.p90_dollar <= s.max_dollar_move);
        }
    }

    #[test]
    fn tier_from_price() {
        assert_eq!(AssetTier::from_price(400.0), AssetTier::LargeCap);
        assert_eq!(AssetTier::from_price(100.0), AssetTier::MidCap);
        assert_eq!(AssetTier::from_price(12.0), AssetTier::SmallCap);
    }

    #[test]
    fn profiler_caches_by_normalized_symbol() {
        let profiler = VelocityProfiler::new();
        let closes = trending_closes(90);
        let first = profiler.profile(" aapl ", &closes);
        // Different (even empty) closes on the second call: cache hit wins.
        let second = profiler.profile("AAPL", &[]);
        assert_eq!(first.computed_at, second.computed_at);
        assert!(matches!(second.source, ProfileSource::Empirical { .. }));
    }

    #[test]
    fn up_fraction_is_one_for_monotone_rise() {
        let closes: Vec<f64> = (0..60).map(|i| 50.0 + i as f64).collect();
        let profile = build_profile("XYZ", &closes);
        let s = profile.window(LookbackWindow::D7);
        assert_eq!(s.up_fraction, 1.0);
    }
}
