//! Historical accuracy tracking per pattern.
//!
//! Adjusts a base confidence using each pattern's realized win rate, and
//! maintains the per-pattern performance records those adjustments read.

use std::collections::HashMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use signal_core::{PatternKind, Timeframe};

/// Minimum realized trades before a pattern's record is treated as evidence
/// rather than noise.
pub const MIN_SAMPLE_SIZE: u64 = 30;

const CONFIDENCE_FLOOR: f64 = 0.10;
const CONFIDENCE_CEIL: f64 = 0.99;

/// Long-lived per-pattern performance record; mutated only when a realized
/// trade outcome is recorded, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternAccuracyRecord {
    pub kind: PatternKind,
    pub total_signals: u64,
    pub win_signals: u64,
    pub loss_signals: u64,
    pub win_rate: f64,
    pub avg_risk_reward: f64,
    /// win_signals / max(1, loss_signals)
    pub profit_factor: f64,
    pub by_timeframe: HashMap<Timeframe, TimeframeStats>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeframeStats {
    pub wins: u64,
    pub total: u64,
}

impl TimeframeStats {
    pub fn win_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.wins as f64 / self.total as f64
        }
    }
}

impl PatternAccuracyRecord {
    fn new(kind: PatternKind) -> Self {
        Self {
            kind,
            total_signals: 0,
            win_signals: 0,
            loss_signals: 0,
            win_rate: 0.0,
            avg_risk_reward: 0.0,
            profit_factor: 0.0,
            by_timeframe: HashMap::new(),
        }
    }

    /// Counters and derived fields move together; callers hold the per-key
    /// entry lock while this runs.
    fn apply_outcome(&mut self, timeframe: Option<Timeframe>, won: bool, risk_reward: f64) {
        self.total_signals += 1;
        if won {
            self.win_signals += 1;
        } else {
            self.loss_signals += 1;
        }
        self.win_rate = self.win_signals as f64 / self.total_signals as f64;
        self.profit_factor = self.win_signals as f64 / (self.loss_signals.max(1)) as f64;

        // Running average of realized risk/reward.
        let n = self.total_signals as f64;
        self.avg_risk_reward += (risk_reward - self.avg_risk_reward) / n;

        if let Some(tf) = timeframe {
            let stats = self.by_timeframe.entry(tf).or_default();
            stats.total += 1;
            if won {
                stats.wins += 1;
            }
        }
    }
}

/// Result of a confidence adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccuracyAdjustment {
    pub adjusted_confidence: f64,
    /// The pattern's historical accuracy (0.5 when no history exists).
    pub pattern_accuracy: f64,
    pub note: String,
}

/// Win-rate bucket boost. Historically poor patterns are actively
/// penalized, not just left unboosted.
fn win_rate_boost(win_rate: f64) -> f64 {
    if win_rate >= 0.75 {
        0.25
    } else if win_rate >= 0.70 {
        0.20
    } else if win_rate >= 0.60 {
        0.10
    } else if win_rate >= 0.50 {
        0.05
    } else {
        -0.15
    }
}

/// Per-pattern historical performance store. Constructed once at startup
/// and shared by reference; per-pattern updates are serialized by the
/// DashMap entry lock while reads see a consistent snapshot.
#[derive(Default)]
pub struct AccuracyEngine {
    records: DashMap<PatternKind, PatternAccuracyRecord>,
}

impl AccuracyEngine {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Seed with pre-existing records (warm start from persisted history or
    /// a backtest).
    pub fn with_records(records: impl IntoIterator<Item = PatternAccuracyRecord>) -> Self {
        let engine = Self::new();
        for record in records {
            engine.records.insert(record.kind, record);
        }
        engine
    }

    /// Adjust a base confidence using the pattern's historical win rate.
    ///
    /// No record means the input passes through unchanged with a neutral
    /// 0.5 accuracy. The adjusted value is clamped to [0.10, 0.99].
    pub fn adjust(
        &self,
        base_confidence: f64,
        kind: PatternKind,
        timeframe: Timeframe,
    ) -> AccuracyAdjustment {
        let record = match self.records.get(&kind) {
            Some(r) => r,
            None => {
                return AccuracyAdjustment {
                    adjusted_confidence: base_confidence,
                    pattern_accuracy: 0.5,
                    note: format!("{}: no history recorded", kind.name()),
                };
            }
        };

        let mut boost = win_rate_boost(record.win_rate);
        let mut note = format!(
            "{}: win rate {:.0}% over {} signals",
            kind.name(),
            record.win_rate * 100.0,
            record.total_signals
        );

        if let Some(stats) = record.by_timeframe.get(&timeframe) {
            if stats.total > 0 && stats.win_rate() > record.win_rate {
                boost += 0.05;
                note.push_str(&format!(
                    ", stronger on {} ({:.0}%)",
                    timeframe.name(),
                    stats.win_rate() * 100.0
                ));
            }
        }

        AccuracyAdjustment {
            adjusted_confidence: (base_confidence + boost).clamp(CONFIDENCE_FLOOR, CONFIDENCE_CEIL),
            pattern_accuracy: record.win_rate,
            note,
        }
    }

    /// Whether to trust this pattern at all: its win rate, discounted for a
    /// losing profit factor and for thin evidence.
    pub fn validity(&self, kind: PatternKind) -> f64 {
        let record = match self.records.get(&kind) {
            Some(r) => r,
            None => return 0.0,
        };
        let mut validity = record.win_rate;
        if record.profit_factor < 1.0 {
            validity *= 0.7;
        }
        if record.total_signals < MIN_SAMPLE_SIZE {
            validity *= 0.8;
        }
        validity
    }

    /// Record a realized trade outcome. The counter update, win-rate and
    /// profit-factor recompute happen atomically under the pattern's entry
    /// lock.
    pub fn record_outcome(&self, kind: PatternKind, won: bool, risk_reward: f64) {
        self.record_outcome_for(kind, None, won, risk_reward);
    }

    /// Same as [`record_outcome`], additionally folding the result into the
    /// pattern's per-timeframe win-rate map.
    pub fn record_outcome_for(
        &self,
        kind: PatternKind,
        timeframe: Option<Timeframe>,
        won: bool,
        risk_reward: f64,
    ) {
        let mut record = self
            .records
            .entry(kind)
            .or_insert_with(|| PatternAccuracyRecord::new(kind));
        record.apply_outcome(timeframe, won, risk_reward);
        tracing::debug!(
            pattern = kind.name(),
            won,
            win_rate = record.win_rate,
            total = record.total_signals,
            "recorded trade outcome"
        );
    }

    /// Validity-weighted average of each pattern's adjusted confidence.
    /// Returns 0.5 when the weight sum is zero (no usable history).
    pub fn ensemble_confidence(
        &self,
        patterns: &[(PatternKind, f64)],
        timeframe: Timeframe,
    ) -> f64 {
        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        for &(kind, base) in patterns {
            let weight = self.validity(kind);
            if weight > 0.0 {
                weighted_sum += self.adjust(base, kind, timeframe).adjusted_confidence * weight;
                weight_sum += weight;
            }
        }
        if weight_sum == 0.0 {
            0.5
        } else {
            weighted_sum / weight_sum
        }
    }

    /// Snapshot of all records for reporting.
    pub fn records(&self) -> Vec<PatternAccuracyRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    pub fn record(&self, kind: PatternKind) -> Option<PatternAccuracyRecord> {
        self.records.get(&kind).map(|r| r.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn seeded(kind: PatternKind, wins: u64, losses: u64) -> AccuracyEngine {
        let engine = AccuracyEngine::new();
        for _ in 0..wins {
            engine.record_outcome(kind, true, 2.0);
        }
        for _ in 0..losses {
            engine.record_outcome(kind, false, 2.0);
        }
        engine
    }

    #[test]
    fn record_invariants_hold_across_any_sequence() {
        let engine = AccuracyEngine::new();
        let outcomes = [true, false, true, true, false, true, false, false, true];
        for (i, &won) in outcomes.iter().enumerate() {
            engine.record_outcome_for(
                PatternKind::BreakoutHigh,
                Some(if i % 2 == 0 { Timeframe::Day1 } else { Timeframe::Hour1 }),
                won,
                1.5,
            );
            let record = engine.record(PatternKind::BreakoutHigh).unwrap();
            assert!(record.win_rate >= 0.0 && record.win_rate <= 1.0);
            assert!(record.win_signals + record.loss_signals <= record.total_signals);
        }
        let record = engine.record(PatternKind::BreakoutHigh).unwrap();
        assert_eq!(record.total_signals, 9);
        assert_eq!(record.win_signals, 5);
        assert_relative_eq!(record.win_rate, 5.0 / 9.0);
        assert_relative_eq!(record.avg_risk_reward, 1.5, epsilon = 1e-9);
    }

    #[test]
    fn boost_is_monotone_in_win_rate_bucket() {
        let boosts = [
            win_rate_boost(0.45),
            win_rate_boost(0.50),
            win_rate_boost(0.60),
            win_rate_boost(0.70),
            win_rate_boost(0.75),
        ];
        assert!(boosts.windows(2).all(|w| w[0] <= w[1]));
        assert!(boosts[0] < 0.0);
    }

    #[test]
    fn no_history_returns_neutral() {
        let engine = AccuracyEngine::new();
        let adj = engine.adjust(0.7, PatternKind::SupportBounce, Timeframe::Day1);
        assert_eq!(adj.adjusted_confidence, 0.7);
        assert_eq!(adj.pattern_accuracy, 0.5);
        assert!(adj.note.contains("no history"));
    }

    #[test]
    fn adjusted_confidence_stays_clamped() {
        // 80% winner: +0.25 boost must not push past 0.99.
        let engine = seeded(PatternKind::BreakoutHigh, 80, 20);
        let adj = engine.adjust(0.95, PatternKind::BreakoutHigh, Timeframe::Day1);
        assert!(adj.adjusted_confidence <= 0.99);

        // 20% winner: -0.15 must not drop below 0.10.
        let engine = seeded(PatternKind::BreakdownLow, 20, 80);
        let adj = engine.adjust(0.15, PatternKind::BreakdownLow, Timeframe::Day1);
        assert!(adj.adjusted_confidence >= 0.10);
    }

    #[test]
    fn timeframe_edge_adds_five_points() {
        let engine = AccuracyEngine::new();
        // Overall 50%, but 100% on daily.
        engine.record_outcome_for(PatternKind::EmaGoldenCross, Some(Timeframe::Day1), true, 2.0);
        engine.record_outcome_for(PatternKind::EmaGoldenCross, Some(Timeframe::Hour1), false, 2.0);

        let adj = engine.adjust(0.6, PatternKind::EmaGoldenCross, Timeframe::Day1);
        // 0.6 + 0.05 (>=0.50 bucket) + 0.05 (timeframe edge)
        assert_relative_eq!(adj.adjusted_confidence, 0.70, epsilon = 1e-9);

        let off_tf = engine.adjust(0.6, PatternKind::EmaGoldenCross, Timeframe::Min5);
        assert_relative_eq!(off_tf.adjusted_confidence, 0.65, epsilon = 1e-9);
    }

    #[test]
    fn validity_discounts_thin_or_losing_records() {
        // 60% win rate but only 10 samples: 0.6 * 0.8.
        let engine = seeded(PatternKind::VolumeSpike, 6, 4);
        assert_relative_eq!(engine.validity(PatternKind::VolumeSpike), 0.6 * 0.8);

        // Losing profit factor with a big sample: 0.4 * 0.7.
        let engine = seeded(PatternKind::MacdBearishCross, 16, 24);
        assert_relative_eq!(engine.validity(PatternKind::MacdBearishCross), 0.4 * 0.7);
    }

    #[test]
    fn ensemble_neutral_when_no_history() {
        let engine = AccuracyEngine::new();
        let patterns = [(PatternKind::BreakoutHigh, 0.8), (PatternKind::VolumeSpike, 0.6)];
        assert_eq!(engine.ensemble_confidence(&patterns, Timeframe::Day1), 0.5);
    }

    #[test]
    fn ensemble_weights_by_validity() {
        let engine = seeded(PatternKind::BreakoutHigh, 40, 10); // strong record
        for _ in 0..20 {
            engine.record_outcome(PatternKind::VolumeSpike, false, 1.0);
        }
        for _ in 0..20 {
            engine.record_outcome(PatternKind::VolumeSpike, true, 1.0);
        }
        let blended = engine.ensemble_confidence(
            &[(PatternKind::BreakoutHigh, 0.8), (PatternKind::VolumeSpike, 0.4)],
            Timeframe::Day1,
        );
        // Pulled toward the high-validity breakout pattern.
        assert!(blended > 0.6);
        assert!(blended <= 0.99);
    }
}
