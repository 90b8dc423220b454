//! Independent second-opinion scoring of candidate signals.
//!
//! Scores a signal against its peers for the same instrument across six
//! weighted components, then filters, consolidates and ranks batches.
//! One malformed candidate never aborts a batch operation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use signal_core::{
    AggregatedSignal, PatternKind, QualityRating, QualityScore, SignalError, TtlCache,
};

/// External lookup of historical win rate by pattern and symbol.
pub trait AccuracyLookup: Send + Sync {
    fn win_rate(&self, kind: PatternKind, symbol: &str) -> Option<f64>;
}

/// Lookup that knows nothing; every pattern scores neutral.
pub struct NoHistory;

impl AccuracyLookup for NoHistory {
    fn win_rate(&self, _kind: PatternKind, _symbol: &str) -> Option<f64> {
        None
    }
}

/// Accuracy records are tracked per pattern, not per symbol; the symbol is
/// ignored.
impl AccuracyLookup for accuracy_engine::AccuracyEngine {
    fn win_rate(&self, kind: PatternKind, _symbol: &str) -> Option<f64> {
        self.record(kind).map(|r| r.win_rate)
    }
}

/// A scored signal with its dense rank (1 = best).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedSignal {
    pub rank: usize,
    pub signal: AggregatedSignal,
    pub score: QualityScore,
}

const LOOKUP_CACHE_TTL: Duration = Duration::from_secs(600);

pub struct QualityEngine {
    lookup: Arc<dyn AccuracyLookup>,
    lookup_cache: TtlCache<(PatternKind, String), Option<f64>>,
}

impl QualityEngine {
    pub fn new(lookup: Arc<dyn AccuracyLookup>) -> Self {
        Self {
            lookup,
            lookup_cache: TtlCache::new(LOOKUP_CACHE_TTL),
        }
    }

    /// Score one candidate against its peer set. Rejects malformed
    /// candidates with a descriptive error instead of scoring garbage.
    pub fn score(
        &self,
        signal: &AggregatedSignal,
        peers: &[AggregatedSignal],
    ) -> Result<QualityScore, SignalError> {
        validate(signal)?;

        let mut reasons = Vec::new();

        // Strength: 0-25, bands at 85/70/55.
        let strength = if signal.strength >= 85.0 {
            25.0
        } else if signal.strength >= 70.0 {
            20.0
        } else if signal.strength >= 55.0 {
            12.0
        } else {
            5.0
        };
        reasons.push(format!("strength {:.0} -> {:.0}/25", signal.strength, strength));

        // Confidence: 0-25, bands at .85/.70/.55.
        let confidence = if signal.confidence >= 0.85 {
            25.0
        } else if signal.confidence >= 0.70 {
            20.0
        } else if signal.confidence >= 0.55 {
            12.0
        } else {
            5.0
        };
        reasons.push(format!(
            "confidence {:.2} -> {:.0}/25",
            signal.confidence, confidence
        ));

        // Convergence: 0-20 from the fraction of peers voting the same way.
        let convergence = if peers.is_empty() {
            reasons.push("no peers; neutral convergence 5/20".to_string());
            5.0
        } else {
            let agreeing = peers
                .iter()
                .filter(|p| p.direction == signal.direction)
                .count();
            let fraction = agreeing as f64 / peers.len() as f64;
            let points = if fraction >= 0.9 {
                20.0
            } else if fraction >= 0.7 {
                15.0
            } else if fraction >= 0.5 {
                8.0
            } else {
                2.0
            };
            reasons.push(format!(
                "{agreeing}/{} peers agree -> {points:.0}/20",
                peers.len()
            ));
            points
        };

        // Historical accuracy: 0-15 from the cached pattern+symbol win rate.
        let historical_accuracy = match signal.primary {
            Some(kind) => {
                let win_rate = self
                    .lookup_cache
                    .get_or_insert_with((kind, signal.symbol.clone()), || {
                        self.lookup.win_rate(kind, &signal.symbol)
                    });
                match win_rate {
                    Some(wr) => {
                        let points = (wr * 15.0).clamp(0.0, 15.0);
                        reasons.push(format!(
                            "{} wins {:.0}% historically -> {points:.1}/15",
                            kind.name(),
                            wr * 100.0
                        ));
                        points
                    }
                    None => {
                        reasons.push("no pattern history; neutral 7.5/15".to_string());
                        7.5
                    }
                }
            }
            None => {
                reasons.push("no primary pattern; neutral 7.5/15".to_string());
                7.5
            }
        };

        // Risk/reward: 0-10.
        let risk_reward = if signal.risk_reward_ratio >= 1.5 {
            10.0
        } else if signal.risk_reward_ratio >= 1.0 {
            6.0
        } else {
            0.0
        };
        reasons.push(format!(
            "risk/reward {:.2} -> {risk_reward:.0}/10",
            signal.risk_reward_ratio
        ));

        // Timeframe alignment: 0-5 from the evaluation timeframe's weight.
        let timeframe_alignment = signal.timeframe.alignment_multiplier() * 5.0;
        reasons.push(format!(
            "{} alignment -> {timeframe_alignment:.1}/5",
            signal.timeframe.name()
        ));

        let overall = (strength
            + confidence
            + convergence
            + historical_accuracy
            + risk_reward
            + timeframe_alignment)
            .clamp(0.0, 100.0);

        Ok(QualityScore {
            strength,
            confidence,
            convergence,
            historical_accuracy,
            risk_reward,
            timeframe_alignment,
            overall,
            rating: QualityRating::from_overall(overall),
            reasons,
        })
    }

    /// Score a batch and drop everything below the threshold or rated
    /// Filtered. Malformed items are skipped and logged, never fatal.
    pub fn filter_by_quality(
        &self,
        signals: &[AggregatedSignal],
        min_score: f64,
    ) -> Vec<(AggregatedSignal, QualityScore)> {
        signals
            .iter()
            .filter_map(|signal| {
                let peers = peers_of(signal, signals);
                match self.score(signal, &peers) {
                    Ok(score)
                        if score.overall >= min_score
                            && score.rating != QualityRating::Filtered =>
                    {
                        Some((signal.clone(), score))
                    }
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!(signal = %signal.id, error = %e, "skipping malformed signal");
                        None
                    }
                }
            })
            .collect()
    }

    /// Keep only the highest-scoring signal per symbol.
    pub fn consolidate(&self, signals: &[AggregatedSignal]) -> Vec<(AggregatedSignal, QualityScore)> {
        let mut best: HashMap<String, (AggregatedSignal, QualityScore)> = HashMap::new();
        for signal in signals {
            let peers = peers_of(signal, signals);
            let score = match self.score(signal, &peers) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(signal = %signal.id, error = %e, "skipping malformed signal");
                    continue;
                }
            };
            match best.get(&signal.symbol) {
                Some((_, existing)) if existing.overall >= score.overall => {}
                _ => {
                    best.insert(signal.symbol.clone(), (signal.clone(), score));
                }
            }
        }
        let mut out: Vec<_> = best.into_values().collect();
        out.sort_by(|a, b| {
            b.1.overall
                .partial_cmp(&a.1.overall)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        out
    }

    /// Sort descending by overall score and assign dense ranks (equal
    /// scores share a rank).
    pub fn rank(&self, signals: &[AggregatedSignal]) -> Vec<RankedSignal> {
        let mut scored: Vec<(AggregatedSignal, QualityScore)> = signals
            .iter()
            .filter_map(|signal| {
                let peers = peers_of(signal, signals);
                match self.score(signal, &peers) {
                    Ok(score) => Some((signal.clone(), score)),
                    Err(e) => {
                        tracing::warn!(signal = %signal.id, error = %e, "skipping malformed signal");
                        None
                    }
                }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.overall
                .partial_cmp(&a.1.overall)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut ranked = Vec::with_capacity(scored.len());
        let mut rank = 0usize;
        let mut last_score = f64::NAN;
        for (signal, score) in scored {
            if score.overall != last_score {
                rank += 1;
                last_score = score.overall;
            }
            ranked.push(RankedSignal {
                rank,
                signal,
                score,
            });
        }
        ranked
    }
}

/// Peers: same-symbol signals other than the candidate itself.
fn peers_of(signal: &AggregatedSignal, all: &[AggregatedSignal]) -> Vec<AggregatedSignal> {
    all.iter()
        .filter(|p| p.symbol == signal.symbol && p.id != signal.id)
        .cloned()
        .collect()
}

fn validate(signal: &AggregatedSignal) -> Result<(), SignalError> {
    if !signal.price.is_finite() || signal.price <= 0.0 {
        return Err(SignalError::InvalidSignalShape(format!(
            "signal {} has invalid price {}",
            signal.id, signal.price
        )));
    }
    if !signal.confidence.is_finite() || !(0.0..=1.0).contains(&signal.confidence) {
        return Err(SignalError::InvalidSignalShape(format!(
            "signal {} has confidence {} outside [0,1]",
            signal.id, signal.confidence
        )));
    }
    if !signal.strength.is_finite() || !(0.0..=100.0).contains(&signal.strength) {
        return Err(SignalError::InvalidSignalShape(format!(
            "signal {} has strength {} outside [0,100]",
            signal.id, signal.strength
        )));
    }
    Ok(())
}
