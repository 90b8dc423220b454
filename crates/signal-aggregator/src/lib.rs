//! Blends scanner, ML and RL opinions into one aggregated signal.
//!
//! The aggregator is the only component that writes [`AggregatedSignal`]s.
//! Every upstream input arrives already resolved; a missing source drops
//! out of the blend with its weight zeroed and marks the signal degraded
//! instead of failing the evaluation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use signal_core::{
    AggregatedSignal, Bar, Direction, Freshness, LocalQuality, MarketFrame, MlPrediction,
    PatternMatch, PositionSizer, RegimeSnapshot, RlDecision, ScannerOutput, SignalError,
    SignalGrade, SourceBreakdown, Timeframe, TradeClassification, TtlCache,
};

use accuracy_engine::AccuracyEngine;

/// Source weights in the blended confidence.
const SCANNER_WEIGHT: f64 = 0.40;
const ML_WEIGHT: f64 = 0.35;
const RL_WEIGHT: f64 = 0.25;

/// A neutral scanner read casts a half-strength hold vote.
const NEUTRAL_HOLD_VOTE: f64 = 0.5;

/// Scanner technical score above this reads bullish, below 100-this bearish.
const SCANNER_BULLISH_SCORE: f64 = 65.0;

/// RL action value below this magnitude is too indifferent to vote.
const RL_VOTE_MIN_Q: f64 = 0.2;

/// Range proxy for ATR when no classification supplies dollar targets:
/// 1.5x the evaluation bar's range, stop one proxy below, target two above.
const ATR_RANGE_MULT: f64 = 1.5;
const ATR_TARGET_MULT: f64 = 2.0;

/// Re-evaluating the same symbol within seconds returns the identical
/// signal; the cache key buckets timestamps into 10-second windows.
const SIGNAL_TTL: Duration = Duration::from_secs(30);
const CACHE_BUCKET_SECS: i64 = 10;

/// All upstream inputs for one evaluation, already fetched and decoded.
pub struct AggregateRequest<'a> {
    pub frame: &'a MarketFrame,
    /// Recent history for regime classification.
    pub bars: &'a [Bar],
    pub scanner: Option<&'a ScannerOutput>,
    pub ml: &'a [MlPrediction],
    pub rl: Option<&'a RlDecision>,
    /// Precomputed regime; when absent it is classified from `bars`.
    pub regime: Option<&'a RegimeSnapshot>,
    /// Holding-period classification with dollar targets, when available.
    pub classification: Option<&'a TradeClassification>,
}

pub struct SignalAggregator {
    accuracy: Arc<AccuracyEngine>,
    sizer: Option<Arc<dyn PositionSizer>>,
    timeframe: Timeframe,
    cache: TtlCache<(String, i64), AggregatedSignal>,
}

impl SignalAggregator {
    pub fn new(accuracy: Arc<AccuracyEngine>, timeframe: Timeframe) -> Self {
        Self {
            accuracy,
            sizer: None,
            timeframe,
            cache: TtlCache::new(SIGNAL_TTL),
        }
    }

    /// Attach an external position sizer consulted via
    /// [`position_multiplier`](Self::position_multiplier).
    pub fn with_sizer(mut self, sizer: Arc<dyn PositionSizer>) -> Self {
        self.sizer = Some(sizer);
        self
    }

    /// Produce the aggregated signal for one evaluation frame. Repeated
    /// calls within the TTL for the same symbol and time bucket return the
    /// cached signal unchanged.
    pub fn aggregate(
        &self,
        request: &AggregateRequest<'_>,
    ) -> Result<AggregatedSignal, SignalError> {
        let frame = request.frame;
        if !frame.close.is_finite() || frame.close <= 0.0 {
            return Err(SignalError::InvalidSignalShape(format!(
                "{}: invalid close price {}",
                frame.symbol, frame.close
            )));
        }
        let key = (
            frame.symbol.to_ascii_uppercase(),
            frame.timestamp.timestamp() / CACHE_BUCKET_SECS,
        );
        self.cache
            .get_or_try_insert_with(key, || Ok(self.build(request)))
    }

    /// Sizing multiplier from the attached position sizer, 1.0 when none
    /// is attached or the signal is a hold.
    pub fn position_multiplier(
        &self,
        signal: &AggregatedSignal,
        regime: signal_core::MarketRegime,
    ) -> f64 {
        match (&self.sizer, signal.primary) {
            (Some(sizer), Some(pattern)) if signal.direction != Direction::Hold => {
                sizer.size_position(signal.confidence, regime, pattern)
            }
            _ => 1.0,
        }
    }

    fn build(&self, request: &AggregateRequest<'_>) -> AggregatedSignal {
        let frame = request.frame;

        if request.scanner.is_none() && request.ml.is_empty() && request.rl.is_none() {
            tracing::warn!(symbol = %frame.symbol, "no upstream sources; emitting neutral hold");
            return self.neutral_hold(frame);
        }

        // Pattern classification runs off the scanner's indicator snapshot.
        let classifications: Vec<PatternMatch> = request
            .scanner
            .map(|s| pattern_classifier::classify(&s.indicators))
            .unwrap_or_default();
        let primary = pattern_classifier::primary(&classifications).cloned();

        // Per-source contributions. A missing source contributes nothing,
        // zeroing its weight in the blend. The technical read is discounted
        // on shorter frames as a cross-timeframe proxy.
        let mut degraded = false;
        let scanner_contribution = match request.scanner {
            Some(s) => {
                (s.technical_score / 100.0).clamp(0.0, 1.0)
                    * self.timeframe.alignment_multiplier()
            }
            None => {
                degraded = true;
                0.0
            }
        };
        let best_ml = request.ml.iter().max_by(|a, b| {
            a.probability
                .partial_cmp(&b.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let ml_contribution = match best_ml {
            Some(p) => p.probability.clamp(0.0, 1.0),
            None => {
                degraded = true;
                0.0
            }
        };
        let rl_contribution = match request.rl {
            Some(d) => d.q_value.abs().min(1.0),
            None => {
                degraded = true;
                0.0
            }
        };
        let sources = SourceBreakdown {
            scanner: scanner_contribution,
            ml: ml_contribution,
            rl: rl_contribution,
        };

        let base_confidence = SCANNER_WEIGHT * scanner_contribution
            + ML_WEIGHT * ml_contribution
            + RL_WEIGHT * rl_contribution;

        let direction = vote_direction(request.scanner, best_ml, request.rl);

        // Regime: the caller's snapshot when supplied, classified otherwise.
        let regime = match request.regime {
            Some(snap) => snap.regime,
            None => regime_weighting::classify_regime(request.bars).regime,
        };

        // Historical accuracy adjustment on the primary pattern.
        let mut reasoning_parts: Vec<String> = Vec::new();
        let (confidence, pattern_accuracy) = match &primary {
            Some(p) => {
                let adj = self.accuracy.adjust(base_confidence, p.kind, self.timeframe);
                reasoning_parts.push(adj.note.clone());
                (adj.adjusted_confidence, adj.pattern_accuracy)
            }
            None => {
                reasoning_parts.push("no pattern detected".to_string());
                (base_confidence.clamp(0.0, 1.0), 0.5)
            }
        };

        // Strength: the primary pattern's strength, regime-weighted and
        // confluence-boosted.
        let strengths: Vec<f64> = classifications.iter().map(|c| c.strength).collect();
        let base_strength = primary.as_ref().map(|p| p.strength).unwrap_or(50.0);
        let weighted_strength = match &primary {
            Some(p) => base_strength * regime_weighting::pattern_weight(regime, p.kind),
            None => base_strength,
        };
        let strength =
            regime_weighting::confluence_boost(weighted_strength, &strengths).clamp(0.0, 100.0);

        for c in &classifications {
            reasoning_parts.push(c.reasoning.clone());
        }
        reasoning_parts.push(format!("regime: {}", regime.name()));

        if degraded {
            tracing::debug!(symbol = %frame.symbol, "one or more sources missing; their weights zeroed");
        }

        let (stop_loss, take_profit) = targets(frame, direction, request.classification);
        let risk = (frame.close - stop_loss).abs();
        let risk_reward_ratio = if risk > 0.0 {
            (take_profit - frame.close).abs() / risk
        } else {
            0.0
        };

        // Local additive quality budget: technical 40, ML 30, accuracy 20,
        // RL convergence 10.
        let technical = scanner_contribution * 40.0;
        let ml_points = ml_contribution * 30.0;
        let accuracy_points = pattern_accuracy * 20.0;
        let rl_points = rl_contribution * 10.0;
        let total = technical + ml_points + accuracy_points + rl_points;
        let quality = LocalQuality {
            technical,
            ml: ml_points,
            accuracy: accuracy_points,
            rl: rl_points,
            total,
            grade: SignalGrade::from_points(total),
        };

        // Per-timeframe alignment: ML predictions agreeing with the final
        // direction contribute their probability, scaled by that
        // timeframe's weight.
        let mut timeframe_alignment = std::collections::HashMap::new();
        for prediction in request.ml {
            if prediction.direction == direction {
                timeframe_alignment.insert(
                    prediction.timeframe,
                    prediction.probability * prediction.timeframe.alignment_multiplier(),
                );
            }
        }
        timeframe_alignment
            .entry(self.timeframe)
            .or_insert_with(|| self.timeframe.alignment_multiplier());

        AggregatedSignal {
            id: signal_id(&frame.symbol, frame.timestamp),
            symbol: frame.symbol.clone(),
            timestamp: frame.timestamp,
            direction,
            classifications,
            primary: primary.map(|p| p.kind),
            confidence,
            strength,
            sources,
            quality,
            price: frame.close,
            stop_loss,
            take_profit,
            risk_reward_ratio,
            timeframe: self.timeframe,
            timeframe_alignment,
            freshness: if degraded {
                Freshness::Degraded
            } else {
                Freshness::Fresh
            },
            reasoning: reasoning_parts.join("; "),
        }
    }

    fn neutral_hold(&self, frame: &MarketFrame) -> AggregatedSignal {
        AggregatedSignal {
            id: signal_id(&frame.symbol, frame.timestamp),
            symbol: frame.symbol.clone(),
            timestamp: frame.timestamp,
            direction: Direction::Hold,
            classifications: Vec::new(),
            primary: None,
            confidence: 0.5,
            strength: 0.0,
            sources: SourceBreakdown {
                scanner: 0.0,
                ml: 0.0,
                rl: 0.0,
            },
            quality: LocalQuality {
                technical: 0.0,
                ml: 0.0,
                accuracy: 0.0,
                rl: 0.0,
                total: 0.0,
                grade: SignalGrade::Poor,
            },
            price: frame.close,
            stop_loss: frame.close,
            take_profit: frame.close,
            risk_reward_ratio: 0.0,
            timeframe: self.timeframe,
            timeframe_alignment: std::collections::HashMap::new(),
            freshness: Freshness::Degraded,
            reasoning: "no upstream data".to_string(),
        }
    }

    /// Drop the cached signal for a symbol's current time bucket.
    pub fn invalidate(&self, symbol: &str, timestamp: DateTime<Utc>) {
        self.cache.invalidate(&(
            symbol.to_ascii_uppercase(),
            timestamp.timestamp() / CACHE_BUCKET_SECS,
        ));
    }
}

fn signal_id(symbol: &str, timestamp: DateTime<Utc>) -> String {
    format!("{}-{}", symbol.to_ascii_uppercase(), timestamp.timestamp_millis())
}

/// Per-direction vote totals across the three sources; the largest total
/// wins and any tie holds. A neutral scanner read votes hold at half
/// strength; an indifferent RL action abstains entirely.
fn vote_direction(
    scanner: Option<&ScannerOutput>,
    best_ml: Option<&MlPrediction>,
    rl: Option<&RlDecision>,
) -> Direction {
    let mut buy = 0.0;
    let mut sell = 0.0;
    let mut hold = 0.0;
    if let Some(s) = scanner {
        if s.technical_score > SCANNER_BULLISH_SCORE {
            buy += SCANNER_WEIGHT;
        } else if s.technical_score < 100.0 - SCANNER_BULLISH_SCORE {
            sell += SCANNER_WEIGHT;
        } else {
            hold += SCANNER_WEIGHT * NEUTRAL_HOLD_VOTE;
        }
    }
    if let Some(p) = best_ml {
        match p.direction {
            Direction::Buy => buy += ML_WEIGHT * p.probability,
            Direction::Sell => sell += ML_WEIGHT * p.probability,
            Direction::Hold => hold += ML_WEIGHT * p.probability,
        }
    }
    if let Some(d) = rl {
        if d.q_value.abs() > RL_VOTE_MIN_Q {
            match d.action {
                Direction::Buy => buy += RL_WEIGHT,
                Direction::Sell => sell += RL_WEIGHT,
                Direction::Hold => hold += RL_WEIGHT,
            }
        }
    }
    if buy > sell && buy > hold {
        Direction::Buy
    } else if sell > buy && sell > hold {
        Direction::Sell
    } else {
        Direction::Hold
    }
}

/// Stop/target placement. Dollar targets from a holding-period
/// classification win when present; otherwise a range proxy for ATR is
/// used, with the sides swapped for short signals.
fn targets(
    frame: &MarketFrame,
    direction: Direction,
    classification: Option<&TradeClassification>,
) -> (f64, f64) {
    let price = frame.close;
    if let Some(c) = classification {
        if let (Some(tp_usd), Some(sl_usd)) = (c.profit_target_usd, c.stop_loss_usd) {
            return match direction {
                Direction::Sell => (price + sl_usd, price - tp_usd),
                _ => ((price - sl_usd).max(0.0), price + tp_usd),
            };
        }
    }

    let mut atr = ATR_RANGE_MULT * (frame.high - frame.low);
    if atr <= 0.0 {
        atr = price * 0.02;
    }
    match direction {
        Direction::Sell => (price + atr, price - atr * ATR_TARGET_MULT),
        _ => ((price - atr).max(0.0), price + atr * ATR_TARGET_MULT),
    }
}
