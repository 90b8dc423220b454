use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One evaluation frame for a symbol: the current bar plus the previous
/// bar's close/volume for momentum checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketFrame {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub prev_close: f64,
    pub prev_volume: f64,
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

impl Direction {
    pub fn name(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
            Direction::Hold => "HOLD",
        }
    }
}

/// Timeframe for analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    Min1,
    Min5,
    Min15,
    Hour1,
    Hour4,
    Day1,
}

impl Timeframe {
    pub fn to_minutes(&self) -> i64 {
        match self {
            Timeframe::Min1 => 1,
            Timeframe::Min5 => 5,
            Timeframe::Min15 => 15,
            Timeframe::Hour1 => 60,
            Timeframe::Hour4 => 240,
            Timeframe::Day1 => 1440,
        }
    }

    /// Cross-timeframe confirmation proxy: shorter timeframes carry less
    /// weight, daily carries full weight.
    pub fn alignment_multiplier(&self) -> f64 {
        match self {
            Timeframe::Min1 => 0.6,
            Timeframe::Min5 => 0.7,
            Timeframe::Min15 => 0.75,
            Timeframe::Hour1 => 0.85,
            Timeframe::Hour4 => 0.9,
            Timeframe::Day1 => 1.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Timeframe::Min1 => "1m",
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
            Timeframe::Day1 => "1d",
        }
    }

    pub fn all() -> [Timeframe; 6] {
        [
            Timeframe::Min1,
            Timeframe::Min5,
            Timeframe::Min15,
            Timeframe::Hour1,
            Timeframe::Hour4,
            Timeframe::Day1,
        ]
    }
}

/// Closed set of detectable technical patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PatternKind {
    RsiOversoldReversal,
    RsiOverboughtReversal,
    MacdBullishCross,
    MacdBearishCross,
    EmaGoldenCross,
    EmaDeathCross,
    SupportBounce,
    ResistanceRejection,
    BreakoutHigh,
    BreakdownLow,
    VolumeSpike,
    BullishDivergence,
    BearishDivergence,
    /// Synthesized when three or more independent patterns fire together.
    Confluence,
}

impl PatternKind {
    pub fn name(&self) -> &'static str {
        match self {
            PatternKind::RsiOversoldReversal => "RSI Oversold Reversal",
            PatternKind::RsiOverboughtReversal => "RSI Overbought Reversal",
            PatternKind::MacdBullishCross => "MACD Bullish Cross",
            PatternKind::MacdBearishCross => "MACD Bearish Cross",
            PatternKind::EmaGoldenCross => "EMA Golden Cross",
            PatternKind::EmaDeathCross => "EMA Death Cross",
            PatternKind::SupportBounce => "Support Bounce",
            PatternKind::ResistanceRejection => "Resistance Rejection",
            PatternKind::BreakoutHigh => "Breakout High",
            PatternKind::BreakdownLow => "Breakdown Low",
            PatternKind::VolumeSpike => "Volume Spike",
            PatternKind::BullishDivergence => "Bullish Divergence",
            PatternKind::BearishDivergence => "Bearish Divergence",
            PatternKind::Confluence => "Confluence",
        }
    }

    /// Directional bias this pattern expresses on its own.
    pub fn bias(&self) -> Direction {
        match self {
            PatternKind::RsiOversoldReversal
            | PatternKind::MacdBullishCross
            | PatternKind::EmaGoldenCross
            | PatternKind::SupportBounce
            | PatternKind::BreakoutHigh
            | PatternKind::BullishDivergence => Direction::Buy,
            PatternKind::RsiOverboughtReversal
            | PatternKind::MacdBearishCross
            | PatternKind::EmaDeathCross
            | PatternKind::ResistanceRejection
            | PatternKind::BreakdownLow
            | PatternKind::BearishDivergence => Direction::Sell,
            PatternKind::VolumeSpike | PatternKind::Confluence => Direction::Hold,
        }
    }
}

/// A detected pattern with its fixed base scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub kind: PatternKind,
    /// 0.0 to 1.0
    pub confidence: f64,
    /// 0 to 100
    pub strength: f64,
    pub reasoning: String,
}

/// Indicator snapshot consumed by the pattern classifier. Everything except
/// the current price is optional; absent indicators skip only the checks
/// that need them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub price: f64,
    pub prev_price: Option<f64>,
    pub rsi: Option<f64>,
    pub macd_line: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub ema_20: Option<f64>,
    pub ema_50: Option<f64>,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    pub volume: Option<f64>,
    pub prev_volume: Option<f64>,
    pub divergence: Option<Divergence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Divergence {
    Bullish,
    Bearish,
}

/// Output of the external technical scanner for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerOutput {
    /// 0 to 100; above 65 reads bullish, below 35 bearish.
    pub technical_score: f64,
    pub indicators: IndicatorSnapshot,
}

/// An externally computed ML prediction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlPrediction {
    pub direction: Direction,
    /// 0.0 to 1.0
    pub probability: f64,
    pub timeframe: Timeframe,
}

/// An externally computed RL decision record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlDecision {
    pub action: Direction,
    pub q_value: f64,
}

/// Market regime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketRegime {
    TrendingBull,
    TrendingBear,
    Choppy,
    Volatile,
}

impl MarketRegime {
    pub fn name(&self) -> &'static str {
        match self {
            MarketRegime::TrendingBull => "Trending Bullish",
            MarketRegime::TrendingBear => "Trending Bearish",
            MarketRegime::Choppy => "Choppy",
            MarketRegime::Volatile => "Volatile",
        }
    }

    pub fn is_trending(&self) -> bool {
        matches!(self, MarketRegime::TrendingBull | MarketRegime::TrendingBear)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityBucket {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendLabel {
    Up,
    Down,
    Flat,
}

/// Recomputed fresh on every evaluation; never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub regime: MarketRegime,
    pub volatility_bucket: VolatilityBucket,
    /// Normalized regression slope of recent closes.
    pub momentum: f64,
    pub trend: TrendLabel,
}

/// Whether all upstream sources contributed to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Freshness {
    Fresh,
    /// One or more upstream sources were missing; neutral defaults were used.
    Degraded,
}

/// Per-source contribution to the blended confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceBreakdown {
    pub scanner: f64,
    pub ml: f64,
    pub rl: f64,
}

/// Local quality score assembled by the aggregator (additive point budget:
/// technical 40, ML 30, pattern accuracy 20, RL convergence 10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalQuality {
    pub technical: f64,
    pub ml: f64,
    pub accuracy: f64,
    pub rl: f64,
    pub total: f64,
    pub grade: SignalGrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl SignalGrade {
    pub fn from_points(total: f64) -> Self {
        if total >= 85.0 {
            SignalGrade::Excellent
        } else if total >= 70.0 {
            SignalGrade::Good
        } else if total >= 50.0 {
            SignalGrade::Fair
        } else {
            SignalGrade::Poor
        }
    }
}

/// The pipeline's final per-evaluation output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSignal {
    pub id: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub classifications: Vec<PatternMatch>,
    pub primary: Option<PatternKind>,
    /// 0.0 to 1.0
    pub confidence: f64,
    /// 0 to 100
    pub strength: f64,
    pub sources: SourceBreakdown,
    pub quality: LocalQuality,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward_ratio: f64,
    pub timeframe: Timeframe,
    pub timeframe_alignment: HashMap<Timeframe, f64>,
    pub freshness: Freshness,
    pub reasoning: String,
}

/// Categorical rating produced by the quality engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityRating {
    Filtered,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityRating {
    /// Fixed threshold bands over the overall 0-100 score.
    pub fn from_overall(overall: f64) -> Self {
        if overall >= 90.0 {
            QualityRating::Excellent
        } else if overall >= 75.0 {
            QualityRating::Good
        } else if overall >= 60.0 {
            QualityRating::Fair
        } else if overall >= 45.0 {
            QualityRating::Poor
        } else {
            QualityRating::Filtered
        }
    }
}

/// Second-opinion quality score: six weighted sub-scores summing to 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub strength: f64,
    pub confidence: f64,
    pub convergence: f64,
    pub historical_accuracy: f64,
    pub risk_reward: f64,
    pub timeframe_alignment: f64,
    pub overall: f64,
    pub rating: QualityRating,
    pub reasons: Vec<String>,
}

/// Holding-period category for a qualifying signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeKind {
    Scalp,
    Day,
    Swing,
    Position,
}

impl TradeKind {
    pub fn name(&self) -> &'static str {
        match self {
            TradeKind::Scalp => "SCALP",
            TradeKind::Day => "DAY",
            TradeKind::Swing => "SWING",
            TradeKind::Position => "POSITION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStrategy {
    AllAtOnce,
    /// Staged entry in three increments.
    Pyramid3,
}

/// Produced once per candidate entry; not mutated downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeClassification {
    pub kind: TradeKind,
    pub holding_period_hours: f64,
    pub profit_target_pct: f64,
    pub profit_target_usd: Option<f64>,
    pub stop_loss_pct: f64,
    pub stop_loss_usd: Option<f64>,
    pub trailing_stop: bool,
    pub entry: EntryStrategy,
    pub confidence: f64,
    pub reasoning: String,
}

/// Kelly-style position sizing is a collaborator of this core, not owned by
/// it; the aggregator only consumes the multiplier.
pub trait PositionSizer: Send + Sync {
    fn size_position(&self, confidence: f64, regime: MarketRegime, pattern: PatternKind) -> f64;
}
