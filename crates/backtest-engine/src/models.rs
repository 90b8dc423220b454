use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signal_core::{Bar, Direction, PatternKind, SignalError, TradeKind};

/// Configuration for a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub symbols: Vec<String>,
    /// Annual risk-free rate used in Sharpe/Sortino.
    pub risk_free_rate: f64,
    /// Trades below this count per pattern force a Review verdict.
    pub min_sample_size: usize,
    /// Bars consumed before the first evaluation.
    pub warmup_bars: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            risk_free_rate: 0.02,
            min_sample_size: 50,
            warmup_bars: 60,
        }
    }
}

/// Resolved historical bars for a symbol. Implementations wrap whatever
/// store holds the data; the engine never fetches anything itself.
pub trait BarSource: Send + Sync {
    fn bars(&self, symbol: &str) -> Result<Vec<Bar>, SignalError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Target,
    Stop,
    /// Holding horizon elapsed; closed at the final bar's close.
    Horizon,
}

/// One simulated round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub pattern: PatternKind,
    pub trade_kind: TradeKind,
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Sign-adjusted: positive means the direction was right.
    pub return_pct: f64,
    /// Return scaled by the pattern's detection confidence.
    pub weighted_return_pct: f64,
    /// Planned target distance over stop distance at entry.
    pub risk_reward: f64,
    pub holding_bars: usize,
    pub exit_reason: ExitReason,
}

impl TradeRecord {
    pub fn won(&self) -> bool {
        self.return_pct > 0.0
    }
}

/// Verdict on whether a pattern should stay in production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    Keep,
    Review,
    Remove,
}

impl Recommendation {
    pub fn name(&self) -> &'static str {
        match self {
            Recommendation::Keep => "KEEP",
            Recommendation::Review => "REVIEW",
            Recommendation::Remove => "REMOVE",
        }
    }
}

/// Realized performance of one pattern across the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternPerformance {
    pub pattern: PatternKind,
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub avg_return_pct: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub recommendation: Recommendation,
}

/// Full result of a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub symbols_tested: usize,
    pub symbols_skipped: usize,
    pub total_trades: usize,
    pub win_rate: f64,
    pub avg_return_pct: f64,
    pub avg_weighted_return_pct: f64,
    /// Compounded return across all trades in entry order.
    pub total_return_pct: f64,
    pub annualized_return_pct: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown_pct: f64,
    pub avg_holding_bars: f64,
    pub per_pattern: Vec<PatternPerformance>,
    pub trades: Vec<TradeRecord>,
}
