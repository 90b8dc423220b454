//! Historical replay of the signal pipeline with per-pattern verdicts.

pub mod engine;
pub mod metrics;
pub mod models;

pub use engine::Backtester;
pub use models::{
    BacktestConfig, BacktestReport, BarSource, ExitReason, PatternPerformance, Recommendation,
    TradeRecord,
};
