//! Replays the classification pipeline over historical bars and scores
//! every pattern's realized performance.

use std::sync::Arc;

use rayon::prelude::*;
use signal_core::{Bar, Direction, IndicatorSnapshot, Timeframe};

use accuracy_engine::AccuracyEngine;
use trade_classifier::ClassificationFactors;

use crate::metrics;
use crate::models::{
    BacktestConfig, BacktestReport, BarSource, ExitReason, PatternPerformance, Recommendation,
    TradeRecord,
};

/// Bars scanned for support/resistance levels.
const LEVEL_LOOKBACK: usize = 20;
const REGIME_LOOKBACK: usize = 40;
const RSI_PERIOD: usize = 14;
const ADX_PERIOD: usize = 14;

pub struct Backtester {
    config: BacktestConfig,
    accuracy: Option<Arc<AccuracyEngine>>,
}

impl Backtester {
    pub fn new(config: BacktestConfig) -> Self {
        Self {
            config,
            accuracy: None,
        }
    }

    /// Feed every simulated outcome into an accuracy engine, warm-starting
    /// it for live use.
    pub fn with_accuracy(config: BacktestConfig, accuracy: Arc<AccuracyEngine>) -> Self {
        Self {
            config,
            accuracy: Some(accuracy),
        }
    }

    /// Run the full backtest. Symbols are simulated in parallel; a symbol
    /// whose bars cannot be resolved is skipped, never fatal.
    pub fn run(&self, source: &dyn BarSource) -> BacktestReport {
        let per_symbol: Vec<Option<Vec<TradeRecord>>> = self
            .config
            .symbols
            .par_iter()
            .map(|symbol| match source.bars(symbol) {
                Ok(bars) => Some(self.simulate_symbol(symbol, &bars)),
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "skipping symbol");
                    None
                }
            })
            .collect();

        let symbols_skipped = per_symbol.iter().filter(|r| r.is_none()).count();
        let mut trades: Vec<TradeRecord> = per_symbol.into_iter().flatten().flatten().collect();
        trades.sort_by_key(|t| t.entry_time);

        if let Some(accuracy) = &self.accuracy {
            for trade in &trades {
                accuracy.record_outcome_for(
                    trade.pattern,
                    Some(Timeframe::Day1),
                    trade.won(),
                    trade.risk_reward,
                );
            }
        }

        self.report(trades, symbols_skipped)
    }

    fn report(&self, trades: Vec<TradeRecord>, symbols_skipped: usize) -> BacktestReport {
        let returns: Vec<f64> = trades.iter().map(|t| t.return_pct).collect();
        let weighted: Vec<f64> = trades.iter().map(|t| t.weighted_return_pct).collect();
        let avg_holding_bars = if trades.is_empty() {
            0.0
        } else {
            trades.iter().map(|t| t.holding_bars as f64).sum::<f64>() / trades.len() as f64
        };
        // Daily bars, so holding bars double as holding days.
        let avg_holding_days = avg_holding_bars.max(1.0);

        let per_pattern = self.per_pattern(&trades, avg_holding_days);

        let total_return_pct =
            (returns.iter().fold(1.0, |acc, r| acc * (1.0 + r / 100.0)) - 1.0) * 100.0;
        let total_holding_days: f64 = trades.iter().map(|t| t.holding_bars as f64).sum();
        let annualized_return_pct = if total_holding_days > 0.0 {
            (((1.0 + total_return_pct / 100.0).powf(252.0 / total_holding_days)) - 1.0) * 100.0
        } else {
            0.0
        };

        BacktestReport {
            symbols_tested: self.config.symbols.len() - symbols_skipped,
            symbols_skipped,
            total_trades: trades.len(),
            win_rate: metrics::win_rate(&returns),
            avg_return_pct: average(&returns),
            avg_weighted_return_pct: average(&weighted),
            total_return_pct,
            annualized_return_pct,
            profit_factor: metrics::profit_factor(&returns),
            sharpe_ratio: metrics::sharpe_ratio(
                &returns,
                self.config.risk_free_rate,
                avg_holding_days,
            ),
            sortino_ratio: metrics::sortino_ratio(
                &returns,
                self.config.risk_free_rate,
                avg_holding_days,
            ),
            max_drawdown_pct: metrics::max_drawdown_pct(&returns),
            avg_holding_bars,
            per_pattern,
            trades,
        }
    }

    fn per_pattern(&self, trades: &[TradeRecord], avg_holding_days: f64) -> Vec<PatternPerformance> {
        let mut by_pattern: std::collections::BTreeMap<_, Vec<&TradeRecord>> =
            std::collections::BTreeMap::new();
        for trade in trades {
            by_pattern.entry(trade.pattern).or_default().push(trade);
        }

        by_pattern
            .into_iter()
            .map(|(pattern, group)| {
                let returns: Vec<f64> = group.iter().map(|t| t.return_pct).collect();
                let wins = group.iter().filter(|t| t.won()).count();
                let losses = group.iter().filter(|t| t.return_pct < 0.0).count();
                let win_rate = metrics::win_rate(&returns);
                let avg_return_pct = average(&returns);
                let sharpe_ratio = metrics::sharpe_ratio(
                    &returns,
                    self.config.risk_free_rate,
                    avg_holding_days,
                );
                let recommendation = recommend(
                    self.config.min_sample_size,
                    group.len(),
                    win_rate,
                    avg_return_pct,
                    sharpe_ratio,
                );
                PatternPerformance {
                    pattern,
                    trades: group.len(),
                    wins,
                    losses,
                    win_rate,
                    avg_return_pct,
                    profit_factor: metrics::profit_factor(&returns),
                    sharpe_ratio,
                    recommendation,
                }
            })
            .collect()
    }

    fn simulate_symbol(&self, symbol: &str, bars: &[Bar]) -> Vec<TradeRecord> {
        let warmup = self.config.warmup_bars.max(LEVEL_LOOKBACK + 1);
        if bars.len() <= warmup + 1 {
            tracing::debug!(symbol, bars = bars.len(), "not enough history to simulate");
            return Vec::new();
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let ema12 = ema_series(&closes, 12);
        let ema26 = ema_series(&closes, 26);
        let ema20 = ema_series(&closes, 20);
        let ema50 = ema_series(&closes, 50);
        let macd_line: Vec<f64> = ema12
            .iter()
            .zip(&ema26)
            .map(|(fast, slow)| fast - slow)
            .collect();
        let macd_signal = ema_series(&macd_line, 9);
        let rsi = rsi_series(&closes, RSI_PERIOD);

        let mut trades = Vec::new();
        let mut i = warmup;
        while i < bars.len() - 1 {
            let snapshot = IndicatorSnapshot {
                price: closes[i],
                prev_price: Some(closes[i - 1]),
                rsi: Some(rsi[i]),
                macd_line: Some(macd_line[i]),
                macd_signal: Some(macd_signal[i]),
                macd_histogram: Some(macd_line[i] - macd_signal[i]),
                ema_20: Some(ema20[i]),
                ema_50: Some(ema50[i]),
                support: bars[i - LEVEL_LOOKBACK..i]
                    .iter()
                    .map(|b| b.low)
                    .fold(f64::INFINITY, f64::min)
                    .into(),
                resistance: bars[i - LEVEL_LOOKBACK..i]
                    .iter()
                    .map(|b| b.high)
                    .fold(f64::NEG_INFINITY, f64::max)
                    .into(),
                volume: Some(bars[i].volume),
                prev_volume: Some(bars[i - 1].volume),
                divergence: None,
            };

            let patterns = pattern_classifier::classify(&snapshot);
            let Some(primary) = pattern_classifier::primary(&patterns).cloned() else {
                i += 1;
                continue;
            };
            let direction = primary.kind.bias();
            if direction == Direction::Hold {
                i += 1;
                continue;
            }

            let window = &bars[..=i];
            let regime_window = &window[window.len().saturating_sub(REGIME_LOOKBACK)..];
            let regime = regime_weighting::classify_regime(regime_window).regime;
            let adx =
                regime_weighting::metrics::adx(window, ADX_PERIOD).unwrap_or(20.0);
            let recent_vol =
                regime_weighting::metrics::return_volatility(&closes[i.saturating_sub(10)..=i]);
            let baseline_vol =
                regime_weighting::metrics::return_volatility(&closes[i.saturating_sub(30)..=i]);
            let volatility_ratio = if baseline_vol > 0.0 {
                recent_vol / baseline_vol
            } else {
                1.0
            };
            let avg_volume = bars[i - LEVEL_LOOKBACK..i]
                .iter()
                .map(|b| b.volume)
                .sum::<f64>()
                / LEVEL_LOOKBACK as f64;
            let volume_ratio = if avg_volume > 0.0 {
                bars[i].volume / avg_volume
            } else {
                1.0
            };

            let classification = trade_classifier::classify(&ClassificationFactors {
                volatility_ratio,
                adx,
                volume_ratio,
                pattern: Some(primary.kind),
                regime: Some(regime),
            });
            let holding_bars = ((classification.holding_period_hours / 24.0).ceil() as usize).max(1);

            let entry = closes[i];
            let (target, stop) = match direction {
                Direction::Sell => (
                    entry * (1.0 - classification.profit_target_pct / 100.0),
                    entry * (1.0 + classification.stop_loss_pct / 100.0),
                ),
                _ => (
                    entry * (1.0 + classification.profit_target_pct / 100.0),
                    entry * (1.0 - classification.stop_loss_pct / 100.0),
                ),
            };

            let horizon = (i + holding_bars).min(bars.len() - 1);
            let mut exit_index = horizon;
            let mut exit_price = closes[horizon];
            let mut exit_reason = ExitReason::Horizon;
            for (j, bar) in bars.iter().enumerate().take(horizon + 1).skip(i + 1) {
                if let Some((price, reason)) = resolve_exit(bar, direction, target, stop) {
                    exit_index = j;
                    exit_price = price;
                    exit_reason = reason;
                    break;
                }
            }

            let raw_return = (exit_price - entry) / entry * 100.0;
            let return_pct = match direction {
                Direction::Sell => -raw_return,
                _ => raw_return,
            };

            trades.push(TradeRecord {
                symbol: symbol.to_string(),
                pattern: primary.kind,
                trade_kind: classification.kind,
                direction,
                entry_time: bars[i].timestamp,
                exit_time: bars[exit_index].timestamp,
                entry_price: entry,
                exit_price,
                return_pct,
                weighted_return_pct: return_pct * classification.confidence,
                risk_reward: classification.profit_target_pct / classification.stop_loss_pct,
                holding_bars: exit_index - i,
                exit_reason,
            });

            // One open position per symbol at a time.
            i = exit_index;
        }
        trades
    }
}

/// Per-pattern verdict. Thin samples always go to review; the remove rule
/// requires both a losing win rate and negative expectancy.
fn recommend(
    min_sample_size: usize,
    trades: usize,
    win_rate: f64,
    avg_return_pct: f64,
    sharpe_ratio: f64,
) -> Recommendation {
    if trades < min_sample_size {
        return Recommendation::Review;
    }
    if win_rate < 0.45 && avg_return_pct < 0.0 {
        return Recommendation::Remove;
    }
    if win_rate < 0.50 || sharpe_ratio < 0.5 {
        return Recommendation::Review;
    }
    Recommendation::Keep
}

/// Intra-bar exit resolution. When a single bar spans both levels the
/// target wins the tie.
fn resolve_exit(
    bar: &Bar,
    direction: Direction,
    target: f64,
    stop: f64,
) -> Option<(f64, ExitReason)> {
    match direction {
        Direction::Sell => {
            if bar.low <= target {
                Some((target, ExitReason::Target))
            } else if bar.high >= stop {
                Some((stop, ExitReason::Stop))
            } else {
                None
            }
        }
        _ => {
            if bar.high >= target {
                Some((target, ExitReason::Target))
            } else if bar.low <= stop {
                Some((stop, ExitReason::Stop))
            } else {
                None
            }
        }
    }
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = values[0];
    for &v in values {
        ema = v * k + ema * (1.0 - k);
        out.push(ema);
    }
    out
}

/// Wilder RSI; indices before the first full period read neutral 50.
fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![50.0; closes.len()];
    if closes.len() <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let delta = closes[i] - closes[i - 1];
        if delta > 0.0 {
            avg_gain += delta;
        } else {
            avg_loss += -delta;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for i in period..closes.len() {
        if i > period {
            let delta = closes[i] - closes[i - 1];
            let gain = delta.max(0.0);
            let loss = (-delta).max(0.0);
            avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
            avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        }
        out[i] = if avg_gain == 0.0 && avg_loss == 0.0 {
            50.0
        } else if avg_loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use signal_core::{PatternKind, SignalError};

    struct FixedBars(std::collections::HashMap<String, Vec<Bar>>);

    impl BarSource for FixedBars {
        fn bars(&self, symbol: &str) -> Result<Vec<Bar>, SignalError> {
            self.0
                .get(symbol)
                .cloned()
                .ok_or_else(|| SignalError::MissingInputData(symbol.to_string()))
        }
    }

    fn daily_bars(closes: &[f64]) -> Vec<Bar> {
        let start = Utc::now() - Duration::days(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: start + Duration::days(i as i64),
                open: c,
                high: c + 0.5,
                low: c - 0.5,
                close: c,
                volume: 1_000_000.0,
            })
            .collect()
    }

    fn source(symbol: &str, closes: &[f64]) -> FixedBars {
        let mut map = std::collections::HashMap::new();
        map.insert(symbol.to_string(), daily_bars(closes));
        FixedBars(map)
    }

    fn config(symbols: &[&str]) -> BacktestConfig {
        BacktestConfig {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn trending_series_produces_winning_long_trades() {
        let closes: Vec<f64> = (0..140).map(|i| 100.0 + i as f64 * 2.0).collect();
        let backtester = Backtester::new(config(&["AAPL"]));
        let report = backtester.run(&source("AAPL", &closes));

        assert!(report.total_trades > 0, "no trades on a strong trend");
        assert!(report.win_rate > 0.9, "win rate was {}", report.win_rate);
        assert!(report.avg_return_pct > 0.0);
        // Horizon exits on the ramp realize different percentages per
        // entry price, so the ratio is strictly positive, not the
        // zero-variance fallback.
        assert!(report.sharpe_ratio > 0.0, "sharpe was {}", report.sharpe_ratio);
        assert!(report
            .trades
            .iter()
            .all(|t| t.direction == Direction::Buy));
    }

    #[test]
    fn flat_series_yields_no_trades_and_neutral_metrics() {
        let closes = vec![100.0; 140];
        let backtester = Backtester::new(config(&["XYZ"]));
        let report = backtester.run(&source("XYZ", &closes));

        assert_eq!(report.total_trades, 0);
        assert_eq!(report.win_rate, 0.5);
        assert_eq!(report.sharpe_ratio, 0.0);
        assert_eq!(report.max_drawdown_pct, 0.0);
    }

    #[test]
    fn unresolvable_symbol_is_skipped_not_fatal() {
        let closes: Vec<f64> = (0..140).map(|i| 100.0 + i as f64 * 2.0).collect();
        let backtester = Backtester::new(config(&["AAPL", "MISSING"]));
        let report = backtester.run(&source("AAPL", &closes));

        assert_eq!(report.symbols_skipped, 1);
        assert_eq!(report.symbols_tested, 1);
        assert!(report.total_trades > 0);
    }

    #[test]
    fn outcomes_warm_start_the_accuracy_engine() {
        let closes: Vec<f64> = (0..140).map(|i| 100.0 + i as f64 * 2.0).collect();
        let accuracy = Arc::new(AccuracyEngine::new());
        let backtester = Backtester::with_accuracy(config(&["AAPL"]), Arc::clone(&accuracy));
        let report = backtester.run(&source("AAPL", &closes));

        let recorded: u64 = accuracy
            .records()
            .iter()
            .map(|r| r.total_signals)
            .sum();
        assert_eq!(recorded as usize, report.total_trades);
    }

    #[test]
    fn target_wins_the_tie_when_one_bar_spans_both_levels() {
        let wide = Bar {
            timestamp: Utc::now(),
            open: 100.0,
            high: 120.0,
            low: 80.0,
            close: 100.0,
            volume: 1_000_000.0,
        };
        let (price, reason) = resolve_exit(&wide, Direction::Buy, 110.0, 90.0).unwrap();
        assert_eq!(reason, ExitReason::Target);
        assert_eq!(price, 110.0);

        let (price, reason) = resolve_exit(&wide, Direction::Sell, 90.0, 110.0).unwrap();
        assert_eq!(reason, ExitReason::Target);
        assert_eq!(price, 90.0);
    }

    #[test]
    fn recommendation_rules() {
        // Thin sample: always review.
        assert_eq!(recommend(50, 10, 0.9, 2.0, 2.0), Recommendation::Review);
        // Losing win rate with negative expectancy: remove.
        assert_eq!(recommend(50, 80, 0.40, -0.5, -0.2), Recommendation::Remove);
        // Sub-coin-flip win rate alone: review.
        assert_eq!(recommend(50, 80, 0.48, 0.3, 1.0), Recommendation::Review);
        // Weak risk-adjusted returns: review.
        assert_eq!(recommend(50, 80, 0.60, 0.5, 0.2), Recommendation::Review);
        // Healthy on all counts: keep.
        assert_eq!(recommend(50, 80, 0.60, 0.8, 1.2), Recommendation::Keep);
    }

    #[test]
    fn per_pattern_breakdown_accounts_for_every_trade() {
        let closes: Vec<f64> = (0..140).map(|i| 100.0 + i as f64 * 2.0).collect();
        let backtester = Backtester::new(config(&["AAPL"]));
        let report = backtester.run(&source("AAPL", &closes));

        let grouped: usize = report.per_pattern.iter().map(|p| p.trades).sum();
        assert_eq!(grouped, report.total_trades);
        assert!(report
            .per_pattern
            .iter()
            .any(|p| p.pattern == PatternKind::BreakoutHigh));
    }
}
