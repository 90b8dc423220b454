//! Performance metrics over simulated trade returns.

/// Win rate over decisive trades only; flat outcomes count neither way.
/// No decisive trades reads as a coin flip, not a 0% strategy.
pub fn win_rate(returns_pct: &[f64]) -> f64 {
    let wins = returns_pct.iter().filter(|&&r| r > 0.0).count();
    let losses = returns_pct.iter().filter(|&&r| r < 0.0).count();
    let decisive = wins + losses;
    if decisive == 0 {
        0.5
    } else {
        wins as f64 / decisive as f64
    }
}

/// Gross profit over gross loss. All-winning runs report the gross profit
/// itself rather than infinity.
pub fn profit_factor(returns_pct: &[f64]) -> f64 {
    let gross_profit: f64 = returns_pct.iter().filter(|&&r| r > 0.0).sum();
    let gross_loss: f64 = returns_pct.iter().filter(|&&r| r < 0.0).map(|r| r.abs()).sum();
    if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else {
        gross_profit
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn std_dev(values: &[f64], center: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - center).powi(2)).sum::<f64>()
        / (values.len() as f64 - 1.0);
    variance.sqrt()
}

/// Annualized Sharpe ratio over per-trade percentage returns. The
/// annualization factor scales by how many holding periods fit in a
/// trading year; zero-variance series report 0.
pub fn sharpe_ratio(returns_pct: &[f64], risk_free_rate: f64, avg_holding_days: f64) -> f64 {
    if returns_pct.len() < 2 {
        return 0.0;
    }
    let periods_per_year = 252.0 / avg_holding_days.max(1.0);
    let per_period_rf = risk_free_rate / periods_per_year * 100.0;
    let excess: Vec<f64> = returns_pct.iter().map(|r| r - per_period_rf).collect();
    let m = mean(&excess);
    let sd = std_dev(&excess, m);
    if sd < 1e-10 {
        0.0
    } else {
        (m / sd) * periods_per_year.sqrt()
    }
}

/// Sortino: like Sharpe but penalizing only downside deviation. A run with
/// no losing periods reports 0 rather than infinity.
pub fn sortino_ratio(returns_pct: &[f64], risk_free_rate: f64, avg_holding_days: f64) -> f64 {
    if returns_pct.len() < 2 {
        return 0.0;
    }
    let periods_per_year = 252.0 / avg_holding_days.max(1.0);
    let per_period_rf = risk_free_rate / periods_per_year * 100.0;
    let excess: Vec<f64> = returns_pct.iter().map(|r| r - per_period_rf).collect();
    let m = mean(&excess);
    let downside: Vec<f64> = excess.iter().copied().filter(|&r| r < 0.0).collect();
    if downside.is_empty() {
        return 0.0;
    }
    let downside_dev =
        (downside.iter().map(|r| r.powi(2)).sum::<f64>() / downside.len() as f64).sqrt();
    if downside_dev < 1e-10 {
        0.0
    } else {
        (m / downside_dev) * periods_per_year.sqrt()
    }
}

/// Maximum peak-to-trough drawdown of the compounded equity curve, as a
/// positive percentage.
pub fn max_drawdown_pct(returns_pct: &[f64]) -> f64 {
    let mut equity = 1.0;
    let mut peak = 1.0;
    let mut max_dd = 0.0f64;
    for r in returns_pct {
        equity *= 1.0 + r / 100.0;
        if equity > peak {
            peak = equity;
        }
        let dd = (peak - equity) / peak * 100.0;
        if dd > max_dd {
            max_dd = dd;
        }
    }
    max_dd
}
