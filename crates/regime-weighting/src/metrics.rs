//! Price-series metrics shared by regime classification and trade
//! classification factors.

use signal_core::Bar;

/// Standard deviation of close-to-close returns.
pub fn return_volatility(closes: &[f64]) -> f64 {
    if closes.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.is_empty() {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    variance.sqrt()
}

/// Linear-regression slope over the last `lookback` closes, normalized by
/// the average price so it is comparable across symbols.
pub fn normalized_slope(closes: &[f64], lookback: usize) -> f64 {
    if closes.len() < lookback || lookback < 2 {
        return 0.0;
    }
    let recent = &closes[closes.len() - lookback..];
    let n = lookback as f64;
    let sum_x: f64 = (0..lookback).map(|i| i as f64).sum();
    let sum_y: f64 = recent.iter().sum();
    let sum_xy: f64 = recent.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..lookback).map(|i| (i * i) as f64).sum();

    let denom = n * sum_x2 - sum_x * sum_x;
    if denom == 0.0 {
        return 0.0;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let avg_price = sum_y / n;
    if avg_price == 0.0 {
        0.0
    } else {
        slope / avg_price
    }
}

/// Net directional movement divided by total movement: 1.0 is a straight
/// line, near 0 is pure chop.
pub fn range_efficiency(closes: &[f64]) -> f64 {
    if closes.len() < 2 {
        return 0.0;
    }
    let net = (closes[closes.len() - 1] - closes[0]).abs();
    let total: f64 = closes.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    if total == 0.0 {
        0.0
    } else {
        net / total
    }
}

/// Average True Range over the trailing `period` bars.
pub fn average_true_range(bars: &[Bar], period: usize) -> f64 {
    if bars.len() < 2 || period == 0 {
        return 0.0;
    }
    let mut true_ranges = Vec::with_capacity(bars.len() - 1);
    for i in 1..bars.len() {
        let hl = bars[i].high - bars[i].low;
        let hc = (bars[i].high - bars[i - 1].close).abs();
        let lc = (bars[i].low - bars[i - 1].close).abs();
        true_ranges.push(hl.max(hc).max(lc));
    }
    let recent = &true_ranges[true_ranges.len().saturating_sub(period)..];
    recent.iter().sum::<f64>() / recent.len() as f64
}

/// Wilder's Average Directional Index; the latest value, or None when the
/// series is too short.
pub fn adx(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period * 2 + 1 {
        return None;
    }

    let mut plus_dm = Vec::with_capacity(bars.len() - 1);
    let mut minus_dm = Vec::with_capacity(bars.len() - 1);
    let mut true_range = Vec::with_capacity(bars.len() - 1);

    for i in 1..bars.len() {
        let up_move = bars[i].high - bars[i - 1].high;
        let down_move = bars[i - 1].low - bars[i].low;
        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });

        let hl = bars[i].high - bars[i].low;
        let hc = (bars[i].high - bars[i - 1].close).abs();
        let lc = (bars[i].low - bars[i - 1].close).abs();
        true_range.push(hl.max(hc).max(lc));
    }

    let mut smoothed_plus = plus_dm[..period].iter().sum::<f64>();
    let mut smoothed_minus = minus_dm[..period].iter().sum::<f64>();
    let mut smoothed_tr = true_range[..period].iter().sum::<f64>();
    let mut dx_values = Vec::new();

    for i in period..plus_dm.len() {
        smoothed_plus = smoothed_plus - smoothed_plus / period as f64 + plus_dm[i];
        smoothed_minus = smoothed_minus - smoothed_minus / period as f64 + minus_dm[i];
        smoothed_tr = smoothed_tr - smoothed_tr / period as f64 + true_range[i];

        let pdi = if smoothed_tr > 0.0 {
            100.0 * smoothed_plus / smoothed_tr
        } else {
            0.0
        };
        let mdi = if smoothed_tr > 0.0 {
            100.0 * smoothed_minus / smoothed_tr
        } else {
            0.0
        };
        let di_sum = pdi + mdi;
        dx_values.push(if di_sum > 0.0 {
            100.0 * (pdi - mdi).abs() / di_sum
        } else {
            0.0
        });
    }

    if dx_values.len() < period {
        return None;
    }
    // Wilder smoothing of DX into ADX.
    let mut adx_value = dx_values[..period].iter().sum::<f64>() / period as f64;
    for dx in &dx_values[period..] {
        adx_value = (adx_value * (period as f64 - 1.0) + dx) / period as f64;
    }
    Some(adx_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc::now(),
            open,
            high,
            low,
            close,
            volume: 1_000_000.0,
        }
    }

    #[test]
    fn volatility_zero_for_flat_series() {
        let closes = vec![100.0; 30];
        assert_eq!(return_volatility(&closes), 0.0);
    }

    #[test]
    fn slope_sign_matches_trend() {
        let up: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let down: Vec<f64> = (0..30).map(|i| 130.0 - i as f64).collect();
        assert!(normalized_slope(&up, 20) > 0.0);
        assert!(normalized_slope(&down, 20) < 0.0);
    }

    #[test]
    fn efficiency_is_one_for_monotone_and_low_for_chop() {
        let monotone: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(range_efficiency(&monotone), 1.0);

        let chop: Vec<f64> = (0..30)
            .map(|i| 100.0 + if i % 2 == 0 { 1.0 } else { 0.0 })
            .collect();
        assert!(range_efficiency(&chop) < 0.1);
    }

    #[test]
    fn atr_reflects_bar_range() {
        let bars: Vec<Bar> = (0..20).map(|_| bar(100.0, 102.0, 98.0, 100.0)).collect();
        let atr = average_true_range(&bars, 14);
        assert!((atr - 4.0).abs() < 1e-9);
    }

    #[test]
    fn adx_high_in_strong_trend() {
        let bars: Vec<Bar> = (0..60)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                bar(base, base + 1.0, base - 1.0, base + 0.5)
            })
            .collect();
        let value = adx(&bars, 14).unwrap();
        assert!(value > 25.0, "trending ADX was {value}");
    }

    #[test]
    fn adx_none_when_too_short() {
        let bars: Vec<Bar> = (0..10).map(|_| bar(100.0, 101.0, 99.0, 100.0)).collect();
        assert!(adx(&bars, 14).is_none());
    }
}
