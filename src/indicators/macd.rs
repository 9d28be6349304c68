use serde::{Deserialize, Serialize};

use super::moving_average::calculate_ema_series;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

impl Macd {
    pub const NEUTRAL: Macd = Macd {
        line: 0.0,
        signal: 0.0,
        histogram: 0.0,
    };
}

/// Moving Average Convergence Divergence
///
/// Line is `EMA(fast) - EMA(slow)`, signal is the EMA of the line series.
/// Each EMA reads as the close itself until its period has filled, so the
/// line exists from the first price. When the line series is still shorter
/// than `signal` the signal falls back to the latest line value.
pub fn calculate_macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if prices.is_empty() || fast == 0 || slow == 0 {
        return None;
    }

    let line_series: Vec<f64> = ema_or_close(prices, fast)
        .iter()
        .zip(ema_or_close(prices, slow))
        .map(|(fast, slow)| fast - slow)
        .collect();

    let line = *line_series.last()?;
    let signal_value = calculate_ema_series(&line_series, signal)
        .last()
        .copied()
        .unwrap_or(line);

    Some(Macd {
        line,
        signal: signal_value,
        histogram: line - signal_value,
    })
}

/// EMA at every index, the close itself before the period fills
fn ema_or_close(prices: &[f64], period: usize) -> Vec<f64> {
    let ema = calculate_ema_series(prices, period);
    let warmup = prices.len() - ema.len();
    prices[..warmup].iter().copied().chain(ema).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macd_empty_input() {
        assert!(calculate_macd(&[], 12, 26, 9).is_none());
        assert!(calculate_macd(&[100.0], 0, 26, 9).is_none());
    }

    #[test]
    fn test_macd_below_slow_period() {
        // Slow side is still the close, fast EMA12 lags a linear series by 5.5 steps
        let prices: Vec<f64> = (0..25).map(|i| 100.0 + i as f64 * 1.25).collect();
        let macd = calculate_macd(&prices, 12, 26, 9).unwrap();

        assert!((macd.line - -6.875).abs() < 1e-9);
        assert!(macd.signal < 0.0 && macd.signal > macd.line);
        assert!(macd.histogram < 0.0);
        assert!((macd.histogram - (macd.line - macd.signal)).abs() < 1e-12);
    }

    #[test]
    fn test_macd_flat_series_is_zero() {
        let prices = vec![100.0; 60];
        let macd = calculate_macd(&prices, 12, 26, 9).unwrap();
        assert_eq!(macd, Macd::NEUTRAL);
    }

    #[test]
    fn test_macd_rising_series_positive_line() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let macd = calculate_macd(&prices, 12, 26, 9).unwrap();
        assert!(macd.line > 0.0);
        assert!((macd.histogram - (macd.line - macd.signal)).abs() < 1e-12);
    }

    #[test]
    fn test_macd_short_line_series_uses_line_as_signal() {
        // 6 line values, fewer than the 9-period signal
        let prices = [100.0, 102.0, 101.0, 104.0, 103.0, 106.0];
        let macd = calculate_macd(&prices, 3, 5, 9).unwrap();
        assert!(macd.line != 0.0);
        assert_eq!(macd.signal, macd.line);
        assert_eq!(macd.histogram, 0.0);
    }
}
