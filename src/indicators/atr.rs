/// Average True Range (ATR) indicator
///
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// Smoothed with Wilder's method after an SMA seed.
use crate::models::Candle;

/// Calculate ATR for the given candles
///
/// Returns `None` when fewer than `period + 1` candles are available.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|pair| {
            let (prev, current) = (&pair[0], &pair[1]);
            (current.high - current.low)
                .max((current.high - prev.close).abs())
                .max((current.low - prev.close).abs())
        })
        .collect();

    let first_atr = true_ranges[..period].iter().sum::<f64>() / period as f64;

    let atr = true_ranges[period..].iter().fold(first_atr, |atr, tr| {
        (atr * (period as f64 - 1.0) + tr) / period as f64
    });

    Some(atr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn create_candle(i: i64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: Utc::now() + Duration::minutes(i),
            open: close,
            high,
            low,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn test_atr_constant_range() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| create_candle(i, 102.0, 98.0, 100.0))
            .collect();

        let atr = calculate_atr(&candles, 14).unwrap();
        assert!((atr - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_uses_gap_from_previous_close() {
        let candles = vec![
            create_candle(0, 101.0, 99.0, 100.0),
            create_candle(1, 111.0, 109.0, 110.0),
        ];

        // Gap up: |111 - 100| beats the 2.0 bar range
        assert_eq!(calculate_atr(&candles, 1), Some(11.0));
    }

    #[test]
    fn test_atr_insufficient_data() {
        let candles = vec![create_candle(0, 101.0, 99.0, 100.0)];
        assert!(calculate_atr(&candles, 14).is_none());
    }
}
