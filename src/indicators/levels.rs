use serde::{Deserialize, Serialize};

use crate::models::Candle;

/// Support/resistance extremes plus the retracement levels between them
/// and the current price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupportResistance {
    pub support: f64,
    pub resistance: f64,
    /// `retracement` of the way from price down toward support
    pub near_support: f64,
    /// `retracement` of the way from price up toward resistance
    pub near_resistance: f64,
}

impl SupportResistance {
    pub fn collapsed(price: f64) -> Self {
        Self {
            support: price,
            resistance: price,
            near_support: price,
            near_resistance: price,
        }
    }
}

/// Highest high and lowest low of the last `lookback` bars
///
/// Uses every bar when fewer are available; `None` for an empty series.
pub fn calculate_levels(candles: &[Candle], lookback: usize, retracement: f64) -> Option<SupportResistance> {
    let price = candles.last()?.close;
    let window = &candles[candles.len().saturating_sub(lookback.max(1))..];

    let resistance = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let support = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);

    Some(SupportResistance {
        support,
        resistance,
        near_support: price - (price - support) * retracement,
        near_resistance: price + (resistance - price) * retracement,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn candle(i: i64, low: f64, high: f64, close: f64) -> Candle {
        Candle {
            timestamp: Utc::now() + Duration::minutes(i),
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_levels_extremes_and_retracements() {
        let candles = vec![
            candle(0, 90.0, 120.0, 100.0),
            candle(1, 95.0, 105.0, 100.0),
        ];
        let levels = calculate_levels(&candles, 50, 0.382).unwrap();
        assert_eq!(levels.resistance, 120.0);
        assert_eq!(levels.support, 90.0);
        assert!((levels.near_resistance - (100.0 + 20.0 * 0.382)).abs() < 1e-9);
        assert!((levels.near_support - (100.0 - 10.0 * 0.382)).abs() < 1e-9);
    }

    #[test]
    fn test_levels_respect_lookback() {
        let mut candles = vec![candle(0, 10.0, 1000.0, 100.0)];
        candles.extend((1..=50).map(|i| candle(i, 99.0, 101.0, 100.0)));
        let levels = calculate_levels(&candles, 50, 0.382).unwrap();
        assert_eq!(levels.resistance, 101.0);
        assert_eq!(levels.support, 99.0);
    }

    #[test]
    fn test_levels_empty() {
        assert!(calculate_levels(&[], 50, 0.382).is_none());
    }
}
