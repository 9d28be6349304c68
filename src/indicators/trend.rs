use serde::{Deserialize, Serialize};

use super::moving_average::calculate_sma;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub direction: TrendDirection,
    /// Distance between the fast and slow SMA, in percent of the slow SMA
    pub strength: f64,
}

impl Trend {
    pub const NEUTRAL: Trend = Trend {
        direction: TrendDirection::Neutral,
        strength: 0.0,
    };
}

/// Label the trend from the fast/slow SMA relationship and the close
///
/// Bullish when `SMA(fast) > SMA(slow)` and the close sits above `SMA(fast)`,
/// bearish for the mirror image, neutral otherwise or when there is not
/// enough history for the slow SMA.
pub fn detect_trend(prices: &[f64], fast: usize, slow: usize) -> Trend {
    let (Some(fast_sma), Some(slow_sma), Some(&close)) = (
        calculate_sma(prices, fast),
        calculate_sma(prices, slow),
        prices.last(),
    ) else {
        return Trend::NEUTRAL;
    };

    let strength = if slow_sma != 0.0 {
        ((fast_sma - slow_sma) / slow_sma * 100.0).abs()
    } else {
        0.0
    };

    let direction = if fast_sma > slow_sma && close > fast_sma {
        TrendDirection::Bullish
    } else if fast_sma < slow_sma && close < fast_sma {
        TrendDirection::Bearish
    } else {
        TrendDirection::Neutral
    };

    Trend { direction, strength }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rising_prices_are_bullish() {
        let prices: Vec<f64> = (0..25).map(|i| 100.0 + i as f64).collect();
        let trend = detect_trend(&prices, 5, 20);
        assert_eq!(trend.direction, TrendDirection::Bullish);
        assert!(trend.strength > 0.0);
    }

    #[test]
    fn test_falling_prices_are_bearish() {
        let prices: Vec<f64> = (0..25).map(|i| 200.0 - i as f64).collect();
        assert_eq!(detect_trend(&prices, 5, 20).direction, TrendDirection::Bearish);
    }

    #[test]
    fn test_short_series_is_neutral() {
        let prices = vec![100.0, 101.0, 102.0];
        assert_eq!(detect_trend(&prices, 5, 20), Trend::NEUTRAL);
    }

    #[test]
    fn test_pullback_inside_uptrend_is_neutral() {
        let mut prices: Vec<f64> = (0..24).map(|i| 100.0 + i as f64).collect();
        prices.push(110.0); // close drops below SMA5
        assert_eq!(detect_trend(&prices, 5, 20).direction, TrendDirection::Neutral);
    }
}
