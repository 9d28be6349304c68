use serde::{Deserialize, Serialize};

use super::moving_average::calculate_sma;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    /// Bands collapsed onto one price
    pub fn collapsed(price: f64) -> Self {
        Self {
            upper: price,
            middle: price,
            lower: price,
        }
    }
}

/// SMA middle band, outer bands at `multiplier` population standard deviations
pub fn calculate_bollinger(prices: &[f64], period: usize, multiplier: f64) -> Option<BollingerBands> {
    let middle = calculate_sma(prices, period)?;

    let window = &prices[prices.len() - period..];
    let variance = window.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / period as f64;
    let deviation = variance.sqrt() * multiplier;

    Some(BollingerBands {
        upper: middle + deviation,
        middle,
        lower: middle - deviation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bollinger_flat_prices() {
        let prices = vec![50.0; 20];
        let bands = calculate_bollinger(&prices, 20, 2.0).unwrap();
        assert_eq!(bands, BollingerBands::collapsed(50.0));
    }

    #[test]
    fn test_bollinger_known_deviation() {
        // Alternating 9 / 11 -> mean 10, population stddev 1
        let prices: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 9.0 } else { 11.0 }).collect();
        let bands = calculate_bollinger(&prices, 20, 2.0).unwrap();
        assert!((bands.middle - 10.0).abs() < 1e-12);
        assert!((bands.upper - 12.0).abs() < 1e-12);
        assert!((bands.lower - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_bollinger_insufficient_data() {
        assert!(calculate_bollinger(&[1.0, 2.0], 20, 2.0).is_none());
    }
}
