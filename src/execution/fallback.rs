use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::Candle;

const MIN_PRICE: f64 = 0.01;
const MAX_TICK_VOLUME: f64 = 100.0;

/// Seeded pseudo-random walk used while the price provider is failing
///
/// Prices it produces are always published with `DataSource::Fallback`.
/// Two walks built from the same seed produce the same sequence.
#[derive(Debug, Clone)]
pub struct FallbackWalk {
    rng: StdRng,
    volatility: f64,
}

impl FallbackWalk {
    pub fn new(seed: u64, volatility: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            volatility,
        }
    }

    /// Seed derived from the last known close, or the configured override
    pub fn from_last_close(last_close: f64, volatility: f64, seed: Option<u64>) -> Self {
        Self::new(seed.unwrap_or_else(|| last_close.to_bits()), volatility)
    }

    /// Next price and volume delta, one step away from `last_price`
    pub fn step(&mut self, last_price: f64) -> (f64, f64) {
        let change = if self.volatility > 0.0 {
            self.rng.gen_range(-self.volatility..self.volatility)
        } else {
            0.0
        };
        let price = (last_price * (1.0 + change)).max(MIN_PRICE);
        let volume = self.rng.gen_range(0.0..MAX_TICK_VOLUME).floor();
        (price, volume)
    }
}

/// Sideways synthetic history ending at the bucket before `end`
///
/// Used to seed a series when no history provider answers, so indicators
/// have something to work with. Bars are oldest first.
pub fn synthetic_history(
    base_price: f64,
    bars: usize,
    bucket: Duration,
    end: DateTime<Utc>,
    seed: u64,
    volatility: f64,
) -> Vec<Candle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut candles = Vec::with_capacity(bars);
    let mut close = base_price;

    // Bar-level noise is wider than tick-level noise
    let bar_volatility = (volatility * 10.0).min(0.05);

    for i in 0..bars {
        let timestamp = end - bucket * (bars - i) as i32;
        let open = close;
        let change = if bar_volatility > 0.0 {
            rng.gen_range(-bar_volatility..bar_volatility)
        } else {
            0.0
        };
        close = (open * (1.0 + change)).max(MIN_PRICE);

        let wick = open.max(close) * rng.gen_range(0.0..=bar_volatility / 2.0);
        let high = open.max(close) + wick;
        let low = (open.min(close) - wick).max(MIN_PRICE);

        candles.push(Candle {
            timestamp,
            open,
            high,
            low,
            close,
            volume: rng.gen_range(1_000.0..10_000.0_f64).floor(),
        });
    }

    candles
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_same_seed_same_walk() {
        let mut a = FallbackWalk::from_last_close(250.0, 0.001, None);
        let mut b = FallbackWalk::from_last_close(250.0, 0.001, None);

        let mut price_a = 250.0;
        let mut price_b = 250.0;
        for _ in 0..50 {
            let (next_a, vol_a) = a.step(price_a);
            let (next_b, vol_b) = b.step(price_b);
            assert_eq!(next_a, next_b);
            assert_eq!(vol_a, vol_b);
            price_a = next_a;
            price_b = next_b;
        }
    }

    #[test]
    fn test_step_stays_within_volatility() {
        let mut walk = FallbackWalk::new(7, 0.001);
        let mut price = 100.0;
        for _ in 0..1_000 {
            let (next, volume) = walk.step(price);
            assert!((next / price - 1.0).abs() <= 0.001 + 1e-12);
            assert!(volume >= 0.0);
            price = next;
        }
    }

    #[test]
    fn test_zero_volatility_is_flat() {
        let mut walk = FallbackWalk::new(1, 0.0);
        assert_eq!(walk.step(42.0).0, 42.0);
    }

    #[test]
    fn test_synthetic_history_shape() {
        let end = Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap();
        let candles = synthetic_history(100.0, 30, Duration::minutes(1), end, 9, 0.001);

        assert_eq!(candles.len(), 30);
        assert_eq!(candles[29].timestamp, end - Duration::minutes(1));
        assert!(candles.iter().all(Candle::is_well_formed));
        assert!(candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(candles.windows(2).all(|w| w[1].open == w[0].close));
    }
}
