use serde::{Deserialize, Serialize};

use crate::models::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stochastic {
    pub k: f64,
    /// Equal to `k`: no %D smoothing is applied
    pub d: f64,
}

impl Stochastic {
    pub const NEUTRAL: Stochastic = Stochastic { k: 50.0, d: 50.0 };
}

/// Stochastic oscillator over the last `period` bars
///
/// %K = (close - lowest low) / (highest high - lowest low) * 100.
/// A zero-width range gives the neutral 50. %D is reported equal to %K.
pub fn calculate_stochastic(candles: &[Candle], period: usize) -> Option<Stochastic> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let window = &candles[candles.len() - period..];
    let close = window.last()?.close;
    let lowest = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let highest = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);

    let range = highest - lowest;
    if range <= 0.0 || !range.is_finite() {
        return Some(Stochastic::NEUTRAL);
    }

    let k = ((close - lowest) / range * 100.0).clamp(0.0, 100.0);
    Some(Stochastic { k, d: k })
}
