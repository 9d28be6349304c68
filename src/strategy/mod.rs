// Trading strategy module
pub mod signals;

use chrono::{DateTime, Utc};

use crate::models::{Candle, Signal};

pub use signals::{CompositeStrategy, Score, ScoringWeights};

/// Base trait for signal strategies driven by the signal scheduler
pub trait Strategy: Send + Sync {
    /// Strategy name, used in logs
    fn name(&self) -> &str;

    /// Minimum candles required before a signal is produced
    fn min_candles_required(&self) -> usize;

    /// Generate a signal from the current series, or `None` when the series
    /// is too short. Must be deterministic for a given input.
    fn generate_signal(&self, candles: &[Candle], price: f64, at: DateTime<Utc>) -> Option<Signal>;
}
