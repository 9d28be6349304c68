pub mod yahoo;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::{Candle, InstrumentKey};

pub use yahoo::YahooClient;

/// Latest quote for one instrument
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub price: f64,
    /// Volume traded since the previous quote, 0 when unknown
    pub volume_delta: f64,
}

impl Quote {
    pub fn new(price: f64, volume_delta: f64) -> Self {
        Self {
            price,
            volume_delta,
        }
    }
}

/// Source of live prices polled by the price scheduler
#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn latest_price(&self, instrument: &InstrumentKey) -> Result<Quote, ProviderError>;
}

/// Source of historical bars used to seed a new series
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Up to `lookback` bars, oldest first
    async fn history(
        &self,
        instrument: &InstrumentKey,
        lookback: usize,
    ) -> Result<Vec<Candle>, ProviderError>;
}

/// Provider that never answers
///
/// Running against it keeps every instrument on synthetic seed data and the
/// fallback walk, which is useful for demos without network access.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineProvider;

#[async_trait]
impl PriceProvider for OfflineProvider {
    async fn latest_price(&self, instrument: &InstrumentKey) -> Result<Quote, ProviderError> {
        Err(ProviderError::Unavailable(format!("offline, no quote for {}", instrument)))
    }
}

#[async_trait]
impl HistoryProvider for OfflineProvider {
    async fn history(
        &self,
        instrument: &InstrumentKey,
        _lookback: usize,
    ) -> Result<Vec<Candle>, ProviderError> {
        Err(ProviderError::Unavailable(format!("offline, no history for {}", instrument)))
    }
}
