use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use super::registry::{InstrumentHandle, InstrumentState};
use super::FallbackWalk;
use crate::api::{PriceProvider, Quote};
use crate::config::FallbackConfig;
use crate::error::ProviderError;
use crate::models::{DataSource, InstrumentKey, PriceEvent};

/// Polls the price provider for every tracked instrument
///
/// Each instrument is fetched concurrently and applied on its own; a failed
/// or slow fetch degrades that instrument to the fallback walk and nothing else.
#[derive(Clone)]
pub struct PriceFeedManager {
    provider: Arc<dyn PriceProvider>,
    fetch_timeout: Duration,
    fallback: FallbackConfig,
}

impl PriceFeedManager {
    pub fn new(provider: Arc<dyn PriceProvider>, fetch_timeout: Duration, fallback: FallbackConfig) -> Self {
        Self {
            provider,
            fetch_timeout,
            fallback,
        }
    }

    /// Latest quote, with a timeout reported like any other provider error
    pub async fn fetch(&self, instrument: &InstrumentKey) -> Result<Quote, ProviderError> {
        match tokio::time::timeout(self.fetch_timeout, self.provider.latest_price(instrument)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.fetch_timeout.as_millis() as u64)),
        }
    }

    /// Run one price tick for `handles`, publishing events as fetches complete
    ///
    /// Returns the number of events published.
    pub async fn tick_all(
        &self,
        handles: Vec<Arc<InstrumentHandle>>,
        events: &broadcast::Sender<PriceEvent>,
    ) -> usize {
        let mut tasks = JoinSet::new();
        for handle in handles {
            let feed = self.clone();
            tasks.spawn(async move { feed.tick_one(&handle).await });
        }

        let mut published = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(event)) => {
                    // No subscribers is fine
                    let _ = events.send(event);
                    published += 1;
                }
                Ok(None) => {}
                Err(e) => tracing::error!("Price task failed: {}", e),
            }
        }
        published
    }

    /// Fetch and apply one instrument's tick
    ///
    /// Returns `None` when the instrument was untracked while the fetch was
    /// pending, or when the tick was rejected.
    pub async fn tick_one(&self, handle: &InstrumentHandle) -> Option<PriceEvent> {
        let outcome = self.fetch(handle.key()).await;

        let event = handle.with_state(|state| apply_outcome(state, handle.key(), outcome, &self.fallback));
        if event.is_none() {
            tracing::debug!(
                instrument = %handle.key(),
                generation = handle.generation(),
                "Untracked during fetch, tick discarded"
            );
        }
        event.flatten()
    }
}

/// Fold a fetch outcome into the instrument state and build the price event
///
/// Errors switch the instrument to the seeded fallback walk; the walk is kept
/// while the provider stays down and dropped on the next live quote.
pub fn apply_outcome(
    state: &mut InstrumentState,
    instrument: &InstrumentKey,
    outcome: Result<Quote, ProviderError>,
    fallback: &FallbackConfig,
) -> Option<PriceEvent> {
    let reference = state.reference_price();

    let (price, volume_delta, source) = match outcome {
        Ok(quote) => (quote.price, quote.volume_delta, DataSource::Live),
        Err(e) => {
            let last = reference.unwrap_or(fallback.base_price);
            if state.fallback.is_none() {
                tracing::warn!(
                    instrument = %instrument,
                    last_close = last,
                    "Price fetch failed ({}), switching to fallback walk",
                    e
                );
            } else {
                tracing::debug!(instrument = %instrument, "Price fetch still failing: {}", e);
            }

            let (price, volume) = state
                .fallback
                .get_or_insert_with(|| {
                    FallbackWalk::from_last_close(last, fallback.volatility, fallback.seed)
                })
                .step(last);
            (price, volume, DataSource::Fallback)
        }
    };

    let at = Utc::now();
    let candle = match state.candles.apply_tick(at, price, volume_delta) {
        Ok(candle) => candle,
        Err(e) => {
            tracing::warn!(instrument = %instrument, "Tick dropped: {}", e);
            return None;
        }
    };

    if source == DataSource::Live && state.fallback.take().is_some() {
        tracing::info!(instrument = %instrument, "Live prices restored");
    }

    let change = reference.map_or(0.0, |reference| price - reference);
    let change_percent = match reference {
        Some(reference) if reference > 0.0 => change / reference * 100.0,
        _ => 0.0,
    };

    state.last_price = Some(price);
    state.last_update = Some(at);
    state.source = Some(source);

    tracing::debug!(
        instrument = %instrument,
        price = price,
        source = ?source,
        "Tick applied"
    );

    Some(PriceEvent {
        instrument: instrument.clone(),
        price,
        change,
        change_percent,
        candle,
        timestamp: at,
        source,
    })
}
