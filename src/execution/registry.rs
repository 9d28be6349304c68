use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use super::{CandleBuffer, FallbackWalk};
use crate::indicators::IndicatorSnapshot;
use crate::models::{
    DataSource, EngineStateSnapshot, InstrumentKey, Position, SeedSource, Signal,
};

/// Mutable per-instrument engine state
#[derive(Debug)]
pub struct InstrumentState {
    pub tracked_since: DateTime<Utc>,
    pub candles: CandleBuffer,
    pub last_price: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
    pub source: Option<DataSource>,
    pub seed: SeedSource,
    pub indicators: Option<IndicatorSnapshot>,
    pub signal: Option<Signal>,
    pub position: Option<Position>,
    /// Created on the first failed fetch, reused while the provider stays down
    pub fallback: Option<FallbackWalk>,
}

impl InstrumentState {
    pub fn new(candles: CandleBuffer, tracked_since: DateTime<Utc>) -> Self {
        Self {
            tracked_since,
            candles,
            last_price: None,
            last_update: None,
            source: None,
            seed: SeedSource::None,
            indicators: None,
            signal: None,
            position: None,
            fallback: None,
        }
    }

    /// Price a new tick is compared against
    pub fn reference_price(&self) -> Option<f64> {
        self.last_price
            .or_else(|| self.candles.last().map(|candle| candle.close))
    }

    pub fn snapshot(&self, instrument: &InstrumentKey) -> EngineStateSnapshot {
        EngineStateSnapshot {
            instrument: instrument.clone(),
            tracked_since: self.tracked_since,
            last_price: self.last_price,
            last_update: self.last_update,
            source: self.source,
            seed: self.seed,
            candles: self.candles.to_vec(),
            indicators: self.indicators.clone(),
            signal: self.signal.clone(),
            position: self.position.clone(),
        }
    }
}

/// Instrument-scoped access to one entry of the registry
///
/// A handle outlives its registry slot: tasks holding a handle across an
/// await may find it retired, in which case every access is a no-op.
#[derive(Debug)]
pub struct InstrumentHandle {
    key: InstrumentKey,
    generation: u64,
    state: Mutex<Option<InstrumentState>>,
}

impl InstrumentHandle {
    pub fn key(&self) -> &InstrumentKey {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Run `f` against the live state, or return `None` once retired
    pub fn with_state<R>(&self, f: impl FnOnce(&mut InstrumentState) -> R) -> Option<R> {
        self.lock().as_mut().map(f)
    }

    #[cfg(test)]
    fn is_retired(&self) -> bool {
        self.lock().is_none()
    }

    fn retire(&self) {
        self.lock().take();
    }

    fn lock(&self) -> MutexGuard<'_, Option<InstrumentState>> {
        // State stays consistent across a panicking reader, every writer
        // finishes its mutation before returning
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Map of tracked instruments, each slot stamped with a generation
#[derive(Debug, Default)]
pub struct Registry {
    slots: RwLock<HashMap<InstrumentKey, Arc<InstrumentHandle>>>,
    next_generation: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh slot unless `key` is already tracked
    ///
    /// Returns the handle and whether it was created by this call.
    pub fn insert(&self, key: InstrumentKey, state: InstrumentState) -> (Arc<InstrumentHandle>, bool) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slots.get(&key) {
            return (Arc::clone(existing), false);
        }

        let handle = Arc::new(InstrumentHandle {
            key: key.clone(),
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(Some(state)),
        });
        slots.insert(key, Arc::clone(&handle));
        (handle, true)
    }

    /// Remove and retire the slot for `key`
    pub fn remove(&self, key: &InstrumentKey) -> Option<Arc<InstrumentHandle>> {
        let handle = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)?;
        handle.retire();
        Some(handle)
    }

    /// Remove and retire every slot
    pub fn clear(&self) -> Vec<InstrumentKey> {
        let drained: Vec<_> = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        drained
            .into_iter()
            .map(|(key, handle)| {
                handle.retire();
                key
            })
            .collect()
    }

    pub fn get(&self, key: &InstrumentKey) -> Option<Arc<InstrumentHandle>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Point-in-time copy of the tracked handles, sorted by key
    pub fn handles(&self) -> Vec<Arc<InstrumentHandle>> {
        let mut handles: Vec<_> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        handles.sort_by(|a, b| a.key.cmp(&b.key));
        handles
    }

    pub fn keys(&self) -> Vec<InstrumentKey> {
        self.handles().iter().map(|h| h.key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
