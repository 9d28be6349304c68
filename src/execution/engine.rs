use chrono::{DurationRound, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::fallback::synthetic_history;
use super::position_manager::{apply_exit, check_exit, close_position, open_position};
use super::registry::{InstrumentHandle, InstrumentState, Registry};
use super::{CandleBuffer, PriceFeedManager};
use crate::api::{HistoryProvider, PriceProvider};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::indicators::IndicatorSnapshot;
use crate::models::{
    Candle, ClosedPosition, Direction, EngineStateSnapshot, InstrumentKey, Position, PriceEvent,
    SeedSource, SignalEvent,
};
use crate::strategy::{CompositeStrategy, Strategy};

struct SchedulerTasks {
    price: JoinHandle<()>,
    signal: JoinHandle<()>,
}

impl SchedulerTasks {
    fn abort(&self) {
        self.price.abort();
        self.signal.abort();
    }

    fn is_alive(&self) -> bool {
        !self.price.is_finished() && !self.signal.is_finished()
    }
}

struct EngineInner {
    config: EngineConfig,
    feed: PriceFeedManager,
    history: Option<Arc<dyn HistoryProvider>>,
    strategy: Box<dyn Strategy>,
    registry: Registry,
    price_tx: broadcast::Sender<PriceEvent>,
    signal_tx: broadcast::Sender<SignalEvent>,
    scheduler: Mutex<Option<SchedulerTasks>>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let tasks = self.scheduler.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(tasks) = tasks.take() {
            tasks.abort();
        }
    }
}

/// Streaming signal engine for a set of tracked instruments
///
/// Owns one price timer and one signal timer shared by every instrument.
/// Timers start with the first tracked instrument and stop with the last.
/// Cloning is cheap and every clone drives the same engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Engine with the default composite strategy
    pub fn new(
        config: EngineConfig,
        prices: Arc<dyn PriceProvider>,
        history: Option<Arc<dyn HistoryProvider>>,
    ) -> Result<Self, EngineError> {
        let strategy = CompositeStrategy::new(
            config.indicators.clone(),
            config.scoring.clone(),
            config.min_signal_candles,
        );
        Self::with_strategy(config, prices, history, Box::new(strategy))
    }

    pub fn with_strategy(
        config: EngineConfig,
        prices: Arc<dyn PriceProvider>,
        history: Option<Arc<dyn HistoryProvider>>,
        strategy: Box<dyn Strategy>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let (price_tx, _) = broadcast::channel(config.event_capacity);
        let (signal_tx, _) = broadcast::channel(config.event_capacity);
        let feed = PriceFeedManager::new(prices, config.fetch_timeout(), config.fallback.clone());

        tracing::debug!(strategy = strategy.name(), "Engine created");

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                feed,
                history,
                strategy,
                registry: Registry::new(),
                price_tx,
                signal_tx,
                scheduler: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Start tracking an instrument and seed its series
    ///
    /// Tracking an already tracked instrument is a no-op. Seeding prefers the
    /// history provider and falls back to synthetic bars. If the instrument is
    /// untracked while seeding is pending, the seed is discarded.
    pub async fn start_tracking(&self, instrument: &str) -> Result<InstrumentKey, EngineError> {
        let key = InstrumentKey::normalize(instrument);
        if key.is_empty() {
            tracing::warn!("Rejected empty instrument {:?}", instrument);
            return Err(EngineError::InvalidInstrument(instrument.to_string()));
        }

        let config = &self.inner.config;
        let state = InstrumentState::new(
            CandleBuffer::new(config.max_candles, config.bucket()),
            Utc::now(),
        );
        let (handle, created) = self.inner.registry.insert(key.clone(), state);
        if !created {
            tracing::debug!(instrument = %key, "Already tracked");
            return Ok(key);
        }

        tracing::info!(instrument = %key, "Tracking started");
        self.inner.ensure_scheduler();

        let (bars, source) = self.inner.seed_bars(&key).await;
        let seeded = handle.with_state(|state| {
            let kept = state.candles.seed(bars);
            state.seed = if kept > 0 { source } else { SeedSource::None };
            state.indicators =
                IndicatorSnapshot::compute(state.candles.as_slice(), &config.indicators);
            (kept, state.seed)
        });

        match seeded {
            Some((kept, seed)) => {
                tracing::info!(instrument = %key, bars = kept, seed = ?seed, "Series seeded")
            }
            None => tracing::info!(
                instrument = %key,
                generation = handle.generation(),
                "Untracked while seeding, seed discarded"
            ),
        }

        Ok(key)
    }

    /// Stop tracking an instrument and drop its state
    ///
    /// A fetch still pending for it completes as a no-op.
    pub fn stop_tracking(&self, instrument: &str) -> Result<(), EngineError> {
        let key = InstrumentKey::normalize(instrument);
        if self.inner.registry.remove(&key).is_none() {
            tracing::warn!(instrument = %key, "Stop rejected, not tracked");
            return Err(EngineError::NotTracked(key));
        }

        tracing::info!(instrument = %key, "Tracking stopped");
        self.inner.stop_scheduler_if_idle();
        Ok(())
    }

    /// Record an open position for a tracked instrument
    pub fn enter_position(
        &self,
        instrument: &str,
        direction: Direction,
        entry_price: f64,
        target: f64,
        stop_loss: f64,
    ) -> Result<Position, EngineError> {
        let (key, handle) = self
            .inner
            .handle(instrument)
            .inspect_err(|e| tracing::warn!("Entry rejected: {}", e))?;
        let position = open_position(direction, entry_price, target, stop_loss, Utc::now())
            .and_then(|position| {
                handle
                    .with_state(|state| {
                        if state.position.is_some() {
                            return Err(EngineError::PositionAlreadyOpen(key.clone()));
                        }
                        state.position = Some(position.clone());
                        Ok(())
                    })
                    .ok_or_else(|| EngineError::NotTracked(key.clone()))??;
                Ok(position)
            })
            .inspect_err(|e| tracing::warn!(instrument = %key, "Entry rejected: {}", e))?;

        tracing::info!(
            instrument = %key,
            id = %position.id,
            "Opened {} @ {:.2} (target {:.2}, stop {:.2})",
            direction,
            entry_price,
            target,
            stop_loss
        );
        Ok(position)
    }

    /// Close the open position at the last known price
    pub fn exit_position(&self, instrument: &str) -> Result<ClosedPosition, EngineError> {
        let (key, handle) = self
            .inner
            .handle(instrument)
            .inspect_err(|e| tracing::warn!("Exit rejected: {}", e))?;

        let closed = handle
            .with_state(|state| {
                let position = state
                    .position
                    .take()
                    .ok_or_else(|| EngineError::NoOpenPosition(key.clone()))?;
                Ok(close_position(position, state.reference_price(), Utc::now()))
            })
            .ok_or_else(|| EngineError::NotTracked(key.clone()))?
            .inspect_err(|e| tracing::warn!(instrument = %key, "Exit rejected: {}", e))?;

        tracing::info!(
            instrument = %key,
            id = %closed.position.id,
            pnl_pct = ?closed.pnl_pct,
            "Closed {} position",
            closed.position.direction
        );
        Ok(closed)
    }

    /// Point-in-time copy of an instrument's state
    pub fn get_state(&self, instrument: &str) -> Result<EngineStateSnapshot, EngineError> {
        let (key, handle) = self.inner.handle(instrument)?;
        handle
            .with_state(|state| state.snapshot(&key))
            .ok_or(EngineError::NotTracked(key))
    }

    pub fn subscribe_prices(&self) -> broadcast::Receiver<PriceEvent> {
        self.inner.price_tx.subscribe()
    }

    pub fn subscribe_signals(&self) -> broadcast::Receiver<SignalEvent> {
        self.inner.signal_tx.subscribe()
    }

    pub fn tracked(&self) -> Vec<InstrumentKey> {
        self.inner.registry.keys()
    }

    /// Whether the price and signal timers are running
    pub fn is_running(&self) -> bool {
        self.inner
            .scheduler()
            .as_ref()
            .is_some_and(SchedulerTasks::is_alive)
    }

    /// Untrack everything and stop both timers
    pub fn shutdown(&self) {
        let cleared = self.inner.registry.clear();
        self.inner.stop_scheduler_if_idle();
        tracing::info!(instruments = cleared.len(), "Engine shut down");
    }

    /// Run one price tick now, returns the number of price events published
    pub async fn tick_prices(&self) -> usize {
        self.inner.run_price_cycle().await
    }

    /// Run one signal tick now, returns the number of signal events published
    pub fn tick_signals(&self) -> usize {
        self.inner.run_signal_cycle()
    }
}

impl EngineInner {
    fn handle(&self, instrument: &str) -> Result<(InstrumentKey, Arc<InstrumentHandle>), EngineError> {
        let key = InstrumentKey::normalize(instrument);
        match self.registry.get(&key) {
            Some(handle) => Ok((key, handle)),
            None => Err(EngineError::NotTracked(key)),
        }
    }

    fn scheduler(&self) -> MutexGuard<'_, Option<SchedulerTasks>> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_scheduler(self: &Arc<Self>) {
        let mut scheduler = self.scheduler();
        // A concurrent stop may have emptied the registry since the insert
        if self.registry.is_empty() || scheduler.as_ref().is_some_and(SchedulerTasks::is_alive) {
            return;
        }
        if let Some(stale) = scheduler.take() {
            stale.abort();
        }

        let weak = Arc::downgrade(self);
        *scheduler = Some(SchedulerTasks {
            price: tokio::spawn(price_loop(weak.clone(), self.config.price_interval())),
            signal: tokio::spawn(signal_loop(weak, self.config.signal_interval())),
        });
        tracing::info!(
            price_ms = self.config.price_interval_ms,
            signal_ms = self.config.signal_interval_ms,
            "Scheduler started"
        );
    }

    fn stop_scheduler_if_idle(&self) {
        let mut scheduler = self.scheduler();
        // Checked under the scheduler lock so a concurrent start can't be lost
        if !self.registry.is_empty() {
            return;
        }
        if let Some(tasks) = scheduler.take() {
            tasks.abort();
            tracing::info!("Scheduler stopped, no instruments tracked");
        }
    }

    /// Seed bars for a new series and where they came from
    async fn seed_bars(&self, key: &InstrumentKey) -> (Vec<Candle>, SeedSource) {
        let config = &self.config;

        if let Some(history) = &self.history {
            match tokio::time::timeout(config.fetch_timeout(), history.history(key, config.seed_lookback)).await {
                Ok(Ok(bars)) if !bars.is_empty() => return (bars, SeedSource::Provider),
                Ok(Ok(_)) => tracing::warn!(instrument = %key, "History provider returned no bars"),
                Ok(Err(e)) => tracing::warn!(instrument = %key, "History fetch failed: {}", e),
                Err(_) => tracing::warn!(instrument = %key, "History fetch timed out"),
            }
        }

        if config.fallback.synthetic_bars == 0 {
            return (Vec::new(), SeedSource::None);
        }

        let base_price = match self.feed.fetch(key).await {
            Ok(quote) if quote.price.is_finite() && quote.price > 0.0 => quote.price,
            _ => config.fallback.base_price,
        };

        let now = Utc::now();
        let end = now.duration_trunc(config.bucket()).unwrap_or(now);
        let bars = synthetic_history(
            base_price,
            config.fallback.synthetic_bars,
            config.bucket(),
            end,
            config.fallback.seed.unwrap_or_else(|| base_price.to_bits()),
            config.fallback.volatility,
        );

        tracing::warn!(
            instrument = %key,
            base_price = base_price,
            "Seeding with {} synthetic bars",
            bars.len()
        );
        (bars, SeedSource::Synthetic)
    }

    async fn run_price_cycle(&self) -> usize {
        let handles = self.registry.handles();
        if handles.is_empty() {
            return 0;
        }
        self.feed.tick_all(handles, &self.price_tx).await
    }

    fn run_signal_cycle(&self) -> usize {
        let mut published = 0;
        for handle in self.registry.handles() {
            if let Some(event) = self.evaluate(&handle) {
                // No subscribers is fine
                let _ = self.signal_tx.send(event);
                published += 1;
            }
        }
        published
    }

    /// Score one instrument and apply the exit override
    fn evaluate(&self, handle: &InstrumentHandle) -> Option<SignalEvent> {
        let key = handle.key();
        let min_candles = self.strategy.min_candles_required();

        handle
            .with_state(|state| {
                if state.candles.len() < min_candles {
                    tracing::debug!(
                        instrument = %key,
                        bars = state.candles.len(),
                        "Not enough bars for a signal ({} needed)",
                        min_candles
                    );
                    return None;
                }

                let price = state.reference_price()?;
                let mut signal =
                    self.strategy
                        .generate_signal(state.candles.as_slice(), price, Utc::now())?;
                state.indicators = Some(signal.indicators.clone());

                if let Some(position) = &state.position {
                    if let Some(reason) = check_exit(position, price, signal.score, &self.config.exit) {
                        tracing::info!(
                            instrument = %key,
                            id = %position.id,
                            "EXIT proposed for {} position: {}",
                            position.direction,
                            reason
                        );
                        apply_exit(&mut signal, position, reason);
                    }
                }

                tracing::info!(
                    instrument = %key,
                    score = signal.score,
                    "Signal {} {:?} ({:?})",
                    signal.action,
                    signal.direction,
                    signal.confidence
                );

                state.signal = Some(signal.clone());
                Some(SignalEvent {
                    instrument: key.clone(),
                    signal,
                })
            })
            .flatten()
    }
}

async fn price_loop(engine: Weak<EngineInner>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(engine) = engine.upgrade() else {
            break;
        };
        let published = engine.run_price_cycle().await;
        tracing::trace!(events = published, "Price tick");
    }
}

async fn signal_loop(engine: Weak<EngineInner>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(engine) = engine.upgrade() else {
            break;
        };
        let published = engine.run_signal_cycle();
        tracing::debug!(events = published, "Signal tick");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::OfflineProvider;

    fn engine() -> Engine {
        let config = EngineConfig {
            fallback: crate::config::FallbackConfig {
                seed: Some(7),
                ..Default::default()
            },
            ..EngineConfig::default()
        };
        Engine::new(config, Arc::new(OfflineProvider), None).unwrap()
    }

    #[test]
    fn test_invalid_config_fails_construction() {
        let config = EngineConfig {
            max_candles: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            Engine::new(config, Arc::new(OfflineProvider), None),
            Err(EngineError::InvalidConfig(_))
        ));

        // Would otherwise panic in the candle store on first track
        let config = EngineConfig {
            bucket_secs: u64::MAX,
            ..EngineConfig::default()
        };
        assert!(matches!(
            Engine::new(config, Arc::new(OfflineProvider), None),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_instrument_rejected() {
        let engine = engine();
        assert!(matches!(
            engine.start_tracking("   ").await,
            Err(EngineError::InvalidInstrument(_))
        ));
        assert!(!engine.is_running());
        assert!(engine.tracked().is_empty());
    }

    #[tokio::test]
    async fn test_scheduler_is_lazy() {
        let engine = engine();
        assert!(!engine.is_running());

        engine.start_tracking("AAPL").await.unwrap();
        engine.start_tracking("reliance").await.unwrap();
        assert!(engine.is_running());
        assert_eq!(
            engine.tracked(),
            vec![InstrumentKey::from("AAPL"), InstrumentKey::from("RELIANCE.NS")]
        );

        engine.stop_tracking("AAPL").unwrap();
        assert!(engine.is_running());

        engine.stop_tracking("RELIANCE").unwrap();
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_scheduler_not_started_for_empty_registry() {
        let engine = engine();
        let key = InstrumentKey::from("AAPL");
        let state = InstrumentState::new(CandleBuffer::new(10, chrono::Duration::minutes(1)), Utc::now());

        // Untracked between the insert and the scheduler start
        engine.inner.registry.insert(key.clone(), state);
        engine.inner.registry.remove(&key);
        engine.inner.ensure_scheduler();
        assert!(!engine.is_running());

        engine.start_tracking("AAPL").await.unwrap();
        assert!(engine.is_running());
    }

    #[tokio::test]
    async fn test_synthetic_seed_when_offline() {
        let engine = engine();
        engine.start_tracking("AAPL").await.unwrap();

        let state = engine.get_state("AAPL").unwrap();
        assert_eq!(state.seed, SeedSource::Synthetic);
        assert_eq!(state.candles.len(), 60);
        assert!(state.indicators.is_some());
        assert!(state.last_price.is_none());
        assert!(state.source.is_none());
    }

    #[tokio::test]
    async fn test_retracking_is_a_noop() {
        let engine = engine();
        engine.start_tracking("AAPL").await.unwrap();
        let before = engine.get_state("AAPL").unwrap();

        engine.start_tracking("aapl").await.unwrap();
        let after = engine.get_state("AAPL").unwrap();
        assert_eq!(before.tracked_since, after.tracked_since);
    }

    #[tokio::test]
    async fn test_shutdown_untracks_everything() {
        let engine = engine();
        engine.start_tracking("AAPL").await.unwrap();
        engine.start_tracking("MSFT").await.unwrap();

        engine.shutdown();
        assert!(engine.tracked().is_empty());
        assert!(!engine.is_running());
        assert!(matches!(engine.get_state("AAPL"), Err(EngineError::NotTracked(_))));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_rejected_commands_are_logged() {
        let engine = engine();
        engine.start_tracking("AAPL").await.unwrap();

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            assert!(engine.stop_tracking("MSFT").is_err());
            assert!(engine
                .enter_position("AAPL", Direction::Call, f64::NAN, 110.0, 95.0)
                .is_err());
            engine
                .enter_position("AAPL", Direction::Call, 100.0, 110.0, 95.0)
                .unwrap();
            assert!(engine
                .enter_position("AAPL", Direction::Put, 100.0, 90.0, 105.0)
                .is_err());
        });

        let text = logs.text();
        assert!(text.contains("Stop rejected, not tracked"), "{}", text);
        assert_eq!(text.matches("Entry rejected").count(), 2, "{}", text);
        assert!(text.contains("MSFT"));
        assert!(text.contains("WARN"));
    }

    #[tokio::test]
    async fn test_commands_on_untracked_instrument() {
        let engine = engine();
        assert!(matches!(engine.stop_tracking("AAPL"), Err(EngineError::NotTracked(_))));
        assert!(matches!(
            engine.enter_position("AAPL", Direction::Call, 100.0, 110.0, 95.0),
            Err(EngineError::NotTracked(_))
        ));
        assert!(matches!(engine.exit_position("AAPL"), Err(EngineError::NotTracked(_))));
    }
}
