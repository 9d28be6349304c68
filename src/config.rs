use anyhow::Context;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::EngineError;
use crate::execution::position_manager::ExitThresholds;
use crate::indicators::VwapAnchor;
use crate::strategy::signals::ScoringWeights;

const DEFAULT_CONFIG_FILE: &str = "tickpulse";
const ENV_PREFIX: &str = "TICKPULSE";

/// Longest accepted cadence, timeout or bar width
const MAX_PERIOD_MS: u64 = 24 * 60 * 60 * 1000;
const MAX_CANDLES: usize = 100_000;
const MAX_EVENT_CAPACITY: usize = 65_536;

/// Indicator periods and parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub sma_fast: usize,
    pub sma_slow: usize,
    pub sma_long: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub bollinger_period: usize,
    pub bollinger_multiplier: f64,
    pub stochastic_period: usize,
    pub atr_period: usize,
    pub levels_lookback: usize,
    pub retracement: f64,
    pub vwap_anchor: VwapAnchor,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            sma_fast: 5,
            sma_slow: 20,
            sma_long: 50,
            ema_fast: 9,
            ema_slow: 21,
            bollinger_period: 20,
            bollinger_multiplier: 2.0,
            stochastic_period: 14,
            atr_period: 14,
            levels_lookback: 50,
            retracement: 0.382,
            // Whole retained window
            vwap_anchor: VwapAnchor::Window,
        }
    }
}

impl IndicatorConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let periods = [
            ("rsi_period", self.rsi_period),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("sma_fast", self.sma_fast),
            ("sma_slow", self.sma_slow),
            ("sma_long", self.sma_long),
            ("ema_fast", self.ema_fast),
            ("ema_slow", self.ema_slow),
            ("bollinger_period", self.bollinger_period),
            ("stochastic_period", self.stochastic_period),
            ("atr_period", self.atr_period),
            ("levels_lookback", self.levels_lookback),
        ];

        if let Some((name, _)) = periods.iter().find(|(_, period)| *period == 0) {
            return Err(EngineError::InvalidConfig(format!("{} must be positive", name)));
        }

        if self.macd_fast >= self.macd_slow {
            return Err(EngineError::InvalidConfig(
                "macd_fast must be shorter than macd_slow".to_string(),
            ));
        }

        if self.sma_fast >= self.sma_slow {
            return Err(EngineError::InvalidConfig(
                "sma_fast must be shorter than sma_slow".to_string(),
            ));
        }

        if !(self.bollinger_multiplier.is_finite() && self.bollinger_multiplier > 0.0) {
            return Err(EngineError::InvalidConfig(
                "bollinger_multiplier must be positive".to_string(),
            ));
        }

        if !(self.retracement > 0.0 && self.retracement < 1.0) {
            return Err(EngineError::InvalidConfig(
                "retracement must be within (0, 1)".to_string(),
            ));
        }

        Ok(())
    }
}

/// Degraded-mode price generator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Starting price when neither a live price nor history is available
    pub base_price: f64,
    /// Maximum relative move per tick
    pub volatility: f64,
    /// Fixed RNG seed; derived from the last known close when unset
    pub seed: Option<u64>,
    /// Bars generated for a synthetic seed series
    pub synthetic_bars: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            base_price: 100.0,
            volatility: 0.001,
            seed: None,
            synthetic_bars: 60,
        }
    }
}

/// Engine configuration
///
/// Loaded from defaults, then an optional `tickpulse.toml`, then
/// `TICKPULSE__*` environment variables (e.g. `TICKPULSE__MAX_CANDLES=300`,
/// `TICKPULSE__INDICATORS__RSI_PERIOD=10`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub price_interval_ms: u64,
    pub signal_interval_ms: u64,
    pub bucket_secs: u64,
    pub max_candles: usize,
    pub fetch_timeout_ms: u64,
    pub seed_lookback: usize,
    pub min_signal_candles: usize,
    pub event_capacity: usize,
    pub fallback: FallbackConfig,
    pub indicators: IndicatorConfig,
    pub scoring: ScoringWeights,
    pub exit: ExitThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            price_interval_ms: 1_000,
            signal_interval_ms: 30_000,
            bucket_secs: 60,
            max_candles: 500,
            fetch_timeout_ms: 3_000,
            seed_lookback: 100,
            min_signal_candles: 20,
            event_capacity: 256,
            fallback: FallbackConfig::default(),
            indicators: IndicatorConfig::default(),
            scoring: ScoringWeights::default(),
            exit: ExitThresholds::default(),
        }
    }
}

impl EngineConfig {
    /// Load from `path`, or `tickpulse.toml` when present, then the environment
    pub fn load_from(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: EngineConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break scheduling or indicator invariants
    pub fn validate(&self) -> Result<(), EngineError> {
        let positive = [
            ("price_interval_ms", self.price_interval_ms as usize),
            ("signal_interval_ms", self.signal_interval_ms as usize),
            ("bucket_secs", self.bucket_secs as usize),
            ("max_candles", self.max_candles),
            ("fetch_timeout_ms", self.fetch_timeout_ms as usize),
            ("min_signal_candles", self.min_signal_candles),
            ("event_capacity", self.event_capacity),
        ];

        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(EngineError::InvalidConfig(format!("{} must be positive", name)));
        }

        let bounded_ms = [
            ("price_interval_ms", self.price_interval_ms),
            ("signal_interval_ms", self.signal_interval_ms),
            ("fetch_timeout_ms", self.fetch_timeout_ms),
            ("bucket_secs", self.bucket_secs.saturating_mul(1000)),
        ];
        if let Some((name, _)) = bounded_ms.iter().find(|(_, ms)| *ms > MAX_PERIOD_MS) {
            return Err(EngineError::InvalidConfig(format!("{} must not exceed one day", name)));
        }

        let bounded_counts = [
            ("max_candles", self.max_candles, MAX_CANDLES),
            ("seed_lookback", self.seed_lookback, MAX_CANDLES),
            ("fallback.synthetic_bars", self.fallback.synthetic_bars, self.max_candles),
            ("event_capacity", self.event_capacity, MAX_EVENT_CAPACITY),
        ];
        if let Some((name, _, max)) = bounded_counts.iter().find(|(_, value, max)| value > max) {
            return Err(EngineError::InvalidConfig(format!("{} must not exceed {}", name, max)));
        }

        if self.max_candles < self.min_signal_candles {
            return Err(EngineError::InvalidConfig(format!(
                "max_candles ({}) is below min_signal_candles ({})",
                self.max_candles, self.min_signal_candles
            )));
        }

        if !(self.fallback.base_price.is_finite() && self.fallback.base_price > 0.0) {
            return Err(EngineError::InvalidConfig(
                "fallback.base_price must be positive".to_string(),
            ));
        }

        if !(0.0..0.5).contains(&self.fallback.volatility) {
            return Err(EngineError::InvalidConfig(
                "fallback.volatility must be within [0, 0.5)".to_string(),
            ));
        }

        self.indicators.validate()?;
        self.exit.validate()?;
        Ok(())
    }

    pub fn price_interval(&self) -> Duration {
        Duration::from_millis(self.price_interval_ms)
    }

    pub fn signal_interval(&self) -> Duration {
        Duration::from_millis(self.signal_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn bucket(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.bucket_secs as i64)
    }
}
