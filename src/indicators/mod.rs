// Technical indicators module
// Pure functions over a candle series plus the per-cycle snapshot

pub mod atr;
pub mod bollinger;
pub mod levels;
pub mod macd;
pub mod moving_average;
pub mod rsi;
pub mod snapshot;
pub mod stochastic;
pub mod trend;
pub mod vwap;

pub use atr::calculate_atr;
pub use bollinger::{calculate_bollinger, BollingerBands};
pub use levels::{calculate_levels, SupportResistance};
pub use macd::{calculate_macd, Macd};
pub use moving_average::{calculate_ema, calculate_ema_series, calculate_sma};
pub use rsi::{calculate_rsi, NEUTRAL_RSI};
pub use snapshot::{IndicatorSnapshot, MovingAverages};
pub use stochastic::{calculate_stochastic, Stochastic};
pub use trend::{detect_trend, Trend, TrendDirection};
pub use vwap::{calculate_vwap, VwapAnchor};
