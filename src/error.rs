use thiserror::Error;

use crate::models::InstrumentKey;

/// Errors returned by engine commands
///
/// None of these are fatal to the engine: a rejected command leaves every
/// instrument's state untouched.
#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("Invalid instrument: {0:?}")]
    InvalidInstrument(String),

    #[error("Instrument {0} is not tracked")]
    NotTracked(InstrumentKey),

    #[error("Instrument {0} already has an open position")]
    PositionAlreadyOpen(InstrumentKey),

    #[error("Instrument {0} has no open position")]
    NoOpenPosition(InstrumentKey),

    #[error("Invalid position levels: {0}")]
    InvalidPosition(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised by price and history providers
///
/// The schedulers treat every variant the same way (degraded mode + log),
/// the distinction only matters for diagnostics.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("No data for {0}")]
    NoData(String),

    #[error("Invalid price {0}")]
    InvalidPrice(f64),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// Returned by the candle series when a tick cannot be applied
#[derive(Debug, Error, PartialEq)]
pub enum TickRejected {
    #[error("price {0} is not a positive finite number")]
    InvalidPrice(f64),
}
