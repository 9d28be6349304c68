mod instrument;

pub use instrument::InstrumentKey;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::indicators::{IndicatorSnapshot, SupportResistance};

/// OHLCV bar for one fixed-width time bucket
///
/// `timestamp` is the bucket start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Single-price bar opened by the first tick of a bucket
    pub fn flat(timestamp: DateTime<Utc>, price: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    /// `low <= {open, close} <= high`, every field finite and prices positive
    pub fn is_well_formed(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        prices.iter().all(|p| p.is_finite() && *p > 0.0)
            && self.volume.is_finite()
            && self.volume >= 0.0
            && self.low <= self.open.min(self.close)
            && self.high >= self.open.max(self.close)
    }
}

/// Where a price came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSource {
    Live,
    /// Seeded pseudo-random walk used while the provider is failing
    Fallback,
}

/// Where the initial history of a series came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeedSource {
    Provider,
    Synthetic,
    None,
}

/// Option side; `Call` is the long direction, `Put` the short one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Call,
    Put,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Call => f.write_str("CALL"),
            Direction::Put => f.write_str("PUT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Wait,
    Exit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => f.write_str("BUY"),
            Action::Wait => f.write_str("WAIT"),
            Action::Exit => f.write_str("EXIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    High,
    Moderate,
    Low,
}

/// Why the engine proposes closing a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    TargetHit,
    StopLossHit,
    TrendReversal,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::TargetHit => f.write_str("target hit"),
            ExitReason::StopLossHit => f.write_str("stop-loss hit"),
            ExitReason::TrendReversal => f.write_str("trend reversal"),
        }
    }
}

/// Trading signal emitted by the signal scheduler
///
/// Immutable once emitted; the next signal for the same instrument replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub score: f64,
    pub action: Action,
    pub direction: Option<Direction>,
    pub confidence: Confidence,
    pub target: Option<f64>,
    pub stop_loss: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub reasons: Vec<String>,
    pub indicators: IndicatorSnapshot,
    pub levels: SupportResistance,
}

/// At most one per instrument, opened and closed by explicit commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub direction: Direction,
    pub entry_price: f64,
    pub target: f64,
    pub stop_loss: f64,
    pub entry_time: DateTime<Utc>,
}

/// Returned by `exit_position`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub position: Position,
    pub exit_price: Option<f64>,
    pub exit_time: DateTime<Utc>,
    /// Percent move in the position's favour at `exit_price`
    pub pnl_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEvent {
    pub instrument: InstrumentKey,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub candle: Candle,
    pub timestamp: DateTime<Utc>,
    pub source: DataSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub instrument: InstrumentKey,
    pub signal: Signal,
}

/// Read-only copy of one instrument's engine state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStateSnapshot {
    pub instrument: InstrumentKey,
    pub tracked_since: DateTime<Utc>,
    pub last_price: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
    pub source: Option<DataSource>,
    pub seed: SeedSource,
    pub candles: Vec<Candle>,
    pub indicators: Option<IndicatorSnapshot>,
    pub signal: Option<Signal>,
    pub position: Option<Position>,
}
