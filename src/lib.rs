// Core modules
pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod strategy;

// Re-export commonly used types
pub use api::{HistoryProvider, OfflineProvider, PriceProvider, Quote, YahooClient};
pub use config::EngineConfig;
pub use error::{EngineError, ProviderError};
pub use execution::Engine;
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
