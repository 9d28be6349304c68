// Candle store, schedulers and position tracking
pub mod candle_buffer;
pub mod engine;
pub mod fallback;
pub mod position_manager;
pub mod price_feed;
pub mod registry;

pub use candle_buffer::CandleBuffer;
pub use engine::Engine;
pub use fallback::{synthetic_history, FallbackWalk};
pub use position_manager::{check_exit, ExitThresholds};
pub use price_feed::PriceFeedManager;
pub use registry::{InstrumentHandle, InstrumentState, Registry};
