use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tickpulse::api::{HistoryProvider, OfflineProvider, PriceProvider, YahooClient};
use tickpulse::config::EngineConfig;
use tickpulse::execution::Engine;
use tickpulse::Result;
use tokio::sync::broadcast::error::RecvError;

/// Stream prices and trading signals for a handful of instruments
#[derive(Debug, Parser)]
#[command(name = "tickpulse", version)]
struct Args {
    /// Instruments to track (e.g. AAPL, RELIANCE, NIFTY)
    #[arg(required = true)]
    instruments: Vec<String>,

    /// Config file, defaults to ./tickpulse.toml when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run without network access on synthetic data
    #[arg(long)]
    offline: bool,

    /// Print signal events as JSON lines on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();
    let config = EngineConfig::load_from(args.config.as_deref())?;

    tracing::info!("🚀 tickpulse starting");
    tracing::info!(
        "  Price every {}ms, signals every {}ms, {}s bars, {} bars kept",
        config.price_interval_ms,
        config.signal_interval_ms,
        config.bucket_secs,
        config.max_candles
    );

    let (prices, history): (Arc<dyn PriceProvider>, Arc<dyn HistoryProvider>) = if args.offline {
        tracing::warn!("Offline mode, all prices are synthetic");
        let offline = Arc::new(OfflineProvider);
        (
            offline.clone() as Arc<dyn PriceProvider>,
            offline as Arc<dyn HistoryProvider>,
        )
    } else {
        let yahoo = Arc::new(YahooClient::new()?);
        (
            yahoo.clone() as Arc<dyn PriceProvider>,
            yahoo as Arc<dyn HistoryProvider>,
        )
    };

    let engine = Engine::new(config, prices, Some(history))?;
    let mut price_rx = engine.subscribe_prices();
    let mut signal_rx = engine.subscribe_signals();

    for instrument in &args.instruments {
        match engine.start_tracking(instrument).await {
            Ok(key) => tracing::info!("  ✓ Tracking {}", key),
            Err(e) => tracing::warn!("  ✗ Skipping {:?}: {}", instrument, e),
        }
    }

    if engine.tracked().is_empty() {
        return Err("No valid instruments to track".into());
    }

    tracing::info!("Press Ctrl+C to stop...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            event = price_rx.recv() => match event {
                Ok(event) => tracing::debug!(
                    instrument = %event.instrument,
                    source = ?event.source,
                    "{:.2} ({:+.2}%)",
                    event.price,
                    event.change_percent
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Price subscriber lagged, {} events skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            },
            event = signal_rx.recv() => match event {
                Ok(event) if args.json => println!("{}", serde_json::to_string(&event)?),
                Ok(event) => tracing::info!(
                    instrument = %event.instrument,
                    "📈 {} {:?} score={:.0} target={:?} stop={:?}",
                    event.signal.action,
                    event.signal.direction,
                    event.signal.score,
                    event.signal.target,
                    event.signal.stop_loss
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Signal subscriber lagged, {} events skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.shutdown();
    tracing::info!("👋 tickpulse stopped");
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tickpulse=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
