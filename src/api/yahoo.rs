use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration, Instant};

use super::{HistoryProvider, PriceProvider, Quote};
use crate::error::ProviderError;
use crate::models::{Candle, InstrumentKey};

const YAHOO_API_BASE: &str = "https://query1.finance.yahoo.com";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; tickpulse/0.1)";
const RATE_LIMIT_RPM: u32 = 120;
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;
const HISTORY_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
/// Minute bars in one regular session; longer lookbacks need a wider range
const SESSION_MINUTES: usize = 390;

type YahooRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Clone)]
struct CachedHistory {
    candles: Vec<Candle>,
    expires_at: Instant,
}

/// Yahoo Finance chart API client
///
/// Serves both live quotes and seed history from the 1-minute chart endpoint.
/// Clones share the rate limiter and caches.
#[derive(Clone)]
pub struct YahooClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<YahooRateLimiter>,
    history_cache: Arc<RwLock<HashMap<(InstrumentKey, &'static str), CachedHistory>>>,
    /// Newest minute bar seen per instrument: (bar timestamp, bar volume)
    last_volume: Arc<Mutex<HashMap<InstrumentKey, (i64, f64)>>>,
    retry_backoff: Duration,
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl ChartResult {
    fn series(&self) -> Option<&QuoteSeries> {
        self.indicators.quote.first()
    }

    /// Complete bars only, oldest first
    fn candles(&self) -> Vec<Candle> {
        let Some(series) = self.series() else {
            return Vec::new();
        };
        let at = |values: &[Option<f64>], i: usize| values.get(i).copied().flatten();

        self.timestamp
            .iter()
            .enumerate()
            .filter_map(|(i, &ts)| {
                Some(Candle {
                    timestamp: DateTime::<Utc>::from_timestamp(ts, 0)?,
                    open: at(&series.open, i)?,
                    high: at(&series.high, i)?,
                    low: at(&series.low, i)?,
                    close: at(&series.close, i)?,
                    volume: at(&series.volume, i).unwrap_or(0.0),
                })
            })
            .collect()
    }

    /// Newest bar that reported a volume
    fn last_volume(&self) -> Option<(i64, f64)> {
        let series = self.series()?;
        self.timestamp
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, &ts)| series.volume.get(i).copied().flatten().map(|v| (ts, v)))
    }

    fn last_close(&self) -> Option<f64> {
        self.series()?.close.iter().rev().find_map(|c| *c)
    }
}

/// Volume traded since the previous observation of the newest bar
fn volume_delta(previous: Option<(i64, f64)>, current: (i64, f64)) -> f64 {
    match previous {
        Some((ts, volume)) if ts == current.0 => (current.1 - volume).max(0.0),
        // A new bar: everything it reports happened since the last poll
        Some(_) => current.1.max(0.0),
        // First poll, nothing to compare against
        None => 0.0,
    }
}

impl YahooClient {
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_base_url(YAHOO_API_BASE)
    }

    /// Client against a different host, used by tests
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()?;

        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            history_cache: Arc::new(RwLock::new(HashMap::new())),
            last_volume: Arc::new(Mutex::new(HashMap::new())),
            retry_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Fetch the 1-minute chart once
    async fn fetch_chart(
        &self,
        instrument: &InstrumentKey,
        range: &str,
    ) -> Result<ChartResult, ProviderError> {
        self.rate_limiter.until_ready().await;

        let url = format!(
            "{}/v8/finance/chart/{}",
            self.base_url,
            instrument.as_str().replace('^', "%5E")
        );

        let response = self
            .client
            .get(&url)
            .query(&[("interval", "1m"), ("range", range)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chart = response.json::<ChartResponse>().await?.chart;
        if let Some(error) = chart.error {
            return Err(ProviderError::NoData(format!(
                "{}: {} ({})",
                instrument, error.description, error.code
            )));
        }

        chart
            .result
            .and_then(|results| results.into_iter().next())
            .ok_or_else(|| ProviderError::NoData(instrument.to_string()))
    }

    /// Fetch the chart, retrying transient failures with exponential backoff
    async fn fetch_chart_with_retry(
        &self,
        instrument: &InstrumentKey,
        range: &str,
    ) -> Result<ChartResult, ProviderError> {
        let mut attempt = 1;
        loop {
            let error = match self.fetch_chart(instrument, range).await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            let retryable = match &error {
                ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
                ProviderError::Http(_) => true,
                _ => false,
            };
            if !retryable || attempt >= MAX_RETRIES {
                return Err(error);
            }

            let backoff = self.retry_backoff * 2u32.pow(attempt - 1);
            tracing::warn!(
                instrument = %instrument,
                "Attempt {}/{} failed: {}. Retrying in {:?}",
                attempt,
                MAX_RETRIES,
                error,
                backoff
            );
            sleep(backoff).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl PriceProvider for YahooClient {
    async fn latest_price(&self, instrument: &InstrumentKey) -> Result<Quote, ProviderError> {
        // No retry here, the engine bounds each poll with its own timeout
        let chart = self.fetch_chart(instrument, "1d").await?;

        let price = chart
            .meta
            .regular_market_price
            .or_else(|| chart.last_close())
            .ok_or_else(|| ProviderError::NoData(instrument.to_string()))?;
        if !price.is_finite() || price <= 0.0 {
            return Err(ProviderError::InvalidPrice(price));
        }

        let volume_delta = match chart.last_volume() {
            Some(current) => {
                let mut seen = self.last_volume.lock().await;
                let delta = volume_delta(seen.get(instrument).copied(), current);
                seen.insert(instrument.clone(), current);
                delta
            }
            None => 0.0,
        };

        Ok(Quote::new(price, volume_delta))
    }
}

#[async_trait]
impl HistoryProvider for YahooClient {
    async fn history(
        &self,
        instrument: &InstrumentKey,
        lookback: usize,
    ) -> Result<Vec<Candle>, ProviderError> {
        let range = if lookback > SESSION_MINUTES { "5d" } else { "1d" };
        let cache_key = (instrument.clone(), range);

        let cached = self
            .history_cache
            .read()
            .await
            .get(&cache_key)
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| entry.candles.clone());

        let candles = match cached {
            Some(candles) => {
                tracing::debug!(instrument = %instrument, "History cache hit");
                candles
            }
            None => {
                let candles = self.fetch_chart_with_retry(instrument, range).await?.candles();
                if candles.is_empty() {
                    return Err(ProviderError::NoData(instrument.to_string()));
                }

                tracing::info!(
                    instrument = %instrument,
                    bars = candles.len(),
                    "Fetched {} history",
                    range
                );
                self.history_cache.write().await.insert(
                    cache_key,
                    CachedHistory {
                        candles: candles.clone(),
                        expires_at: Instant::now() + HISTORY_CACHE_TTL,
                    },
                );
                candles
            }
        };

        let skip = candles.len().saturating_sub(lookback);
        Ok(candles.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    const CHART_BODY: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"symbol": "AAPL", "regularMarketPrice": 189.5},
                "timestamp": [1714986000, 1714986060, 1714986120],
                "indicators": {"quote": [{
                    "open":   [189.0, null, 189.3],
                    "high":   [189.4, null, 189.6],
                    "low":    [188.9, null, 189.2],
                    "close":  [189.2, null, 189.5],
                    "volume": [1200, null, 800]
                }]}
            }],
            "error": null
        }
    }"#;

    fn client(server: &Server) -> YahooClient {
        YahooClient::with_base_url(server.url())
            .unwrap()
            .with_retry_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_latest_price() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v8/finance/chart/AAPL")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(CHART_BODY)
            .create_async()
            .await;

        let quote = client(&server)
            .latest_price(&InstrumentKey::from("AAPL"))
            .await
            .unwrap();

        assert_eq!(quote.price, 189.5);
        // First poll has nothing to diff against
        assert_eq!(quote.volume_delta, 0.0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_history_skips_null_bars_and_is_cached() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v8/finance/chart/AAPL")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(CHART_BODY)
            .expect(1)
            .create_async()
            .await;

        let client = client(&server);
        let key = InstrumentKey::from("AAPL");

        let candles = client.history(&key, 100).await.unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 189.2);
        assert_eq!(candles[1].volume, 800.0);

        let again = client.history(&key, 1).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].close, 189.5);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v8/finance/chart/AAPL")
            .with_status(404)
            .with_body(r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#)
            .expect(1)
            .create_async()
            .await;

        let result = client(&server).history(&InstrumentKey::from("AAPL"), 10).await;
        assert!(matches!(result, Err(ProviderError::Status { status: 404, .. })));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v8/finance/chart/AAPL")
            .with_status(503)
            .expect(MAX_RETRIES as usize)
            .create_async()
            .await;

        let result = client(&server).history(&InstrumentKey::from("AAPL"), 10).await;
        assert!(matches!(result, Err(ProviderError::Status { status: 503, .. })));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_chart_error_payload_is_no_data() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v8/finance/chart/AAPL")
            .with_status(200)
            .with_body(r#"{"chart":{"result":null,"error":{"code":"Bad","description":"delisted"}}}"#)
            .create_async()
            .await;

        let result = client(&server).latest_price(&InstrumentKey::from("AAPL")).await;
        assert!(matches!(result, Err(ProviderError::NoData(_))));
    }

    #[test]
    fn test_volume_delta() {
        assert_eq!(volume_delta(None, (60, 500.0)), 0.0);
        assert_eq!(volume_delta(Some((60, 500.0)), (60, 650.0)), 150.0);
        assert_eq!(volume_delta(Some((60, 500.0)), (120, 40.0)), 40.0);
        // Upstream revisions never produce negative volume
        assert_eq!(volume_delta(Some((60, 500.0)), (60, 450.0)), 0.0);
    }
}
