use chrono::{DateTime, Duration, DurationRound, Utc};
use std::collections::VecDeque;

use crate::error::TickRejected;
use crate::models::Candle;

/// Rolling window of fixed-width OHLCV bars for one instrument
///
/// Bars are strictly increasing by bucket start and never exceed
/// `max_candles`; the oldest bar is evicted first.
#[derive(Debug, Clone)]
pub struct CandleBuffer {
    candles: VecDeque<Candle>,
    max_candles: usize,
    bucket: Duration,
}

impl CandleBuffer {
    /// Create an empty buffer
    ///
    /// # Arguments
    /// * `max_candles` - Maximum number of bars to keep
    /// * `bucket` - Width of one bar
    pub fn new(max_candles: usize, bucket: Duration) -> Self {
        assert!(max_candles > 0, "candle buffer capacity must be positive");
        assert!(bucket > Duration::zero(), "bucket width must be positive");

        Self {
            candles: VecDeque::with_capacity(max_candles),
            max_candles,
            bucket,
        }
    }

    /// Start of the bucket containing `at`
    pub fn bucket_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at.duration_trunc(self.bucket).unwrap_or(at)
    }

    /// Fold a price tick into the series
    ///
    /// Opens a new bar when `at` falls in a later bucket than the newest bar,
    /// otherwise extends the newest bar. A tick stamped earlier than the
    /// newest bar (clock skew) extends the newest bar rather than reordering
    /// the series.
    pub fn apply_tick(
        &mut self,
        at: DateTime<Utc>,
        price: f64,
        volume_delta: f64,
    ) -> Result<Candle, TickRejected> {
        if !price.is_finite() || price <= 0.0 {
            return Err(TickRejected::InvalidPrice(price));
        }

        let volume_delta = if volume_delta.is_finite() && volume_delta > 0.0 {
            volume_delta
        } else {
            0.0
        };
        let bucket = self.bucket_start(at);

        if let Some(current) = self
            .candles
            .back_mut()
            .filter(|current| bucket <= current.timestamp)
        {
            current.high = current.high.max(price);
            current.low = current.low.min(price);
            current.close = price;
            current.volume += volume_delta;
            return Ok(current.clone());
        }

        let candle = Candle::flat(bucket, price, volume_delta);
        self.candles.push_back(candle.clone());
        self.evict();
        Ok(candle)
    }

    /// Prepend historical bars older than the newest bar already held
    ///
    /// Malformed bars are skipped, duplicates by bucket keep the later entry.
    /// Returns the number of bars kept.
    pub fn seed(&mut self, bars: Vec<Candle>) -> usize {
        let oldest = self.candles.front().map(|c| c.timestamp);

        let mut history: Vec<Candle> = bars
            .into_iter()
            .filter(Candle::is_well_formed)
            .map(|mut bar| {
                bar.timestamp = self.bucket_start(bar.timestamp);
                bar
            })
            .filter(|bar| oldest.map_or(true, |oldest| bar.timestamp < oldest))
            .collect();

        history.sort_by_key(|bar| bar.timestamp);
        history.reverse();
        history.dedup_by_key(|bar| bar.timestamp);

        let kept = history.len();
        for bar in history {
            self.candles.push_front(bar);
        }
        self.evict();

        kept.min(self.candles.len())
    }

    fn evict(&mut self) {
        while self.candles.len() > self.max_candles {
            self.candles.pop_front();
        }
    }

    /// Contiguous view of the bars, oldest first
    pub fn as_slice(&mut self) -> &[Candle] {
        self.candles.make_contiguous()
    }

    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}
