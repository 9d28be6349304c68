use serde::{Deserialize, Serialize};

use super::{
    calculate_atr, calculate_bollinger, calculate_ema, calculate_levels, calculate_macd,
    calculate_rsi, calculate_sma, calculate_stochastic, calculate_vwap, detect_trend,
    BollingerBands, Macd, Stochastic, SupportResistance, Trend, NEUTRAL_RSI,
};
use crate::config::IndicatorConfig;
use crate::models::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovingAverages {
    pub sma_fast: f64,
    pub sma_slow: f64,
    pub sma_long: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
}

/// Every indicator for one series, computed from scratch
///
/// Indicators lacking history report their neutral default instead of failing
/// the whole snapshot: RSI 50, MACD 0, Stochastic 50, moving averages and
/// Bollinger bands at the last close, neutral trend, ATR 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub bars: usize,
    pub close: f64,
    pub rsi: f64,
    pub macd: Macd,
    pub moving_averages: MovingAverages,
    pub bollinger: BollingerBands,
    pub stochastic: Stochastic,
    pub vwap: f64,
    pub atr: f64,
    pub trend: Trend,
    pub levels: SupportResistance,
}

impl IndicatorSnapshot {
    /// `None` only for an empty series
    pub fn compute(candles: &[Candle], config: &IndicatorConfig) -> Option<Self> {
        let close = candles.last()?.close;
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let sma = |period| calculate_sma(&closes, period).unwrap_or(close);
        let ema = |period| calculate_ema(&closes, period).unwrap_or(close);

        Some(Self {
            bars: candles.len(),
            close,
            rsi: calculate_rsi(&closes, config.rsi_period).unwrap_or(NEUTRAL_RSI),
            macd: calculate_macd(
                &closes,
                config.macd_fast,
                config.macd_slow,
                config.macd_signal,
            )
            .unwrap_or(Macd::NEUTRAL),
            moving_averages: MovingAverages {
                sma_fast: sma(config.sma_fast),
                sma_slow: sma(config.sma_slow),
                sma_long: sma(config.sma_long),
                ema_fast: ema(config.ema_fast),
                ema_slow: ema(config.ema_slow),
            },
            bollinger: calculate_bollinger(
                &closes,
                config.bollinger_period,
                config.bollinger_multiplier,
            )
            .unwrap_or_else(|| BollingerBands::collapsed(close)),
            stochastic: calculate_stochastic(candles, config.stochastic_period)
                .unwrap_or(Stochastic::NEUTRAL),
            vwap: calculate_vwap(candles, config.vwap_anchor).unwrap_or(close),
            atr: calculate_atr(candles, config.atr_period).unwrap_or(0.0),
            trend: detect_trend(&closes, config.sma_fast, config.sma_slow),
            levels: calculate_levels(candles, config.levels_lookback, config.retracement)
                .unwrap_or_else(|| SupportResistance::collapsed(close)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::TrendDirection;
    use chrono::{Duration, TimeZone, Utc};

    fn series(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 9, 15, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let open = if i == 0 { close } else { closes[i - 1] };
                Candle {
                    timestamp: start + Duration::minutes(i as i64),
                    open,
                    high: open.max(close),
                    low: open.min(close),
                    close,
                    volume: 1000.0 + i as f64 * 100.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_empty_series_has_no_snapshot() {
        assert!(IndicatorSnapshot::compute(&[], &IndicatorConfig::default()).is_none());
    }

    #[test]
    fn test_short_series_uses_neutral_defaults() {
        let candles = series(&[100.0, 101.0, 99.0]);
        let snapshot = IndicatorSnapshot::compute(&candles, &IndicatorConfig::default()).unwrap();

        assert_eq!(snapshot.rsi, 50.0);
        assert_eq!(snapshot.macd, Macd::NEUTRAL);
        assert_eq!(snapshot.stochastic, Stochastic::NEUTRAL);
        assert_eq!(snapshot.moving_averages.ema_slow, 99.0);
        assert_eq!(snapshot.bollinger, BollingerBands::collapsed(99.0));
        assert_eq!(snapshot.trend.direction, TrendDirection::Neutral);
        assert_eq!(snapshot.atr, 0.0);
        assert!(snapshot.vwap.is_finite());
    }

    #[test]
    fn test_macd_scores_before_slow_period_fills() {
        let closes: Vec<f64> = (0..22).map(|i| 100.0 + i as f64).collect();
        let snapshot = IndicatorSnapshot::compute(&series(&closes), &IndicatorConfig::default()).unwrap();

        assert_ne!(snapshot.macd, Macd::NEUTRAL);
        assert!(snapshot.macd.line < 0.0);
    }

    #[test]
    fn test_bounded_outputs_for_every_prefix() {
        let closes: Vec<f64> = (0..80)
            .map(|i| 100.0 + (i as f64 * 0.37).sin() * 5.0 + i as f64 * 0.1)
            .collect();
        let candles = series(&closes);
        let config = IndicatorConfig::default();

        for len in 1..=candles.len() {
            let snapshot = IndicatorSnapshot::compute(&candles[..len], &config).unwrap();
            assert!((0.0..=100.0).contains(&snapshot.rsi), "rsi at {}", len);
            assert!((0.0..=100.0).contains(&snapshot.stochastic.k), "%K at {}", len);
            assert!(snapshot.vwap.is_finite(), "vwap at {}", len);
        }
    }

    #[test]
    fn test_rising_series_snapshot() {
        let closes: Vec<f64> = (0..25).map(|i| 100.0 + i as f64 * 1.25).collect();
        let snapshot =
            IndicatorSnapshot::compute(&series(&closes), &IndicatorConfig::default()).unwrap();

        assert_eq!(snapshot.bars, 25);
        assert_eq!(snapshot.rsi, 100.0);
        assert_eq!(snapshot.stochastic.k, 100.0);
        assert_eq!(snapshot.trend.direction, TrendDirection::Bullish);
        assert!(snapshot.vwap < snapshot.close);
        assert_eq!(snapshot.levels.resistance, 130.0);
    }
}
