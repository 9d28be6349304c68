use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Strategy;
use crate::config::IndicatorConfig;
use crate::indicators::{IndicatorSnapshot, TrendDirection};
use crate::models::{Action, Candle, Confidence, Direction, Signal};

const NEUTRAL_SCORE: f64 = 50.0;

/// Weights and thresholds for the composite score
///
/// Every contribution is added for bullish evidence and subtracted for
/// bearish evidence around the neutral 50.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub rsi: f64,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    /// Histogram sign alone
    pub macd: f64,
    /// Histogram sign confirmed by the MACD line's side of zero
    pub macd_confirmed: f64,
    pub moving_average: f64,
    pub bollinger: f64,
    pub stochastic: f64,
    pub stochastic_high: f64,
    pub stochastic_low: f64,
    pub trend: f64,
    pub vwap: f64,
    /// Target distance in ATRs when no resistance/support lies ahead
    pub atr_target_multiple: f64,
    /// Stop distance in ATRs when no support/resistance lies behind
    pub atr_stop_multiple: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            rsi: 15.0,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            macd: 10.0,
            macd_confirmed: 15.0,
            moving_average: 10.0,
            bollinger: 10.0,
            stochastic: 8.0,
            stochastic_high: 80.0,
            stochastic_low: 20.0,
            trend: 7.0,
            vwap: 5.0,
            atr_target_multiple: 2.0,
            atr_stop_multiple: 1.0,
        }
    }
}

/// Composite score in [0, 100] with the reasons that moved it
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub value: f64,
    pub reasons: Vec<String>,
}

/// Sum the weighted contributions of every indicator and clamp to [0, 100]
pub fn score_snapshot(snapshot: &IndicatorSnapshot, weights: &ScoringWeights) -> Score {
    let mut value = NEUTRAL_SCORE;
    let mut reasons = Vec::new();
    let close = snapshot.close;

    if snapshot.rsi >= weights.rsi_overbought {
        value += weights.rsi;
        reasons.push(format!("RSI {:.1} shows strong upside momentum", snapshot.rsi));
    } else if snapshot.rsi <= weights.rsi_oversold {
        value -= weights.rsi;
        reasons.push(format!("RSI {:.1} shows strong downside momentum", snapshot.rsi));
    }

    let macd = snapshot.macd;
    if macd.histogram > 0.0 {
        let weight = if macd.line > 0.0 { weights.macd_confirmed } else { weights.macd };
        value += weight;
        reasons.push(format!("MACD histogram positive ({:.4})", macd.histogram));
    } else if macd.histogram < 0.0 {
        let weight = if macd.line < 0.0 { weights.macd_confirmed } else { weights.macd };
        value -= weight;
        reasons.push(format!("MACD histogram negative ({:.4})", macd.histogram));
    }

    let ma = snapshot.moving_averages;
    if close > ma.sma_slow && ma.sma_fast > ma.sma_slow {
        value += weights.moving_average;
        reasons.push("Price and fast SMA above slow SMA".to_string());
    } else if close < ma.sma_slow && ma.sma_fast < ma.sma_slow {
        value -= weights.moving_average;
        reasons.push("Price and fast SMA below slow SMA".to_string());
    }

    if close > snapshot.bollinger.upper {
        value += weights.bollinger;
        reasons.push("Breakout above upper Bollinger band".to_string());
    } else if close < snapshot.bollinger.lower {
        value -= weights.bollinger;
        reasons.push("Breakdown below lower Bollinger band".to_string());
    }

    let k = snapshot.stochastic.k;
    if k >= weights.stochastic_high {
        value += weights.stochastic;
        reasons.push(format!("Stochastic %K {:.1} near range high", k));
    } else if k <= weights.stochastic_low {
        value -= weights.stochastic;
        reasons.push(format!("Stochastic %K {:.1} near range low", k));
    }

    match snapshot.trend.direction {
        TrendDirection::Bullish => {
            value += weights.trend;
            reasons.push(format!("Bullish trend ({:.2}%)", snapshot.trend.strength));
        }
        TrendDirection::Bearish => {
            value -= weights.trend;
            reasons.push(format!("Bearish trend ({:.2}%)", snapshot.trend.strength));
        }
        TrendDirection::Neutral => {}
    }

    if close > snapshot.vwap {
        value += weights.vwap;
        reasons.push("Price above VWAP".to_string());
    } else if close < snapshot.vwap {
        value -= weights.vwap;
        reasons.push("Price below VWAP".to_string());
    }

    Score {
        value: value.clamp(0.0, 100.0),
        reasons,
    }
}

/// Map a score onto an action
///
/// Fractional scores that fall between two bands go to the wider band.
pub fn map_action(score: f64) -> (Action, Option<Direction>, Confidence) {
    if score > 74.0 {
        (Action::Buy, Some(Direction::Call), Confidence::High)
    } else if score >= 60.0 {
        (Action::Buy, Some(Direction::Call), Confidence::Moderate)
    } else if score > 40.0 {
        (Action::Wait, None, Confidence::Low)
    } else if score >= 26.0 {
        (Action::Buy, Some(Direction::Put), Confidence::Moderate)
    } else {
        (Action::Buy, Some(Direction::Put), Confidence::High)
    }
}

/// Target and stop-loss for a direction
///
/// Targets use the extreme level ahead of the price and stops the nearer
/// retracement level behind it. A level on the wrong side of the price is
/// replaced by an ATR multiple.
pub fn target_and_stop(
    snapshot: &IndicatorSnapshot,
    direction: Direction,
    price: f64,
    weights: &ScoringWeights,
) -> (f64, f64) {
    let levels = snapshot.levels;
    let target_offset = snapshot.atr * weights.atr_target_multiple;
    let stop_offset = snapshot.atr * weights.atr_stop_multiple;

    match direction {
        Direction::Call => {
            let target = if levels.resistance > price {
                levels.resistance
            } else {
                price + target_offset
            };
            let stop = if levels.near_support < price {
                levels.near_support
            } else {
                price - stop_offset
            };
            (target, stop)
        }
        Direction::Put => {
            let target = if levels.support < price {
                levels.support
            } else {
                price - target_offset
            };
            let stop = if levels.near_resistance > price {
                levels.near_resistance
            } else {
                price + stop_offset
            };
            (target, stop)
        }
    }
}

/// Weighted multi-indicator scoring strategy
pub struct CompositeStrategy {
    indicators: IndicatorConfig,
    weights: ScoringWeights,
    min_candles: usize,
}

impl CompositeStrategy {
    pub fn new(indicators: IndicatorConfig, weights: ScoringWeights, min_candles: usize) -> Self {
        Self {
            indicators,
            weights,
            min_candles,
        }
    }
}

impl Default for CompositeStrategy {
    fn default() -> Self {
        Self::new(IndicatorConfig::default(), ScoringWeights::default(), 20)
    }
}

impl Strategy for CompositeStrategy {
    fn name(&self) -> &str {
        "composite"
    }

    fn min_candles_required(&self) -> usize {
        self.min_candles
    }

    fn generate_signal(&self, candles: &[Candle], price: f64, at: DateTime<Utc>) -> Option<Signal> {
        if candles.len() < self.min_candles {
            return None;
        }

        let indicators = IndicatorSnapshot::compute(candles, &self.indicators)?;
        let score = score_snapshot(&indicators, &self.weights);
        let (action, direction, confidence) = map_action(score.value);

        let (target, stop_loss) = match direction {
            Some(direction) => {
                let (target, stop) = target_and_stop(&indicators, direction, price, &self.weights);
                (Some(target), Some(stop))
            }
            None => (None, None),
        };

        tracing::debug!(
            "Score {:.0} -> {} {:?} (RSI={:.1}, MACD hist={:.4}, %K={:.1}, trend={:?})",
            score.value,
            action,
            direction,
            indicators.rsi,
            indicators.macd.histogram,
            indicators.stochastic.k,
            indicators.trend.direction
        );

        Some(Signal {
            timestamp: at,
            price,
            score: score.value,
            action,
            direction,
            confidence,
            target,
            stop_loss,
            exit_reason: None,
            reasons: score.reasons,
            levels: indicators.levels,
            indicators,
        })
    }
}
