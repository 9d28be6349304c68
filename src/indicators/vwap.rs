use serde::{Deserialize, Serialize};

use crate::models::Candle;

/// Which bars contribute to the VWAP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VwapAnchor {
    /// Every retained bar
    #[default]
    Window,
    /// Bars sharing the UTC date of the newest bar
    Day,
}

/// Volume-weighted average of closes
///
/// Falls back to the latest close when the anchored bars carry no volume.
/// `None` only for an empty series.
pub fn calculate_vwap(candles: &[Candle], anchor: VwapAnchor) -> Option<f64> {
    let last = candles.last()?;

    let anchored: &[Candle] = match anchor {
        VwapAnchor::Window => candles,
        VwapAnchor::Day => {
            let day = last.timestamp.date_naive();
            let start = candles
                .iter()
                .rposition(|c| c.timestamp.date_naive() != day)
                .map(|idx| idx + 1)
                .unwrap_or(0);
            &candles[start..]
        }
    };

    let (weighted, volume) = anchored
        .iter()
        .fold((0.0, 0.0), |(weighted, volume), c| {
            (weighted + c.close * c.volume, volume + c.volume)
        });

    if volume <= 0.0 || !weighted.is_finite() {
        return Some(last.close);
    }

    Some(weighted / volume)
}
