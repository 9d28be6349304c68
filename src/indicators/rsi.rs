/// Neutral RSI used when there are not enough bars
pub const NEUTRAL_RSI: f64 = 50.0;

/// Calculate Relative Strength Index (RSI)
///
/// Simple average of the gains and losses over the last `period` deltas.
/// Returns `None` when fewer than `period + 1` prices are available.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let tail = &prices[prices.len() - (period + 1)..];

    let (gains, losses) = tail.windows(2).fold((0.0, 0.0), |(gains, losses), pair| {
        let change = pair[1] - pair[0];
        if change > 0.0 {
            (gains + change, losses)
        } else {
            (gains, losses - change)
        }
    });

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}
