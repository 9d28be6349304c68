use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Action, ClosedPosition, Confidence, Direction, ExitReason, Position, Signal};

/// Score thresholds that count as a trend reversal against a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitThresholds {
    /// Exit a CALL when the score falls below this
    pub call_reversal_below: f64,
    /// Exit a PUT when the score rises above this
    pub put_reversal_above: f64,
}

impl Default for ExitThresholds {
    fn default() -> Self {
        Self {
            call_reversal_below: 35.0,
            put_reversal_above: 65.0,
        }
    }
}

impl ExitThresholds {
    pub fn validate(&self) -> Result<(), EngineError> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(self.call_reversal_below) || !in_range(self.put_reversal_above) {
            return Err(EngineError::InvalidConfig(
                "exit thresholds must be within [0, 100]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validate an enter command and build the position
///
/// Levels only need to be positive finite numbers; whether they make sense
/// for the direction is the caller's call.
pub fn open_position(
    direction: Direction,
    entry_price: f64,
    target: f64,
    stop_loss: f64,
    entry_time: DateTime<Utc>,
) -> Result<Position, EngineError> {
    for (name, value) in [
        ("entry", entry_price),
        ("target", target),
        ("stop-loss", stop_loss),
    ] {
        if !value.is_finite() || value <= 0.0 {
            return Err(EngineError::InvalidPosition(format!(
                "{} must be a positive number, got {}",
                name, value
            )));
        }
    }

    Ok(Position {
        id: Uuid::new_v4(),
        direction,
        entry_price,
        target,
        stop_loss,
        entry_time,
    })
}

/// Close a position at the last known price
pub fn close_position(
    position: Position,
    exit_price: Option<f64>,
    exit_time: DateTime<Utc>,
) -> ClosedPosition {
    let pnl_pct = exit_price.map(|price| {
        let raw = (price - position.entry_price) / position.entry_price * 100.0;
        match position.direction {
            Direction::Call => raw,
            Direction::Put => -raw,
        }
    });

    ClosedPosition {
        position,
        exit_price,
        exit_time,
        pnl_pct,
    }
}

/// Check whether an open position should be exited
///
/// Rules are checked in order and only the first match is reported:
/// target reached, stop-loss breached, score reversal.
pub fn check_exit(
    position: &Position,
    price: f64,
    score: f64,
    thresholds: &ExitThresholds,
) -> Option<ExitReason> {
    let (target_hit, stop_hit, reversal) = match position.direction {
        Direction::Call => (
            price >= position.target,
            price <= position.stop_loss,
            score < thresholds.call_reversal_below,
        ),
        Direction::Put => (
            price <= position.target,
            price >= position.stop_loss,
            score > thresholds.put_reversal_above,
        ),
    };

    if target_hit {
        Some(ExitReason::TargetHit)
    } else if stop_hit {
        Some(ExitReason::StopLossHit)
    } else if reversal {
        Some(ExitReason::TrendReversal)
    } else {
        None
    }
}

/// Rewrite a signal into an EXIT proposal for `position`
///
/// The position itself is left alone; only an explicit exit command removes it.
pub fn apply_exit(signal: &mut Signal, position: &Position, reason: ExitReason) {
    signal.action = Action::Exit;
    signal.direction = Some(position.direction);
    signal.confidence = Confidence::High;
    signal.target = Some(position.target);
    signal.stop_loss = Some(position.stop_loss);
    signal.exit_reason = Some(reason);
    signal
        .reasons
        .insert(0, format!("Exit {} position: {}", position.direction, reason));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(direction: Direction, target: f64, stop_loss: f64) -> Position {
        open_position(direction, 100.0, target, stop_loss, Utc::now()).unwrap()
    }

    #[test]
    fn test_open_position_rejects_bad_levels() {
        let now = Utc::now();
        assert!(open_position(Direction::Call, f64::NAN, 110.0, 95.0, now).is_err());
        assert!(open_position(Direction::Call, 100.0, -1.0, 95.0, now).is_err());
        assert!(open_position(Direction::Put, 100.0, 90.0, 0.0, now).is_err());
        assert!(open_position(Direction::Put, 100.0, 90.0, 105.0, now).is_ok());
    }

    #[test]
    fn test_call_target_hit() {
        let pos = position(Direction::Call, 110.0, 95.0);
        let thresholds = ExitThresholds::default();
        assert_eq!(check_exit(&pos, 110.0, 50.0, &thresholds), Some(ExitReason::TargetHit));
        assert_eq!(check_exit(&pos, 105.0, 50.0, &thresholds), None);
    }

    #[test]
    fn test_call_stop_loss_hit() {
        let pos = position(Direction::Call, 110.0, 95.0);
        assert_eq!(
            check_exit(&pos, 94.0, 80.0, &ExitThresholds::default()),
            Some(ExitReason::StopLossHit)
        );
    }

    #[test]
    fn test_put_levels_are_mirrored() {
        let pos = position(Direction::Put, 90.0, 105.0);
        let thresholds = ExitThresholds::default();
        assert_eq!(check_exit(&pos, 89.0, 50.0, &thresholds), Some(ExitReason::TargetHit));
        assert_eq!(check_exit(&pos, 106.0, 50.0, &thresholds), Some(ExitReason::StopLossHit));
        assert_eq!(check_exit(&pos, 100.0, 50.0, &thresholds), None);
    }

    #[test]
    fn test_trend_reversal() {
        let thresholds = ExitThresholds::default();
        let call = position(Direction::Call, 110.0, 95.0);
        assert_eq!(check_exit(&call, 100.0, 34.0, &thresholds), Some(ExitReason::TrendReversal));
        assert_eq!(check_exit(&call, 100.0, 35.0, &thresholds), None);

        let put = position(Direction::Put, 90.0, 105.0);
        assert_eq!(check_exit(&put, 100.0, 66.0, &thresholds), Some(ExitReason::TrendReversal));
        assert_eq!(check_exit(&put, 100.0, 65.0, &thresholds), None);
    }

    #[test]
    fn test_target_wins_over_stop_loss() {
        // Degenerate levels: 100 is both past the target and below the stop
        let pos = position(Direction::Call, 99.0, 101.0);
        assert_eq!(
            check_exit(&pos, 100.0, 10.0, &ExitThresholds::default()),
            Some(ExitReason::TargetHit)
        );
    }

    #[test]
    fn test_close_position_pnl() {
        let call = position(Direction::Call, 110.0, 95.0);
        let closed = close_position(call, Some(105.0), Utc::now());
        assert!((closed.pnl_pct.unwrap() - 5.0).abs() < 1e-9);

        let put = position(Direction::Put, 90.0, 105.0);
        let closed = close_position(put, Some(105.0), Utc::now());
        assert!((closed.pnl_pct.unwrap() + 5.0).abs() < 1e-9);

        let call = position(Direction::Call, 110.0, 95.0);
        assert!(close_position(call, None, Utc::now()).pnl_pct.is_none());
    }
}
