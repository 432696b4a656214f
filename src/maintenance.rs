//! Maintenance Tool: a one-shot client that attaches to a car's region,
//! mutates a flag, and exits.

use crate::doorstate::DoorStatus;
use crate::floor;
use crate::region::{Region, RegionError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Open,
    Close,
    Stop,
    ServiceOn,
    ServiceOff,
    Up,
    Down,
}

#[derive(Error, Debug)]
pub enum MaintenanceError {
    #[error("unrecognized operation {0:?}")]
    UnknownOp(String),
    #[error("region error: {0}")]
    Region(#[from] RegionError),
}

impl std::str::FromStr for Op {
    type Err = MaintenanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Op::Open),
            "close" => Ok(Op::Close),
            "stop" => Ok(Op::Stop),
            "service_on" => Ok(Op::ServiceOn),
            "service_off" => Ok(Op::ServiceOff),
            "up" => Ok(Op::Up),
            "down" => Ok(Op::Down),
            other => Err(MaintenanceError::UnknownOp(other.to_string())),
        }
    }
}

/// Attaches to `car_name`'s region, performs `op` under the lock, and
/// broadcasts. `up`/`down` are silently no-ops when their preconditions
/// (service mode, `Closed` status) aren't met.
pub fn run(car_name: &str, op: Op) -> Result<(), MaintenanceError> {
    let region = Region::attach(car_name)?;
    let mut guard = region.lock();

    match op {
        Op::Open => guard.set_open_button(true),
        Op::Close => guard.set_close_button(true),
        Op::Stop => guard.set_emergency_stop(true),
        Op::ServiceOn => {
            guard.set_individual_service_mode(true);
            guard.set_emergency_mode(false);
        }
        Op::ServiceOff => guard.set_individual_service_mode(false),
        Op::Up | Op::Down => {
            if guard.individual_service_mode() && guard.status() == DoorStatus::Closed {
                let step: i32 = if op == Op::Up { 1 } else { -1 };
                let current = guard.current_floor();
                let next = if current + step == 0 {
                    current + 2 * step
                } else {
                    current + step
                };
                // A technician command at the car's own top/bottom floor
                // (or at the true numeric boundary, e.g. current=999 going
                // up) would otherwise write a destination outside the
                // valid floor range, violating invariant 1 and tripping
                // the region's fixed-width-field assertion on write.
                if floor::is_valid(next) {
                    guard.set_destination_floor(next);
                }
            }
        }
    }

    guard.notify_all();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parses_known_tokens() {
        assert_eq!(Op::from_str("open").unwrap(), Op::Open);
        assert_eq!(Op::from_str("service_on").unwrap(), Op::ServiceOn);
        assert_eq!(Op::from_str("down").unwrap(), Op::Down);
    }

    #[test]
    fn rejects_unknown_token() {
        assert!(Op::from_str("jump").is_err());
    }

    #[test]
    fn up_at_the_global_boundary_floor_is_a_no_op() {
        // current=999, up -> next=1000, which is outside the valid floor
        // range; must not be written even though the region has no notion
        // of this car's own lo/hi to check against.
        let name = format!("test-maint-boundary-{}", std::process::id());
        let owner = Region::create(&name, 999).expect("create synthetic test region");
        {
            let mut guard = owner.lock();
            guard.set_individual_service_mode(true);
            guard.set_current_floor(999);
            guard.set_destination_floor(999);
        }

        run(&name, Op::Up).unwrap();

        assert_eq!(owner.lock().destination_floor(), 999);
    }

    #[test]
    fn up_down_skip_zero() {
        // Mirrors the `next := current ± 1 skipping zero` rule without a
        // live region: -1 -> 1 going up, 1 -> -1 going down.
        let current = -1;
        let step = 1;
        let next = if current + step == 0 {
            current + 2 * step
        } else {
            current + step
        };
        assert_eq!(next, 1);

        let current = 1;
        let step = -1;
        let next = if current + step == 0 {
            current + 2 * step
        } else {
            current + step
        };
        assert_eq!(next, -1);
    }
}
