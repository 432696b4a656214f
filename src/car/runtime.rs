//! The door/motion state machine driving a single car.
//!
//! Runs as the main thread of the `car` binary, sharing the region with the
//! network worker (`super::net`) through the region's own lock and with
//! the receive sub-task through `pending`, which is process-local — no
//! other process ever needs to see a destination that hasn't been
//! committed yet.

use crate::doorstate::DoorStatus;
use crate::floor;
use crate::region::Region;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct CarConfig {
    pub lo: i32,
    pub hi: i32,
    pub delay: Duration,
}

/// Destination received while `Between`; promoted to `destination_floor`
/// once the step that's already in flight settles at `Closed`.
pub type Pending = Arc<Mutex<Option<i32>>>;

/// Runs until `shutdown` is set. Intended to run on its own thread/as the
/// body of `main` in the `car` binary.
pub fn drive(region: Arc<Region>, cfg: CarConfig, pending: Pending, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        let restricted = {
            let guard = region.lock();
            guard.emergency_mode() || guard.individual_service_mode()
        };
        if restricted {
            run_restricted_step(&region, &cfg, &shutdown);
            continue;
        }
        run_normal_step(&region, &cfg, &pending, &shutdown);
    }
}

/// One iteration of the normal-mode state machine. Handles whichever
/// `DoorStatus` the region currently reports.
fn run_normal_step(region: &Region, cfg: &CarConfig, pending: &Pending, shutdown: &Arc<AtomicBool>) {
    let status = region.lock().status();
    match status {
        DoorStatus::Closed => run_closed_idle(region, cfg, shutdown),
        DoorStatus::Between => run_between(region, cfg, Some(pending), shutdown),
        DoorStatus::Opening => run_opening(region, cfg),
        DoorStatus::Open => run_open_window(region, cfg, false),
        DoorStatus::Closing => run_closing(region, cfg),
    }
}

/// `Closed`, at rest. Samples and clears the door buttons once per
/// cycle, decides whether to step toward a new
/// destination or open the doors, and otherwise polls briefly — this is
/// the only state a car can sit in indefinitely without transitioning.
fn run_closed_idle(region: &Region, cfg: &CarConfig, shutdown: &Arc<AtomicBool>) {
    let mut guard = region.lock();
    let open_pressed = guard.open_button();
    guard.set_open_button(false);
    guard.set_close_button(false);

    let cur = guard.current_floor();
    let dst = guard.destination_floor();

    if cur != dst {
        guard.set_status(DoorStatus::Between);
        guard.notify_all();
        return;
    }
    if open_pressed {
        guard.set_status(DoorStatus::Opening);
        guard.notify_all();
        return;
    }
    drop(guard);
    if !shutdown.load(Ordering::Relaxed) {
        thread::sleep(cfg.delay.min(Duration::from_millis(150)));
    }
}

/// `Between`: a single committed floor step. `pending` is `None` for the
/// service-mode one-floor exception, which never has a pending
/// destination to promote.
fn run_between(
    region: &Region,
    cfg: &CarConfig,
    pending: Option<&Pending>,
    shutdown: &Arc<AtomicBool>,
) {
    thread::sleep(cfg.delay);
    if shutdown.load(Ordering::Relaxed) {
        return;
    }
    let mut guard = region.lock();
    if pending.is_some() && (guard.emergency_mode() || guard.individual_service_mode()) {
        // Motion suppressed mid-step: freeze where we are. The outer loop
        // re-checks restricted mode on its next pass.
        return;
    }
    let cur = guard.current_floor();
    let dst = guard.destination_floor();
    let stepped = floor::step_toward(cur, dst, cfg.lo, cfg.hi);
    guard.set_current_floor(stepped);
    guard.set_status(DoorStatus::Closed);
    // Promote at *this* settle, not only the one that reaches the original
    // destination — a `FLOOR` that arrived mid-step takes effect at the
    // very next `Closed`, not several steps later (spec §4.4, §8.7).
    if let Some(pending) = pending {
        if let Ok(mut p) = pending.lock() {
            if let Some(next) = p.take() {
                guard.set_destination_floor(next);
            }
        }
    }
    guard.notify_all();
}

fn run_opening(region: &Region, cfg: &CarConfig) {
    thread::sleep(cfg.delay);
    let mut guard = region.lock();
    guard.set_status(DoorStatus::Open);
    guard.notify_all();
}

fn run_closing(region: &Region, cfg: &CarConfig) {
    thread::sleep(cfg.delay);
    let mut guard = region.lock();
    guard.set_status(DoorStatus::Closed);
    guard.notify_all();
}

/// `Open`'s door window. In normal mode it's bounded by `cfg.delay` and
/// restarts on `open_button`; in service/emergency mode (`latched`) it
/// only ever ends on `close_button`.
fn run_open_window(region: &Region, cfg: &CarConfig, latched: bool) {
    loop {
        let guard = region.lock();
        let guard = if latched {
            guard.wait_timeout(Duration::from_millis(200))
        } else {
            guard.wait_timeout(cfg.delay)
        };
        let mut guard = guard;
        if guard.open_button() {
            guard.set_open_button(false);
            continue;
        }
        if guard.close_button() {
            guard.set_close_button(false);
            break;
        }
        if latched {
            // Timed out waiting for a button in latched mode: nothing
            // happened, keep waiting.
            continue;
        }
        break;
    }
    let mut guard = region.lock();
    guard.set_status(DoorStatus::Closing);
    guard.notify_all();
}

/// Service mode and emergency mode share door-button handling; only
/// service mode honors one-floor-away motion.
fn run_restricted_step(region: &Region, cfg: &CarConfig, shutdown: &Arc<AtomicBool>) {
    let status = region.lock().status();
    match status {
        DoorStatus::Closed => run_restricted_closed(region, cfg, shutdown),
        DoorStatus::Between => run_between(region, cfg, None, shutdown),
        DoorStatus::Opening => run_opening(region, cfg),
        DoorStatus::Open => run_open_window(region, cfg, true),
        DoorStatus::Closing => run_closing(region, cfg),
    }
}

fn run_restricted_closed(region: &Region, cfg: &CarConfig, shutdown: &Arc<AtomicBool>) {
    let mut guard = region.lock();
    let service = guard.individual_service_mode();
    let open_pressed = guard.open_button();
    guard.set_open_button(false);
    guard.set_close_button(false);

    let cur = guard.current_floor();
    let dst = guard.destination_floor();
    if dst != cur {
        if service && (dst - cur).abs() == 1 {
            guard.set_status(DoorStatus::Between);
            guard.notify_all();
            return;
        }
        // Not an honored one-floor service move (or not in service mode
        // at all, e.g. plain emergency): motion is suppressed, snap back.
        guard.set_destination_floor(cur);
    }
    if open_pressed {
        guard.set_status(DoorStatus::Opening);
        guard.notify_all();
        return;
    }
    drop(guard);
    if !shutdown.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(150));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::test_region;

    fn cfg(lo: i32, hi: i32) -> CarConfig {
        CarConfig {
            lo,
            hi,
            delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn step_toward_used_for_between_matches_floor_module() {
        assert_eq!(floor::step_toward(1, 5, -99, 999), 2);
        assert_eq!(floor::step_toward(-1, 5, -99, 999), 1);
    }

    #[test]
    fn between_promotes_pending_at_the_next_closed_not_at_final_arrival() {
        // A FLOOR frame arrives mid-`Between` (destination still 5, two
        // steps from current); the new destination must take effect at
        // the very next `Closed`, not after the original trip completes.
        let region = test_region("between-promotes-immediately", 1);
        {
            let mut guard = region.lock();
            guard.set_current_floor(1);
            guard.set_destination_floor(5);
        }
        let pending: Pending = Arc::new(Mutex::new(Some(7)));
        let shutdown = Arc::new(AtomicBool::new(false));

        run_between(&region, &cfg(1, 10), Some(&pending), &shutdown);

        let guard = region.lock();
        assert_eq!(guard.status(), DoorStatus::Closed);
        assert_eq!(guard.current_floor(), 2, "only one floor stepped");
        assert_eq!(
            guard.destination_floor(),
            7,
            "pending destination must be promoted on this settle, not the fifth"
        );
        assert!(pending.lock().unwrap().is_none());
    }

    #[test]
    fn between_with_no_pending_leaves_destination_alone() {
        let region = test_region("between-no-pending", 1);
        {
            let mut guard = region.lock();
            guard.set_current_floor(1);
            guard.set_destination_floor(5);
        }
        let shutdown = Arc::new(AtomicBool::new(false));

        run_between(&region, &cfg(1, 10), None, &shutdown);

        let guard = region.lock();
        assert_eq!(guard.current_floor(), 2);
        assert_eq!(guard.destination_floor(), 5);
    }

    #[test]
    fn restricted_closed_honors_one_floor_service_move() {
        let region = test_region("restricted-one-floor", 1);
        {
            let mut guard = region.lock();
            guard.set_individual_service_mode(true);
            guard.set_current_floor(3);
            guard.set_destination_floor(4);
        }
        let shutdown = Arc::new(AtomicBool::new(false));

        run_restricted_closed(&region, &cfg(1, 10), &shutdown);

        let guard = region.lock();
        assert_eq!(guard.status(), DoorStatus::Between);
        assert_eq!(guard.destination_floor(), 4);
    }

    #[test]
    fn restricted_closed_snaps_back_a_multi_floor_move() {
        let region = test_region("restricted-snap-back", 1);
        {
            let mut guard = region.lock();
            guard.set_individual_service_mode(true);
            guard.set_current_floor(3);
            guard.set_destination_floor(7);
        }
        // Skip this call's idle-poll sleep; the snap-back write already
        // happened by the time the sleep would run.
        let shutdown = Arc::new(AtomicBool::new(true));

        run_restricted_closed(&region, &cfg(1, 10), &shutdown);

        let guard = region.lock();
        assert_eq!(guard.status(), DoorStatus::Closed);
        assert_eq!(guard.destination_floor(), 3);
    }

    #[test]
    fn restricted_closed_ignores_motion_outside_service_mode() {
        // Plain emergency mode (not service): any destination mismatch is
        // suppressed regardless of how far away it is.
        let region = test_region("restricted-emergency-no-service", 1);
        {
            let mut guard = region.lock();
            guard.set_emergency_mode(true);
            guard.set_current_floor(3);
            guard.set_destination_floor(4);
        }
        let shutdown = Arc::new(AtomicBool::new(true));

        run_restricted_closed(&region, &cfg(1, 10), &shutdown);

        let guard = region.lock();
        assert_eq!(guard.status(), DoorStatus::Closed);
        assert_eq!(guard.destination_floor(), 3);
    }
}
