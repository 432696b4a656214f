//! The car's connection to the Controller: a connect-forever outer loop
//! wrapping a receive sub-task and a transmit sub-task that share one
//! socket.

use crate::car::runtime::{CarConfig, Pending};
use crate::doorstate::DoorStatus;
use crate::floor;
use crate::framing::{recv_frame, send_frame, FrameError};
use crate::region::Region;
use log::{debug, info, warn};
use std::io::{self, BufReader};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How often the safety-disconnected detector threshold is reached before
/// the Car forces its own emergency mode.
const SAFETY_DISCONNECT_THRESHOLD: u8 = 3;

pub struct NetConfig {
    pub name: String,
    pub lo: i32,
    pub hi: i32,
    pub delay: Duration,
    pub controller_addr: String,
}

/// Runs until `shutdown` is set, reconnecting whenever the connection
/// drops and neither service nor emergency mode is asserted.
pub fn run(region: Arc<Region>, cfg: NetConfig, pending: Pending, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        let restricted = {
            let guard = region.lock();
            guard.emergency_mode() || guard.individual_service_mode()
        };
        if restricted {
            thread::sleep(Duration::from_millis(200));
            continue;
        }

        match connect_and_serve(&region, &cfg, &pending, &shutdown) {
            Ok(()) => {}
            Err(e) => warn!("connection to controller ended: {e}"),
        }
    }
}

fn connect_and_serve(
    region: &Arc<Region>,
    cfg: &NetConfig,
    pending: &Pending,
    shutdown: &Arc<AtomicBool>,
) -> io::Result<()> {
    let stream = TcpStream::connect(&cfg.controller_addr)?;
    info!("connected to controller at {}", cfg.controller_addr);
    let mut write_half = stream.try_clone()?;
    let read_half = stream.try_clone()?;

    send_frame(
        &mut write_half,
        format!(
            "CAR {} {} {}",
            cfg.name,
            floor::format(cfg.lo),
            floor::format(cfg.hi)
        )
        .as_bytes(),
    )
    .map_err(frame_to_io)?;
    {
        let guard = region.lock();
        send_status(&mut write_half, &guard)?;
    }

    let recv_shutdown = Arc::clone(shutdown);
    let recv_region = Arc::clone(region);
    let recv_pending = Arc::clone(pending);
    let receiver = thread::spawn(move || {
        let _ = receive_loop(read_half, recv_region, recv_pending, recv_shutdown);
    });

    let result = transmit_loop(&mut write_half, region, cfg, shutdown);
    // Unblock the receive sub-task's read, which has no timeout of its
    // own, whether we're tearing down for shutdown or handing off after
    // an EMERGENCY/INDIVIDUAL SERVICE frame.
    let _ = stream.shutdown(std::net::Shutdown::Both);
    let _ = receiver.join();
    result
}

fn receive_loop(
    stream: TcpStream,
    region: Arc<Region>,
    pending: Pending,
    shutdown: Arc<AtomicBool>,
) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return Ok(());
        }
        let frame = match recv_frame(&mut reader) {
            Ok(f) => f,
            Err(FrameError::Eof) => return Ok(()),
            Err(FrameError::Io(e)) => return Err(e),
        };
        apply_floor_frame(&frame, &region, &pending);
    }
}

fn apply_floor_frame(frame: &str, region: &Arc<Region>, pending: &Pending) {
    let Some(rest) = frame.strip_prefix("FLOOR ") else {
        debug!("ignoring unrecognized frame from controller: {frame:?}");
        return;
    };
    let Ok(f) = floor::parse(rest.trim()) else {
        debug!("ignoring FLOOR frame with unparsable floor: {rest:?}");
        return;
    };
    let mut guard = region.lock();
    if guard.status() == DoorStatus::Between {
        if let Ok(mut p) = pending.lock() {
            *p = Some(f);
        }
    } else {
        guard.set_destination_floor(f);
    }
}

fn transmit_loop(
    write_half: &mut TcpStream,
    region: &Arc<Region>,
    cfg: &NetConfig,
    shutdown: &Arc<AtomicBool>,
) -> io::Result<()> {
    let mut last_sent: Option<(DoorStatus, i32, i32)> = None;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return Ok(());
        }
        let guard = region.lock();
        if guard.individual_service_mode() {
            drop(guard);
            send_frame(write_half, b"INDIVIDUAL SERVICE").map_err(frame_to_io)?;
            return Ok(());
        }
        if guard.emergency_mode() {
            drop(guard);
            send_frame(write_half, b"EMERGENCY").map_err(frame_to_io)?;
            return Ok(());
        }

        let current = (guard.status(), guard.current_floor(), guard.destination_floor());
        if Some(current) != last_sent {
            send_status(write_half, &guard)?;
            drop(guard);
            last_sent = Some(current);
        } else {
            // `delay_ms` of silence: nothing changed since the last
            // transmit. Re-send as a heartbeat and bump the
            // safety-disconnected counter; the Safety Monitor resets it
            // to 1 on every wake, so a live monitor keeps this from ever
            // reaching the threshold.
            let mut guard = guard;
            let next = guard.safety_system().saturating_add(1);
            guard.set_safety_system(next);
            if next >= SAFETY_DISCONNECT_THRESHOLD {
                guard.set_emergency_mode(true);
                guard.notify_all();
                drop(guard);
                warn!("safety monitor unresponsive, forcing emergency mode");
                send_frame(write_half, b"EMERGENCY").map_err(frame_to_io)?;
                return Ok(());
            }
            send_status(write_half, &guard)?;
            drop(guard);
        }

        let guard = region.lock();
        let _ = guard.wait_timeout(cfg.delay);
    }
}

fn send_status(
    write_half: &mut TcpStream,
    guard: &crate::region::RegionGuard<'_>,
) -> io::Result<()> {
    let msg = format!(
        "STATUS {} {} {}",
        guard.status(),
        floor::format(guard.current_floor()),
        floor::format(guard.destination_floor()),
    );
    send_frame(write_half, msg.as_bytes()).map_err(frame_to_io)
}

fn frame_to_io(e: FrameError) -> io::Error {
    match e {
        FrameError::Eof => io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream"),
        FrameError::Io(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::test_region;

    #[test]
    fn floor_frame_parses_prefix() {
        assert_eq!(floor::parse("5".trim()).unwrap(), 5);
    }

    #[test]
    fn floor_frame_defers_to_pending_while_between() {
        let region = Arc::new(test_region("floor-frame-between", 1));
        {
            let mut guard = region.lock();
            guard.set_status(DoorStatus::Between);
            guard.set_destination_floor(1);
        }
        let pending: Pending = Arc::new(std::sync::Mutex::new(None));

        apply_floor_frame("FLOOR 5", &region, &pending);

        assert_eq!(*pending.lock().unwrap(), Some(5));
        assert_eq!(
            region.lock().destination_floor(),
            1,
            "destination must not be overwritten mid-step"
        );
    }

    #[test]
    fn floor_frame_sets_destination_directly_outside_between() {
        let region = Arc::new(test_region("floor-frame-closed", 1));
        {
            let mut guard = region.lock();
            guard.set_status(DoorStatus::Closed);
        }
        let pending: Pending = Arc::new(std::sync::Mutex::new(None));

        apply_floor_frame("FLOOR 5", &region, &pending);

        assert_eq!(region.lock().destination_floor(), 5);
        assert!(pending.lock().unwrap().is_none());
    }

    #[test]
    fn unrecognized_frame_is_ignored() {
        let region = Arc::new(test_region("floor-frame-garbage", 1));
        let pending: Pending = Arc::new(std::sync::Mutex::new(None));
        let before = region.lock().destination_floor();

        apply_floor_frame("EMERGENCY", &region, &pending);
        apply_floor_frame("FLOOR banana", &region, &pending);

        assert_eq!(region.lock().destination_floor(), before);
        assert!(pending.lock().unwrap().is_none());
    }
}
