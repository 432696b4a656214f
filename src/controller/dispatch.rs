//! Per-connection handling: registration, the CAR serve loop, and CALL
//! handling.

use crate::controller::registry::{CarSlot, RegisterOutcome, Registry};
use crate::doorstate::DoorStatus;
use crate::floor;
use crate::framing::{recv_frame, send_frame, FrameError};
use crate::region::Region;
use log::{debug, info, warn};
use std::io::BufReader;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

/// Dispatches a freshly-accepted connection based on its first frame.
/// `"CAR <name> <lo> <hi>"` enters the per-car serve loop; `"CALL <src>
/// <dst>"` handles one call and closes; anything else closes.
pub fn handle_connection(registry: &Arc<Mutex<Registry>>, stream: TcpStream) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".to_string());
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!("could not clone connection from {peer}: {e}");
            return;
        }
    });
    let mut writer = stream;

    let first = match recv_frame(&mut reader) {
        Ok(f) => f,
        Err(_) => return,
    };

    if let Some(rest) = first.strip_prefix("CAR ") {
        handle_car(registry, rest, reader, writer);
    } else if let Some(rest) = first.strip_prefix("CALL ") {
        handle_call(registry, rest, &mut writer);
    } else {
        debug!("closing connection from {peer}: unrecognized first frame {first:?}");
    }
}

fn handle_call(registry: &Arc<Mutex<Registry>>, rest: &str, writer: &mut TcpStream) {
    let mut parts = rest.split_whitespace();
    let (Some(src_s), Some(dst_s)) = (parts.next(), parts.next()) else {
        return;
    };
    let (Ok(src), Ok(dst)) = (floor::parse(src_s), floor::parse(dst_s)) else {
        return;
    };
    if src == dst {
        return;
    }

    let mut reg = registry.lock().unwrap();
    let Some(idx) = reg.select_car_for(src, dst) else {
        let _ = send_frame(writer, b"UNAVAILABLE");
        let _ = writer.shutdown(std::net::Shutdown::Write);
        return;
    };
    let name = reg.get(idx).map(|c| c.name.clone()).unwrap_or_default();
    if send_frame(writer, format!("CAR {name}").as_bytes()).is_err() {
        return;
    }
    reg.enqueue(idx, src, dst);
    if let Some(slot) = reg.get(idx) {
        if let Some(&head) = slot.queue.first() {
            let mut conn = match slot.conn.try_clone() {
                Ok(c) => c,
                Err(_) => return,
            };
            drop(reg);
            let _ = send_frame(&mut conn, format!("FLOOR {}", floor::format(head)).as_bytes());
        }
    }
}

fn handle_car(
    registry: &Arc<Mutex<Registry>>,
    rest: &str,
    mut reader: BufReader<TcpStream>,
    mut writer: TcpStream,
) {
    let mut parts = rest.split_whitespace();
    let (Some(name), Some(lo_s), Some(hi_s)) = (parts.next(), parts.next(), parts.next()) else {
        return;
    };
    let (Ok(mut lo), Ok(mut hi)) = (floor::parse(lo_s), floor::parse(hi_s)) else {
        return;
    };
    if lo > hi {
        std::mem::swap(&mut lo, &mut hi);
    }

    let conn = match writer.try_clone() {
        Ok(c) => c,
        Err(_) => return,
    };
    let region = match Region::attach(name) {
        Ok(r) => {
            let mut guard = r.lock();
            guard.set_status(DoorStatus::Closed);
            guard.set_current_floor(lo);
            guard.set_destination_floor(lo);
            guard.notify_all();
            drop(guard);
            Some(Arc::new(r))
        }
        Err(e) => {
            warn!("car {name} registered without a region mirror: {e}");
            None
        }
    };

    let slot = CarSlot {
        name: name.to_string(),
        lo,
        hi,
        status: DoorStatus::Closed,
        current_floor: lo,
        destination_floor: lo,
        queue: vec![],
        conn,
        region,
        generation: 0,
    };

    let (idx, generation) = {
        let mut reg = registry.lock().unwrap();
        let idx = match reg.slot_for_registration(name) {
            RegisterOutcome::Adopted(i) | RegisterOutcome::Allocated(i) => i,
            RegisterOutcome::Full => {
                warn!("car registry full, rejecting {name}");
                return;
            }
        };
        let generation = reg.install(idx, slot);
        (idx, generation)
    };
    info!("car {name} registered in slot {idx} ({lo}..{hi})");

    serve_car(registry, idx, generation, &mut reader);

    registry.lock().unwrap().remove_if_current(idx, generation);
    info!("car {name} disconnected, slot {idx} released");
}

/// The per-car serve loop: decode STATUS frames and run the dispatch step
/// after each one. Anything else ends the connection.
fn serve_car(
    registry: &Arc<Mutex<Registry>>,
    idx: usize,
    generation: u64,
    reader: &mut BufReader<TcpStream>,
) {
    loop {
        let frame = match recv_frame(reader) {
            Ok(f) => f,
            Err(FrameError::Eof) => return,
            Err(FrameError::Io(_)) => return,
        };

        let Some(rest) = frame.strip_prefix("STATUS ") else {
            // INDIVIDUAL SERVICE / EMERGENCY / unknown: not tracked by the
            // Controller beyond the connection staying open or not.
            if frame != "INDIVIDUAL SERVICE" && frame != "EMERGENCY" {
                return;
            }
            continue;
        };
        let mut parts = rest.split_whitespace();
        let (Some(status_s), Some(cur_s), Some(dst_s)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return;
        };
        let (Ok(status), Ok(cur), Ok(dst)) = (
            status_s.parse::<DoorStatus>(),
            floor::parse(cur_s),
            floor::parse(dst_s),
        ) else {
            return;
        };

        apply_status(registry, idx, generation, status, cur, dst);
    }
}

fn apply_status(
    registry: &Arc<Mutex<Registry>>,
    idx: usize,
    generation: u64,
    status: DoorStatus,
    cur: i32,
    dst: i32,
) {
    // Mutate the registry and decide the dispatch step entirely under the
    // registry lock, but only clone the region handle out of it — the
    // region's own lock is taken below, after the registry lock has been
    // released, so the two locks are never nested (spec §5: "neither lock
    // is nested against the other").
    let region = {
        let mut reg = registry.lock().unwrap();
        let Some(slot) = reg.get_mut(idx) else {
            return;
        };
        if slot.generation != generation {
            return;
        }
        slot.status = status;
        slot.current_floor = cur;
        slot.destination_floor = dst;
        let region = slot.region.clone();

        dispatch_step(&mut reg, idx);
        region
    };

    if let Some(region) = region {
        let mut guard = region.lock();
        guard.set_status(status);
        guard.set_current_floor(cur);
        guard.set_destination_floor(dst);
        guard.notify_all();
    }
}

/// Pops the head on arrival, then sends `FLOOR <head>` if the queue is
/// still non-empty.
fn dispatch_step(reg: &mut Registry, idx: usize) {
    let Some(slot) = reg.get_mut(idx) else {
        return;
    };
    crate::controller::queue::pop_if_arrived(&mut slot.queue, slot.status, slot.current_floor);
    let Some(&head) = slot.queue.first() else {
        return;
    };
    let mut conn = match slot.conn.try_clone() {
        Ok(c) => c,
        Err(_) => return,
    };
    let _ = send_frame(&mut conn, format!("FLOOR {}", floor::format(head)).as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swaps_inverted_lo_hi() {
        let mut lo = 10;
        let mut hi = 1;
        if lo > hi {
            std::mem::swap(&mut lo, &mut hi);
        }
        assert_eq!((lo, hi), (1, 10));
    }
}
