//! The per-car stop queue and its enqueue algorithm. Kept as plain
//! functions over `Vec<i32>`
//! so the ordering invariant is unit-testable without a live registry.

use crate::doorstate::DoorStatus;

pub const QUEUE_CAPACITY: usize = 32;

/// Enqueues `(src, dst)`. A no-op if `src == dst`. Otherwise ensures `src`
/// is present, then ensures `dst` is present *after* `src` — removing and
/// re-appending `dst` if it was already queued ahead of `src`. Appends
/// past [`QUEUE_CAPACITY`] are dropped silently.
pub fn enqueue(queue: &mut Vec<i32>, src: i32, dst: i32) {
    if src == dst {
        return;
    }
    if !queue.contains(&src) {
        try_push(queue, src);
    }
    let src_idx = queue.iter().position(|&f| f == src);
    let dst_idx = queue.iter().position(|&f| f == dst);
    if let (Some(si), Some(di)) = (src_idx, dst_idx) {
        if di < si {
            queue.remove(di);
        }
    }
    if !queue.contains(&dst) {
        try_push(queue, dst);
    }
}

fn try_push(queue: &mut Vec<i32>, floor: i32) {
    if queue.len() < QUEUE_CAPACITY {
        queue.push(floor);
    }
}

/// Pops the head on arrival. Returns whether it popped.
pub fn pop_if_arrived(queue: &mut Vec<i32>, status: DoorStatus, current_floor: i32) -> bool {
    match queue.first() {
        Some(&head) if status == DoorStatus::Opening && head == current_floor => {
            queue.remove(0);
            true
        }
        _ => false,
    }
}
