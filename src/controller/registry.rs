//! The Controller's car registry: one slot per live car.

use crate::controller::queue;
use crate::doorstate::DoorStatus;
use crate::region::Region;
use std::net::TcpStream;
use std::sync::Arc;

/// The registry table is fixed-size; unlike the stop queue (capacity 32)
/// the car table size itself isn't otherwise constrained beyond
/// "fixed-size" and "full → reject new registrations" — picked generously
/// for a simulated fleet.
pub const MAX_CARS: usize = 64;

pub const MAX_NAME_LEN: usize = 31;

pub struct CarSlot {
    pub name: String,
    pub lo: i32,
    pub hi: i32,
    pub status: DoorStatus,
    pub current_floor: i32,
    pub destination_floor: i32,
    pub queue: Vec<i32>,
    pub conn: TcpStream,
    /// `None` when the region couldn't be attached at registration time;
    /// the slot stays live but without a mirror. `Arc`-wrapped so a caller
    /// can clone the handle out from under the registry lock and take the
    /// region's own lock afterward, instead of nesting the two.
    pub region: Option<Arc<Region>>,
    /// Bumped on every `install` into this slot index, so a superseded
    /// connection's teardown can tell it no longer owns the slot instead
    /// of evicting whoever adopted it.
    pub generation: u64,
}

impl CarSlot {
    pub fn covers(&self, src: i32, dst: i32) -> bool {
        (self.lo..=self.hi).contains(&src) && (self.lo..=self.hi).contains(&dst)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    Adopted(usize),
    Allocated(usize),
    Full,
}

pub struct Registry {
    slots: Vec<Option<CarSlot>>,
    next_generation: u64,
}

impl Registry {
    pub fn new() -> Registry {
        let mut slots = Vec::with_capacity(MAX_CARS);
        slots.resize_with(MAX_CARS, || None);
        Registry {
            slots,
            next_generation: 0,
        }
    }

    /// Finds an existing in-use slot with this name, or the first free
    /// slot. An existing in-use entry with the same name adopts the slot
    /// (replacing the previous connection); otherwise the first free slot
    /// is allocated.
    pub fn slot_for_registration(&self, name: &str) -> RegisterOutcome {
        if let Some(idx) = self.slots.iter().position(|s| {
            s.as_ref().map(|c| c.name.as_str()) == Some(name)
        }) {
            return RegisterOutcome::Adopted(idx);
        }
        match self.slots.iter().position(|s| s.is_none()) {
            Some(idx) => RegisterOutcome::Allocated(idx),
            None => RegisterOutcome::Full,
        }
    }

    /// Installs `slot` at `idx`, assigning it a fresh generation, and
    /// returns that generation so the caller's connection worker can
    /// later tell whether it still owns the slot.
    pub fn install(&mut self, idx: usize, mut slot: CarSlot) -> u64 {
        self.next_generation += 1;
        slot.generation = self.next_generation;
        self.slots[idx] = Some(slot);
        self.next_generation
    }

    pub fn get(&self, idx: usize) -> Option<&CarSlot> {
        self.slots.get(idx).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut CarSlot> {
        self.slots.get_mut(idx).and_then(|s| s.as_mut())
    }

    /// Frees `idx` only if it's still occupied by `generation` — a
    /// connection superseded by a later adoption of the same name must
    /// not evict its replacement on teardown.
    pub fn remove_if_current(&mut self, idx: usize, generation: u64) {
        if let Some(slot) = self.slots.get_mut(idx) {
            if slot.as_ref().map(|c| c.generation) == Some(generation) {
                *slot = None;
            }
        }
    }

    /// The first in-use car, in slot order, whose
    /// range covers both floors.
    pub fn select_car_for(&self, src: i32, dst: i32) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some(c) if c.covers(src, dst)))
    }

    pub fn enqueue(&mut self, idx: usize, src: i32, dst: i32) {
        if let Some(slot) = self.get_mut(idx) {
            queue::enqueue(&mut slot.queue, src, dst);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unconnected() -> TcpStream {
        // A registry slot always needs some `TcpStream`; tests that never
        // touch I/O on it use an immediately-shutdown loopback pair.
        use std::net::TcpListener;
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let _ = listener.accept().unwrap();
        client
    }

    fn slot(name: &str, lo: i32, hi: i32) -> CarSlot {
        CarSlot {
            name: name.to_string(),
            lo,
            hi,
            status: DoorStatus::Closed,
            current_floor: lo,
            destination_floor: lo,
            queue: vec![],
            conn: unconnected(),
            region: None,
            generation: 0,
        }
    }

    #[test]
    fn selects_first_covering_car_in_slot_order() {
        let mut reg = Registry::new();
        reg.install(0, slot("Alpha", 1, 5));
        reg.install(1, slot("Beta", 1, 10));
        reg.install(2, slot("Gamma", 3, 9));
        assert_eq!(reg.select_car_for(8, 9), Some(1));
    }

    #[test]
    fn no_covering_car_returns_none() {
        let mut reg = Registry::new();
        reg.install(0, slot("Alpha", 1, 5));
        assert_eq!(reg.select_car_for(7, 8), None);
    }

    #[test]
    fn registration_adopts_existing_slot_by_name() {
        let mut reg = Registry::new();
        reg.install(0, slot("Alpha", 1, 5));
        assert_eq!(
            reg.slot_for_registration("Alpha"),
            RegisterOutcome::Adopted(0)
        );
        assert_eq!(
            reg.slot_for_registration("Beta"),
            RegisterOutcome::Allocated(1)
        );
    }

    #[test]
    fn registration_fails_when_table_full() {
        let mut reg = Registry::new();
        for i in 0..MAX_CARS {
            reg.install(i, slot(&format!("car{i}"), 1, 5));
        }
        assert_eq!(reg.slot_for_registration("new"), RegisterOutcome::Full);
    }

    #[test]
    fn remove_if_current_ignores_stale_generation() {
        let mut reg = Registry::new();
        let old_gen = reg.install(0, slot("Alpha", 1, 5));
        // A new connection adopts the same slot before the old one's
        // teardown runs.
        let new_gen = reg.install(0, slot("Alpha", 1, 5));
        assert_ne!(old_gen, new_gen);

        reg.remove_if_current(0, old_gen);
        assert!(reg.get(0).is_some(), "stale teardown must not evict the new connection");

        reg.remove_if_current(0, new_gen);
        assert!(reg.get(0).is_none());
    }
}
