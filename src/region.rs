//! The per-car shared memory region: fixed layout, cross-process mutex and
//! wait/notify, and the three processes' views of it.
//!
//! Cyclic ownership: the Car creates and destroys the
//! region; the Safety Monitor and Maintenance Tool only attach. Modeled here
//! as one value type, [`Region`], with a [`Role`] recorded at construction
//! time that only affects `Drop` — every other operation (`lock`, `notify`)
//! is identical regardless of role, since the lock is the only
//! synchronization and all three processes contend on it the same way.
//!
//! Fields are not individually atomic; every read or write goes through
//! [`RegionGuard`], which is only obtainable while the process-shared
//! `pthread_mutex_t` is held.

use crate::doorstate::DoorStatus;
use crate::floor;
use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use std::mem::{size_of, MaybeUninit};
use std::os::unix::io::RawFd;
use std::ptr::NonNull;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("shm_open failed for {name}: {source}")]
    Open { name: String, source: nix::Error },
    #[error("ftruncate failed for {name}: {source}")]
    Truncate { name: String, source: nix::Error },
    #[error("mmap failed for {name}: {source}")]
    Map { name: String, source: nix::Error },
    #[error("pthread init failed: errno {0}")]
    PthreadInit(i32),
}

/// Whether this process created the region (and tears it down) or merely
/// attached to an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Attached,
}

/// The ABI shared by Car, Safety Monitor, and Maintenance Tool. `repr(C)`
/// and field order are part of the contract — do not reorder.
#[repr(C)]
struct Layout {
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
    status: [u8; 8],
    current_floor: [u8; 4],
    destination_floor: [u8; 4],
    open_button: u8,
    close_button: u8,
    door_obstruction: u8,
    overload: u8,
    emergency_stop: u8,
    individual_service_mode: u8,
    emergency_mode: u8,
    safety_system: u8,
}

fn object_name(car_name: &str) -> String {
    format!("/car{car_name}")
}

pub struct Region {
    ptr: NonNull<Layout>,
    name: String,
    role: Role,
}

// SAFETY: every field access is gated by the process-shared pthread mutex;
// the raw pointer itself is never mutated after construction.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Creates (or re-creates) the named region, owned by this process.
    /// Sizes it, maps it, and initializes the mutex/condvar as
    /// cross-process-shareable, then writes the given defaults.
    pub fn create(car_name: &str, lo: i32) -> Result<Region, RegionError> {
        let name = object_name(car_name);
        let fd = shm_open(
            name.as_str(),
            OFlag::O_CREAT | OFlag::O_RDWR | OFlag::O_TRUNC,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|source| RegionError::Open {
            name: name.clone(),
            source,
        })?;
        ftruncate(fd, size_of::<Layout>() as i64).map_err(|source| RegionError::Truncate {
            name: name.clone(),
            source,
        })?;
        let ptr = map(fd, &name)?;

        // SAFETY: freshly mapped, zero-filled pages; nobody else can be
        // touching this memory yet because we just shm_open'd with O_TRUNC.
        unsafe {
            init_pshared_primitives(ptr.as_ptr())?;
            let layout = ptr.as_ptr();
            write_status(&mut (*layout).status, DoorStatus::Closed);
            write_floor(&mut (*layout).current_floor, lo);
            write_floor(&mut (*layout).destination_floor, lo);
            (*layout).open_button = 0;
            (*layout).close_button = 0;
            (*layout).door_obstruction = 0;
            (*layout).overload = 0;
            (*layout).emergency_stop = 0;
            (*layout).individual_service_mode = 0;
            (*layout).emergency_mode = 0;
            (*layout).safety_system = 0;
        }

        Ok(Region {
            ptr,
            name,
            role: Role::Owner,
        })
    }

    /// Attaches to an existing region. Never creates or initializes the
    /// synchronization primitives — those were set up by the owning Car.
    pub fn attach(car_name: &str) -> Result<Region, RegionError> {
        let name = object_name(car_name);
        let fd = shm_open(name.as_str(), OFlag::O_RDWR, Mode::empty()).map_err(|source| {
            RegionError::Open {
                name: name.clone(),
                source,
            }
        })?;
        let ptr = map(fd, &name)?;
        Ok(Region {
            ptr,
            name,
            role: Role::Attached,
        })
    }

    /// Acquires the region lock. Blocks the calling thread until held.
    pub fn lock(&self) -> RegionGuard<'_> {
        unsafe {
            let rc = libc::pthread_mutex_lock(&mut (*self.ptr.as_ptr()).mutex);
            debug_assert_eq!(rc, 0, "pthread_mutex_lock failed: {rc}");
        }
        RegionGuard { region: self }
    }

    fn layout(&self) -> *mut Layout {
        self.ptr.as_ptr()
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.ptr.as_ptr().cast(), size_of::<Layout>());
        }
        if self.role == Role::Owner {
            let _ = shm_unlink(self.name.as_str());
        }
    }
}

fn map(fd: RawFd, name: &str) -> Result<NonNull<Layout>, RegionError> {
    let size = std::num::NonZeroUsize::new(size_of::<Layout>()).unwrap();
    let ptr = unsafe {
        mmap(
            None,
            size,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            fd,
            0,
        )
    }
    .map_err(|source| RegionError::Map {
        name: name.to_string(),
        source,
    })?;
    let _ = unsafe { nix::unistd::close(fd) };
    Ok(NonNull::new(ptr.cast()).expect("mmap returned null on success"))
}

unsafe fn init_pshared_primitives(layout: *mut Layout) -> Result<(), RegionError> {
    let mut mattr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
    let mut cattr = MaybeUninit::<libc::pthread_condattr_t>::uninit();

    check(libc::pthread_mutexattr_init(mattr.as_mut_ptr()))?;
    check(libc::pthread_mutexattr_setpshared(
        mattr.as_mut_ptr(),
        libc::PTHREAD_PROCESS_SHARED,
    ))?;
    check(libc::pthread_mutex_init(
        &mut (*layout).mutex,
        mattr.as_ptr(),
    ))?;
    check(libc::pthread_mutexattr_destroy(mattr.as_mut_ptr()))?;

    check(libc::pthread_condattr_init(cattr.as_mut_ptr()))?;
    check(libc::pthread_condattr_setpshared(
        cattr.as_mut_ptr(),
        libc::PTHREAD_PROCESS_SHARED,
    ))?;
    check(libc::pthread_cond_init(&mut (*layout).cond, cattr.as_ptr()))?;
    check(libc::pthread_condattr_destroy(cattr.as_mut_ptr()))?;
    Ok(())
}

fn check(rc: i32) -> Result<(), RegionError> {
    if rc == 0 {
        Ok(())
    } else {
        Err(RegionError::PthreadInit(rc))
    }
}

fn write_status(buf: &mut [u8; 8], status: DoorStatus) {
    write_fixed(buf, status.as_str());
}

fn write_floor(buf: &mut [u8; 4], f: i32) {
    write_fixed(buf, &floor::format(f));
}

fn write_fixed(buf: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    assert!(bytes.len() < buf.len(), "field value {s:?} too long for fixed buffer");
    buf[..bytes.len()].copy_from_slice(bytes);
    buf[bytes.len()..].fill(0);
}

fn read_fixed(buf: &[u8]) -> &str {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..end]).unwrap_or("")
}

/// Proof of holding the region lock. All field access lives here; there is
/// no way to touch a [`Layout`] field without one of these in scope.
pub struct RegionGuard<'a> {
    region: &'a Region,
}

impl<'a> RegionGuard<'a> {
    pub fn status(&self) -> DoorStatus {
        let raw = unsafe { read_fixed(&(*self.region.layout()).status) };
        raw.parse().unwrap_or(DoorStatus::Closed)
    }

    pub fn set_status(&mut self, status: DoorStatus) {
        unsafe { write_status(&mut (*self.region.layout()).status, status) }
    }

    pub fn current_floor(&self) -> i32 {
        let raw = unsafe { read_fixed(&(*self.region.layout()).current_floor) };
        floor::parse(raw).unwrap_or(1)
    }

    pub fn set_current_floor(&mut self, f: i32) {
        unsafe { write_floor(&mut (*self.region.layout()).current_floor, f) }
    }

    pub fn destination_floor(&self) -> i32 {
        let raw = unsafe { read_fixed(&(*self.region.layout()).destination_floor) };
        floor::parse(raw).unwrap_or(1)
    }

    pub fn set_destination_floor(&mut self, f: i32) {
        unsafe { write_floor(&mut (*self.region.layout()).destination_floor, f) }
    }

    pub fn open_button(&self) -> bool {
        unsafe { (*self.region.layout()).open_button != 0 }
    }
    pub fn set_open_button(&mut self, v: bool) {
        unsafe { (*self.region.layout()).open_button = v as u8 }
    }
    pub fn close_button(&self) -> bool {
        unsafe { (*self.region.layout()).close_button != 0 }
    }
    pub fn set_close_button(&mut self, v: bool) {
        unsafe { (*self.region.layout()).close_button = v as u8 }
    }
    pub fn door_obstruction(&self) -> bool {
        unsafe { (*self.region.layout()).door_obstruction != 0 }
    }
    pub fn set_door_obstruction(&mut self, v: bool) {
        unsafe { (*self.region.layout()).door_obstruction = v as u8 }
    }
    pub fn overload(&self) -> bool {
        unsafe { (*self.region.layout()).overload != 0 }
    }
    pub fn set_overload(&mut self, v: bool) {
        unsafe { (*self.region.layout()).overload = v as u8 }
    }
    pub fn emergency_stop(&self) -> bool {
        unsafe { (*self.region.layout()).emergency_stop != 0 }
    }
    pub fn set_emergency_stop(&mut self, v: bool) {
        unsafe { (*self.region.layout()).emergency_stop = v as u8 }
    }
    pub fn individual_service_mode(&self) -> bool {
        unsafe { (*self.region.layout()).individual_service_mode != 0 }
    }
    pub fn set_individual_service_mode(&mut self, v: bool) {
        unsafe { (*self.region.layout()).individual_service_mode = v as u8 }
    }
    pub fn emergency_mode(&self) -> bool {
        unsafe { (*self.region.layout()).emergency_mode != 0 }
    }
    pub fn set_emergency_mode(&mut self, v: bool) {
        unsafe { (*self.region.layout()).emergency_mode = v as u8 }
    }
    pub fn safety_system(&self) -> u8 {
        unsafe { (*self.region.layout()).safety_system }
    }
    pub fn set_safety_system(&mut self, v: u8) {
        unsafe { (*self.region.layout()).safety_system = v }
    }

    /// Every field, for the Safety Monitor's consistency check, in one
    /// read under the lock already held.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status_raw: unsafe { read_fixed(&(*self.region.layout()).status).to_string() },
            current_floor_raw: unsafe {
                read_fixed(&(*self.region.layout()).current_floor).to_string()
            },
            destination_floor_raw: unsafe {
                read_fixed(&(*self.region.layout()).destination_floor).to_string()
            },
            open_button: self.open_button(),
            close_button: self.close_button(),
            door_obstruction: self.door_obstruction(),
            overload: self.overload(),
            emergency_stop: self.emergency_stop(),
            individual_service_mode: self.individual_service_mode(),
            emergency_mode: self.emergency_mode(),
        }
    }

    /// Releases the lock and blocks on the region's condvar for up to
    /// `timeout`, then re-acquires it before returning. Spurious wakeups
    /// are possible, as with any condvar; callers re-check their
    /// condition.
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        unsafe {
            let layout = self.region.layout();
            let mut ts = libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            };
            libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
            ts.tv_sec += timeout.as_secs() as libc::time_t;
            ts.tv_nsec += timeout.subsec_nanos() as i64;
            if ts.tv_nsec >= 1_000_000_000 {
                ts.tv_sec += 1;
                ts.tv_nsec -= 1_000_000_000;
            }
            let rc = libc::pthread_cond_timedwait(&mut (*layout).cond, &mut (*layout).mutex, &ts);
            debug_assert!(rc == 0 || rc == libc::ETIMEDOUT);
        }
        self
    }

    /// Wakes every waiter on the region's condvar. Does not release the
    /// lock — callers broadcast while still holding it, then drop the
    /// guard, matching the Safety Monitor's "release lock" step always
    /// following its broadcast.
    pub fn notify_all(&self) {
        unsafe {
            libc::pthread_cond_broadcast(&mut (*self.region.layout()).cond);
        }
    }
}

impl<'a> Drop for RegionGuard<'a> {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(&mut (*self.region.layout()).mutex);
        }
    }
}

/// A read-only copy of every region field, taken under the lock. Used by
/// the Safety Monitor's consistency check, which needs all seven fields at
/// once without holding the lock across its own logging/printing.
pub struct Snapshot {
    pub status_raw: String,
    pub current_floor_raw: String,
    pub destination_floor_raw: String,
    pub open_button: bool,
    pub close_button: bool,
    pub door_obstruction: bool,
    pub overload: bool,
    pub emergency_stop: bool,
    pub individual_service_mode: bool,
    pub emergency_mode: bool,
}

impl Snapshot {
    /// Status legal, floors parse, flags are 0/1 (always
    /// true here since they're read as `bool`), and obstruction implies
    /// an open/close-in-progress status.
    pub fn is_consistent(&self) -> bool {
        let status: Result<DoorStatus, _> = self.status_raw.parse();
        let status = match status {
            Ok(s) => s,
            Err(_) => return false,
        };
        if floor::parse(&self.current_floor_raw).is_err() {
            return false;
        }
        if floor::parse(&self.destination_floor_raw).is_err() {
            return false;
        }
        if self.door_obstruction && !matches!(status, DoorStatus::Opening | DoorStatus::Closing) {
            return false;
        }
        true
    }
}

/// Creates a real region under a unique, disposable name, for tests in
/// `car::runtime`/`car::net` that need to drive the door/motion state
/// machine against synthetic input without a live Controller or Safety
/// Monitor. `tag` should identify the calling test; a per-process counter
/// keeps concurrent test threads from colliding on the same shm object.
/// Unlinked automatically on drop, same as any owner's region.
#[cfg(test)]
pub(crate) fn test_region(tag: &str, lo: i32) -> Region {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = format!("test-{}-{tag}-{n}", std::process::id());
    Region::create(&name, lo).expect("create synthetic test region")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_name_prefixes_with_car() {
        assert_eq!(object_name("Alpha"), "/carAlpha");
    }

    #[test]
    fn write_and_read_fixed_round_trip() {
        let mut buf = [0u8; 8];
        write_fixed(&mut buf, "Closing");
        assert_eq!(read_fixed(&buf), "Closing");
        write_fixed(&mut buf, "Open");
        assert_eq!(read_fixed(&buf), "Open");
    }

    #[test]
    fn snapshot_flags_obstruction_outside_door_cycle() {
        let snap = Snapshot {
            status_raw: "Closed".into(),
            current_floor_raw: "1".into(),
            destination_floor_raw: "1".into(),
            open_button: false,
            close_button: false,
            door_obstruction: true,
            overload: false,
            emergency_stop: false,
            individual_service_mode: false,
            emergency_mode: false,
        };
        assert!(!snap.is_consistent());
    }

    #[test]
    fn snapshot_accepts_obstruction_while_closing() {
        let snap = Snapshot {
            status_raw: "Closing".into(),
            current_floor_raw: "1".into(),
            destination_floor_raw: "1".into(),
            open_button: false,
            close_button: false,
            door_obstruction: true,
            overload: false,
            emergency_stop: false,
            individual_service_mode: false,
            emergency_mode: false,
        };
        assert!(snap.is_consistent());
    }

    #[test]
    fn snapshot_rejects_bad_floor() {
        let snap = Snapshot {
            status_raw: "Closed".into(),
            current_floor_raw: "0".into(),
            destination_floor_raw: "1".into(),
            open_button: false,
            close_button: false,
            door_obstruction: false,
            overload: false,
            emergency_stop: false,
            individual_service_mode: false,
            emergency_mode: false,
        };
        assert!(!snap.is_consistent());
    }
}
