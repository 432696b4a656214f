//! Controller: the single process that brokers calls between callers and
//! cars over a fixed-size registry.

pub mod dispatch;
pub mod queue;
pub mod registry;

use log::{info, warn};
use registry::Registry;
use std::io;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// How often the accept loop re-checks `shutdown` between polls of a
/// non-blocking listener, mirroring the Car's and Safety Monitor's own
/// periodic-poll shutdown checks.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Binds `addr` and serves until `shutdown` is set, one detached worker
/// thread per accepted connection. All registry mutation happens under the
/// single process-wide lock this function creates; dispatch does its own
/// region-locking and TCP I/O outside that lock.
pub fn run(addr: &str, shutdown: Arc<AtomicBool>) -> io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    info!("controller listening on {addr}");
    let registry = Arc::new(Mutex::new(Registry::new()));

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => {
                let registry = Arc::clone(&registry);
                thread::spawn(move || dispatch::handle_connection(&registry, stream));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!("accept failed: {e}");
            }
        }
    }
    info!("controller shutting down");
    Ok(())
}
