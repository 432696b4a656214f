//! Car: owns a shared region, runs the door/motion state machine, and
//! maintains a connection to the Controller.

pub mod net;
pub mod runtime;

use crate::region::{Region, RegionError};
use log::info;
use net::NetConfig;
use runtime::CarConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StartError {
    #[error("lo floor {lo} must be <= hi floor {hi}, or both must be valid floors")]
    InvalidRange { lo: i32, hi: i32 },
    #[error("could not create shared region: {0}")]
    Region(#[from] RegionError),
}

pub struct Args {
    pub name: String,
    pub lo: i32,
    pub hi: i32,
    pub delay_ms: u64,
    pub controller_addr: String,
}

/// Validates `lo`/`hi`, creates the region, spawns the network worker, and
/// runs the door/motion loop on the calling thread until `shutdown` is
/// set. Returns once the region has been torn down.
pub fn run(args: Args, shutdown: Arc<AtomicBool>) -> Result<(), StartError> {
    use crate::floor;
    if args.lo > args.hi || !floor::is_valid(args.lo) || !floor::is_valid(args.hi) {
        return Err(StartError::InvalidRange {
            lo: args.lo,
            hi: args.hi,
        });
    }

    let region = Arc::new(Region::create(&args.name, args.lo)?);
    info!(
        "car {} serving floors {}..{} (region created)",
        args.name, args.lo, args.hi
    );

    let pending: runtime::Pending = Arc::new(Mutex::new(None));
    let net_cfg = NetConfig {
        name: args.name.clone(),
        lo: args.lo,
        hi: args.hi,
        delay: Duration::from_millis(args.delay_ms),
        controller_addr: args.controller_addr,
    };
    let car_cfg = CarConfig {
        lo: args.lo,
        hi: args.hi,
        delay: Duration::from_millis(args.delay_ms),
    };

    let net_region = Arc::clone(&region);
    let net_pending = Arc::clone(&pending);
    let net_shutdown = Arc::clone(&shutdown);
    let net_handle = thread::spawn(move || {
        net::run(net_region, net_cfg, net_pending, net_shutdown);
    });

    runtime::drive(Arc::clone(&region), car_cfg, pending, Arc::clone(&shutdown));

    shutdown.store(true, Ordering::Relaxed);
    region.lock().notify_all();
    let _ = net_handle.join();

    info!("car {} shutting down (region unlinked)", args.name);
    Ok(())
}
