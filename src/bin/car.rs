use clap::Parser;
use liftctl::car::{self, Args as CarArgs};
use liftctl::floor;
use log::error;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Display name, used as the shared region's name and the registry key.
    name: String,

    /// Lowest served floor (e.g. "1", "B2").
    lo: String,

    /// Highest served floor.
    hi: String,

    /// Per-step delay in milliseconds.
    delay_ms: u64,

    /// Controller address to connect to.
    #[arg(long, env = "LIFTCTL_PORT", default_value_t = 3000)]
    port: u16,
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(Some(env_logger::fmt::TimestampPrecision::Millis))
        .init();

    let (lo, hi) = match (floor::parse(&args.lo), floor::parse(&args.hi)) {
        (Ok(lo), Ok(hi)) => (lo, hi),
        _ => {
            eprintln!("usage: car <name> <lo> <hi> <delay_ms>");
            return ExitCode::from(2);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let sig_shutdown = Arc::clone(&shutdown);
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGINT, sig_shutdown) {
        error!("could not register SIGINT handler: {e}");
    }
    let sig_shutdown = Arc::clone(&shutdown);
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGTERM, sig_shutdown) {
        error!("could not register SIGTERM handler: {e}");
    }

    let car_args = CarArgs {
        name: args.name,
        lo,
        hi,
        delay_ms: args.delay_ms,
        controller_addr: format!("127.0.0.1:{}", args.port),
    };

    match car::run(car_args, shutdown) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("car failed to start: {e}");
            ExitCode::FAILURE
        }
    }
}
