use clap::Parser;
use log::error;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the car whose region to attach to.
    car_name: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(Some(env_logger::fmt::TimestampPrecision::Millis))
        .init();

    let shutdown = Arc::new(AtomicBool::new(false));
    let sig_shutdown = Arc::clone(&shutdown);
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGINT, sig_shutdown) {
        error!("could not register SIGINT handler: {e}");
    }
    let sig_shutdown = Arc::clone(&shutdown);
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGTERM, sig_shutdown) {
        error!("could not register SIGTERM handler: {e}");
    }

    match liftctl::safety::run(&args.car_name, shutdown) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("safety monitor for {}: {e}", args.car_name);
            ExitCode::FAILURE
        }
    }
}
