use clap::Parser;
use liftctl::maintenance::{self, Op};
use std::process::ExitCode;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the car whose region to attach to.
    car_name: String,

    /// One of open, close, stop, service_on, service_off, up, down.
    op: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let op = match Op::from_str(&args.op) {
        Ok(op) => op,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    match maintenance::run(&args.car_name, op) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("internal {} {}: {e}", args.car_name, args.op);
            ExitCode::FAILURE
        }
    }
}
