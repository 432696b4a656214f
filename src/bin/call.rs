use clap::Parser;
use liftctl::floor;
use liftctl::framing::{recv_frame, send_frame};
use std::io::BufReader;
use std::net::TcpStream;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Pickup floor (e.g. "5", "B2").
    src: String,

    /// Destination floor.
    dst: String,

    #[arg(long, env = "LIFTCTL_PORT", default_value_t = 3000)]
    port: u16,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let (src, dst) = match (floor::parse(&args.src), floor::parse(&args.dst)) {
        (Ok(s), Ok(d)) if s != d => (s, d),
        _ => {
            eprintln!("usage: call <src> <dst>, src and dst must be distinct valid floors");
            return ExitCode::from(2);
        }
    };

    let addr = format!("127.0.0.1:{}", args.port);
    let mut stream = match TcpStream::connect(&addr) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("could not connect to controller at {addr}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let msg = format!("CALL {} {}", floor::format(src), floor::format(dst));
    if let Err(e) = send_frame(&mut stream, msg.as_bytes()) {
        eprintln!("call failed: {e}");
        return ExitCode::FAILURE;
    }

    let mut reader = BufReader::new(stream);
    match recv_frame(&mut reader) {
        Ok(reply) => {
            println!("{reply}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("no reply from controller: {e}");
            ExitCode::FAILURE
        }
    }
}
