//! Process entry point. Parses argv into a run configuration, runs one
//! measurement to completion, and is the only place in the crate allowed
//! to call `std::process::exit` -- everything under `src/lib.rs` returns
//! `Result` instead (`cli.rs`'s own doc comment states this contract).
//!
//! Grounded in the original meter's `main()`
//! (`examples/original_source/src/netperfmeter.cc`): the argument-count
//! check and exit-code-1-on-error convention are carried over; the
//! passive/active dispatch itself now lives in `netmeter::run`.

use std::sync::atomic::{AtomicBool, Ordering};

use netmeter::cli;
use netmeter::error::NetMeterError;

fn install_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// Set once by the `SIGINT` handler below; `should_continue` polls it so a
/// `Ctrl-C` ends the run the same way `-runtime=` does -- a clean
/// `STOP_MEAS`/summary flush rather than an abrupt kill. Wired up with the
/// raw `libc` signal API already in this crate's dependency table.
static SHOULD_CONTINUE: AtomicBool = AtomicBool::new(true);

#[cfg(unix)]
extern "C" fn on_sigint(_sig: libc::c_int) {
    SHOULD_CONTINUE.store(false, Ordering::SeqCst);
}

#[cfg(unix)]
fn install_shutdown_signal() {
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
fn install_shutdown_signal() {}

fn should_continue() -> bool {
    SHOULD_CONTINUE.load(Ordering::SeqCst)
}

fn main() {
    install_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match cli::parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("netmeter: {e}");
            std::process::exit(1);
        }
    };

    install_shutdown_signal();

    match netmeter::run(config, &should_continue) {
        Ok(()) => std::process::exit(0),
        Err(NetMeterError::Configuration(msg)) => {
            eprintln!("netmeter: configuration error: {msg}");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("netmeter: {e}");
            std::process::exit(1);
        }
    }
}
