//! icenvcm - iCE40 NVCM programmer
//!
//! Programs the one-time programmable configuration memory of iCE40 FPGAs
//! through a USB bridge that bit-bangs SPI and drives the board's power,
//! reset and chip select lines.
//!
//! # Architecture
//!
//! - **icenvcm-core** - bridge request framing, bitstream conversion and the
//!   NVCM session state machine
//! - **icenvcm-usb** - the bridge on real hardware, through `nusb`
//! - **icenvcm-dummy** - an emulated bridge and device for dry runs

mod cli;
mod commands;
mod programmers;

use clap::Parser;
use cli::Cli;

/// Default log filter for a `-v` count; `RUST_LOG` still takes precedence
fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(cli.verbose)),
    )
    .init();

    if cli.list {
        return commands::list_bridges();
    }

    programmers::with_programmer(&cli.programmer, |programmer| {
        commands::run(programmer, &cli)
    })
}
