//! CLI command implementations
//!
//! Every step works on one NVCM session and runs in a fixed order, so a
//! failed write never reaches `--secure`.

mod info;
mod list;
mod progress;
mod read;
mod verify;
mod write;

pub use list::list_bridges;

use icenvcm_core::flash_sleep::sleep_flash;
use icenvcm_core::nvcm::{BlankCheck, NvcmSession, SecureConfirmation};
use icenvcm_core::Bridge;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::cli::Cli;
use crate::programmers::Programmer;

/// Read file contents into a Vec
fn read_file(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut file = File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    log::info!("Read {} bytes from {:?}", data.len(), path);
    Ok(data)
}

/// Refuse `--write` and `--secure` unless the user confirmed them
fn confirm_irreversible(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.is_irreversible() && !cli.my_design_is_good_enough {
        return Err("Are you sure your design is good enough? \
                    NVCM is one-time programmable; pass --my-design-is-good-enough to continue"
            .into());
    }
    Ok(())
}

/// Run every step requested on the command line
pub fn run(programmer: Programmer<'_>, cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    confirm_irreversible(cli)?;

    let Programmer {
        control,
        pins,
        session: config,
    } = programmer;

    if cli.bootloader {
        Bridge::new(control).enter_bootloader()?;
        println!("Bridge rebooted into its bootloader");
        return Ok(());
    }

    if cli.adc {
        info::run_adc(&mut Bridge::new(&mut *control))?;
    }

    if cli.sleep_flash {
        sleep_flash(&mut Bridge::new(&mut *control), &pins, config.clock_mhz)?;
    }

    if !cli.needs_session() {
        return Ok(());
    }

    let mut session = NvcmSession::new(control, pins, config)?;
    session.power_on()?;
    session.init()?;
    session.nvcm_enable()?;

    if cli.info {
        info::run_info(&mut session)?;
    }

    if let Some(input) = &cli.write {
        let blank_check = if cli.ignore_blank {
            BlankCheck::Skip
        } else {
            BlankCheck::Required
        };
        write::run_write(&mut session, input, blank_check)?;
    }

    if let Some(output) = &cli.read {
        read::run_read(&mut session, output, cli.read_length)?;
    }

    if let Some(input) = &cli.verify {
        verify::run_verify(&mut session, input)?;
    }

    if cli.secure {
        session.trim_secure(SecureConfirmation::irreversible())?;
        println!("Device secured");
    }

    if cli.boot {
        let done = session.boot()?;
        println!("CDONE: {}", if done { "high" } else { "low" });
    }

    Ok(())
}
