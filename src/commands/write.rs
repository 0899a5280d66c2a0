//! Write command implementation

use icenvcm_core::bitstream;
use icenvcm_core::nvcm::{BlankCheck, NvcmSession};
use icenvcm_core::ControlTransport;
use std::path::Path;

use super::progress::IndicatifProgress;
use super::read_file;

/// Program a bitstream file and make the device boot from NVCM
pub fn run_write<C: ControlTransport>(
    session: &mut NvcmSession<C>,
    input: &Path,
    blank_check: BlankCheck,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = read_file(input)?;
    let commands = bitstream::convert(&data)?;
    println!(
        "Programming {} rows ({} commands)",
        bitstream::row_count(&commands),
        commands.len()
    );

    session.program(&commands, blank_check, &mut IndicatifProgress::new())?;
    session.trim_program()?;

    println!("Write complete");
    Ok(())
}
