//! Read command implementation

use icenvcm_core::nvcm::NvcmSession;
use icenvcm_core::ControlTransport;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use super::progress::IndicatifProgress;

/// Dump `length` bytes of NVCM to `output`, or to stdout for `-`
pub fn run_read<C: ControlTransport>(
    session: &mut NvcmSession<C>,
    output: &Path,
    length: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let to_stdout = output == Path::new("-");

    let image = if to_stdout {
        // Keep the bar off a piped dump
        session.read_image(length, &mut icenvcm_core::nvcm::NoProgress)?
    } else {
        session.read_image(length, &mut IndicatifProgress::new())?
    };

    if to_stdout {
        let mut stdout = io::stdout().lock();
        stdout.write_all(&image)?;
        stdout.flush()?;
    } else {
        let mut file = File::create(output)?;
        file.write_all(&image)?;
        println!("Wrote {} bytes to {:?}", image.len(), output);
    }

    Ok(())
}
