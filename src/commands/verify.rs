//! Verify command implementation

use icenvcm_core::nvcm::NvcmSession;
use icenvcm_core::ControlTransport;
use std::path::Path;

use super::progress::IndicatifProgress;
use super::read_file;

/// Compare NVCM against an image made by the read command
pub fn run_verify<C: ControlTransport>(
    session: &mut NvcmSession<C>,
    input: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let expected = read_file(input)?;
    session.verify(&expected, &mut IndicatifProgress::new())?;
    println!("Verification passed!");
    Ok(())
}
