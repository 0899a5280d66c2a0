//! Device information and bridge diagnostics

use icenvcm_core::nvcm::NvcmSession;
use icenvcm_core::{Bridge, ControlTransport};

/// Print signature, trim rows and security state
pub fn run_info<C: ControlTransport>(
    session: &mut NvcmSession<C>,
) -> Result<(), Box<dyn std::error::Error>> {
    let info = session.info()?;
    println!("{}", info);
    if info.device_name().is_none() {
        log::warn!("Unknown device id 0x{:02x}", info.device_id());
    }
    Ok(())
}

/// Print the bridge ADC inputs in volts
pub fn run_adc<C: ControlTransport>(
    bridge: &mut Bridge<C>,
) -> Result<(), Box<dyn std::error::Error>> {
    let adc = bridge.read_adc()?;
    for (channel, microvolts) in adc.iter().enumerate() {
        println!("ADC{}: {:.3} V", channel, *microvolts as f64 / 1_000_000.0);
    }
    Ok(())
}
