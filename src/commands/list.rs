//! List command implementation

use icenvcm_usb::UsbBridge;

/// List connected bridges
pub fn list_bridges() -> Result<(), Box<dyn std::error::Error>> {
    let bridges = UsbBridge::list_devices()?;
    if bridges.is_empty() {
        println!("No bridges found");
        return Ok(());
    }

    for (index, bridge) in bridges.iter().enumerate() {
        println!("  [{}] {}", index, bridge);
    }
    Ok(())
}
