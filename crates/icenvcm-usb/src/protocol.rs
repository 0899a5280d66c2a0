//! Bridge USB identification constants
//!
//! Request codes and payload layouts live in
//! [`icenvcm_core::transport`]; this module only holds what is needed to
//! find and open the device.

/// USB vendor ID of the bridge firmware
pub const BRIDGE_USB_VENDOR: u16 = 0xCAFE;
/// USB product ID of the bridge firmware
pub const BRIDGE_USB_PRODUCT: u16 = 0x4010;

/// Firmware version (bcdDevice) this host side speaks
pub const FIRMWARE_VERSION: u16 = 0x0200;

/// Interface carrying the vendor requests
pub const BRIDGE_INTERFACE: u8 = 0;
