//! Error types for the USB bridge

use thiserror::Error;

/// USB bridge specific errors
#[derive(Debug, Error)]
pub enum UsbBridgeError {
    /// No bridge with the expected VID:PID (or not at the requested index)
    #[error("Bridge device not found (VID:cafe PID:4010)")]
    DeviceNotFound,

    /// Failed to enumerate or open the device
    #[error("Failed to open bridge: {0}")]
    OpenFailed(String),

    /// Failed to claim the vendor interface
    #[error("Failed to claim interface: {0}")]
    ClaimFailed(String),

    /// The bridge runs firmware with a different protocol version
    #[error("Bridge firmware version {found:04x} is not supported (need {required:04x}), please update the firmware")]
    FirmwareOutdated { found: u16, required: u16 },

    /// Invalid option value or unknown option
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error from a bridge or NVCM operation
    #[error(transparent)]
    Core(#[from] icenvcm_core::Error),
}

/// Result type for USB bridge operations
pub type Result<T> = std::result::Result<T, UsbBridgeError>;
