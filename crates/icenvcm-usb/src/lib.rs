//! icenvcm-usb - USB transport for the iCE40 programmer bridge
//!
//! The bridge is a small microcontroller (VID:PID `cafe:4010`) that exposes
//! GPIO control and bit-banged SPI through vendor control requests on
//! interface 0. This crate finds and opens it with `nusb` and implements
//! [`icenvcm_core::ControlTransport`] so it can drive an
//! [`icenvcm_core::nvcm::NvcmSession`].
//!
//! # Example
//!
//! ```no_run
//! use icenvcm_core::nvcm::NvcmSession;
//! use icenvcm_usb::{parse_options, UsbBridge};
//!
//! let config = parse_options(&[("speed", "6")])?;
//! let bridge = UsbBridge::open_with_config(&config)?;
//! let mut session = NvcmSession::new(bridge, config.pins, config.session)?;
//! session.power_on()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Configuration Options
//!
//! - `index=N`: Select the Nth bridge (0-indexed)
//! - `speed=N`: SPI clock in MHz (default 12)
//! - `sck=`, `cs=`, `mosi=`, `miso=`, `power=`, `creset=`, `cdone=`:
//!   bridge GPIO for each signal (defaults match the TP1 board)

mod device;
mod error;
pub mod protocol;

pub use device::{parse_options, UsbBridge, UsbBridgeConfig, UsbBridgeInfo};
pub use error::{Result, UsbBridgeError};
