//! icenvcm-core - Core library for iCE40 NVCM programming
//!
//! This crate programs the one-time-programmable configuration memory
//! (NVCM) of Lattice iCE40 FPGAs through a USB bridge that bit-bangs SPI
//! and drives GPIOs. It is `no_std` (with `alloc`) and does not depend on a
//! USB stack: the bridge is reached through the [`ControlTransport`] trait.
//!
//! # Layers
//!
//! - [`transport`] - bridge requests, chunked SPI transfers, GPIO
//! - [`bitstream`] - conversion of a bitstream into NVCM commands
//! - [`nvcm`] - the NVCM session: unlock, blank check, program, verify
//! - [`flash_sleep`] - silence the board's SPI flash before programming
//!
//! # Features
//!
//! - `std` - Implement `std::error::Error` for [`Error`]
//!
//! # Example
//!
//! ```ignore
//! use icenvcm_core::bitstream;
//! use icenvcm_core::nvcm::{BlankCheck, NoProgress, NvcmSession, PinMap, SessionConfig};
//!
//! let commands = bitstream::convert(&image)?;
//! let mut session = NvcmSession::new(transport, PinMap::default(), SessionConfig::default())?;
//! session.power_on()?;
//! session.init()?;
//! session.nvcm_enable()?;
//! session.program(&commands, BlankCheck::Required, &mut NoProgress)?;
//! session.trim_program()?;
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod bitstream;
pub mod error;
pub mod flash_sleep;
pub mod nvcm;
pub mod transport;

pub use error::{Error, Result};
pub use transport::{Bridge, ControlTransport};
