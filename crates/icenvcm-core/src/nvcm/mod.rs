//! NVCM protocol engine
//!
//! [`NvcmSession`] owns a [`Bridge`](crate::transport::Bridge) and a
//! [`PinMap`] and sequences bridge primitives into the NVCM operations:
//! reset into SPI mode, unlock, bank selection, blank check, program,
//! trim programming, read-back and verification.
//!
//! # Session lifecycle
//!
//! ```text
//! Created -> PoweredOn -> Initialized -> NvcmEnabled -> {BlankChecked, Programmed, Verified, Secured}
//! ```
//!
//! Powering off returns to `Created`. Every operation checks the state on
//! entry and fails with [`Error::InvalidState`](crate::error::Error::InvalidState)
//! instead of trusting the call order.

mod info;
pub mod opcodes;
mod pins;
mod session;

pub use info::{device_name, secure_bits, NvcmInfo};
pub use pins::{PinMap, PinRole, SessionConfig};
pub use session::{BlankCheck, NvcmSession, SecureConfirmation};

use bitflags::bitflags;
use core::fmt;

/// Header prepended to NVCM read-out images
pub const READ_HEADER: [u8; 4] = [0xFF, 0x00, 0x00, 0xFF];

/// Default read-out length in bytes
pub const DEFAULT_READ_LENGTH: usize = 104_090;

/// Bytes of main memory checked before programming
pub const BLANK_CHECK_LENGTH: usize = 0x100;

/// Addressing context of the NVCM controller
///
/// The device does not report the selected bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Bank {
    /// Main configuration memory
    Nvcm = 0x00,
    /// Calibration and lock rows
    Trim = 0x10,
    /// Silicon signature (read-only)
    Sig = 0x20,
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Bank::Nvcm => "nvcm",
            Bank::Trim => "trim",
            Bank::Sig => "sig",
        };
        f.write_str(name)
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Pins configured, target power off
    Created,
    /// Target powered
    PoweredOn,
    /// Target reset into SPI slave mode
    Initialized,
    /// NVCM access unlocked
    NvcmEnabled,
    /// Main memory blank check passed
    BlankChecked,
    /// Main memory or trim rows programmed
    Programmed,
    /// Contents verified against a reference
    Verified,
    /// Security lock bits written
    Secured,
}

impl SessionState {
    /// Whether bank scoped operations are allowed
    pub fn nvcm_enabled(self) -> bool {
        matches!(
            self,
            SessionState::NvcmEnabled
                | SessionState::BlankChecked
                | SessionState::Programmed
                | SessionState::Verified
                | SessionState::Secured
        )
    }

    /// Whether the target is powered
    pub fn powered(self) -> bool {
        self != SessionState::Created
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::PoweredOn => "powered on",
            SessionState::Initialized => "initialized",
            SessionState::NvcmEnabled => "NVCM enabled",
            SessionState::BlankChecked => "blank checked",
            SessionState::Programmed => "programmed",
            SessionState::Verified => "verified",
            SessionState::Secured => "secured",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// NVCM controller status word
    ///
    /// Only bits 0, 6 and 7 are checked. The controller accepts the next
    /// command once all three are clear.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NvcmStatus: u16 {
        /// Command in progress
        const BUSY = 1 << 0;
        /// Controller state machine bit 6
        const WAIT = 1 << 6;
        /// Controller state machine bit 7
        const HOLD = 1 << 7;
        /// Any bit that blocks the next command
        const NOT_READY = Self::BUSY.bits() | Self::WAIT.bits() | Self::HOLD.bits();
    }
}

impl NvcmStatus {
    /// Whether the controller accepts the next command
    pub fn is_ready(self) -> bool {
        !self.intersects(NvcmStatus::NOT_READY)
    }
}

/// Progress callbacks for long running operations
pub trait Progress {
    /// Called when programming starts
    fn programming(&mut self, total_bytes: usize);

    /// Called after each programmed row
    fn program_progress(&mut self, bytes_written: usize);

    /// Called when a read-out starts
    fn reading(&mut self, total_bytes: usize);

    /// Called after each row read
    fn read_progress(&mut self, bytes_read: usize);

    /// Called when the operation is complete
    fn complete(&mut self);
}

/// A no-op progress reporter
pub struct NoProgress;

impl Progress for NoProgress {
    fn programming(&mut self, _total_bytes: usize) {}
    fn program_progress(&mut self, _bytes_written: usize) {}
    fn reading(&mut self, _total_bytes: usize) {}
    fn read_progress(&mut self, _bytes_read: usize) {}
    fn complete(&mut self) {}
}
