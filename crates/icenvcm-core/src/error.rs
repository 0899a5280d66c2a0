//! Error types for icenvcm-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate. Every variant carries enough context (command,
//! address, expected vs. found) to diagnose a failure without re-running
//! with tracing enabled.

use core::fmt;

use crate::nvcm::{Bank, SessionState};

/// Client-side request problems, detected before any USB traffic is issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidArgument {
    /// A single bridge frame would exceed the firmware's buffer
    FrameTooLarge {
        /// Requested payload length
        len: usize,
        /// Maximum payload length per frame
        max: usize,
    },
    /// Pin number is not a valid bridge GPIO
    PinOutOfRange {
        /// Offending pin number
        pin: u8,
    },
    /// The same pin is assigned to two signal roles
    PinConflict {
        /// Pin number used twice
        pin: u8,
    },
    /// SPI clock speed of 0 MHz (rejected by the bridge firmware)
    ZeroClockSpeed,
    /// An SPI primitive was used before `configure_spi`
    SpiNotConfigured,
    /// Verification requested against an empty reference image
    EmptyReference,
    /// Requested length does not fit the NVCM address space
    LengthTooLarge {
        /// Requested length in bytes
        len: usize,
    },
}

/// Failure class of a single USB control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// The transfer did not complete within its timeout
    Timeout,
    /// The device stalled the request (unsupported or rejected)
    Stall,
    /// The device disappeared from the bus
    Disconnected,
    /// A control read returned fewer bytes than requested
    ShortRead {
        /// Bytes requested
        expected: usize,
        /// Bytes received
        got: usize,
    },
    /// Any other host controller or OS level failure
    Failed,
}

/// A failed USB control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferError {
    /// Vendor request code of the failed transfer
    pub request: u8,
    /// What went wrong
    pub kind: TransferKind,
}

impl TransferError {
    /// Create a new transfer error for the given request code
    pub const fn new(request: u8, kind: TransferKind) -> Self {
        Self { request, kind }
    }
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Malformed client-side request
    InvalidArgument(InvalidArgument),
    /// USB control transfer failed
    Transfer(TransferError),

    // Converter errors
    /// The bitstream does not contain the `7E AA 99 7E` preamble
    PreambleNotFound,

    // NVCM state machine errors
    /// The NVCM status never cleared within the poll limit
    StatusTimeout {
        /// Number of status polls issued
        polls: u32,
        /// Last status word read from the device
        status: u16,
    },
    /// A write frame was sent but the NVCM never reported completion
    WriteFailed {
        /// Command byte of the failed write
        cmd: u8,
        /// NVCM address of the failed write
        address: u32,
    },
    /// Memory that must be blank before programming is not
    BlankCheckFailed {
        /// Bank that was checked
        bank: Bank,
        /// Offset of the first non-zero byte
        offset: u32,
        /// The byte value found (should be 0x00 if blank)
        found: u8,
    },
    /// Trim lock bits did not read back after programming
    WriteVerificationFailed {
        /// Trim row address that was checked
        row: u32,
        /// Lock bit pattern that was written
        expected: u64,
        /// Value read back from the row
        found: u64,
    },
    /// NVCM contents differ from the reference image
    VerifyMismatch {
        /// Offset of the first mismatching byte in the reference
        offset: usize,
        /// Byte in the reference
        expected: u8,
        /// Byte read from the device
        found: u8,
    },
    /// Operation issued in a session state that does not allow it
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// Session state at the time of the call
        state: SessionState,
    },

    // Flash sleep errors
    /// The SPI flash answered with an unexpected JEDEC ID
    UnexpectedFlashId {
        /// ID that was expected
        expected: [u8; 3],
        /// ID that was read
        found: [u8; 3],
    },
}

impl From<InvalidArgument> for Error {
    fn from(e: InvalidArgument) -> Self {
        Error::InvalidArgument(e)
    }
}

impl From<TransferError> for Error {
    fn from(e: TransferError) -> Self {
        Error::Transfer(e)
    }
}

impl fmt::Display for InvalidArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameTooLarge { len, max } => {
                write!(f, "message too large, size: {} max: {}", len, max)
            }
            Self::PinOutOfRange { pin } => write!(f, "pin {} is not a bridge GPIO", pin),
            Self::PinConflict { pin } => write!(f, "pin {} is assigned to more than one signal", pin),
            Self::ZeroClockSpeed => write!(f, "SPI clock speed must be at least 1 MHz"),
            Self::SpiNotConfigured => write!(f, "SPI pins have not been configured"),
            Self::EmptyReference => write!(f, "reference image is empty"),
            Self::LengthTooLarge { len } => {
                write!(f, "length {} exceeds the NVCM address space", len)
            }
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Stall => write!(f, "stalled"),
            Self::Disconnected => write!(f, "device disconnected"),
            Self::ShortRead { expected, got } => {
                write!(f, "short read ({} of {} bytes)", got, expected)
            }
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "USB request 0x{:02X} {}", self.request, self.kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(e) => write!(f, "invalid argument: {}", e),
            Self::Transfer(e) => write!(f, "{}", e),
            Self::PreambleNotFound => write!(f, "bitstream preamble 7E AA 99 7E not found"),
            Self::StatusTimeout { polls, status } => write!(
                f,
                "NVCM status failed to clear after {} polls (status 0x{:04X})",
                polls, status
            ),
            Self::WriteFailed { cmd, address } => write!(
                f,
                "write failed: cmd=0x{:02X} address=0x{:06X}",
                cmd, address
            ),
            Self::BlankCheckFailed {
                bank,
                offset,
                found,
            } => write!(
                f,
                "{} bank is not blank at 0x{:08X} (found 0x{:02X})",
                bank, offset, found
            ),
            Self::WriteVerificationFailed {
                row,
                expected,
                found,
            } => write!(
                f,
                "failed to write trim lock bits at row 0x{:02X}: {:016x} != expected {:016x}",
                row, found, expected
            ),
            Self::VerifyMismatch {
                offset,
                expected,
                found,
            } => write!(
                f,
                "verify failed at 0x{:08X}: expected 0x{:02X}, found 0x{:02X}",
                offset, expected, found
            ),
            Self::InvalidState { operation, state } => {
                write!(f, "cannot {} while session is {}", operation, state)
            }
            Self::UnexpectedFlashId { expected, found } => write!(
                f,
                "unexpected flash ID {:02x} {:02x} {:02x} (expected {:02x} {:02x} {:02x})",
                found[0], found[1], found[2], expected[0], expected[1], expected[2]
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
