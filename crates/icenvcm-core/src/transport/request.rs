//! Bridge vendor requests and their wire encoding
//!
//! Every bridge operation is a USB vendor control transfer. The request code
//! selects the operation, and the data stage carries a fixed big-endian
//! payload. Pin arguments are 32-bit masks (bit N = GPIO N).
//!
//! | Code | Direction | Payload |
//! |------|-----------|---------|
//! | 0x30 | OUT | `mask:u32 outputs:u32` |
//! | 0x31 | OUT | `mask:u32 pullups:u32 pulldowns:u32` |
//! | 0x32 | OUT / IN | OUT: `mask:u32 values:u32`, IN: `values:u32` |
//! | 0x40 | OUT | `sck:u8 cs:u8 mosi:u8 miso:u8 mhz:u8` |
//! | 0x41 | OUT / IN | OUT: `toggle_cs:u8 len:u32 data[len]`, IN: `data[len]` |
//! | 0x42 | OUT | `byte_count:u32` |
//! | 0x50 | IN | `adc0:u32 adc1:u32 adc2:u32` (microvolts) |
//! | 0xE0 | OUT | empty |

use alloc::vec::Vec;

use crate::error::{InvalidArgument, Result};

/// Maximum control transfer data length supported by the bridge firmware
pub const CONTROL_BUFFER_SIZE: usize = 2048;

/// Maximum SPI payload per bridge frame
pub const SPI_MAX_TRANSFER_SIZE: usize = CONTROL_BUFFER_SIZE - 8;

/// Number of GPIOs exposed by the bridge
pub const PIN_COUNT: u8 = 30;

/// Size of the SPI transfer header (`toggle_cs:u8 len:u32`)
pub const SPI_XFER_HEADER_LEN: usize = 5;

/// Vendor request codes understood by the bridge firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestCode {
    /// Configure GPIO pin directions
    PinDirection = 0x30,
    /// Configure GPIO pull-ups/pull-downs
    Pullups = 0x31,
    /// Set GPIO output values (OUT) or read all pin levels (IN)
    PinValues = 0x32,
    /// Configure the SPI pin mapping and clock
    SpiConfigure = 0x40,
    /// SPI transfer (OUT) or fetch the data clocked in by the last transfer (IN)
    SpiXfer = 0x41,
    /// Toggle the SPI clock without touching chip select
    SpiClockOut = 0x42,
    /// Read the averaged ADC inputs
    AdcRead = 0x50,
    /// Reboot the bridge into its bootloader
    Bootloader = 0xE0,
}

impl RequestCode {
    /// Decode a raw request code
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x30 => Some(Self::PinDirection),
            0x31 => Some(Self::Pullups),
            0x32 => Some(Self::PinValues),
            0x40 => Some(Self::SpiConfigure),
            0x41 => Some(Self::SpiXfer),
            0x42 => Some(Self::SpiClockOut),
            0x50 => Some(Self::AdcRead),
            0xE0 => Some(Self::Bootloader),
            _ => None,
        }
    }
}

/// SPI pin mapping and clock speed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiPins {
    /// Clock pin
    pub sck: u8,
    /// Chip select pin
    pub cs: u8,
    /// Host to target data pin
    pub mosi: u8,
    /// Target to host data pin
    pub miso: u8,
    /// Clock speed in MHz
    pub clock_mhz: u8,
}

/// Host to device requests, each carrying its fixed payload shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    /// Set the direction of the pins in `mask` (1 = output)
    SetDirection {
        /// Pins affected
        mask: u32,
        /// Direction bits
        outputs: u32,
    },
    /// Set the pull resistors of the pins in `mask`
    SetPulls {
        /// Pins affected
        mask: u32,
        /// Pull-up enable bits
        pull_up: u32,
        /// Pull-down enable bits
        pull_down: u32,
    },
    /// Set the output level of the pins in `mask`
    SetValues {
        /// Pins affected
        mask: u32,
        /// Level bits
        values: u32,
    },
    /// Set the SPI pin mapping
    SpiConfigure(SpiPins),
    /// Clock one frame of data out (and in)
    SpiXfer {
        /// Let the bridge assert and release chip select around the frame
        toggle_cs: bool,
        /// Data to transmit
        data: &'a [u8],
    },
    /// Clock `byte_count` bytes worth of clock pulses
    SpiClockOut {
        /// Number of bytes worth of clocks
        byte_count: u32,
    },
    /// Reboot into the bootloader
    Bootloader,
}

/// Device to host requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRequest {
    /// All pin levels as a 32-bit mask
    PinValues,
    /// Response data of the last SPI frame
    SpiXfer {
        /// Number of bytes to fetch
        len: usize,
    },
    /// Three ADC readings
    AdcRead,
}

impl Request<'_> {
    /// Request code for this request
    pub fn code(&self) -> RequestCode {
        match self {
            Self::SetDirection { .. } => RequestCode::PinDirection,
            Self::SetPulls { .. } => RequestCode::Pullups,
            Self::SetValues { .. } => RequestCode::PinValues,
            Self::SpiConfigure(_) => RequestCode::SpiConfigure,
            Self::SpiXfer { .. } => RequestCode::SpiXfer,
            Self::SpiClockOut { .. } => RequestCode::SpiClockOut,
            Self::Bootloader => RequestCode::Bootloader,
        }
    }

    /// Encode the data stage of this request
    ///
    /// Fails with `InvalidArgument` if the request can never be carried by
    /// a single frame; nothing has been sent at that point.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match *self {
            Self::SetDirection { mask, outputs } => {
                buf.extend_from_slice(&mask.to_be_bytes());
                buf.extend_from_slice(&outputs.to_be_bytes());
            }
            Self::SetPulls {
                mask,
                pull_up,
                pull_down,
            } => {
                buf.extend_from_slice(&mask.to_be_bytes());
                buf.extend_from_slice(&pull_up.to_be_bytes());
                buf.extend_from_slice(&pull_down.to_be_bytes());
            }
            Self::SetValues { mask, values } => {
                buf.extend_from_slice(&mask.to_be_bytes());
                buf.extend_from_slice(&values.to_be_bytes());
            }
            Self::SpiConfigure(pins) => {
                for pin in [pins.sck, pins.cs, pins.mosi, pins.miso] {
                    check_pin(pin)?;
                }
                if pins.clock_mhz == 0 {
                    return Err(InvalidArgument::ZeroClockSpeed.into());
                }
                buf.extend_from_slice(&[pins.sck, pins.cs, pins.mosi, pins.miso, pins.clock_mhz]);
            }
            Self::SpiXfer { toggle_cs, data } => {
                check_frame_len(data.len())?;
                buf.reserve(SPI_XFER_HEADER_LEN + data.len());
                buf.push(toggle_cs as u8);
                buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
                buf.extend_from_slice(data);
            }
            Self::SpiClockOut { byte_count } => {
                check_frame_len(byte_count as usize)?;
                buf.extend_from_slice(&byte_count.to_be_bytes());
            }
            Self::Bootloader => {}
        }
        Ok(buf)
    }
}

impl ReadRequest {
    /// Request code for this request
    pub fn code(&self) -> RequestCode {
        match self {
            Self::PinValues => RequestCode::PinValues,
            Self::SpiXfer { .. } => RequestCode::SpiXfer,
            Self::AdcRead => RequestCode::AdcRead,
        }
    }

    /// Expected length of the data stage
    pub fn len(&self) -> usize {
        match *self {
            Self::PinValues => 4,
            Self::SpiXfer { len } => len,
            Self::AdcRead => 3 * 4,
        }
    }

    /// Whether the data stage is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Single-pin mask helper
pub fn pin_mask(pin: u8) -> Result<u32> {
    check_pin(pin)?;
    Ok(1u32 << pin)
}

fn check_pin(pin: u8) -> Result<()> {
    if pin >= PIN_COUNT {
        return Err(InvalidArgument::PinOutOfRange { pin }.into());
    }
    Ok(())
}

fn check_frame_len(len: usize) -> Result<()> {
    if len > SPI_MAX_TRANSFER_SIZE {
        return Err(InvalidArgument::FrameTooLarge {
            len,
            max: SPI_MAX_TRANSFER_SIZE,
        }
        .into());
    }
    Ok(())
}

/// Decode a big-endian u32 from the start of a buffer
pub fn read_u32_be(buf: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use alloc::vec;

    #[test]
    fn test_pin_requests_are_big_endian_masks() {
        let req = Request::SetValues {
            mask: 1 << 12,
            values: 0,
        };
        assert_eq!(req.code() as u8, 0x32);
        assert_eq!(req.encode().unwrap(), vec![0, 0, 0x10, 0, 0, 0, 0, 0]);

        let req = Request::SetPulls {
            mask: 1 << 7,
            pull_up: 1 << 7,
            pull_down: 0,
        };
        assert_eq!(
            req.encode().unwrap(),
            vec![0, 0, 0, 0x80, 0, 0, 0, 0x80, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_spi_xfer_header() {
        let data = [0x05, 0x00];
        let req = Request::SpiXfer {
            toggle_cs: true,
            data: &data,
        };
        assert_eq!(req.code(), RequestCode::SpiXfer);
        assert_eq!(req.encode().unwrap(), vec![1, 0, 0, 0, 2, 0x05, 0x00]);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let data = vec![0u8; SPI_MAX_TRANSFER_SIZE + 1];
        let req = Request::SpiXfer {
            toggle_cs: false,
            data: &data,
        };
        assert_eq!(
            req.encode(),
            Err(Error::InvalidArgument(InvalidArgument::FrameTooLarge {
                len: SPI_MAX_TRANSFER_SIZE + 1,
                max: SPI_MAX_TRANSFER_SIZE,
            }))
        );

        let data = vec![0u8; SPI_MAX_TRANSFER_SIZE];
        let req = Request::SpiXfer {
            toggle_cs: false,
            data: &data,
        };
        assert_eq!(req.encode().unwrap().len(), SPI_MAX_TRANSFER_SIZE + 5);
    }

    #[test]
    fn test_spi_configure_validation() {
        let mut pins = SpiPins {
            sck: 10,
            cs: 12,
            mosi: 11,
            miso: 13,
            clock_mhz: 12,
        };
        assert_eq!(
            Request::SpiConfigure(pins).encode().unwrap(),
            vec![10, 12, 11, 13, 12]
        );

        pins.clock_mhz = 0;
        assert_eq!(
            Request::SpiConfigure(pins).encode(),
            Err(Error::InvalidArgument(InvalidArgument::ZeroClockSpeed))
        );

        pins.clock_mhz = 12;
        pins.miso = 30;
        assert_eq!(
            Request::SpiConfigure(pins).encode(),
            Err(Error::InvalidArgument(InvalidArgument::PinOutOfRange {
                pin: 30
            }))
        );
    }

    #[test]
    fn test_request_code_round_trip() {
        for code in [0x30, 0x31, 0x32, 0x40, 0x41, 0x42, 0x50, 0xE0] {
            assert_eq!(RequestCode::from_u8(code).map(|c| c as u8), Some(code));
        }
        assert_eq!(RequestCode::from_u8(0xF8), None);
    }
}
