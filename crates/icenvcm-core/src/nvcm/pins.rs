//! Pin assignment and session settings

use core::fmt;

use crate::error::{InvalidArgument, Result};
use crate::nvcm::opcodes;
use crate::transport::{SpiPins, PIN_COUNT};

/// Logical signal roles wired to the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinRole {
    /// SPI clock
    Sck,
    /// SPI chip select (iCE40 SPI_SS)
    Cs,
    /// Host to FPGA data
    Mosi,
    /// FPGA to host data
    Miso,
    /// Target board 5V enable
    Power,
    /// iCE40 CRESET_B
    Creset,
    /// iCE40 CDONE
    Cdone,
}

impl PinRole {
    /// All roles, in option order
    pub const ALL: [PinRole; 7] = [
        PinRole::Sck,
        PinRole::Cs,
        PinRole::Mosi,
        PinRole::Miso,
        PinRole::Power,
        PinRole::Creset,
        PinRole::Cdone,
    ];

    /// Option key naming this role
    pub fn key(self) -> &'static str {
        match self {
            PinRole::Sck => "sck",
            PinRole::Cs => "cs",
            PinRole::Mosi => "mosi",
            PinRole::Miso => "miso",
            PinRole::Power => "power",
            PinRole::Creset => "creset",
            PinRole::Cdone => "cdone",
        }
    }

    /// Look up a role by option key
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "ss" => Some(PinRole::Cs),
            "5v_en" => Some(PinRole::Power),
            "crst" => Some(PinRole::Creset),
            "cdne" => Some(PinRole::Cdone),
            _ => Self::ALL.into_iter().find(|role| role.key() == key),
        }
    }
}

impl fmt::Display for PinRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Physical bridge GPIO for each signal role
///
/// The default is the wiring of the TP1 programmer board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinMap {
    /// SPI clock
    pub sck: u8,
    /// SPI chip select
    pub cs: u8,
    /// Host to FPGA data
    pub mosi: u8,
    /// FPGA to host data
    pub miso: u8,
    /// Target board 5V enable
    pub power: u8,
    /// iCE40 CRESET_B
    pub creset: u8,
    /// iCE40 CDONE
    pub cdone: u8,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            power: 7,
            sck: 10,
            mosi: 11,
            cs: 12,
            miso: 13,
            creset: 14,
            cdone: 15,
        }
    }
}

impl PinMap {
    /// Pin assigned to a role
    pub fn pin(&self, role: PinRole) -> u8 {
        match role {
            PinRole::Sck => self.sck,
            PinRole::Cs => self.cs,
            PinRole::Mosi => self.mosi,
            PinRole::Miso => self.miso,
            PinRole::Power => self.power,
            PinRole::Creset => self.creset,
            PinRole::Cdone => self.cdone,
        }
    }

    /// Assign a pin to a role
    pub fn set(&mut self, role: PinRole, pin: u8) {
        let slot = match role {
            PinRole::Sck => &mut self.sck,
            PinRole::Cs => &mut self.cs,
            PinRole::Mosi => &mut self.mosi,
            PinRole::Miso => &mut self.miso,
            PinRole::Power => &mut self.power,
            PinRole::Creset => &mut self.creset,
            PinRole::Cdone => &mut self.cdone,
        };
        *slot = pin;
    }

    /// Check that every pin exists and no pin has two roles
    pub fn validate(&self) -> Result<()> {
        let mut used = 0u32;
        for role in PinRole::ALL {
            let pin = self.pin(role);
            if pin >= PIN_COUNT {
                return Err(InvalidArgument::PinOutOfRange { pin }.into());
            }
            if used & (1 << pin) != 0 {
                return Err(InvalidArgument::PinConflict { pin }.into());
            }
            used |= 1 << pin;
        }
        Ok(())
    }

    /// SPI mapping for talking to the FPGA
    pub fn spi(&self, clock_mhz: u8) -> SpiPins {
        SpiPins {
            sck: self.sck,
            cs: self.cs,
            mosi: self.mosi,
            miso: self.miso,
            clock_mhz,
        }
    }

    /// SPI mapping for talking to the configuration flash
    ///
    /// The flash sits on the FPGA side of the bus, so the data lines swap.
    pub fn flash_spi(&self, clock_mhz: u8) -> SpiPins {
        SpiPins {
            sck: self.sck,
            cs: self.cs,
            mosi: self.miso,
            miso: self.mosi,
            clock_mhz,
        }
    }
}

impl fmt::Display for PinMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, role) in PinRole::ALL.into_iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", role, self.pin(role))?;
        }
        Ok(())
    }
}

/// Settings fixed for the lifetime of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// SPI clock speed in MHz
    pub clock_mhz: u8,
    /// Maximum number of status polls per wait
    pub status_poll_limit: u32,
    /// Clock cycles run before each status poll
    pub status_poll_clocks: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            clock_mhz: 12,
            status_poll_limit: opcodes::STATUS_POLL_LIMIT,
            status_poll_clocks: opcodes::STATUS_POLL_CLOCKS,
        }
    }
}

impl SessionConfig {
    /// Check the settings before any device traffic
    pub fn validate(&self) -> Result<()> {
        if self.clock_mhz == 0 {
            return Err(InvalidArgument::ZeroClockSpeed.into());
        }
        Ok(())
    }
}
