//! SPI configuration flash with deep power-down

/// Release from deep power-down
const RES: u8 = 0xAB;
/// Read JEDEC ID
const RDID: u8 = 0x9F;
/// Deep power-down
const DP: u8 = 0xB9;

/// Emulated SPI NOR flash sharing the bus with the FPGA
///
/// Only identification and power-down are modelled.
#[derive(Debug, Clone)]
pub struct DummySpiFlash {
    jedec_id: [u8; 2],
    asleep: bool,
    frame: Vec<u8>,
}

impl Default for DummySpiFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl DummySpiFlash {
    /// Winbond W25Q series flash, awake
    pub fn new() -> Self {
        Self {
            jedec_id: [0xEF, 0x40],
            asleep: false,
            frame: Vec::new(),
        }
    }

    /// Whether the flash is in deep power-down
    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    pub(crate) fn power_cycle(&mut self) {
        self.asleep = false;
        self.frame.clear();
    }

    pub(crate) fn begin(&mut self) {
        self.frame.clear();
    }

    pub(crate) fn exchange(&mut self, byte: u8) -> u8 {
        let index = self.frame.len();
        self.frame.push(byte);
        if self.asleep || index == 0 {
            return 0xFF;
        }
        match self.frame[0] {
            RDID => self.jedec_id.get(index - 1).copied().unwrap_or(0xFF),
            _ => 0xFF,
        }
    }

    pub(crate) fn end(&mut self) {
        // Commands count only when they start on the first byte
        match self.frame.first() {
            Some(&RES) => self.asleep = false,
            Some(&DP) if !self.asleep => self.asleep = true,
            _ => {}
        }
        self.frame.clear();
    }
}
