//! iCE40 NVCM controller model
//!
//! Emulates the configuration port of an iCE40 in SPI slave mode: the knock
//! sequence, program mode, bank selection, the RF trim register, page
//! program, reads and the status word. Programmed bits accumulate like real
//! fuses: a write can only set bits.

use icenvcm_core::bitstream::nvcm_address;
use icenvcm_core::nvcm::opcodes::*;
use icenvcm_core::nvcm::{secure_bits, Bank, NvcmStatus};

/// Physical address space of the emulated main memory
pub const MEMORY_SIZE: usize = 0x14_0000;

/// Emulated iCE40 NVCM
#[derive(Debug, Clone)]
pub struct DummyNvcm {
    memory: Vec<u8>,
    trim: [u64; 4],
    rf_trim: u64,
    signature: [u64; 2],

    spi_mode: bool,
    unlocked: bool,
    program_mode: bool,
    bank: u8,

    busy_polls: u32,
    busy_remaining: u32,
    stuck_busy: bool,
    trim_protected: bool,
    fault: bool,

    frame: Vec<u8>,
    status_polls: u64,
    page_writes: u64,
}

impl Default for DummyNvcm {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyNvcm {
    /// Blank ICE40UP5K
    pub fn new() -> Self {
        Self {
            memory: vec![0; MEMORY_SIZE],
            trim: [0; 4],
            rf_trim: 0,
            signature: [0x2000_0000_0000_0000, 0x0000_0000_1234_5678],
            spi_mode: false,
            unlocked: false,
            program_mode: false,
            bank: Bank::Nvcm as u8,
            busy_polls: 0,
            busy_remaining: 0,
            stuck_busy: false,
            trim_protected: false,
            fault: false,
            frame: Vec::new(),
            status_polls: 0,
            page_writes: 0,
        }
    }

    /// Report busy for `polls` status reads after every command
    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    /// Keep the busy bit set forever
    pub fn set_stuck_busy(&mut self, stuck: bool) {
        self.stuck_busy = stuck;
    }

    /// Silently drop trim row writes, as on a worn out trim bank
    pub fn set_trim_protected(&mut self, protected: bool) {
        self.trim_protected = protected;
    }

    /// Set the silicon signature words
    pub fn set_signature(&mut self, signature: [u64; 2]) {
        self.signature = signature;
    }

    /// Program a byte of main memory at a physical address
    pub fn burn(&mut self, address: usize, value: u8) {
        self.memory[address] |= value;
    }

    /// Program a trim row directly
    pub fn burn_trim(&mut self, row: u32, value: u64) {
        if let Some(slot) = trim_slot(row) {
            self.trim[slot] |= value;
        }
    }

    /// Main memory at physical addresses
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Main memory in bitstream order, `len` bytes from the preamble
    ///
    /// Offsets outside the emulated memory read as zero.
    pub fn image(&self, len: usize) -> Vec<u8> {
        (0..len)
            .map(|offset| {
                nvcm_address(offset)
                    .and_then(|address| self.memory.get(address as usize))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Trim row contents
    pub fn trim_row(&self, row: u32) -> Option<u64> {
        trim_slot(row).map(|slot| self.trim[slot])
    }

    /// Whether the security bits are set
    pub fn is_secured(&self) -> bool {
        secure_bits(self.trim[0]) != 0
    }

    /// Whether the device boots from NVCM
    pub fn boots_from_nvcm(&self) -> bool {
        self.trim[0] & TRIM_PROGRAM_LOCK == TRIM_PROGRAM_LOCK
    }

    /// Whether the knock sequence has been accepted since reset
    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    /// Number of status reads seen
    pub fn status_polls(&self) -> u64 {
        self.status_polls
    }

    /// Number of accepted page program writes
    pub fn page_writes(&self) -> u64 {
        self.page_writes
    }

    /// Currently selected bank register value
    pub fn bank(&self) -> u8 {
        self.bank
    }

    /// CRESET released with chip select low: enter SPI slave mode
    pub(crate) fn enter_spi_mode(&mut self) {
        self.spi_mode = true;
        self.unlocked = false;
        self.program_mode = false;
        self.fault = false;
        self.busy_remaining = 0;
        self.bank = Bank::Nvcm as u8;
    }

    /// CRESET released with chip select high, or power lost
    pub(crate) fn leave_spi_mode(&mut self) {
        self.spi_mode = false;
        self.unlocked = false;
        self.program_mode = false;
    }

    pub(crate) fn begin(&mut self) {
        self.frame.clear();
    }

    /// Shift one byte in, returning the byte shifted out
    pub(crate) fn exchange(&mut self, byte: u8) -> u8 {
        let index = self.frame.len();
        self.frame.push(byte);
        if !self.spi_mode || index == 0 {
            return 0x00;
        }

        match self.frame[0] {
            READ_STATUS if index == 1 => self.status().bits() as u8,
            READ | READ_RF if index >= READ_DATA_OFFSET && self.unlocked => {
                let address = frame_address(&self.frame).unwrap_or(0) as usize;
                self.read_byte(self.frame[0], address + index - READ_DATA_OFFSET)
            }
            _ => 0x00,
        }
    }

    pub(crate) fn end(&mut self) {
        let frame = std::mem::take(&mut self.frame);
        if !self.spi_mode || frame.is_empty() {
            return;
        }

        if frame[0] == READ_STATUS {
            self.status_polls += 1;
            self.busy_remaining = self.busy_remaining.saturating_sub(1);
            return;
        }

        if frame == KNOCK {
            self.unlocked = true;
            self.start_command();
            return;
        }

        if !self.unlocked {
            return;
        }

        match frame[0] {
            PGM_ENABLE if frame.len() == 1 => self.program_mode = true,
            PGM_DISABLE if frame.len() == 1 => self.program_mode = false,
            BANK_SELECT if frame_address(&frame) == Some(BANK_SELECT_ADDR) => {
                if let Some(&bank) = frame.get(4) {
                    self.bank = bank;
                }
            }
            WRITE_RF if frame.len() >= 12 => {
                self.rf_trim = u64::from_be_bytes(frame[4..12].try_into().unwrap_or([0; 8]));
            }
            PAGE_PROGRAM => self.page_program(&frame),
            READ | READ_RF => return,
            _ => {}
        }
        self.start_command();
    }

    fn start_command(&mut self) {
        self.busy_remaining = self.busy_polls;
    }

    fn status(&self) -> NvcmStatus {
        if self.fault {
            NvcmStatus::WAIT
        } else if self.stuck_busy || self.busy_remaining > 0 {
            NvcmStatus::BUSY
        } else {
            NvcmStatus::empty()
        }
    }

    fn page_program(&mut self, frame: &[u8]) {
        let Some(address) = frame_address(frame) else {
            return;
        };
        let data = &frame[4..];

        if !self.program_mode {
            self.fault = true;
            return;
        }

        match self.bank {
            b if b == Bank::Nvcm as u8 => {
                if self.is_secured() {
                    self.fault = true;
                    return;
                }
                let start = address as usize;
                for (i, byte) in data.iter().enumerate() {
                    if let Some(cell) = self.memory.get_mut(start + i) {
                        *cell |= byte;
                    }
                }
            }
            b if b == Bank::Trim as u8 => {
                let mut row = [0u8; 8];
                for (dst, src) in row.iter_mut().zip(data) {
                    *dst = *src;
                }
                match trim_slot(address) {
                    Some(_) if self.trim_protected => {}
                    Some(slot) => self.trim[slot] |= u64::from_be_bytes(row),
                    None => self.fault = true,
                }
            }
            _ => self.fault = true,
        }
        self.page_writes += 1;
    }

    fn read_byte(&self, cmd: u8, address: usize) -> u8 {
        if cmd == READ_RF {
            // Lock bits of the first trim row show up in the RF register
            let value = self.rf_trim | self.trim[0];
            return value
                .to_be_bytes()
                .get(address.wrapping_sub(RF_TRIM_ADDR as usize))
                .copied()
                .unwrap_or(0);
        }

        match self.bank {
            b if b == Bank::Nvcm as u8 => {
                if self.is_secured() {
                    0x00
                } else {
                    self.memory.get(address).copied().unwrap_or(0)
                }
            }
            b if b == Bank::Trim as u8 => {
                let row = (address & !0x7) as u32;
                trim_slot(row)
                    .map(|slot| self.trim[slot].to_be_bytes()[address & 0x7])
                    .unwrap_or(0)
            }
            b if b == Bank::Sig as u8 => self
                .signature
                .get(address / 8)
                .map(|word| word.to_be_bytes()[address % 8])
                .unwrap_or(0),
            _ => 0x00,
        }
    }
}

fn frame_address(frame: &[u8]) -> Option<u32> {
    match frame.get(1..4) {
        Some(&[a, b, c]) => Some(u32::from_be_bytes([0, a, b, c])),
        _ => None,
    }
}

fn trim_slot(row: u32) -> Option<usize> {
    TRIM_ROWS.iter().position(|&r| r == row)
}
