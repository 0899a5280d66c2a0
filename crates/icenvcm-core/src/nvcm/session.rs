//! NVCM programming session

use alloc::vec::Vec;

use super::info::{secure_bits, NvcmInfo};
use super::opcodes::{self, *};
use super::{
    Bank, NvcmStatus, PinMap, Progress, SessionConfig, SessionState, BLANK_CHECK_LENGTH,
    READ_HEADER,
};
use crate::bitstream::{nvcm_address, NvcmCommand, MAX_LENGTH, ROW_SIZE};
use crate::error::{Error, InvalidArgument, Result};
use crate::transport::{Bridge, ControlTransport};

/// Whether [`NvcmSession::program`] checks for blank memory first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlankCheck {
    /// Check the trim row and the start of main memory; refuse to program
    /// a device that is not blank
    Required,
    /// Program without checking
    ///
    /// NVCM is one-time programmable. Writing over existing contents ORs
    /// the new bits into the old ones and leaves the device unbootable.
    Skip,
}

/// Explicit consent for [`NvcmSession::trim_secure`]
///
/// Securing cannot be undone: afterwards the NVCM can be neither read nor
/// reprogrammed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecureConfirmation(());

impl SecureConfirmation {
    /// Confirm that the device should be permanently locked
    pub fn irreversible() -> Self {
        Self(())
    }
}

/// NVCM programming session on a single target
///
/// Owns the bridge for its whole lifetime. Operations block until their
/// USB transfers finish; there is no way to interrupt `program` safely once
/// rows are being written.
pub struct NvcmSession<C: ControlTransport> {
    bridge: Bridge<C>,
    pins: PinMap,
    config: SessionConfig,
    state: SessionState,
    bank: Option<Bank>,
}

impl<C: ControlTransport> NvcmSession<C> {
    /// Configure the bridge pins with the target powered off
    ///
    /// CRESET is held low so the FPGA stays in reset when power comes up.
    pub fn new(control: C, pins: PinMap, config: SessionConfig) -> Result<Self> {
        pins.validate()?;
        config.validate()?;

        let mut bridge = Bridge::new(control);
        bridge.write_pin(pins.power, false)?;
        bridge.write_pin(pins.creset, false)?;

        bridge.set_direction(pins.cs, true)?;
        bridge.set_direction(pins.mosi, true)?;
        bridge.set_direction(pins.sck, true)?;
        bridge.set_direction(pins.miso, false)?;
        bridge.set_direction(pins.power, true)?;
        bridge.set_direction(pins.creset, true)?;
        bridge.set_direction(pins.cdone, false)?;

        bridge.configure_spi(pins.spi(config.clock_mhz))?;

        log::debug!("NVCM session created with pins {}", pins);
        Ok(Self {
            bridge,
            pins,
            config,
            state: SessionState::Created,
            bank: None,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bank selected by the last bank select, if any
    pub fn current_bank(&self) -> Option<Bank> {
        self.bank
    }

    /// Pin assignment of this session
    pub fn pins(&self) -> &PinMap {
        &self.pins
    }

    /// Settings of this session
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Access the bridge for auxiliary functions (ADC, bootloader)
    pub fn bridge_mut(&mut self) -> &mut Bridge<C> {
        &mut self.bridge
    }

    /// End the session and release the bridge
    pub fn into_bridge(self) -> Bridge<C> {
        self.bridge
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::debug!("NVCM session: {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn require(&self, operation: &'static str, ok: bool) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn require_nvcm(&self, operation: &'static str) -> Result<()> {
        self.require(operation, self.state.nvcm_enabled())
    }

    // ------------------------------------------------------------------
    // Power and reset
    // ------------------------------------------------------------------

    /// Switch the target board supply on
    pub fn power_on(&mut self) -> Result<()> {
        self.require("power on", self.state == SessionState::Created)?;
        self.bridge.write_pin(self.pins.power, true)?;
        self.set_state(SessionState::PoweredOn);
        Ok(())
    }

    /// Switch the target board supply off
    pub fn power_off(&mut self) -> Result<()> {
        self.bridge.write_pin(self.pins.power, false)?;
        self.bridge.flush()?;
        self.bank = None;
        self.set_state(SessionState::Created);
        Ok(())
    }

    fn enable(&mut self, cs: bool, reset: bool) -> Result<()> {
        self.bridge.write_pin(self.pins.cs, cs)?;
        self.bridge.write_pin(self.pins.creset, reset)
    }

    fn sleep_ms(&mut self, ms: u32) -> Result<()> {
        // Delays only mean something once the pin writes have landed
        self.bridge.flush()?;
        self.bridge.delay_us(ms * 1000);
        Ok(())
    }

    /// Reset the FPGA into SPI slave mode
    ///
    /// Releasing CRESET while chip select is low makes the iCE40 sample
    /// SPI slave mode. Success only shows in later commands.
    pub fn init(&mut self) -> Result<()> {
        self.require("initialize", self.state.powered())?;
        log::debug!("Resetting FPGA into SPI slave mode");

        self.enable(true, true)?;
        self.enable(true, false)?;
        self.sleep_ms(150)?;

        self.enable(false, false)?;
        self.sleep_ms(120)?;
        self.enable(false, true)?;
        self.sleep_ms(120)?;
        self.enable(true, true)?;
        self.sleep_ms(120)?;

        self.bank = None;
        self.set_state(SessionState::Initialized);
        Ok(())
    }

    /// Pulse CRESET so the FPGA boots from its configured source
    ///
    /// Returns the CDONE level afterwards. NVCM access is gone once the
    /// FPGA has booted; call [`init`](Self::init) again to get it back.
    pub fn boot(&mut self) -> Result<bool> {
        self.require("boot", self.state.powered())?;
        log::info!("Booting FPGA");

        self.enable(true, false)?;
        self.sleep_ms(500)?;
        self.enable(true, true)?;
        self.bank = None;
        self.set_state(SessionState::PoweredOn);

        let done = self.config_done()?;
        if done {
            log::info!("CDONE high, FPGA configured");
        } else {
            log::warn!("CDONE low, FPGA did not configure");
        }
        Ok(done)
    }

    /// Read the CDONE pin
    pub fn config_done(&mut self) -> Result<bool> {
        self.bridge.read_pin(self.pins.cdone)
    }

    // ------------------------------------------------------------------
    // Command primitives
    // ------------------------------------------------------------------

    fn xfer(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        log::trace!("TX {:02x?}", data);
        let rx = self.bridge.spi_transceive(data, true)?;
        log::trace!("RX {:02x?}", rx);
        Ok(rx)
    }

    /// Run `count` clock cycles without chip select
    fn tck(&mut self, count: usize) -> Result<()> {
        self.bridge.spi_clock_out((count >> 3) * 2)
    }

    fn read_status(&mut self) -> Result<u16> {
        let rx = self
            .bridge
            .spi_transceive(&[opcodes::READ_STATUS, 0x00], true)?;
        Ok(u16::from_be_bytes([
            rx.first().copied().unwrap_or(0xFF),
            rx.get(1).copied().unwrap_or(0xFF),
        ]))
    }

    /// Poll the status word until the controller is ready
    ///
    /// Each poll is preceded by a burst of clock cycles. Fails with
    /// [`Error::StatusTimeout`] after the configured number of polls.
    pub fn status_wait(&mut self) -> Result<()> {
        self.require(
            "poll status",
            self.state == SessionState::Initialized || self.state.nvcm_enabled(),
        )?;

        let mut status = 0;
        for _ in 0..self.config.status_poll_limit {
            self.tck(self.config.status_poll_clocks)?;
            status = self.read_status()?;
            if NvcmStatus::from_bits_retain(status).is_ready() {
                return Ok(());
            }
        }

        log::debug!("NVCM status stuck at 0x{:04x}", status);
        Err(Error::StatusTimeout {
            polls: self.config.status_poll_limit,
            status,
        })
    }

    /// Send a command frame and wait for the controller
    fn command(&mut self, data: &[u8]) -> Result<()> {
        self.xfer(data)?;
        self.status_wait()?;
        self.tck(POST_COMMAND_CLOCKS)
    }

    fn write_unchecked(&mut self, cmd: u8, address: u32, data: &[u8]) -> Result<()> {
        let frame = NvcmCommand::with_address(cmd, address, data);
        self.xfer(frame.as_bytes())?;

        match self.status_wait() {
            Err(Error::StatusTimeout { .. }) => return Err(Error::WriteFailed { cmd, address }),
            other => other?,
        }

        self.tck(POST_COMMAND_CLOCKS)
    }

    /// Addressed write followed by a status wait
    ///
    /// A status timeout is reported as [`Error::WriteFailed`] with the
    /// command and address.
    pub fn write(&mut self, cmd: u8, address: u32, data: &[u8]) -> Result<()> {
        self.require_nvcm("write")?;
        self.write_unchecked(cmd, address, data)
    }

    fn read_frame(&mut self, cmd: u8, address: u32, len: usize) -> Result<Vec<u8>> {
        let mut frame = NvcmCommand::with_address(cmd, address, &[]).as_bytes().to_vec();
        frame.resize(READ_DATA_OFFSET + len, 0);
        let mut rx = self.xfer(&frame)?;
        Ok(rx.split_off(READ_DATA_OFFSET.min(rx.len())))
    }

    /// Read `len` bytes from the selected bank
    pub fn read_bytes(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.require_nvcm("read")?;
        self.read_frame(opcodes::READ, address, len)
    }

    fn read_u64(&mut self, cmd: u8, address: u32) -> Result<u64> {
        let data = self.read_frame(cmd, address, ROW_SIZE)?;
        let mut word = [0u8; ROW_SIZE];
        for (dst, src) in word.iter_mut().zip(&data) {
            *dst = *src;
        }
        Ok(u64::from_be_bytes(word))
    }

    // ------------------------------------------------------------------
    // Access and banks
    // ------------------------------------------------------------------

    fn knock(&mut self) -> Result<()> {
        self.command(&KNOCK)
    }

    fn write_trim(&mut self, value: u64) -> Result<()> {
        self.write_unchecked(WRITE_RF, RF_TRIM_ADDR, &value.to_be_bytes())
    }

    /// Unlock NVCM access and arm the trim registers for reading
    ///
    /// Allowed exactly once after each [`init`](Self::init).
    pub fn nvcm_enable(&mut self) -> Result<()> {
        self.require("enable NVCM", self.state == SessionState::Initialized)?;
        log::debug!("Enabling NVCM access");

        self.knock()?;
        self.write_trim(RF_TRIM_READ)?;

        self.set_state(SessionState::NvcmEnabled);
        Ok(())
    }

    /// Select the bank addressed by subsequent reads and writes
    ///
    /// Always sends the select, even if the bank appears unchanged.
    pub fn bank_select(&mut self, bank: Bank) -> Result<()> {
        self.require_nvcm("select bank")?;
        log::debug!("Selecting {} bank", bank);
        self.write_unchecked(BANK_SELECT, BANK_SELECT_ADDR, &[bank as u8])?;
        self.bank = Some(bank);
        Ok(())
    }

    fn pgm_enable(&mut self) -> Result<()> {
        self.command(&[PGM_ENABLE])
    }

    fn pgm_disable(&mut self) -> Result<()> {
        self.command(&[PGM_DISABLE])
    }

    /// Read the RF trim register
    ///
    /// Leaves the `nvcm` bank selected.
    pub fn read_trim(&mut self) -> Result<u64> {
        self.require_nvcm("read RF trim")?;
        self.knock()?;
        let value = self.read_u64(READ_RF, RF_TRIM_ADDR)?;
        self.tck(POST_COMMAND_CLOCKS)?;
        self.bank_select(Bank::Nvcm)?;
        log::debug!("RF trim register {:016x}", value);
        Ok(value)
    }

    /// Read signature, RF trim and trim rows
    pub fn info(&mut self) -> Result<NvcmInfo> {
        self.require_nvcm("read device info")?;

        let mut signature = [0u64; 2];
        for (word, address) in signature.iter_mut().zip(SIGNATURE_ADDRS) {
            self.bank_select(Bank::Sig)?;
            *word = self.read_u64(READ, address)?;
        }

        self.bank_select(Bank::Nvcm)?;
        let rf_trim = self.read_trim()?;

        let mut trim = [0u64; 4];
        for (word, row) in trim.iter_mut().zip(TRIM_ROWS) {
            self.bank_select(Bank::Trim)?;
            *word = self.read_u64(READ, row)?;
        }
        self.bank_select(Bank::Nvcm)?;

        Ok(NvcmInfo {
            signature,
            rf_trim,
            trim,
        })
    }

    // ------------------------------------------------------------------
    // Blank check and programming
    // ------------------------------------------------------------------

    /// Check that the boot trim row has never been written
    pub fn trim_blank_check(&mut self) -> Result<()> {
        self.require_nvcm("blank check trim")?;
        log::info!("NVCM Trim_Parameter_OTP blank check");

        let row = TRIM_ROWS[0];
        self.bank_select(Bank::Trim)?;
        let data = self.read_frame(READ, row, 1)?;
        self.bank_select(Bank::Nvcm)?;

        match data.first().copied() {
            Some(0) => Ok(()),
            found => Err(Error::BlankCheckFailed {
                bank: Bank::Trim,
                offset: row,
                found: found.unwrap_or(0xFF),
            }),
        }
    }

    /// Check that the first `total` bytes of main memory are zero
    pub fn blank_check(&mut self, total: usize) -> Result<()> {
        self.require_nvcm("blank check")?;
        log::info!("NVCM main memory blank check");

        self.bank_select(Bank::Nvcm)?;
        let contents = self.read_frame(READ, 0, total)?;
        self.bank_select(Bank::Nvcm)?;

        let mut dirty = contents
            .iter()
            .enumerate()
            .filter(|(_, byte)| **byte != 0);
        if let Some((offset, &found)) = dirty.next() {
            let remaining = dirty.count();
            log::error!(
                "NVCM main memory is not blank: 0x{:08x} = 0x{:02x} and {} more",
                offset,
                found,
                remaining
            );
            return Err(Error::BlankCheckFailed {
                bank: Bank::Nvcm,
                offset: offset as u32,
                found,
            });
        }

        self.set_state(SessionState::BlankChecked);
        Ok(())
    }

    /// Write a converted bitstream into main memory
    ///
    /// With [`BlankCheck::Required`] the trim row and the first
    /// [`BLANK_CHECK_LENGTH`] bytes are checked first. Any failed command
    /// aborts programming; rows written up to that point stay written.
    pub fn program(
        &mut self,
        commands: &[NvcmCommand],
        blank_check: BlankCheck,
        progress: &mut dyn Progress,
    ) -> Result<()> {
        self.require_nvcm("program")?;

        match blank_check {
            BlankCheck::Required => {
                self.trim_blank_check()?;
                self.blank_check(BLANK_CHECK_LENGTH)?;
            }
            BlankCheck::Skip => log::warn!("Skipping blank check"),
        }

        log::info!("NVCM Program main memory");
        self.bank_select(Bank::Nvcm)?;
        self.write_trim(RF_TRIM_PROGRAM)?;
        self.pgm_enable()?;

        let total = commands.len() * ROW_SIZE;
        progress.programming(total);
        for (i, cmd) in commands.iter().enumerate() {
            match self.command(cmd.as_bytes()) {
                Err(Error::StatusTimeout { .. }) => {
                    log::error!("Programming failed at command {}: {}", i, cmd);
                    return Err(Error::WriteFailed {
                        cmd: cmd.opcode(),
                        address: cmd.address().unwrap_or(0),
                    });
                }
                other => other?,
            }
            progress.program_progress((i + 1) * ROW_SIZE);
        }

        self.pgm_disable()?;
        progress.complete();

        self.set_state(SessionState::Programmed);
        Ok(())
    }

    fn write_trim_pages(&mut self, lock_bits: u64) -> Result<()> {
        self.bank_select(Bank::Nvcm)?;
        self.write_trim(RF_TRIM_PROGRAM)?;
        self.bank_select(Bank::Trim)?;
        self.pgm_enable()?;

        for row in TRIM_ROWS {
            self.write_unchecked(PAGE_PROGRAM, row, &lock_bits.to_be_bytes())?;
        }

        self.pgm_disable()?;

        let mut last = 0;
        for row in TRIM_ROWS {
            self.bank_select(Bank::Trim)?;
            let found = self.read_u64(READ, row)?;
            if found & lock_bits != lock_bits {
                self.bank_select(Bank::Nvcm)?;
                return Err(Error::WriteVerificationFailed {
                    row,
                    expected: lock_bits,
                    found,
                });
            }
            last = found;
        }
        self.bank_select(Bank::Nvcm)?;

        log::info!("New state {:016x}", last);
        Ok(())
    }

    /// Set the trim rows to boot from NVCM
    pub fn trim_program(&mut self) -> Result<()> {
        self.require_nvcm("program trim")?;
        log::info!("NVCM Program Trim_Parameter_OTP");
        self.write_trim_pages(TRIM_PROGRAM_LOCK)?;
        self.set_state(SessionState::Programmed);
        Ok(())
    }

    /// Set the security lock bits
    ///
    /// This cannot be undone.
    pub fn trim_secure(&mut self, _confirm: SecureConfirmation) -> Result<()> {
        self.require_nvcm("secure")?;
        log::info!("NVCM Secure");

        let trim = self.read_trim()?;
        if secure_bits(trim) != 0 {
            log::warn!("NVCM already secure? trim={:016x}", trim);
        }

        self.write_trim_pages(TRIM_SECURE_LOCK)?;
        self.set_state(SessionState::Secured);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read-out and verification
    // ------------------------------------------------------------------

    /// Read `length` bytes of main memory in bitstream order
    ///
    /// Rows are read one at a time at their physical address; the result
    /// is rounded up to whole rows. Lengths past [`MAX_LENGTH`] are
    /// rejected before any bridge traffic.
    pub fn read_nvcm(&mut self, length: usize, progress: &mut dyn Progress) -> Result<Vec<u8>> {
        if length > MAX_LENGTH {
            return Err(InvalidArgument::LengthTooLarge { len: length }.into());
        }
        self.require_nvcm("read NVCM")?;

        self.bank_select(Bank::Nvcm)?;

        let total = length.div_ceil(ROW_SIZE) * ROW_SIZE;
        let mut contents = Vec::with_capacity(total);
        progress.reading(total);
        for offset in (0..total).step_by(ROW_SIZE) {
            let address =
                nvcm_address(offset).ok_or(InvalidArgument::LengthTooLarge { len: length })?;
            let row = self.read_frame(READ, address, ROW_SIZE)?;
            contents.extend_from_slice(&row);
            self.tck(POST_COMMAND_CLOCKS)?;
            progress.read_progress(offset + ROW_SIZE);
        }
        progress.complete();

        Ok(contents)
    }

    /// Read main memory as an image file: header followed by the contents
    pub fn read_image(&mut self, length: usize, progress: &mut dyn Progress) -> Result<Vec<u8>> {
        let contents = self.read_nvcm(length, progress)?;
        let mut image = Vec::with_capacity(READ_HEADER.len() + contents.len());
        image.extend_from_slice(&READ_HEADER);
        image.extend_from_slice(&contents);
        Ok(image)
    }

    /// Compare main memory against an image file
    ///
    /// The reference is in the [`read_image`](Self::read_image) format.
    /// Fails with [`Error::VerifyMismatch`] at the first differing byte.
    pub fn verify(&mut self, reference: &[u8], progress: &mut dyn Progress) -> Result<()> {
        self.require_nvcm("verify")?;
        if reference.is_empty() {
            return Err(InvalidArgument::EmptyReference.into());
        }

        let mut image = self.read_image(reference.len(), progress)?;
        image.truncate(reference.len());

        if let Some((offset, (&expected, &found))) = reference
            .iter()
            .zip(&image)
            .enumerate()
            .find(|(_, (a, b))| a != b)
        {
            return Err(Error::VerifyMismatch {
                offset,
                expected,
                found,
            });
        }
        log::info!("Verified {} bytes", reference.len());
        self.set_state(SessionState::Verified);
        Ok(())
    }
}
