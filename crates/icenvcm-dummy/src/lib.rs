//! icenvcm-dummy - In-memory bridge and iCE40 emulator for testing
//!
//! [`DummyBridge`] implements [`ControlTransport`] by emulating the bridge
//! firmware: GPIO state, SPI framing with chip select, clock-out, the ADC
//! and the bootloader request. Behind the emulated bus sit an iCE40 NVCM
//! controller ([`DummyNvcm`]) and the board's SPI flash ([`DummySpiFlash`]).
//! Which of the two answers depends on the SPI pin mapping: the flash is
//! reached with MOSI and MISO swapped, as on the real board.
//!
//! The emulator follows the target's reset behavior: releasing CRESET while
//! chip select is low puts the FPGA into SPI slave mode, releasing it while
//! chip select is high boots it.

mod flash;
mod nvcm;

pub use flash::DummySpiFlash;
pub use nvcm::{DummyNvcm, MEMORY_SIZE};

use std::time::Duration;

use icenvcm_core::error::{Error, Result, TransferError, TransferKind};
use icenvcm_core::nvcm::PinMap;
use icenvcm_core::transport::{
    read_u32_be, ControlTransport, RequestCode, SpiPins, PIN_COUNT, SPI_MAX_TRANSFER_SIZE,
    SPI_XFER_HEADER_LEN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Fpga,
    Flash,
}

/// Emulated bridge with an iCE40 board attached
pub struct DummyBridge {
    pins: PinMap,
    direction: u32,
    values: u32,
    pull_up: u32,
    pull_down: u32,
    spi: Option<SpiPins>,
    spi_in: Vec<u8>,
    transaction: Option<Target>,
    cdone: bool,
    adc: [u32; 3],
    disconnected: bool,

    nvcm: DummyNvcm,
    flash: DummySpiFlash,

    requests: Vec<u8>,
    clock_bytes: u64,
    elapsed_us: u64,
}

impl DummyBridge {
    /// Bridge wired as `pins` to a blank device
    pub fn new(pins: PinMap) -> Self {
        Self::with_nvcm(pins, DummyNvcm::new())
    }

    /// Bridge wired as `pins` to the given device
    pub fn with_nvcm(pins: PinMap, nvcm: DummyNvcm) -> Self {
        Self {
            pins,
            direction: 0,
            values: 0,
            pull_up: 0,
            pull_down: 0,
            spi: None,
            spi_in: Vec::new(),
            transaction: None,
            cdone: false,
            adc: [3_300_000, 5_000_000, 1_200_000],
            disconnected: false,
            nvcm,
            flash: DummySpiFlash::new(),
            requests: Vec::new(),
            clock_bytes: 0,
            elapsed_us: 0,
        }
    }

    /// Emulated NVCM
    pub fn nvcm(&self) -> &DummyNvcm {
        &self.nvcm
    }

    /// Mutable access to the emulated NVCM
    pub fn nvcm_mut(&mut self) -> &mut DummyNvcm {
        &mut self.nvcm
    }

    /// Emulated SPI flash
    pub fn flash(&self) -> &DummySpiFlash {
        &self.flash
    }

    /// Set the ADC readings in microvolts
    pub fn set_adc(&mut self, adc: [u32; 3]) {
        self.adc = adc;
    }

    /// Output level driven on a pin
    pub fn pin_level(&self, pin: u8) -> bool {
        self.values & (1 << pin) != 0
    }

    /// Whether a pin is configured as output
    pub fn is_output(&self, pin: u8) -> bool {
        self.direction & (1 << pin) != 0
    }

    /// Pull-up and pull-down state of a pin
    pub fn pulls(&self, pin: u8) -> (bool, bool) {
        (
            self.pull_up & (1 << pin) != 0,
            self.pull_down & (1 << pin) != 0,
        )
    }

    /// Whether the bridge has left for its bootloader
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Request codes received so far
    pub fn requests(&self) -> &[u8] {
        &self.requests
    }

    /// Total bytes worth of clocks issued with clock-out requests
    pub fn clock_bytes(&self) -> u64 {
        self.clock_bytes
    }

    /// Total time spent in delays
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.elapsed_us)
    }

    fn powered(&self) -> bool {
        self.pin_level(self.pins.power)
    }

    fn stall(request: u8) -> Error {
        TransferError::new(request, TransferKind::Stall).into()
    }

    fn set_values(&mut self, mask: u32, values: u32) {
        let old = self.values;
        self.values = (old & !mask) | (values & mask);
        let rose = |pin: u8| old & (1 << pin) == 0 && self.values & (1 << pin) != 0;
        let fell = |pin: u8| old & (1 << pin) != 0 && self.values & (1 << pin) == 0;

        let power_off = fell(self.pins.power);
        let cs_high = rose(self.pins.cs);
        let reset_released = rose(self.pins.creset);
        let reset_asserted = fell(self.pins.creset);

        if power_off {
            self.end_transaction();
            self.nvcm.leave_spi_mode();
            self.flash.power_cycle();
            self.cdone = false;
        }
        if cs_high {
            self.end_transaction();
        }
        if reset_asserted {
            self.nvcm.leave_spi_mode();
            self.cdone = false;
        }
        if reset_released && self.powered() {
            if self.pin_level(self.pins.cs) {
                self.nvcm.leave_spi_mode();
                self.cdone = self.nvcm.boots_from_nvcm();
            } else {
                self.nvcm.enter_spi_mode();
            }
        }
    }

    fn target(&self) -> Option<Target> {
        let spi = self.spi?;
        if !self.powered() {
            return None;
        }
        if spi.mosi == self.pins.miso && spi.miso == self.pins.mosi {
            Some(Target::Flash)
        } else {
            Some(Target::Fpga)
        }
    }

    fn begin_transaction(&mut self, target: Target) {
        match target {
            Target::Fpga => self.nvcm.begin(),
            Target::Flash => self.flash.begin(),
        }
        self.transaction = Some(target);
    }

    fn end_transaction(&mut self) {
        match self.transaction.take() {
            Some(Target::Fpga) => self.nvcm.end(),
            Some(Target::Flash) => self.flash.end(),
            None => {}
        }
    }

    fn spi_xfer(&mut self, toggle_cs: bool, data: &[u8]) -> Vec<u8> {
        let Some(target) = self.target() else {
            return vec![0xFF; data.len()];
        };
        let cs = self.spi.map(|spi| spi.cs).unwrap_or(self.pins.cs);

        if toggle_cs {
            self.end_transaction();
            self.begin_transaction(target);
        } else if self.transaction.is_none() {
            if self.pin_level(cs) {
                // Chip select high: nobody is listening
                return vec![0xFF; data.len()];
            }
            self.begin_transaction(target);
        }

        let rx = data
            .iter()
            .map(|&byte| match target {
                Target::Fpga => self.nvcm.exchange(byte),
                Target::Flash => self.flash.exchange(byte),
            })
            .collect();

        if toggle_cs {
            self.end_transaction();
        }
        rx
    }
}

impl ControlTransport for DummyBridge {
    fn control_out(&mut self, request: u8, data: &[u8], _timeout: Duration) -> Result<()> {
        if self.disconnected {
            return Err(TransferError::new(request, TransferKind::Disconnected).into());
        }
        self.requests.push(request);

        let word = |i: usize| read_u32_be(data.get(i * 4..).unwrap_or(&[]));
        match RequestCode::from_u8(request) {
            Some(RequestCode::PinDirection) => {
                let (mask, outputs) = word(0).zip(word(1)).ok_or(Self::stall(request))?;
                self.direction = (self.direction & !mask) | (outputs & mask);
            }
            Some(RequestCode::Pullups) => {
                let mask = word(0).ok_or(Self::stall(request))?;
                let up = word(1).ok_or(Self::stall(request))?;
                let down = word(2).ok_or(Self::stall(request))?;
                self.pull_up = (self.pull_up & !mask) | (up & mask);
                self.pull_down = (self.pull_down & !mask) | (down & mask);
            }
            Some(RequestCode::PinValues) => {
                let (mask, values) = word(0).zip(word(1)).ok_or(Self::stall(request))?;
                self.set_values(mask, values);
            }
            Some(RequestCode::SpiConfigure) => {
                let &[sck, cs, mosi, miso, clock_mhz] = data else {
                    return Err(Self::stall(request));
                };
                if [sck, cs, mosi, miso].iter().any(|&pin| pin >= PIN_COUNT) || clock_mhz == 0 {
                    return Err(Self::stall(request));
                }
                self.end_transaction();
                self.spi = Some(SpiPins {
                    sck,
                    cs,
                    mosi,
                    miso,
                    clock_mhz,
                });
            }
            Some(RequestCode::SpiXfer) => {
                if self.spi.is_none() || data.len() < SPI_XFER_HEADER_LEN {
                    return Err(Self::stall(request));
                }
                let toggle_cs = data[0] != 0;
                let len = read_u32_be(&data[1..]).ok_or(Self::stall(request))? as usize;
                let payload = &data[SPI_XFER_HEADER_LEN..];
                if len != payload.len() || len > SPI_MAX_TRANSFER_SIZE {
                    return Err(Self::stall(request));
                }
                self.spi_in = self.spi_xfer(toggle_cs, payload);
            }
            Some(RequestCode::SpiClockOut) => {
                let count = word(0).ok_or(Self::stall(request))?;
                if self.spi.is_none() || count as usize > SPI_MAX_TRANSFER_SIZE {
                    return Err(Self::stall(request));
                }
                self.clock_bytes += u64::from(count);
            }
            Some(RequestCode::Bootloader) => {
                log::debug!("Dummy bridge rebooting into bootloader");
                self.disconnected = true;
                return Err(TransferError::new(request, TransferKind::Disconnected).into());
            }
            Some(RequestCode::AdcRead) | None => return Err(Self::stall(request)),
        }
        Ok(())
    }

    fn control_in(&mut self, request: u8, length: usize, _timeout: Duration) -> Result<Vec<u8>> {
        if self.disconnected {
            return Err(TransferError::new(request, TransferKind::Disconnected).into());
        }
        self.requests.push(request);

        let mut data = match RequestCode::from_u8(request) {
            Some(RequestCode::PinValues) => {
                let mut levels = self.values & self.direction;
                if self.cdone && !self.is_output(self.pins.cdone) {
                    levels |= 1 << self.pins.cdone;
                }
                levels.to_be_bytes().to_vec()
            }
            Some(RequestCode::SpiXfer) => self.spi_in.clone(),
            Some(RequestCode::AdcRead) => self.adc.iter().flat_map(|v| v.to_be_bytes()).collect(),
            _ => return Err(Self::stall(request)),
        };
        data.truncate(length);
        Ok(data)
    }

    fn delay_us(&mut self, us: u32) {
        self.elapsed_us += u64::from(us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icenvcm_core::bitstream::{self, MAX_LENGTH, PREAMBLE};
    use icenvcm_core::flash_sleep::sleep_flash;
    use icenvcm_core::nvcm::opcodes::{TRIM_PROGRAM_LOCK, TRIM_ROWS, TRIM_SECURE_LOCK};
    use icenvcm_core::nvcm::{
        Bank, BlankCheck, NoProgress, NvcmSession, SecureConfirmation, SessionConfig,
        SessionState, READ_HEADER,
    };
    use icenvcm_core::Bridge;

    fn enabled_session(nvcm: DummyNvcm, config: SessionConfig) -> NvcmSession<DummyBridge> {
        let pins = PinMap::default();
        let bridge = DummyBridge::with_nvcm(pins, nvcm);
        let mut session = NvcmSession::new(bridge, pins, config).unwrap();
        session.power_on().unwrap();
        session.init().unwrap();
        session.nvcm_enable().unwrap();
        session
    }

    fn session() -> NvcmSession<DummyBridge> {
        enabled_session(DummyNvcm::new(), SessionConfig::default())
    }

    fn dummy(session: &mut NvcmSession<DummyBridge>) -> &mut DummyBridge {
        session.bridge_mut().control_mut()
    }

    /// Bitstream with a vendor header, zero rows and a partial last row
    fn test_bitstream() -> (Vec<u8>, Vec<u8>) {
        let mut payload = PREAMBLE.to_vec();
        payload.extend_from_slice(&[0x01, 0x0E, 0x00, 0x00]);
        for i in 0..3000u32 {
            let byte = if (i / 64) % 3 == 0 {
                0
            } else {
                (i.wrapping_mul(37) ^ (i >> 3)) as u8
            };
            payload.push(byte);
        }
        payload.extend_from_slice(&[0xAA, 0x55, 0x01]);

        let mut file = vec![0xFF, 0x00, 0x00, 0xFF, 0x12, 0x34];
        file.extend_from_slice(&payload);
        (file, payload)
    }

    #[test]
    fn test_session_unlocks_device() {
        let mut session = session();
        assert_eq!(session.state(), SessionState::NvcmEnabled);
        assert!(dummy(&mut session).nvcm().is_unlocked());
        assert!(dummy(&mut session).elapsed() >= Duration::from_millis(510));
    }

    #[test]
    fn test_status_wait_ready_on_first_poll() {
        let mut session = session();
        let before = dummy(&mut session).nvcm().status_polls();
        session.status_wait().unwrap();
        assert_eq!(dummy(&mut session).nvcm().status_polls(), before + 1);
    }

    #[test]
    fn test_status_wait_retries_while_busy() {
        let mut session = enabled_session(
            DummyNvcm::new().with_busy_polls(3),
            SessionConfig::default(),
        );
        session.bank_select(Bank::Trim).unwrap();
        assert_eq!(dummy(&mut session).nvcm().bank(), Bank::Trim as u8);
    }

    #[test]
    fn test_status_wait_timeout() {
        let mut session = session();
        dummy(&mut session).nvcm_mut().set_stuck_busy(true);
        let before = dummy(&mut session).nvcm().status_polls();

        assert_eq!(
            session.status_wait(),
            Err(Error::StatusTimeout {
                polls: 1000,
                status: 0x0001
            })
        );
        assert_eq!(dummy(&mut session).nvcm().status_polls(), before + 1000);
    }

    #[test]
    fn test_write_timeout_reports_command() {
        let mut session = session();
        dummy(&mut session).nvcm_mut().set_stuck_busy(true);
        assert_eq!(
            session.bank_select(Bank::Sig),
            Err(Error::WriteFailed {
                cmd: 0x83,
                address: 0x25
            })
        );
    }

    #[test]
    fn test_program_writes_bitstream() {
        let (file, payload) = test_bitstream();
        let commands = bitstream::convert(&file).unwrap();

        let mut session = session();
        session
            .program(&commands, BlankCheck::Required, &mut NoProgress)
            .unwrap();
        assert_eq!(session.state(), SessionState::Programmed);

        let nvcm = dummy(&mut session).nvcm();
        assert_eq!(nvcm.image(payload.len()), payload);
        assert_eq!(nvcm.page_writes() as usize, bitstream::row_count(&commands));
        // Nothing lands outside the mapped blocks
        let written: usize = nvcm.memory().iter().filter(|b| **b != 0).count();
        let expected: usize = payload.iter().filter(|b| **b != 0).count();
        assert_eq!(written, expected);
    }

    #[test]
    fn test_read_back_and_verify() {
        let (file, payload) = test_bitstream();
        let commands = bitstream::convert(&file).unwrap();
        let mut session = session();
        session
            .program(&commands, BlankCheck::Required, &mut NoProgress)
            .unwrap();

        let image = session.read_image(payload.len(), &mut NoProgress).unwrap();
        assert_eq!(&image[..4], &READ_HEADER);
        assert_eq!(image.len(), 4 + payload.len().div_ceil(8) * 8);
        assert_eq!(&image[4..4 + payload.len()], &payload[..]);

        let mut reference = READ_HEADER.to_vec();
        reference.extend_from_slice(&payload);

        let writes = dummy(&mut session).nvcm().page_writes();
        session.verify(&reference, &mut NoProgress).unwrap();
        assert_eq!(session.state(), SessionState::Verified);
        assert_eq!(dummy(&mut session).nvcm().page_writes(), writes);
        assert_eq!(dummy(&mut session).nvcm().image(payload.len()), payload);

        reference[100] ^= 0x10;
        assert_eq!(
            session.verify(&reference, &mut NoProgress),
            Err(Error::VerifyMismatch {
                offset: 100,
                expected: payload[96] ^ 0x10,
                found: payload[96],
            })
        );
    }

    #[test]
    fn test_verify_empty_reference() {
        let mut session = session();
        assert_eq!(
            session.verify(&[], &mut NoProgress),
            Err(Error::InvalidArgument(
                icenvcm_core::error::InvalidArgument::EmptyReference
            ))
        );
    }

    #[test]
    fn test_read_rounds_up_to_rows() {
        let mut session = session();
        dummy(&mut session).nvcm_mut().burn(4096 + 1, 0x42);
        let data = session.read_nvcm(330, &mut NoProgress).unwrap();
        assert_eq!(data.len(), 336);
        assert_eq!(data[329], 0x42);
        assert!(data.iter().enumerate().all(|(i, b)| i == 329 || *b == 0));
    }

    #[test]
    fn test_read_length_past_address_space() {
        let mut session = session();
        let before = dummy(&mut session).requests().len();
        for len in [MAX_LENGTH + 1, 328 << 21, usize::MAX] {
            assert_eq!(
                session.read_nvcm(len, &mut NoProgress),
                Err(Error::InvalidArgument(
                    icenvcm_core::error::InvalidArgument::LengthTooLarge { len }
                ))
            );
        }
        assert_eq!(dummy(&mut session).requests().len(), before);
    }

    #[test]
    fn test_blank_check_rejects_used_memory() {
        let mut nvcm = DummyNvcm::new();
        nvcm.burn(0x10, 0x80);
        let mut session = enabled_session(nvcm, SessionConfig::default());

        let (file, _) = test_bitstream();
        let commands = bitstream::convert(&file).unwrap();
        assert_eq!(
            session.program(&commands, BlankCheck::Required, &mut NoProgress),
            Err(Error::BlankCheckFailed {
                bank: Bank::Nvcm,
                offset: 0x10,
                found: 0x80
            })
        );
        assert_eq!(dummy(&mut session).nvcm().page_writes(), 0);

        // Skipping the check programs over the old contents
        session
            .program(&commands, BlankCheck::Skip, &mut NoProgress)
            .unwrap();
        assert_eq!(dummy(&mut session).nvcm().memory()[0x10] & 0x80, 0x80);
    }

    #[test]
    fn test_blank_check_rejects_used_trim() {
        let mut nvcm = DummyNvcm::new();
        nvcm.burn_trim(0x20, TRIM_SECURE_LOCK);
        let mut session = enabled_session(nvcm, SessionConfig::default());

        assert_eq!(
            session.trim_blank_check(),
            Err(Error::BlankCheckFailed {
                bank: Bank::Trim,
                offset: 0x20,
                found: 0x30
            })
        );
        assert_eq!(session.current_bank(), Some(Bank::Nvcm));
    }

    #[test]
    fn test_blank_check_across_frames() {
        let mut nvcm = DummyNvcm::new();
        nvcm.burn(3000, 0x01);
        let mut session = enabled_session(nvcm, SessionConfig::default());

        session.blank_check(2000).unwrap();
        assert_eq!(session.state(), SessionState::BlankChecked);
        assert_eq!(
            session.blank_check(2 * SPI_MAX_TRANSFER_SIZE),
            Err(Error::BlankCheckFailed {
                bank: Bank::Nvcm,
                offset: 3000,
                found: 0x01
            })
        );
    }

    #[test]
    fn test_trim_program_and_boot() {
        let (file, _) = test_bitstream();
        let commands = bitstream::convert(&file).unwrap();
        let mut session = session();
        session
            .program(&commands, BlankCheck::Required, &mut NoProgress)
            .unwrap();
        session.trim_program().unwrap();

        for row in TRIM_ROWS {
            assert_eq!(
                dummy(&mut session).nvcm().trim_row(row),
                Some(TRIM_PROGRAM_LOCK)
            );
        }
        assert_eq!(session.current_bank(), Some(Bank::Nvcm));

        assert!(session.boot().unwrap());
        assert_eq!(session.state(), SessionState::PoweredOn);
        assert!(!dummy(&mut session).nvcm().is_unlocked());
    }

    #[test]
    fn test_trim_write_not_taken() {
        let mut session = session();
        dummy(&mut session).nvcm_mut().set_trim_protected(true);
        assert_eq!(
            session.trim_program(),
            Err(Error::WriteVerificationFailed {
                row: 0x20,
                expected: TRIM_PROGRAM_LOCK,
                found: 0
            })
        );
        assert_eq!(session.current_bank(), Some(Bank::Nvcm));
        assert_eq!(session.state(), SessionState::NvcmEnabled);
    }

    #[test]
    fn test_boot_blank_device() {
        let mut session = session();
        assert!(!session.boot().unwrap());
        assert!(!session.config_done().unwrap());
    }

    #[test]
    fn test_trim_secure_blocks_programming() {
        let config = SessionConfig {
            status_poll_limit: 20,
            ..SessionConfig::default()
        };
        let mut session = enabled_session(DummyNvcm::new(), config);
        session.trim_program().unwrap();
        session
            .trim_secure(SecureConfirmation::irreversible())
            .unwrap();
        assert_eq!(session.state(), SessionState::Secured);
        assert!(dummy(&mut session).nvcm().is_secured());

        let info = session.info().unwrap();
        assert_eq!(info.secure_bits(), 3);
        assert_eq!(info.trim[0], TRIM_PROGRAM_LOCK | TRIM_SECURE_LOCK);

        let (file, _) = test_bitstream();
        let commands = bitstream::convert(&file).unwrap();
        assert_eq!(
            session.program(&commands, BlankCheck::Skip, &mut NoProgress),
            Err(Error::WriteFailed {
                cmd: 0x02,
                address: 0
            })
        );
    }

    #[test]
    fn test_info() {
        let mut nvcm = DummyNvcm::new();
        nvcm.set_signature([0x1200_0000_0000_00AB, 0xCAFE]);
        let mut session = enabled_session(nvcm, SessionConfig::default());

        let info = session.info().unwrap();
        assert_eq!(info.device_id(), 0x12);
        assert_eq!(info.device_name(), Some("ICE5LP4K"));
        assert_eq!(info.signature[1], 0xCAFE);
        assert_eq!(info.rf_trim, 0x0000_0000_C400_0000);
        assert_eq!(info.secure_bits(), 0);
        assert_eq!(info.trim, [0; 4]);
        assert_eq!(session.current_bank(), Some(Bank::Nvcm));
        assert_eq!(dummy(&mut session).nvcm().bank(), Bank::Nvcm as u8);
    }

    #[test]
    fn test_state_preconditions() {
        let pins = PinMap::default();
        let mut session =
            NvcmSession::new(DummyBridge::new(pins), pins, SessionConfig::default()).unwrap();

        assert_eq!(
            session.read_bytes(0, 8),
            Err(Error::InvalidState {
                operation: "read",
                state: SessionState::Created
            })
        );
        assert!(matches!(
            session.init(),
            Err(Error::InvalidState { .. })
        ));

        session.power_on().unwrap();
        assert!(matches!(
            session.power_on(),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            session.nvcm_enable(),
            Err(Error::InvalidState { .. })
        ));

        session.init().unwrap();
        session.nvcm_enable().unwrap();
        assert_eq!(
            session.nvcm_enable(),
            Err(Error::InvalidState {
                operation: "enable NVCM",
                state: SessionState::NvcmEnabled
            })
        );

        session.power_off().unwrap();
        assert_eq!(session.state(), SessionState::Created);
        assert!(!dummy(&mut session).nvcm().is_unlocked());
        assert!(matches!(
            session.blank_check(8),
            Err(Error::InvalidState { .. })
        ));
    }

    #[test]
    fn test_invalid_pins_rejected_before_traffic() {
        let mut pins = PinMap::default();
        pins.cdone = pins.cs;
        let result = NvcmSession::new(DummyBridge::new(pins), pins, SessionConfig::default());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_sleep_flash() {
        let pins = PinMap::default();
        let mut dummy = DummyBridge::new(pins);

        sleep_flash(&mut Bridge::new(&mut dummy), &pins, 12).unwrap();
        assert!(dummy.flash().is_asleep());
        assert!(dummy.pin_level(pins.power));
        assert!(!dummy.pin_level(pins.creset));

        // The session remaps the pins and talks to the FPGA again
        let mut session = NvcmSession::new(&mut dummy, pins, SessionConfig::default()).unwrap();
        session.power_on().unwrap();
        session.init().unwrap();
        session.nvcm_enable().unwrap();
        session.blank_check(16).unwrap();
    }

    #[test]
    fn test_sleep_flash_without_power_fails() {
        let pins = PinMap::default();
        let mut wrong = pins;
        // Power switched through a pin the board does not use
        wrong.power = 20;
        let mut dummy = DummyBridge::new(pins);
        assert_eq!(
            sleep_flash(&mut Bridge::new(&mut dummy), &wrong, 12),
            Err(Error::UnexpectedFlashId {
                expected: [0xFF, 0xEF, 0x40],
                found: [0xFF, 0xFF, 0xFF]
            })
        );
    }

    #[test]
    fn test_bootloader_error_is_swallowed() {
        let mut bridge = Bridge::new(DummyBridge::new(PinMap::default()));
        bridge.enter_bootloader().unwrap();
        assert!(bridge.control().is_disconnected());
        assert!(matches!(
            bridge.read_all(),
            Err(Error::Transfer(TransferError {
                kind: TransferKind::Disconnected,
                ..
            }))
        ));
    }

    #[test]
    fn test_bridge_gpio_and_adc() {
        let mut bridge = Bridge::new(DummyBridge::new(PinMap::default()));
        bridge.set_direction(3, true).unwrap();
        bridge.set_pulls(4, true, false).unwrap();
        bridge.write_pin(3, true).unwrap();
        assert!(bridge.read_pin(3).unwrap());
        assert!(!bridge.read_pin(4).unwrap());
        assert_eq!(bridge.control().pulls(4), (true, false));

        bridge.control_mut().set_adc([1, 2, 3]);
        assert_eq!(bridge.read_adc().unwrap(), [1, 2, 3]);
    }

    #[test]
    fn test_program_reports_progress() {
        #[derive(Default)]
        struct Recorder {
            total: usize,
            last: usize,
            done: bool,
        }

        impl icenvcm_core::nvcm::Progress for Recorder {
            fn programming(&mut self, total_bytes: usize) {
                self.total = total_bytes;
            }
            fn program_progress(&mut self, bytes_written: usize) {
                assert!(bytes_written > self.last);
                self.last = bytes_written;
            }
            fn reading(&mut self, _total_bytes: usize) {}
            fn read_progress(&mut self, _bytes_read: usize) {}
            fn complete(&mut self) {
                self.done = true;
            }
        }

        let (file, _) = test_bitstream();
        let commands = bitstream::convert(&file).unwrap();
        let mut session = session();
        let mut progress = Recorder::default();
        session
            .program(&commands, BlankCheck::Required, &mut progress)
            .unwrap();
        assert_eq!(progress.total, commands.len() * 8);
        assert_eq!(progress.last, progress.total);
        assert!(progress.done);
    }
}
