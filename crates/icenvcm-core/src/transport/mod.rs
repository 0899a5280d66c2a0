//! Bridge transport: GPIO and bit-banged SPI over USB control transfers
//!
//! The bridge is a USB-attached microcontroller that drives GPIOs and
//! bit-bangs SPI on behalf of the host. This module splits it in two layers:
//!
//! - [`ControlTransport`] is the narrow USB capability the rest of the crate
//!   depends on: vendor control write, vendor control read, each with an
//!   explicit timeout. The `icenvcm-usb` crate implements it with `nusb`;
//!   tests implement it with in-memory fakes.
//! - [`Bridge`] turns bridge operations into framed requests, hides the
//!   per-frame size ceiling by chunking, and enforces the read barrier.
//!
//! # Ordering
//!
//! Pure output GPIO operations are handed to [`ControlTransport::submit_out`],
//! which may return before the transfer completes. Before every read the
//! bridge calls [`ControlTransport::drain`], so a read never observes the
//! device state from before an earlier write.

mod request;

pub use request::{
    pin_mask, read_u32_be, ReadRequest, Request, RequestCode, SpiPins, CONTROL_BUFFER_SIZE,
    PIN_COUNT, SPI_MAX_TRANSFER_SIZE, SPI_XFER_HEADER_LEN,
};

use alloc::vec::Vec;
use core::time::Duration;

use crate::error::{Error, InvalidArgument, Result, TransferError, TransferKind};

/// Timeout for blocking control writes
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(100);
/// Timeout for fire-and-forget control writes
pub const SUBMIT_TIMEOUT: Duration = Duration::from_millis(1000);
/// Timeout for control reads
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Narrow USB control-transfer interface to the bridge device
///
/// All requests are vendor requests addressed to the device with
/// `wValue = wIndex = 0`.
pub trait ControlTransport {
    /// Blocking vendor control write
    ///
    /// Implementations that queue writes in [`submit_out`](Self::submit_out)
    /// must complete those first.
    fn control_out(&mut self, request: u8, data: &[u8], timeout: Duration) -> Result<()>;

    /// Blocking vendor control read of up to `length` bytes
    fn control_in(&mut self, request: u8, length: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Fire-and-forget vendor control write
    ///
    /// Errors may be reported by this call or by a later [`drain`](Self::drain).
    fn submit_out(&mut self, request: u8, data: &[u8], timeout: Duration) -> Result<()> {
        self.control_out(request, data, timeout)
    }

    /// Wait until every submitted write has completed
    fn drain(&mut self) -> Result<()> {
        Ok(())
    }

    /// Delay for the specified number of microseconds
    fn delay_us(&mut self, us: u32);
}

impl<T: ControlTransport + ?Sized> ControlTransport for &mut T {
    fn control_out(&mut self, request: u8, data: &[u8], timeout: Duration) -> Result<()> {
        (**self).control_out(request, data, timeout)
    }

    fn control_in(&mut self, request: u8, length: usize, timeout: Duration) -> Result<Vec<u8>> {
        (**self).control_in(request, length, timeout)
    }

    fn submit_out(&mut self, request: u8, data: &[u8], timeout: Duration) -> Result<()> {
        (**self).submit_out(request, data, timeout)
    }

    fn drain(&mut self) -> Result<()> {
        (**self).drain()
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

/// GPIO and SPI primitives of the bridge device
pub struct Bridge<C> {
    control: C,
    spi: Option<SpiPins>,
}

impl<C: ControlTransport> Bridge<C> {
    /// Wrap a control transport
    ///
    /// SPI primitives are unavailable until [`configure_spi`](Self::configure_spi)
    /// has been called.
    pub fn new(control: C) -> Self {
        Self { control, spi: None }
    }

    /// Access the underlying control transport
    pub fn control(&self) -> &C {
        &self.control
    }

    /// Mutably access the underlying control transport
    pub fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }

    /// Release the underlying control transport
    pub fn into_inner(self) -> C {
        self.control
    }

    /// Current SPI pin mapping, if configured
    pub fn spi_pins(&self) -> Option<SpiPins> {
        self.spi
    }

    fn send(&mut self, req: Request<'_>) -> Result<()> {
        let data = req.encode()?;
        self.control.control_out(req.code() as u8, &data, WRITE_TIMEOUT)
    }

    fn submit(&mut self, req: Request<'_>) -> Result<()> {
        let data = req.encode()?;
        self.control
            .submit_out(req.code() as u8, &data, SUBMIT_TIMEOUT)
    }

    fn fetch(&mut self, req: ReadRequest) -> Result<Vec<u8>> {
        self.control.drain()?;
        let code = req.code() as u8;
        let data = self.control.control_in(code, req.len(), READ_TIMEOUT)?;
        if data.len() < req.len() {
            return Err(TransferError::new(
                code,
                TransferKind::ShortRead {
                    expected: req.len(),
                    got: data.len(),
                },
            )
            .into());
        }
        Ok(data)
    }

    /// Wait for all submitted GPIO writes to reach the device
    pub fn flush(&mut self) -> Result<()> {
        self.control.drain()
    }

    /// Set the direction of a single GPIO pin
    pub fn set_direction(&mut self, pin: u8, output: bool) -> Result<()> {
        let mask = pin_mask(pin)?;
        self.submit(Request::SetDirection {
            mask,
            outputs: if output { mask } else { 0 },
        })
    }

    /// Configure the pull-up/pull-down resistors of a single GPIO pin
    pub fn set_pulls(&mut self, pin: u8, pull_up: bool, pull_down: bool) -> Result<()> {
        let mask = pin_mask(pin)?;
        self.submit(Request::SetPulls {
            mask,
            pull_up: if pull_up { mask } else { 0 },
            pull_down: if pull_down { mask } else { 0 },
        })
    }

    /// Set the output level of a single GPIO pin
    pub fn write_pin(&mut self, pin: u8, high: bool) -> Result<()> {
        let mask = pin_mask(pin)?;
        self.submit(Request::SetValues {
            mask,
            values: if high { mask } else { 0 },
        })
    }

    /// Read the input levels of all GPIO pins
    pub fn read_all(&mut self) -> Result<u32> {
        let data = self.fetch(ReadRequest::PinValues)?;
        read_u32_be(&data).ok_or_else(|| {
            TransferError::new(
                RequestCode::PinValues as u8,
                TransferKind::ShortRead {
                    expected: 4,
                    got: data.len(),
                },
            )
            .into()
        })
    }

    /// Read the input level of a single GPIO pin
    pub fn read_pin(&mut self, pin: u8) -> Result<bool> {
        let mask = pin_mask(pin)?;
        Ok(self.read_all()? & mask != 0)
    }

    /// Set the pins used for SPI transfers
    ///
    /// Later calls replace the mapping.
    pub fn configure_spi(&mut self, pins: SpiPins) -> Result<()> {
        self.send(Request::SpiConfigure(pins))?;
        log::debug!(
            "SPI configured: sck={} cs={} mosi={} miso={} {}MHz",
            pins.sck,
            pins.cs,
            pins.mosi,
            pins.miso,
            pins.clock_mhz
        );
        self.spi = Some(pins);
        Ok(())
    }

    /// Transmit data, discarding whatever is clocked in
    pub fn spi_write(&mut self, data: &[u8], toggle_cs: bool) -> Result<()> {
        self.spi_xfer(data, toggle_cs, false).map(|_| ())
    }

    /// Full-duplex transfer; the response has the same length as `data`
    pub fn spi_transceive(&mut self, data: &[u8], toggle_cs: bool) -> Result<Vec<u8>> {
        self.spi_xfer(data, toggle_cs, true)
    }

    fn spi_xfer(&mut self, data: &[u8], toggle_cs: bool, read: bool) -> Result<Vec<u8>> {
        let pins = self
            .spi
            .ok_or(Error::InvalidArgument(InvalidArgument::SpiNotConfigured))?;

        if data.len() <= SPI_MAX_TRANSFER_SIZE {
            return self.spi_xfer_frame(data, toggle_cs, read);
        }

        // Hold chip select across all frames so the split is invisible
        // to the target.
        log::trace!(
            "Splitting {} byte SPI transfer into {} frames",
            data.len(),
            data.len().div_ceil(SPI_MAX_TRANSFER_SIZE)
        );
        if toggle_cs {
            self.write_pin(pins.cs, false)?;
        }

        let mut response = Vec::with_capacity(if read { data.len() } else { 0 });
        for chunk in data.chunks(SPI_MAX_TRANSFER_SIZE) {
            response.extend(self.spi_xfer_frame(chunk, false, read)?);
        }

        if toggle_cs {
            self.write_pin(pins.cs, true)?;
        }

        Ok(response)
    }

    fn spi_xfer_frame(&mut self, data: &[u8], toggle_cs: bool, read: bool) -> Result<Vec<u8>> {
        self.send(Request::SpiXfer { toggle_cs, data })?;

        if !read {
            return Ok(Vec::new());
        }

        let mut response = self.fetch(ReadRequest::SpiXfer { len: data.len() })?;
        response.truncate(data.len());
        Ok(response)
    }

    /// Run the SPI clock without transferring data
    ///
    /// Chip select is left alone. Useful for letting a target's internal
    /// state machine advance.
    pub fn spi_clock_out(&mut self, byte_count: usize) -> Result<()> {
        if self.spi.is_none() {
            return Err(InvalidArgument::SpiNotConfigured.into());
        }

        let mut remaining = byte_count;
        while remaining > 0 {
            let chunk = remaining.min(SPI_MAX_TRANSFER_SIZE);
            self.send(Request::SpiClockOut {
                byte_count: chunk as u32,
            })?;
            remaining -= chunk;
        }
        Ok(())
    }

    /// Read the averaged voltages of ADC inputs 0, 1 and 2, in microvolts
    pub fn read_adc(&mut self) -> Result<[u32; 3]> {
        let data = self.fetch(ReadRequest::AdcRead)?;
        let mut values = [0u32; 3];
        for (value, raw) in values.iter_mut().zip(data.chunks_exact(4)) {
            *value = read_u32_be(raw).unwrap_or(0);
        }
        Ok(values)
    }

    /// Reset the bridge into its bootloader
    ///
    /// Queued writes must complete first; their errors are returned. The
    /// device drops off the bus while handling the reset request itself,
    /// so only the error from that transfer is ignored.
    pub fn enter_bootloader(&mut self) -> Result<()> {
        self.control.drain()?;
        if let Err(e) = self.send(Request::Bootloader) {
            log::debug!("Ignoring error from bootloader request: {}", e);
        }
        Ok(())
    }

    /// Delay for the specified number of microseconds
    pub fn delay_us(&mut self, us: u32) {
        self.control.delay_us(us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    /// Records every control transfer; SPI reads return the inverted data
    /// of the last SPI frame, like a loopback with an inverter.
    #[derive(Default)]
    struct RecordingControl {
        outs: Vec<(u8, Vec<u8>, bool)>,
        ins: Vec<(u8, usize)>,
        pending: usize,
        last_frame: Vec<u8>,
        pins: u32,
        drain_error: Option<Error>,
        fail_request: Option<u8>,
    }

    impl ControlTransport for RecordingControl {
        fn control_out(&mut self, request: u8, data: &[u8], _timeout: Duration) -> Result<()> {
            // Blocking writes complete queued ones first.
            self.pending = 0;
            if self.fail_request == Some(request) {
                return Err(TransferError::new(request, TransferKind::Disconnected).into());
            }
            if request == RequestCode::SpiXfer as u8 {
                self.last_frame = data[SPI_XFER_HEADER_LEN..].to_vec();
            }
            self.outs.push((request, data.to_vec(), false));
            Ok(())
        }

        fn control_in(&mut self, request: u8, length: usize, _timeout: Duration) -> Result<Vec<u8>> {
            assert_eq!(self.pending, 0, "read overtook queued writes");
            self.ins.push((request, length));
            match RequestCode::from_u8(request) {
                Some(RequestCode::SpiXfer) => Ok(self.last_frame.iter().map(|b| !b).collect()),
                Some(RequestCode::PinValues) => Ok(self.pins.to_be_bytes().to_vec()),
                Some(RequestCode::AdcRead) => Ok(vec![
                    0, 0x32, 0x5A, 0xA0, 0, 0x4C, 0x4B, 0x40, 0, 0, 0, 1,
                ]),
                _ => Ok(Vec::new()),
            }
        }

        fn submit_out(&mut self, request: u8, data: &[u8], _timeout: Duration) -> Result<()> {
            self.pending += 1;
            self.outs.push((request, data.to_vec(), true));
            Ok(())
        }

        fn drain(&mut self) -> Result<()> {
            self.pending = 0;
            match self.drain_error.take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn delay_us(&mut self, _us: u32) {}
    }

    fn configured() -> Bridge<RecordingControl> {
        let mut bridge = Bridge::new(RecordingControl::default());
        bridge
            .configure_spi(SpiPins {
                sck: 10,
                cs: 12,
                mosi: 11,
                miso: 13,
                clock_mhz: 12,
            })
            .unwrap();
        bridge.control_mut().outs.clear();
        bridge
    }

    fn cs_writes(control: &RecordingControl) -> Vec<bool> {
        control
            .outs
            .iter()
            .filter(|(req, data, _)| {
                *req == RequestCode::PinValues as u8 && data[..4] == (1u32 << 12).to_be_bytes()
            })
            .map(|(_, data, _)| data[4..] != [0, 0, 0, 0])
            .collect()
    }

    #[test]
    fn test_small_transfer_is_single_frame() {
        let mut bridge = configured();
        let rx = bridge.spi_transceive(&[0x05, 0x00], true).unwrap();
        assert_eq!(rx, vec![0xFA, 0xFF]);

        let control = bridge.control();
        assert_eq!(control.outs.len(), 1);
        assert_eq!(control.outs[0].1[0], 1, "bridge toggles chip select");
        assert!(cs_writes(control).is_empty());
    }

    #[test]
    fn test_chunked_transfer_toggles_cs_once() {
        let mut bridge = configured();
        let data: Vec<u8> = (0..2 * SPI_MAX_TRANSFER_SIZE).map(|i| i as u8).collect();

        let rx = bridge.spi_transceive(&data, true).unwrap();
        let expected: Vec<u8> = data.iter().map(|b| !b).collect();
        assert_eq!(rx, expected);

        let control = bridge.control();
        assert_eq!(cs_writes(control), vec![false, true]);

        let frames: Vec<_> = control
            .outs
            .iter()
            .filter(|(req, _, _)| *req == RequestCode::SpiXfer as u8)
            .collect();
        assert_eq!(frames.len(), 2);
        for (_, frame, _) in frames {
            assert_eq!(frame[0], 0, "frames inside a chunked transfer keep CS");
            assert_eq!(frame.len(), SPI_XFER_HEADER_LEN + SPI_MAX_TRANSFER_SIZE);
        }
    }

    #[test]
    fn test_spi_requires_configuration() {
        let mut bridge = Bridge::new(RecordingControl::default());
        assert_eq!(
            bridge.spi_write(&[0x06], true),
            Err(Error::InvalidArgument(InvalidArgument::SpiNotConfigured))
        );
        assert!(bridge.control().outs.is_empty());
    }

    #[test]
    fn test_clock_out_is_chunked() {
        let mut bridge = configured();
        bridge.spi_clock_out(SPI_MAX_TRANSFER_SIZE + 10).unwrap();
        let counts: Vec<u32> = bridge
            .control()
            .outs
            .iter()
            .map(|(_, data, _)| read_u32_be(data).unwrap())
            .collect();
        assert_eq!(counts, vec![SPI_MAX_TRANSFER_SIZE as u32, 10]);
    }

    #[test]
    fn test_gpio_writes_are_submitted_and_reads_drain() {
        let mut bridge = Bridge::new(RecordingControl::default());
        bridge.control_mut().pins = (1 << 15) | (1 << 3);
        bridge.set_direction(15, false).unwrap();
        bridge.write_pin(7, true).unwrap();
        assert_eq!(bridge.control().pending, 2);

        assert!(bridge.read_pin(15).unwrap());
        assert!(!bridge.read_pin(14).unwrap());
        assert_eq!(bridge.control().pending, 0);
        assert!(bridge.control().outs.iter().all(|(_, _, submitted)| *submitted));
    }

    #[test]
    fn test_invalid_pin_sends_nothing() {
        let mut bridge = Bridge::new(RecordingControl::default());
        assert_eq!(
            bridge.write_pin(31, true),
            Err(Error::InvalidArgument(InvalidArgument::PinOutOfRange {
                pin: 31
            }))
        );
        assert!(bridge.control().outs.is_empty());
    }

    #[test]
    fn test_read_adc() {
        let mut bridge = Bridge::new(RecordingControl::default());
        assert_eq!(bridge.read_adc().unwrap(), [3_300_000, 5_000_000, 1]);
    }

    #[test]
    fn test_bootloader_reports_queued_write_failure() {
        let mut bridge = Bridge::new(RecordingControl::default());
        bridge.write_pin(7, true).unwrap();
        let failure = Error::Transfer(TransferError::new(
            RequestCode::PinValues as u8,
            TransferKind::Stall,
        ));
        bridge.control_mut().drain_error = Some(failure);

        assert_eq!(bridge.enter_bootloader(), Err(failure));
        assert!(bridge
            .control()
            .outs
            .iter()
            .all(|(req, _, _)| *req != RequestCode::Bootloader as u8));
    }

    #[test]
    fn test_bootloader_ignores_reset_disconnect() {
        let mut bridge = Bridge::new(RecordingControl::default());
        bridge.control_mut().fail_request = Some(RequestCode::Bootloader as u8);
        assert_eq!(bridge.enter_bootloader(), Ok(()));

        let mut bridge = Bridge::new(RecordingControl::default());
        bridge.enter_bootloader().unwrap();
        let outs = &bridge.control().outs;
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].0, RequestCode::Bootloader as u8);
        assert!(!outs[0].2);
    }
}
