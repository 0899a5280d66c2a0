//! USB bridge device implementation
//!
//! [`UsbBridge`] opens the bridge with `nusb` and implements
//! [`ControlTransport`] for it. GPIO writes submitted through
//! [`ControlTransport::submit_out`] are handed to a writer thread so the
//! caller does not wait for a USB round trip per pin change; any blocking
//! transfer or [`ControlTransport::drain`] waits for that queue first.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use icenvcm_core::error::{Error as CoreError, Result as CoreResult, TransferError, TransferKind};
use icenvcm_core::nvcm::{PinMap, PinRole, SessionConfig};
use icenvcm_core::transport::ControlTransport;
use nusb::transfer::{ControlIn, ControlOut, ControlType, Recipient};
use nusb::{Interface, MaybeFuture};

use crate::error::{Result, UsbBridgeError};
use crate::protocol::*;

/// Configuration options for opening a bridge
#[derive(Debug, Clone, Default)]
pub struct UsbBridgeConfig {
    /// Device index (when multiple bridges are connected)
    pub device_index: usize,
    /// Pin assignment on the bridge
    pub pins: PinMap,
    /// NVCM session settings
    pub session: SessionConfig,
}

/// Parse options from key=value pairs
///
/// Recognized keys: `index` (or `device`), `speed` (SPI clock in MHz),
/// and one key per pin role (`sck`, `cs`, `mosi`, `miso`, `power`,
/// `creset`, `cdone`).
pub fn parse_options(options: &[(&str, &str)]) -> Result<UsbBridgeConfig> {
    let mut config = UsbBridgeConfig::default();

    for (key, value) in options {
        match *key {
            "device" | "index" => {
                config.device_index = value
                    .parse()
                    .map_err(|_| UsbBridgeError::InvalidParameter(format!("index: {}", value)))?;
            }
            "speed" | "spispeed" => {
                let mhz: u8 = value
                    .trim_end_matches("MHz")
                    .trim_end_matches('M')
                    .parse()
                    .map_err(|_| UsbBridgeError::InvalidParameter(format!("speed: {}", value)))?;
                if mhz == 0 {
                    return Err(UsbBridgeError::InvalidParameter(format!(
                        "speed: {} (must be at least 1 MHz)",
                        value
                    )));
                }
                config.session.clock_mhz = mhz;
            }
            _ => {
                let role = PinRole::from_key(key).ok_or_else(|| {
                    UsbBridgeError::InvalidParameter(format!("unknown option: {}", key))
                })?;
                let pin = value.parse().map_err(|_| {
                    UsbBridgeError::InvalidParameter(format!("{}: {}", key, value))
                })?;
                config.pins.set(role, pin);
            }
        }
    }

    config.pins.validate()?;
    Ok(config)
}

enum Job {
    Write {
        request: u8,
        data: Vec<u8>,
        timeout: Duration,
    },
    Flush(Sender<Option<CoreError>>),
}

/// Background writer for fire-and-forget control transfers
struct AsyncWriter {
    jobs: Sender<Job>,
    handle: JoinHandle<()>,
}

impl AsyncWriter {
    fn spawn(interface: Interface) -> Result<Self> {
        let (jobs, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("icenvcm-usb-writer".into())
            .spawn(move || writer_loop(interface, rx))
            .map_err(|e| UsbBridgeError::OpenFailed(e.to_string()))?;
        Ok(Self { jobs, handle })
    }
}

fn writer_loop(interface: Interface, jobs: Receiver<Job>) {
    // First failure since the last flush; later writes are dropped until
    // it has been reported.
    let mut failed: Option<CoreError> = None;

    for job in jobs {
        match job {
            Job::Write {
                request,
                data,
                timeout,
            } => {
                if failed.is_some() {
                    continue;
                }
                if let Err(e) = vendor_out(&interface, request, &data, timeout) {
                    log::debug!("Queued request 0x{:02x} failed: {}", request, e);
                    failed = Some(e);
                }
            }
            Job::Flush(reply) => {
                let _ = reply.send(failed.take());
            }
        }
    }
}

fn transfer_error(request: u8, e: nusb::transfer::TransferError) -> CoreError {
    use nusb::transfer::TransferError as E;

    log::trace!("USB request 0x{:02x}: {}", request, e);
    let kind = match e {
        E::Cancelled => TransferKind::Timeout,
        E::Stall => TransferKind::Stall,
        E::Disconnected => TransferKind::Disconnected,
        _ => TransferKind::Failed,
    };
    TransferError::new(request, kind).into()
}

fn vendor_out(interface: &Interface, request: u8, data: &[u8], timeout: Duration) -> CoreResult<()> {
    log::trace!("USB OUT 0x{:02x} {} bytes", request, data.len());
    interface
        .control_out(
            ControlOut {
                control_type: ControlType::Vendor,
                recipient: Recipient::Device,
                request,
                value: 0,
                index: 0,
                data,
            },
            timeout,
        )
        .wait()
        .map_err(|e| transfer_error(request, e))
}

/// iCE40 programmer bridge on USB
pub struct UsbBridge {
    interface: Interface,
    writer: Option<AsyncWriter>,
    bus: u8,
    address: u8,
}

impl UsbBridge {
    /// Open the first available bridge
    pub fn open() -> Result<Self> {
        Self::open_nth(0)
    }

    /// Open the bridge at `index` in enumeration order
    pub fn open_nth(index: usize) -> Result<Self> {
        let devices: Vec<_> = nusb::list_devices()
            .wait()
            .map_err(|e| UsbBridgeError::OpenFailed(e.to_string()))?
            .filter(|d| d.vendor_id() == BRIDGE_USB_VENDOR && d.product_id() == BRIDGE_USB_PRODUCT)
            .collect();

        let device_info = devices.get(index).ok_or(UsbBridgeError::DeviceNotFound)?;

        let version = device_info.device_version();
        if version != FIRMWARE_VERSION {
            return Err(UsbBridgeError::FirmwareOutdated {
                found: version,
                required: FIRMWARE_VERSION,
            });
        }

        log::info!(
            "Opening bridge at bus {} address {}",
            device_info.busnum(),
            device_info.device_address()
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| UsbBridgeError::OpenFailed(e.to_string()))?;

        let interface = device
            .claim_interface(BRIDGE_INTERFACE)
            .wait()
            .map_err(|e| UsbBridgeError::ClaimFailed(e.to_string()))?;

        let writer = AsyncWriter::spawn(interface.clone())?;

        Ok(Self {
            interface,
            writer: Some(writer),
            bus: device_info.busnum(),
            address: device_info.device_address(),
        })
    }

    /// Open a bridge using parsed options
    pub fn open_with_config(config: &UsbBridgeConfig) -> Result<Self> {
        Self::open_nth(config.device_index)
    }

    /// List all connected bridges
    pub fn list_devices() -> Result<Vec<UsbBridgeInfo>> {
        let devices = nusb::list_devices()
            .wait()
            .map_err(|e| UsbBridgeError::OpenFailed(e.to_string()))?
            .filter(|d| d.vendor_id() == BRIDGE_USB_VENDOR && d.product_id() == BRIDGE_USB_PRODUCT)
            .map(|d| UsbBridgeInfo {
                bus: d.busnum(),
                address: d.device_address(),
                version: d.device_version(),
            })
            .collect();

        Ok(devices)
    }

    /// USB bus number
    pub fn bus(&self) -> u8 {
        self.bus
    }

    /// USB device address
    pub fn address(&self) -> u8 {
        self.address
    }
}

impl ControlTransport for UsbBridge {
    fn control_out(&mut self, request: u8, data: &[u8], timeout: Duration) -> CoreResult<()> {
        self.drain()?;
        vendor_out(&self.interface, request, data, timeout)
    }

    fn control_in(&mut self, request: u8, length: usize, timeout: Duration) -> CoreResult<Vec<u8>> {
        self.drain()?;
        log::trace!("USB IN 0x{:02x} {} bytes", request, length);
        self.interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value: 0,
                    index: 0,
                    length: length as u16,
                },
                timeout,
            )
            .wait()
            .map_err(|e| transfer_error(request, e))
    }

    fn submit_out(&mut self, request: u8, data: &[u8], timeout: Duration) -> CoreResult<()> {
        let Some(writer) = &self.writer else {
            return vendor_out(&self.interface, request, data, timeout);
        };
        writer
            .jobs
            .send(Job::Write {
                request,
                data: data.to_vec(),
                timeout,
            })
            .map_err(|_| TransferError::new(request, TransferKind::Disconnected).into())
    }

    fn drain(&mut self) -> CoreResult<()> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let (tx, rx) = mpsc::channel();
        let lost = || CoreError::from(TransferError::new(0, TransferKind::Disconnected));
        writer.jobs.send(Job::Flush(tx)).map_err(|_| lost())?;
        match rx.recv().map_err(|_| lost())? {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn delay_us(&mut self, us: u32) {
        thread::sleep(Duration::from_micros(us as u64));
    }
}

impl Drop for UsbBridge {
    fn drop(&mut self) {
        if let Err(e) = self.drain() {
            log::debug!("Queued bridge writes failed on close: {}", e);
        }
        if let Some(writer) = self.writer.take() {
            drop(writer.jobs);
            let _ = writer.handle.join();
        }
    }
}

/// Information about a connected bridge
#[derive(Debug, Clone)]
pub struct UsbBridgeInfo {
    /// USB bus number
    pub bus: u8,
    /// USB device address
    pub address: u8,
    /// Firmware version (bcdDevice)
    pub version: u16,
}

impl std::fmt::Display for UsbBridgeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bridge at bus {} address {} (firmware {:04x})",
            self.bus, self.address, self.version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options_defaults() {
        let config = parse_options(&[]).unwrap();
        assert_eq!(config.device_index, 0);
        assert_eq!(config.pins, PinMap::default());
        assert_eq!(config.session.clock_mhz, 12);
    }

    #[test]
    fn test_parse_options_pins() {
        let config = parse_options(&[("index", "1"), ("cs", "5"), ("cdone", "16"), ("speed", "6")])
            .unwrap();
        assert_eq!(config.device_index, 1);
        assert_eq!(config.pins.cs, 5);
        assert_eq!(config.pins.cdone, 16);
        assert_eq!(config.session.clock_mhz, 6);
    }

    #[test]
    fn test_parse_options_rejects_bad_values() {
        assert!(matches!(
            parse_options(&[("sck", "ten")]),
            Err(UsbBridgeError::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_options(&[("frequency", "1")]),
            Err(UsbBridgeError::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_options(&[("speed", "0")]),
            Err(UsbBridgeError::InvalidParameter(_))
        ));
        assert!(matches!(
            parse_options(&[("miso", "12")]),
            Err(UsbBridgeError::Core(_))
        ));
    }
}
