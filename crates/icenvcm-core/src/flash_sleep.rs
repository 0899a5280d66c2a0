//! Put the board's SPI configuration flash into deep power-down
//!
//! The iCE40 and its configuration flash share the SPI bus. A flash that
//! answers while the FPGA is being talked to corrupts the NVCM traffic, so
//! before programming, the flash is woken, identified, and put to sleep with
//! the FPGA held in reset.

use crate::error::{Error, Result};
use crate::nvcm::PinMap;
use crate::transport::{Bridge, ControlTransport};

/// Release from deep power-down
const RES: u8 = 0xAB;
/// Read JEDEC ID
const RDID: u8 = 0x9F;
/// Deep power-down
const DP: u8 = 0xB9;

/// JEDEC ID reply of the awake flash (dummy byte, Winbond, W25Q type)
pub const FLASH_ID_AWAKE: [u8; 3] = [0xFF, 0xEF, 0x40];

/// JEDEC ID reply of a sleeping flash (bus floats high)
pub const FLASH_ID_ASLEEP: [u8; 3] = [0xFF, 0xFF, 0xFF];

fn read_id<C: ControlTransport>(bridge: &mut Bridge<C>) -> Result<[u8; 3]> {
    let rx = bridge.spi_transceive(&[RDID, 0, 0], true)?;
    let mut id = [0xFF; 3];
    for (dst, src) in id.iter_mut().zip(&rx) {
        *dst = *src;
    }
    Ok(id)
}

fn expect_id<C: ControlTransport>(
    bridge: &mut Bridge<C>,
    expected: [u8; 3],
    what: &str,
) -> Result<()> {
    let found = read_id(bridge)?;
    log::info!(
        "flash ID while {}: {:02x} {:02x} {:02x}",
        what,
        found[0],
        found[1],
        found[2]
    );
    if found != expected {
        return Err(Error::UnexpectedFlashId { expected, found });
    }
    Ok(())
}

/// Put the configuration flash into deep power-down
///
/// Leaves the target powered with CRESET low and the SPI pins mapped for
/// the flash. Create the NVCM session afterwards to remap them.
pub fn sleep_flash<C: ControlTransport>(
    bridge: &mut Bridge<C>,
    pins: &PinMap,
    clock_mhz: u8,
) -> Result<()> {
    pins.validate()?;
    log::info!("Putting SPI flash into deep sleep");

    bridge.write_pin(pins.power, false)?;
    bridge.set_direction(pins.power, true)?;

    // Keep the FPGA from loading the flash
    bridge.set_direction(pins.creset, true)?;
    bridge.write_pin(pins.creset, false)?;

    bridge.write_pin(pins.power, true)?;

    // The flash talks back on the FPGA's MOSI line
    bridge.set_direction(pins.cs, true)?;
    bridge.set_direction(pins.mosi, false)?;
    bridge.set_direction(pins.sck, true)?;
    bridge.set_direction(pins.miso, true)?;
    bridge.configure_spi(pins.flash_spi(clock_mhz))?;

    bridge.spi_write(&[RES], true)?;
    expect_id(bridge, FLASH_ID_AWAKE, "awake")?;

    // A sleep command that does not start on the first byte is ignored
    bridge.spi_write(&[0x00, DP], true)?;
    expect_id(bridge, FLASH_ID_AWAKE, "awake")?;

    bridge.spi_write(&[DP], true)?;
    expect_id(bridge, FLASH_ID_ASLEEP, "asleep")
}
