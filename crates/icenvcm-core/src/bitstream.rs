//! Bitstream to NVCM command conversion
//!
//! An iCE40 bitstream is programmed into NVCM as a series of 8-byte row
//! writes. Rows are taken from the bitstream starting at the preamble and
//! placed at their physical NVCM address: logical rows come in blocks of
//! 328 bytes, and every block starts on a 4096 byte page.
//!
//! The conversion is pure; the resulting [`NvcmCommand`]s are replayed by
//! [`NvcmSession::program`](crate::nvcm::NvcmSession::program).

use alloc::vec::Vec;
use core::fmt;

use crate::error::{Error, InvalidArgument, Result};
use crate::nvcm::opcodes;

/// Bitstream preamble marking the start of configuration data
pub const PREAMBLE: [u8; 4] = [0x7E, 0xAA, 0x99, 0x7E];

/// Size of one NVCM row in bytes
pub const ROW_SIZE: usize = 8;

/// Logical bytes per NVCM block
pub const BLOCK_SIZE: usize = 328;

/// Physical address stride between NVCM blocks
pub const PAGE_STRIDE: u32 = 4096;

/// Highest address reachable with a 24-bit command address
pub const MAX_ADDRESS: u32 = 0x00FF_FFFF;

/// Logical bytes that map below [`MAX_ADDRESS`]
pub const MAX_LENGTH: usize = (MAX_ADDRESS / PAGE_STRIDE + 1) as usize * BLOCK_SIZE;

/// One SPI transaction to the NVCM state machine
///
/// Either a bare trigger byte (`06`, `04`) or `cmd addr[3] payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvcmCommand(Vec<u8>);

impl NvcmCommand {
    /// Single byte command
    pub fn trigger(cmd: u8) -> Self {
        Self(alloc::vec![cmd])
    }

    /// Command with a 24-bit big-endian address and payload
    pub fn with_address(cmd: u8, address: u32, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(4 + payload.len());
        bytes.push(cmd);
        bytes.extend_from_slice(&address.to_be_bytes()[1..]);
        bytes.extend_from_slice(payload);
        Self(bytes)
    }

    /// Command byte
    pub fn opcode(&self) -> u8 {
        self.0.first().copied().unwrap_or(0)
    }

    /// Address field, if the command carries one
    pub fn address(&self) -> Option<u32> {
        match self.0.get(1..4) {
            Some(&[a, b, c]) => Some(u32::from_be_bytes([0, a, b, c])),
            _ => None,
        }
    }

    /// Payload after the address field
    pub fn payload(&self) -> &[u8] {
        self.0.get(4..).unwrap_or(&[])
    }

    /// Raw bytes sent over SPI
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Space separated lowercase hex (`02 00 00 08 ff ...`)
impl fmt::Display for NvcmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl AsRef<[u8]> for NvcmCommand {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Map a logical offset from the preamble to its physical NVCM address
///
/// Returns `None` for offsets at or past [`MAX_LENGTH`], whose address
/// does not fit in 24 bits.
pub fn nvcm_address(offset: usize) -> Option<u32> {
    if offset >= MAX_LENGTH {
        return None;
    }
    let block = (offset / BLOCK_SIZE) as u32;
    Some(block * PAGE_STRIDE + (offset % BLOCK_SIZE) as u32)
}

/// Offset of the first preamble in the bitstream
pub fn find_preamble(bitstream: &[u8]) -> Option<usize> {
    bitstream
        .windows(PREAMBLE.len())
        .position(|window| window == PREAMBLE)
}

/// Convert a bitstream into the command list that programs it
///
/// The list starts with enter-program-mode, then one page-program write
/// per non-zero row, then exit-program-mode. Unwritten NVCM reads as zero,
/// so all-zero rows are skipped.
pub fn convert(bitstream: &[u8]) -> Result<Vec<NvcmCommand>> {
    let start = find_preamble(bitstream).ok_or(Error::PreambleNotFound)?;
    log::info!("Found preamble at 0x{:08x}", start);

    let payload = &bitstream[start..];
    if payload.len() > MAX_LENGTH {
        return Err(InvalidArgument::LengthTooLarge { len: payload.len() }.into());
    }

    let mut commands = Vec::with_capacity(payload.len() / ROW_SIZE + 2);
    commands.push(NvcmCommand::trigger(opcodes::PGM_ENABLE));

    for (index, chunk) in payload.chunks(ROW_SIZE).enumerate() {
        let mut row = [0u8; ROW_SIZE];
        row[..chunk.len()].copy_from_slice(chunk);
        if row == [0u8; ROW_SIZE] {
            continue;
        }
        let address = nvcm_address(index * ROW_SIZE)
            .ok_or(InvalidArgument::LengthTooLarge { len: payload.len() })?;
        commands.push(NvcmCommand::with_address(
            opcodes::PAGE_PROGRAM,
            address,
            &row,
        ));
    }

    commands.push(NvcmCommand::trigger(opcodes::PGM_DISABLE));
    log::debug!(
        "Converted {} bitstream bytes into {} NVCM commands",
        payload.len(),
        commands.len()
    );
    Ok(commands)
}

/// Number of row writes in a command list
pub fn row_count(commands: &[NvcmCommand]) -> usize {
    commands
        .iter()
        .filter(|cmd| cmd.opcode() == opcodes::PAGE_PROGRAM)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use alloc::vec;

    #[test]
    fn test_address_transform() {
        for offset in (0..100_000).step_by(ROW_SIZE) {
            let expected = (offset / 328) * 4096 + (offset % 328);
            assert_eq!(nvcm_address(offset), Some(expected as u32), "offset {}", offset);
        }
        assert_eq!(nvcm_address(327), Some(327));
        assert_eq!(nvcm_address(328), Some(4096));
        assert_eq!(nvcm_address(329), Some(4097));
        assert_eq!(nvcm_address(656), Some(8192));
    }

    #[test]
    fn test_address_limit() {
        assert_eq!(MAX_LENGTH, 4096 * 328);
        assert_eq!(nvcm_address(MAX_LENGTH - 1), Some(0x00FF_F147));
        assert_eq!(nvcm_address(MAX_LENGTH), None);
        assert_eq!(nvcm_address(328 << 21), None);
        assert_eq!(nvcm_address(usize::MAX), None);
    }

    #[test]
    fn test_oversized_bitstream_is_rejected() {
        let mut bitstream = PREAMBLE.to_vec();
        bitstream.resize(MAX_LENGTH, 0);
        bitstream[MAX_LENGTH - 1] = 0x01;
        let commands = convert(&bitstream).unwrap();
        assert_eq!(commands[2].address(), Some(0x00FF_F140));

        // A row at 0x1000000 would wrap onto row 0
        bitstream.resize(MAX_LENGTH + ROW_SIZE, 0);
        bitstream[MAX_LENGTH] = 0x01;
        assert_eq!(
            convert(&bitstream),
            Err(Error::InvalidArgument(InvalidArgument::LengthTooLarge {
                len: MAX_LENGTH + ROW_SIZE
            }))
        );
    }

    #[test]
    fn test_single_row() {
        let mut bitstream = PREAMBLE.to_vec();
        bitstream.extend_from_slice(&[0; 4]);

        let commands = convert(&bitstream).unwrap();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].as_bytes(), &[0x06]);
        assert_eq!(
            commands[1].as_bytes(),
            &[0x02, 0x00, 0x00, 0x00, 0x7E, 0xAA, 0x99, 0x7E, 0, 0, 0, 0]
        );
        assert_eq!(commands[2].as_bytes(), &[0x04]);
    }

    #[test]
    fn test_leading_bytes_are_discarded() {
        let mut bitstream = vec![0xFF, 0x00, 0x00, 0xFF];
        bitstream.extend_from_slice(&PREAMBLE);
        bitstream.extend_from_slice(&[0x01, 0x0E, 0, 0]);
        bitstream.extend_from_slice(&[0xAB; 8]);

        let commands = convert(&bitstream).unwrap();
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[1].address(), Some(0));
        assert_eq!(commands[1].payload(), &[0x7E, 0xAA, 0x99, 0x7E, 0x01, 0x0E, 0, 0]);
        assert_eq!(commands[2].address(), Some(8));
        assert_eq!(commands[2].payload(), &[0xAB; 8]);
        assert_eq!(row_count(&commands), 2);
    }

    #[test]
    fn test_rows_cross_block_boundary() {
        let mut bitstream = PREAMBLE.to_vec();
        bitstream.resize(BLOCK_SIZE + ROW_SIZE, 0);
        bitstream[BLOCK_SIZE] = 0x5A;

        let commands = convert(&bitstream).unwrap();
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[2].address(), Some(4096));
        assert_eq!(commands[2].payload(), &[0x5A, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_final_row_is_zero_padded() {
        let mut bitstream = PREAMBLE.to_vec();
        bitstream.extend_from_slice(&[0; 4]);
        bitstream.extend_from_slice(&[0xC0, 0xDE]);

        let commands = convert(&bitstream).unwrap();
        assert_eq!(
            commands[2].as_bytes(),
            &[0x02, 0x00, 0x00, 0x08, 0xC0, 0xDE, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_missing_preamble() {
        assert_eq!(convert(&[]), Err(Error::PreambleNotFound));
        assert_eq!(convert(&[0x7E, 0xAA, 0x99]), Err(Error::PreambleNotFound));
        assert_eq!(
            convert(&[0xFF, 0x7E, 0xAA, 0x98, 0x7E]),
            Err(Error::PreambleNotFound)
        );
    }

    #[test]
    fn test_zero_rows_produce_no_writes() {
        // The preamble row is never zero, so it is the only write.
        let mut bitstream = PREAMBLE.to_vec();
        bitstream.extend_from_slice(&[0u8; 1000]);
        let commands = convert(&bitstream).unwrap();
        assert_eq!(commands.len(), 3);
        assert_eq!(row_count(&commands), 1);
        assert_eq!(commands.first().map(NvcmCommand::opcode), Some(0x06));
        assert_eq!(commands.last().map(NvcmCommand::opcode), Some(0x04));

        // Zero rows in the middle are skipped without shifting later rows.
        bitstream[600] = 0x11;
        let commands = convert(&bitstream).unwrap();
        assert_eq!(row_count(&commands), 2);
        assert_eq!(commands[2].address(), nvcm_address(600));
    }

    #[test]
    fn test_hex_format() {
        let cmd = NvcmCommand::with_address(0x02, 0x1008, &[0xFF, 0x00]);
        assert_eq!(format!("{}", cmd), "02 00 10 08 ff 00");
        assert_eq!(format!("{}", NvcmCommand::trigger(0x06)), "06");
    }
}
