//! NVCM controller opcodes and fixed register values
//!
//! The NVCM controller of iCE40 parts is reached over the configuration SPI
//! port once the device has been put into SPI slave mode and unlocked with
//! the [`KNOCK`] sequence.

// ============================================================================
// State machine triggers
// ============================================================================

/// Enter program mode
pub const PGM_ENABLE: u8 = 0x06;
/// Exit program mode
pub const PGM_DISABLE: u8 = 0x04;
/// Read the controller status word
pub const READ_STATUS: u8 = 0x05;

// ============================================================================
// Addressed commands (`cmd addr[3] payload`)
// ============================================================================

/// Page program into the selected bank
pub const PAGE_PROGRAM: u8 = 0x02;
/// Read from the selected bank (followed by 9 dummy bytes)
pub const READ: u8 = 0x03;
/// Write the RF trim register
pub const WRITE_RF: u8 = 0x82;
/// Select the addressed bank
pub const BANK_SELECT: u8 = 0x83;
/// Read the RF trim register
pub const READ_RF: u8 = 0x84;

/// Dummy bytes between the address and the data of a read
pub const READ_DUMMY_BYTES: usize = 9;

/// Offset of the read data in a read response (`cmd addr[3] dummy[9]`)
pub const READ_DATA_OFFSET: usize = 4 + READ_DUMMY_BYTES;

// ============================================================================
// Fixed addresses and values
// ============================================================================

/// Access-NVCM knock sequence
pub const KNOCK: [u8; 6] = [0x7E, 0xAA, 0x99, 0x7E, 0x01, 0x0E];

/// Bank select register address
pub const BANK_SELECT_ADDR: u32 = 0x000025;

/// RF trim register address
pub const RF_TRIM_ADDR: u32 = 0x000020;

/// RF trim value that arms read access
pub const RF_TRIM_READ: u64 = 0x0000_0000_C400_0000;

/// RF trim value that arms programming
pub const RF_TRIM_PROGRAM: u64 = 0x0015_F2F0_C200_0000;

/// Trim rows holding the boot source and lock bits
pub const TRIM_ROWS: [u32; 4] = [0x20, 0x60, 0xA0, 0xE0];

/// Lock bits that make the device boot from NVCM
pub const TRIM_PROGRAM_LOCK: u64 = 0x0015_F2F1_C400_0000;

/// Lock bits that disable NVCM read-out and further programming
pub const TRIM_SECURE_LOCK: u64 = 0x3000_0001_0000_0000;

/// Silicon signature words in the signature bank
pub const SIGNATURE_ADDRS: [u32; 2] = [0x00, 0x08];

// ============================================================================
// Status and timing
// ============================================================================

/// Clock cycles run after every command
pub const POST_COMMAND_CLOCKS: usize = 8;

/// Clock cycles run before each status poll
pub const STATUS_POLL_CLOCKS: usize = 5000;

/// Maximum number of status polls
pub const STATUS_POLL_LIMIT: u32 = 1000;
