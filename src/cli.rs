//! CLI argument parsing

use clap::Parser;
use icenvcm_core::nvcm::DEFAULT_READ_LENGTH;
use std::path::PathBuf;

/// Parse a string as a hex or decimal length
fn parse_length(s: &str) -> Result<usize, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<usize>().map_err(|e| format!("Invalid number: {}", e))
    }
}

#[derive(Parser, Debug)]
#[command(name = "icenvcm")]
#[command(author, version, about = "iCE40 NVCM programmer", long_about = None)]
#[command(after_help = "Steps run in this order: sleep flash, info, write, read, verify, secure, boot.\n\
    The first failing step stops the run.")]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Programmer to use [available: usb, dummy], with options
    /// (e.g. usb:index=1,speed=6,cs=12)
    #[arg(short, long, default_value = "usb")]
    pub programmer: String,

    /// List connected USB bridges and exit
    #[arg(long)]
    pub list: bool,

    /// Reboot the bridge into its bootloader and exit
    #[arg(long)]
    pub bootloader: bool,

    /// Print the bridge ADC readings
    #[arg(long)]
    pub adc: bool,

    /// Put the SPI configuration flash into deep power-down first
    #[arg(short = 'f', long)]
    pub sleep_flash: bool,

    /// Print signature, trim and security state of the device
    #[arg(short, long)]
    pub info: bool,

    /// Program a bitstream into NVCM and set the boot trim bits
    #[arg(short, long, value_name = "FILE")]
    pub write: Option<PathBuf>,

    /// Program even if the device is not blank
    #[arg(long)]
    pub ignore_blank: bool,

    /// Dump NVCM contents to a file ('-' for stdout)
    #[arg(short, long, value_name = "FILE")]
    pub read: Option<PathBuf>,

    /// Number of bytes to dump with --read
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_READ_LENGTH, value_parser = parse_length)]
    pub read_length: usize,

    /// Compare NVCM contents against a dump made with --read
    #[arg(long, value_name = "FILE")]
    pub verify: Option<PathBuf>,

    /// Set the security bits (permanent, disables read-back)
    #[arg(long)]
    pub secure: bool,

    /// Confirm --write and --secure; NVCM is one-time programmable
    #[arg(long)]
    pub my_design_is_good_enough: bool,

    /// Boot the FPGA and report CDONE when done
    #[arg(short, long)]
    pub boot: bool,
}

impl Cli {
    /// Whether any requested step needs an NVCM session
    pub fn needs_session(&self) -> bool {
        self.info
            || self.write.is_some()
            || self.read.is_some()
            || self.verify.is_some()
            || self.secure
            || self.boot
    }

    /// Whether an irreversible step was requested
    pub fn is_irreversible(&self) -> bool {
        self.write.is_some() || self.secure
    }
}
