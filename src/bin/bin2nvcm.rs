//! bin2nvcm - convert an iCE40 bitstream into NVCM programming commands
//!
//! Writes one command per line as space separated hex bytes.

use clap::Parser;
use icenvcm_core::bitstream;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bin2nvcm")]
#[command(author, version, about = "Convert an iCE40 bitstream into NVCM commands", long_about = None)]
struct Args {
    /// Bitstream file
    infile: PathBuf,

    /// Command file to write
    outfile: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let data = fs::read(&args.infile)?;
    let commands = bitstream::convert(&data)?;

    let mut out = BufWriter::new(File::create(&args.outfile)?);
    for cmd in &commands {
        writeln!(out, "{}", cmd)?;
    }
    out.flush()?;

    log::info!(
        "Wrote {} commands ({} rows) to {:?}",
        commands.len(),
        bitstream::row_count(&commands),
        args.outfile
    );
    Ok(())
}
