//! CLI entry point: parses arguments, assembles a [`Configuration`], and
//! runs the machine until it halts or hits an implementation-gap error
//! (spec section 7, kind 3/4 handling is all that reaches this file).

use clap::Parser;
use ibmpc_emu::machine::{Configuration, Machine};
use ibmpc_emu::EmulatorError;
use std::process::ExitCode;

/// Early IBM-PC-class machine emulator.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the system BIOS image, loaded so its last byte sits at 0xFFFFF.
    bios: String,

    /// Floppy disk image (raw 1.44 MB CHS), mounted as drive A.
    floppy: Option<String>,

    /// Primary IDE hard-disk image (raw LBA).
    #[arg(long = "hdd0")]
    primary_disk: Option<String>,

    /// Secondary IDE hard-disk image (raw LBA).
    #[arg(long = "hdd1")]
    secondary_disk: Option<String>,

    /// Optional extension ROM image, loaded at 0xE8000.
    #[arg(long = "rom")]
    extension_rom: Option<String>,

    /// Run without creating a host display window (useful under CI).
    #[arg(long)]
    headless: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ibmpc: {}", err);
            exit_code_for(&err)
        }
    }
}

fn run(cli: Cli) -> ibmpc_emu::Result<()> {
    let config = Configuration::load(
        &cli.bios,
        cli.extension_rom.as_deref(),
        cli.floppy.as_deref(),
        cli.primary_disk.as_deref(),
        cli.secondary_disk.as_deref(),
        cli.headless,
    )?;
    let mut machine = Machine::new(config)?;
    machine.run()
}

/// Host-side failures (kind 4) and implementation gaps (kind 3) both abort
/// with a diagnostic per spec section 7; they're distinguished here only
/// for the process exit code, not for how they're reported.
fn exit_code_for(err: &EmulatorError) -> ExitCode {
    match err {
        EmulatorError::ImageNotFound { .. } | EmulatorError::BiosNotFound { .. } | EmulatorError::BiosTooLarge { .. } | EmulatorError::DisplayInit(_) => {
            ExitCode::from(2)
        }
        _ => ExitCode::from(1),
    }
}
