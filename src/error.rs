//! Error kinds 3 and 4 from the error-handling design: implementation
//! gaps and host-side failures. Kinds 1 and 2 (guest faults, device
//! protocol errors) never reach a `Result` — they're handled entirely
//! inside the emulation loop via interrupt dispatch or status registers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("unimplemented opcode {opcode:#04x} at {cs:#06x}:{ip:#06x}")]
    UnimplementedOpcode { opcode: u8, cs: u16, ip: u16 },

    #[error("undefined 0F {sub:#04x} escape form at {cs:#06x}:{ip:#06x}")]
    UndefinedEscape { sub: u8, cs: u16, ip: u16 },

    #[error("PIT channel {channel} asked to run in unimplemented mode {mode}")]
    UnimplementedPitMode { channel: u8, mode: u8 },

    #[error("PIC auto-EOI is not implemented")]
    UnsupportedPicAutoEoi,

    #[error("no vector handler registered for INT {vector:#04x}")]
    UnregisteredVector { vector: u8 },

    #[error("could not open disk image {path}: {source}")]
    ImageNotFound { path: String, #[source] source: std::io::Error },

    #[error("could not read BIOS image {path}: {source}")]
    BiosNotFound { path: String, #[source] source: std::io::Error },

    #[error("BIOS image {path} ({size} bytes) does not fit below 1 MiB")]
    BiosTooLarge { path: String, size: usize },

    #[error("could not create the host display surface: {0}")]
    DisplayInit(String),
}

pub type Result<T> = std::result::Result<T, EmulatorError>;
