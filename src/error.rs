use std::{io, path::PathBuf};

use thiserror::Error;

use crate::memory::TypeAddr;

#[derive(Debug, Error)]
pub enum EmuError {
    #[error("unable to read program {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("program is too large ({size} bytes), max size is {max} bytes")]
    ProgramTooLarge { size: usize, max: usize },

    #[error("unknown opcode {opcode:#06X} at {pc:#05X}")]
    UnknownOpcode { opcode: u16, pc: TypeAddr },

    #[error("stack overflow: call at {pc:#05X} with all 16 slots in use")]
    StackOverflow { pc: TypeAddr },

    #[error("memory access out of bounds at address {addr:#06X}")]
    AddressOutOfRange { addr: usize },

    #[error("window error: {0}")]
    Window(String),

    #[error("audio error: {0}")]
    Audio(String),
}

impl EmuError {
    /// Load failures happen before the first cycle runs.
    pub fn is_load_error(&self) -> bool {
        matches!(self, Self::Load { .. } | Self::ProgramTooLarge { .. })
    }
}
