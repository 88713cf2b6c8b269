use std::{fs, path::Path};

use log::{debug, warn};

use crate::{
    error::EmuError,
    registers::{IndexRegister, ProgramCounter},
};

pub type TypeAddr = u16; // in reality u12

pub const MEMORY_SIZE: usize = 4096;
pub const FONT_BASE: usize = 0x000;
pub const GLYPH_HEIGHT: usize = 5;
pub const PROGRAM_START: usize = 0x200;
pub const MAX_PROGRAM_SIZE: usize = MEMORY_SIZE - PROGRAM_START;
pub const STACK_SIZE: usize = 16;

type FontBytes = [u8; GLYPH_HEIGHT * 16];

const DEFAULT_FONT: FontBytes = [
    0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
    0x20, 0x60, 0x20, 0x20, 0x70, // 1
    0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
    0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
    0x90, 0x90, 0xF0, 0x10, 0x10, // 4
    0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
    0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
    0xF0, 0x10, 0x20, 0x40, 0x40, // 7
    0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
    0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
    0xF0, 0x90, 0xF0, 0x90, 0x90, // A
    0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
    0xF0, 0x80, 0x80, 0x80, 0xF0, // C
    0xE0, 0x90, 0x90, 0x90, 0xE0, // D
    0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
    0xF0, 0x80, 0xF0, 0x80, 0x80, // F
];

pub struct Memory {
    // 4k bytes
    // font glyphs at 000 -> 04F, program from 200 upward
    bytes: [u8; MEMORY_SIZE],
    pub pc: ProgramCounter,
    pub index: IndexRegister,
    pub stack: Stack,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Self {
            bytes: [0; MEMORY_SIZE],
            pc: ProgramCounter::default(),
            index: IndexRegister::default(),
            stack: Stack::new(),
        }
    }

    pub fn set(&mut self, addr: usize, val: u8) -> Result<(), EmuError> {
        let cell = self
            .bytes
            .get_mut(addr)
            .ok_or(EmuError::AddressOutOfRange { addr })?;
        *cell = val;
        Ok(())
    }

    pub fn get(&self, addr: usize) -> Result<u8, EmuError> {
        self.bytes
            .get(addr)
            .copied()
            .ok_or(EmuError::AddressOutOfRange { addr })
    }

    pub fn slice(&self, addr: usize, len: usize) -> Result<&[u8], EmuError> {
        self.bytes
            .get(addr..addr + len)
            .ok_or(EmuError::AddressOutOfRange {
                addr: addr.max(MEMORY_SIZE),
            })
    }

    pub fn set_pc(&mut self, addr: TypeAddr) {
        self.pc.set_addr(addr);
    }

    pub fn set_index(&mut self, addr: TypeAddr) {
        self.index.set_addr(addr);
    }

    /// Big-endian instruction word at PC. Does not move PC.
    pub fn fetch(&self) -> Result<u16, EmuError> {
        let pc = self.pc.0 as usize;
        let (l, r) = (self.get(pc)?, self.get(pc + 1)?);
        Ok(((l as u16) << 8) | r as u16)
    }

    pub fn load_builtin_sprites(&mut self) {
        self.bytes[FONT_BASE..FONT_BASE + DEFAULT_FONT.len()].copy_from_slice(&DEFAULT_FONT);
    }

    // program instructions start at 0x200, odd lengths are stored as is
    pub fn load_program(&mut self, bytes: &[u8]) -> Result<(), EmuError> {
        if bytes.len() > MAX_PROGRAM_SIZE {
            return Err(EmuError::ProgramTooLarge {
                size: bytes.len(),
                max: MAX_PROGRAM_SIZE,
            });
        }
        self.bytes[PROGRAM_START..PROGRAM_START + bytes.len()].copy_from_slice(bytes);
        debug!("loaded {} program bytes at {:#05X}", bytes.len(), PROGRAM_START);
        Ok(())
    }

    pub fn load_program_by_file(&mut self, path: &Path) -> Result<(), EmuError> {
        let program = fs::read(path).map_err(|source| EmuError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_program(&program)
    }
}

/// Call stack with room for 16 return addresses.
#[derive(Debug, Clone, Default)]
pub struct Stack {
    addresses: [TypeAddr; STACK_SIZE],
    sp: usize,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, addr: TypeAddr) -> Result<(), EmuError> {
        if self.sp >= STACK_SIZE {
            return Err(EmuError::StackOverflow { pc: addr.wrapping_sub(2) });
        }
        self.addresses[self.sp] = addr;
        self.sp += 1;
        Ok(())
    }

    /// Pops the top return address. An empty stack is not an error: SP stays at 0
    /// and whatever is left in slot 0 comes back.
    pub fn pop(&mut self) -> TypeAddr {
        if self.sp == 0 {
            warn!("return with empty call stack, using slot 0");
            return self.addresses[0];
        }
        self.sp -= 1;
        self.addresses[self.sp]
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    pub fn slots(&self) -> &[TypeAddr] {
        &self.addresses
    }
}
