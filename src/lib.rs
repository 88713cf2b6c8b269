// 16 8-bit data registers named V0 to VF
// I -> address register (12 bits)
// 16 level call stack
//
// Delay timer & Sound timer: count down once per tick (17ms) until 0
// Beep on every tick while the sound timer is non-zero
//
// Display res: 64 width, 32 height
//
// 34 instructions, each 2 bytes (big-endian)
//      NNN: address
//      KK: 8-bit constant
//      N: 4-bit constant
//      X and Y: 4-bit register identifier

pub mod config;
pub mod decode;
pub mod display;
pub mod emulator;
pub mod error;
pub mod keyboard;
pub mod memory;
pub mod registers;
pub mod sound;
pub mod timer;
pub mod window;

pub use config::{EmulatorConfig, TimerMode};
pub use emulator::{Emulator, Flow};
pub use error::EmuError;
