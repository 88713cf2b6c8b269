use std::{
    fmt::Write as _,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{error, info, trace};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    config::EmulatorConfig,
    decode::OpCode,
    display::{FrameBuffer, Screen},
    error::EmuError,
    keyboard::{KeyWait, Keypad},
    memory::{Memory, TypeAddr, FONT_BASE, GLYPH_HEIGHT},
    registers::Registers,
    sound::Speaker,
    timer::Timers,
};

/// What the run loop should do after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// A blocking wait was cancelled by quit.
    Halt,
}

enum PcUpdate {
    Next,
    SkipIf(bool),
    Jump(TypeAddr),
}

pub struct Emulator {
    pub fb: FrameBuffer,
    pub regs: Registers,
    pub mem: Memory,
    pub timers: Timers,
    screen: Box<dyn Screen + Send>,
    speaker: Box<dyn Speaker + Send>,
    keypad: Box<dyn Keypad + Send>,
    rng: StdRng,
    quit: Arc<AtomicBool>,
    step_mode: bool,
    cycles: u64,
    last_opcode: u16,
}

impl Emulator {
    pub fn new(
        config: &EmulatorConfig,
        screen: Box<dyn Screen + Send>,
        speaker: Box<dyn Speaker + Send>,
        keypad: Box<dyn Keypad + Send>,
    ) -> Self {
        let mut mem = Memory::new();
        mem.load_builtin_sprites();

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            fb: FrameBuffer::new(),
            regs: Registers::new(),
            mem,
            timers: Timers::new(config.timer_mode, config.tick_interval),
            screen,
            speaker,
            keypad,
            rng,
            quit: Arc::new(AtomicBool::new(false)),
            step_mode: config.step_mode,
            cycles: 0,
            last_opcode: 0,
        }
    }

    pub fn load_program(&mut self, bytes: &[u8]) -> Result<(), EmuError> {
        self.mem.load_program(bytes)
    }

    pub fn load_program_file(&mut self, path: &Path) -> Result<(), EmuError> {
        self.mem.load_program_by_file(path)
    }

    /// Shared flag; storing `true` stops `run` before the next cycle.
    pub fn quit_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.quit)
    }

    pub fn is_running(&self) -> bool {
        !self.quit.load(Ordering::Acquire)
    }

    pub fn run(&mut self) -> Result<(), EmuError> {
        while self.is_running() {
            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => break,
                Err(err) => {
                    error!("{err}\n{}", self.state_dump());
                    return Err(err);
                }
            }
        }
        info!("emulator stopped at {:#05X}", self.mem.pc.0);
        Ok(())
    }

    /// One full cycle: timers, fetch, decode, execute. In step mode every
    /// cycle after the first waits for a step request.
    pub fn step(&mut self) -> Result<Flow, EmuError> {
        if self.step_mode && self.cycles > 0 && !self.keypad.wait_for_step() {
            return Ok(Flow::Halt);
        }
        self.timers.sync(&mut *self.speaker);

        let operation = self.fetch_decode()?;
        let flow = self.execute_ins(operation)?;
        self.cycles += 1;

        if self.step_mode {
            info!("{operation}\n{}", self.state_dump());
        }
        Ok(flow)
    }

    pub fn fetch_decode(&mut self) -> Result<OpCode, EmuError> {
        let pc = self.mem.pc.0;
        let ins = self.mem.fetch()?;
        self.last_opcode = ins;
        let op = OpCode::decode_raw(ins).ok_or(EmuError::UnknownOpcode { opcode: ins, pc })?;
        trace!("{pc:#05X}: {ins:04X} {op}");
        Ok(op)
    }

    pub fn execute_ins(&mut self, ins: OpCode) -> Result<Flow, EmuError> {
        let update = match ins {
            OpCode::ClearScreen => {
                self.fb.clear_buffer();
                self.screen.present(&self.fb);
                PcUpdate::Next
            }
            OpCode::PopSubroutine => PcUpdate::Jump(self.mem.stack.pop()),
            OpCode::Jump(addr) => PcUpdate::Jump(addr),
            OpCode::PushSubroutine(addr) => {
                // return to the instruction after the call
                self.mem.stack.push(self.mem.pc.0.wrapping_add(2))?;
                PcUpdate::Jump(addr)
            }
            OpCode::SkipEqualConstant(vx, nn) => PcUpdate::SkipIf(self.regs.get(vx) == nn),
            OpCode::SkipNotEqualConstant(vx, nn) => PcUpdate::SkipIf(self.regs.get(vx) != nn),
            OpCode::SkipEqualRegister(vx, vy) => {
                PcUpdate::SkipIf(self.regs.get(vx) == self.regs.get(vy))
            }
            OpCode::SkipNotEqualRegister(vx, vy) => {
                PcUpdate::SkipIf(self.regs.get(vx) != self.regs.get(vy))
            }
            OpCode::SetRegister(vx, nn) => {
                self.regs.set_register(vx, nn);
                PcUpdate::Next
            }
            OpCode::AddToRegister(vx, nn) => {
                self.regs.add_to_register(vx, nn);
                PcUpdate::Next
            }
            OpCode::CopyRegister(vx, vy) => {
                self.regs.set_register(vx, self.regs.get(vy));
                PcUpdate::Next
            }
            OpCode::Or(vx, vy) => {
                self.regs
                    .set_register(vx, self.regs.get(vx) | self.regs.get(vy));
                PcUpdate::Next
            }
            OpCode::And(vx, vy) => {
                self.regs
                    .set_register(vx, self.regs.get(vx) & self.regs.get(vy));
                PcUpdate::Next
            }
            OpCode::XOr(vx, vy) => {
                self.regs
                    .set_register(vx, self.regs.get(vx) ^ self.regs.get(vy));
                PcUpdate::Next
            }
            // flag first, then the result; with VX = VF the result wins
            OpCode::Add(vx, vy) => {
                let (sum, carry) = self.regs.get(vx).overflowing_add(self.regs.get(vy));
                self.regs.set_flag(carry);
                self.regs.set_register(vx, sum);
                PcUpdate::Next
            }
            OpCode::SubtractForward(vx, vy) => {
                let (x, y) = (self.regs.get(vx), self.regs.get(vy));
                // strictly greater: equal operands clear VF
                self.regs.set_flag(x > y);
                self.regs.set_register(vx, x.wrapping_sub(y));
                PcUpdate::Next
            }
            OpCode::SubtractBackward(vx, vy) => {
                let (x, y) = (self.regs.get(vx), self.regs.get(vy));
                self.regs.set_flag(y > x);
                self.regs.set_register(vx, y.wrapping_sub(x));
                PcUpdate::Next
            }
            OpCode::RightShift(vx, _) => {
                let vx_value = self.regs.get(vx);
                self.regs.set_flag(vx_value & 1 == 1);
                self.regs.set_register(vx, vx_value >> 1);
                PcUpdate::Next
            }
            OpCode::LeftShift(vx, _) => {
                let vx_value = self.regs.get(vx);
                self.regs.set_flag((vx_value >> 7) & 1 == 1);
                self.regs.set_register(vx, vx_value << 1);
                PcUpdate::Next
            }
            OpCode::SetIndexRegister(addr) => {
                self.mem.set_index(addr);
                PcUpdate::Next
            }
            OpCode::JumpWithOffset(addr) => PcUpdate::Jump(addr + self.regs.get(0) as u16),
            OpCode::Random(vx, nn) => {
                let ransuu: u8 = self.rng.gen();
                self.regs.set_register(vx, ransuu & nn);
                PcUpdate::Next
            }
            OpCode::Display(reg_x, reg_y, height) => {
                let (x, y) = (self.regs.get(reg_x), self.regs.get(reg_y));
                let sprite = self.mem.slice(self.mem.index.offset(0), height as usize)?;
                let collision = self.fb.paint(x, y, sprite);
                self.regs.set_flag(collision);
                self.screen.present(&self.fb);
                PcUpdate::Next
            }
            OpCode::SkipIfPressed(vx) => PcUpdate::SkipIf(self.keypad.is_pressed(self.regs.get(vx))),
            OpCode::SkipIfNotPressed(vx) => {
                PcUpdate::SkipIf(!self.keypad.is_pressed(self.regs.get(vx)))
            }
            OpCode::CopyDelayToRegister(vx) => {
                self.regs.set_register(vx, self.timers.delay.count);
                PcUpdate::Next
            }
            OpCode::GetKey(vx) => match self.keypad.wait_for_key() {
                KeyWait::Pressed(key) => {
                    self.regs.set_register(vx, key);
                    PcUpdate::Next
                }
                KeyWait::Quit => return Ok(Flow::Halt),
            },
            OpCode::CopyRegisterToDelay(vx) => {
                self.timers.delay.set(self.regs.get(vx));
                PcUpdate::Next
            }
            OpCode::CopyRegisterToSound(vx) => {
                self.timers.sound.set(self.regs.get(vx));
                PcUpdate::Next
            }
            OpCode::AddToIndex(vx) => {
                self.mem
                    .set_index(self.mem.index.0.wrapping_add(self.regs.get(vx) as u16));
                PcUpdate::Next
            }
            OpCode::PointChar(vx) => {
                let addr = FONT_BASE + GLYPH_HEIGHT * self.regs.get(vx) as usize;
                self.mem.set_index(addr as TypeAddr);
                PcUpdate::Next
            }
            OpCode::ToDecimal(vx) => {
                let value = self.regs.get(vx);
                let digits = [value / 100, (value / 10) % 10, value % 10];
                for (i, digit) in digits.into_iter().enumerate() {
                    self.mem.set(self.mem.index.offset(i), digit)?;
                }
                PcUpdate::Next
            }
            OpCode::StoreRegisterToMemory(vx) => {
                for reg in 0..=vx {
                    self.mem
                        .set(self.mem.index.offset(reg as usize), self.regs.get(reg))?;
                }
                PcUpdate::Next
            }
            OpCode::LoadRegisterFromMemory(vx) => {
                for reg in 0..=vx {
                    let reg_val = self.mem.get(self.mem.index.offset(reg as usize))?;
                    self.regs.set_register(reg, reg_val);
                }
                PcUpdate::Next
            }
        };

        match update {
            PcUpdate::Next | PcUpdate::SkipIf(false) => self.mem.pc.increment(),
            PcUpdate::SkipIf(true) => self.mem.pc.skip(),
            PcUpdate::Jump(addr) => self.mem.set_pc(addr),
        }
        Ok(Flow::Continue)
    }

    /// Registers, stack, I, SP, PC, timers and the last fetched opcode.
    pub fn state_dump(&self) -> String {
        let mut out = String::new();
        let slots = self.mem.stack.slots();
        let _ = writeln!(out, "     Registers  Stack");
        for (i, value) in self.regs.as_slice().iter().enumerate() {
            let _ = writeln!(out, "  {i:X}: {value:#04x}     {i:X}: {:#05x}", slots[i]);
        }
        let _ = writeln!(
            out,
            "  I: {:#05x}  SP: {:#x}  PC: {:#05x}",
            self.mem.index.0,
            self.mem.stack.sp(),
            self.mem.pc.0
        );
        let _ = write!(
            out,
            "  DT: {}  ST: {}  Opcode: {:04X}",
            self.timers.delay.count, self.timers.sound.count, self.last_opcode
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{atomic::AtomicU32, mpsc},
        time::Duration,
    };

    use super::*;
    use crate::{
        config::TimerMode,
        display::{FrameSlot, Headless},
        keyboard::{ChannelKeypad, InputEvent},
        memory::PROGRAM_START,
        registers::FLAG_REGISTER,
        sound::Silent,
    };

    struct SharedSpeaker(Arc<AtomicU32>);

    impl Speaker for SharedSpeaker {
        fn beep(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn emu_with(config: EmulatorConfig) -> (Emulator, mpsc::Sender<InputEvent>) {
        let (tx, keypad) = ChannelKeypad::channel();
        let emu = Emulator::new(
            &config,
            Box::new(Headless::default()),
            Box::new(Silent),
            Box::new(keypad),
        );
        (emu, tx)
    }

    fn emu() -> (Emulator, mpsc::Sender<InputEvent>) {
        emu_with(EmulatorConfig::headless(7))
    }

    // writes the opcode at PC and runs one cycle
    fn exec(emu: &mut Emulator, opcode: u16) -> Flow {
        let pc = emu.mem.pc.0 as usize;
        emu.mem.set(pc, (opcode >> 8) as u8).unwrap();
        emu.mem.set(pc + 1, opcode as u8).unwrap();
        emu.step().unwrap()
    }

    #[test]
    fn jump() {
        let (mut emu, _tx) = emu();
        exec(&mut emu, 0x1012);
        assert_eq!(emu.mem.pc.0, 0x012);
    }

    #[test]
    fn call_then_return() {
        let (mut emu, _tx) = emu();
        exec(&mut emu, 0x2012);
        assert_eq!(emu.mem.stack.sp(), 1);
        assert_eq!(emu.mem.stack.slots()[0], 0x202);
        assert_eq!(emu.mem.pc.0, 0x012);

        exec(&mut emu, 0x00EE);
        assert_eq!(emu.mem.pc.0, 0x202);
        assert_eq!(emu.mem.stack.sp(), 0);
    }

    #[test]
    fn return_with_empty_stack_uses_slot_zero() {
        let (mut emu, _tx) = emu();
        emu.mem.stack.push(0x0123).unwrap();
        emu.mem.stack.pop();
        exec(&mut emu, 0x00EE);
        assert_eq!(emu.mem.pc.0, 0x0123);
        assert_eq!(emu.mem.stack.sp(), 0);
    }

    #[test]
    fn seventeenth_call_overflows() {
        let (mut emu, _tx) = emu();
        emu.load_program(&[0x22, 0x00]).unwrap();
        for _ in 0..16 {
            emu.step().unwrap();
        }
        assert!(matches!(
            emu.step(),
            Err(EmuError::StackOverflow { pc: 0x200 })
        ));
    }

    #[test]
    fn skip_equal_constant() {
        let (mut emu, _tx) = emu();
        emu.regs.set_register(1, 0x14);
        exec(&mut emu, 0x3114);
        assert_eq!(emu.mem.pc.0, 0x204);
        exec(&mut emu, 0x3113);
        assert_eq!(emu.mem.pc.0, 0x206);
    }

    #[test]
    fn skip_not_equal_constant() {
        let (mut emu, _tx) = emu();
        emu.regs.set_register(1, 0x14);
        exec(&mut emu, 0x4114);
        assert_eq!(emu.mem.pc.0, 0x202);
        exec(&mut emu, 0x4113);
        assert_eq!(emu.mem.pc.0, 0x206);
    }

    #[test]
    fn skip_on_registers() {
        let (mut emu, _tx) = emu();
        emu.regs.set_register(1, 0xA);
        emu.regs.set_register(2, 0xA);
        exec(&mut emu, 0x5120);
        assert_eq!(emu.mem.pc.0, 0x204);
        exec(&mut emu, 0x9120);
        assert_eq!(emu.mem.pc.0, 0x206);

        emu.regs.set_register(2, 0xB);
        exec(&mut emu, 0x5120);
        assert_eq!(emu.mem.pc.0, 0x208);
        exec(&mut emu, 0x9120);
        assert_eq!(emu.mem.pc.0, 0x20C);
    }

    #[test]
    fn set_and_add_immediate() {
        let (mut emu, _tx) = emu();
        exec(&mut emu, 0x61AB);
        assert_eq!(emu.regs.get(1), 0xAB);

        emu.regs.set_register(1, 0xE6);
        emu.regs.set_register(FLAG_REGISTER, 0x55);
        exec(&mut emu, 0x711E);
        assert_eq!(emu.regs.get(1), 0x04);
        // no carry flag for the immediate add
        assert_eq!(emu.regs.get(FLAG_REGISTER), 0x55);
        assert_eq!(emu.mem.pc.0, 0x204);
    }

    #[test]
    fn bitwise_ops() {
        let (mut emu, _tx) = emu();
        let cases = [(0x8120, 0x72), (0x8121, 0x7F), (0x8122, 0x12), (0x8123, 0x6D)];
        for (opcode, expected) in cases {
            emu.regs.set_register(1, 0x1F);
            emu.regs.set_register(2, 0x72);
            exec(&mut emu, opcode);
            assert_eq!(emu.regs.get(1), expected, "{opcode:04X}");
        }
        assert_eq!(emu.mem.pc.0, 0x208);
    }

    #[test]
    fn add_registers_sets_carry() {
        let (mut emu, _tx) = emu();
        emu.regs.set_register(1, 0x3);
        emu.regs.set_register(2, 0x4);
        exec(&mut emu, 0x8124);
        assert_eq!(emu.regs.get(1), 0x7);
        assert_eq!(emu.regs.get(FLAG_REGISTER), 0);

        emu.regs.set_register(1, 0xE6);
        emu.regs.set_register(2, 0x1E);
        exec(&mut emu, 0x8124);
        assert_eq!(emu.regs.get(1), 0x04);
        assert_eq!(emu.regs.get(FLAG_REGISTER), 1);
        assert_eq!(emu.mem.pc.0, 0x204);
    }

    #[test]
    fn result_overwrites_flag_when_target_is_vf() {
        let (mut emu, _tx) = emu();
        emu.regs.set_register(FLAG_REGISTER, 0xFF);
        emu.regs.set_register(1, 0x01);
        exec(&mut emu, 0x8F14);
        assert_eq!(emu.regs.get(FLAG_REGISTER), 0x00);
    }

    #[test]
    fn subtract_uses_strict_greater_than() {
        let (mut emu, _tx) = emu();
        emu.regs.set_register(1, 0x3);
        emu.regs.set_register(2, 0x4);
        exec(&mut emu, 0x8125);
        assert_eq!(emu.regs.get(1), 0xFF);
        assert_eq!(emu.regs.get(FLAG_REGISTER), 0);

        emu.regs.set_register(1, 0x4);
        emu.regs.set_register(2, 0x4);
        exec(&mut emu, 0x8125);
        assert_eq!(emu.regs.get(1), 0x0);
        assert_eq!(emu.regs.get(FLAG_REGISTER), 0);

        emu.regs.set_register(1, 0x5);
        emu.regs.set_register(2, 0x3);
        exec(&mut emu, 0x8125);
        assert_eq!(emu.regs.get(1), 0x2);
        assert_eq!(emu.regs.get(FLAG_REGISTER), 1);
    }

    #[test]
    fn subtract_backward() {
        let (mut emu, _tx) = emu();
        emu.regs.set_register(1, 0x3);
        emu.regs.set_register(2, 0x4);
        exec(&mut emu, 0x8127);
        assert_eq!(emu.regs.get(1), 0x1);
        assert_eq!(emu.regs.get(FLAG_REGISTER), 1);

        emu.regs.set_register(1, 0x4);
        emu.regs.set_register(2, 0x3);
        exec(&mut emu, 0x8127);
        assert_eq!(emu.regs.get(1), 0xFF);
        assert_eq!(emu.regs.get(FLAG_REGISTER), 0);
    }

    #[test]
    fn shifts_report_dropped_bit() {
        let (mut emu, _tx) = emu();
        emu.regs.set_register(1, 0b1000_0011);
        emu.regs.set_register(2, 0xFF);
        exec(&mut emu, 0x8126);
        assert_eq!(emu.regs.get(1), 0b0100_0001);
        assert_eq!(emu.regs.get(FLAG_REGISTER), 1);
        // VY is ignored
        assert_eq!(emu.regs.get(2), 0xFF);

        emu.regs.set_register(1, 0b1000_0011);
        exec(&mut emu, 0x812E);
        assert_eq!(emu.regs.get(1), 0b0000_0110);
        assert_eq!(emu.regs.get(FLAG_REGISTER), 1);

        emu.regs.set_register(1, 0b0100_0000);
        exec(&mut emu, 0x812E);
        assert_eq!(emu.regs.get(1), 0b1000_0000);
        assert_eq!(emu.regs.get(FLAG_REGISTER), 0);
    }

    #[test]
    fn index_and_offset_jump() {
        let (mut emu, _tx) = emu();
        exec(&mut emu, 0xA123);
        assert_eq!(emu.mem.index.0, 0x123);
        emu.regs.set_register(0, 0x10);
        exec(&mut emu, 0xB300);
        assert_eq!(emu.mem.pc.0, 0x310);
    }

    #[test]
    fn random_is_masked_and_seeded() {
        let (mut emu, _tx) = emu();
        exec(&mut emu, 0xC10F);
        let expected = StdRng::seed_from_u64(7).gen::<u8>() & 0x0F;
        assert_eq!(emu.regs.get(1), expected);

        exec(&mut emu, 0xC200);
        assert_eq!(emu.regs.get(2), 0);
    }

    #[test]
    fn draw_twice_restores_and_flags_collision() {
        let (tx, keypad) = ChannelKeypad::channel();
        let frames = FrameSlot::new();
        let mut emu = Emulator::new(
            &EmulatorConfig::headless(1),
            Box::new(frames.clone()),
            Box::new(Silent),
            Box::new(keypad),
        );
        emu.regs.set_register(1, 62);
        emu.regs.set_register(2, 30);
        emu.mem.set_index(FONT_BASE as TypeAddr);

        exec(&mut emu, 0xD125);
        assert_eq!(emu.regs.get(FLAG_REGISTER), 0);
        // glyph 0 wraps past both edges
        assert!(emu.fb.get(62, 30));
        assert!(emu.fb.get(1, 30));
        assert!(emu.fb.get(62, 2));
        assert_eq!(emu.fb.lit_pixels(), 14);

        let shown = frames.take().unwrap();
        assert_eq!(shown.lit_pixels(), 14);

        exec(&mut emu, 0xD125);
        assert_eq!(emu.regs.get(FLAG_REGISTER), 1);
        assert_eq!(emu.fb.lit_pixels(), 0);
        assert_eq!(frames.take().unwrap().lit_pixels(), 0);
        drop(tx);
    }

    #[test]
    fn draw_past_end_of_memory_fails() {
        let (mut emu, _tx) = emu();
        emu.mem.set_index(0xFFE);
        emu.mem.set(0x200, 0xD0).unwrap();
        emu.mem.set(0x201, 0x05).unwrap();
        assert!(matches!(
            emu.step(),
            Err(EmuError::AddressOutOfRange { .. })
        ));
    }

    #[test]
    fn clear_screen() {
        let (_tx, keypad) = ChannelKeypad::channel();
        let frames = FrameSlot::new();
        let mut emu = Emulator::new(
            &EmulatorConfig::headless(1),
            Box::new(frames.clone()),
            Box::new(Silent),
            Box::new(keypad),
        );
        emu.fb.paint(0, 0, &[0xFF]);
        exec(&mut emu, 0x00E0);
        assert_eq!(emu.fb.lit_pixels(), 0);
        assert_eq!(emu.mem.pc.0, 0x202);

        // the cleared screen is presented
        assert_eq!(frames.take().unwrap().lit_pixels(), 0);
        assert!(!frames.is_pending());
    }

    #[test]
    fn key_skips() {
        let (mut emu, tx) = emu();
        emu.regs.set_register(3, 0xC);
        exec(&mut emu, 0xE39E);
        assert_eq!(emu.mem.pc.0, 0x202);
        exec(&mut emu, 0xE3A1);
        assert_eq!(emu.mem.pc.0, 0x206);

        tx.send(InputEvent::KeyDown(0xC)).unwrap();
        exec(&mut emu, 0xE39E);
        assert_eq!(emu.mem.pc.0, 0x20A);
        exec(&mut emu, 0xE3A1);
        assert_eq!(emu.mem.pc.0, 0x20C);
    }

    #[test]
    fn wait_key_stores_key() {
        let (mut emu, tx) = emu();
        tx.send(InputEvent::KeyDown(0x9)).unwrap();
        assert_eq!(exec(&mut emu, 0xF40A), Flow::Continue);
        assert_eq!(emu.regs.get(4), 0x9);
        assert_eq!(emu.mem.pc.0, 0x202);
    }

    #[test]
    fn wait_key_halts_on_quit() {
        let (mut emu, tx) = emu();
        tx.send(InputEvent::Quit).unwrap();
        assert_eq!(exec(&mut emu, 0xF40A), Flow::Halt);
        assert_eq!(emu.mem.pc.0, 0x200);
    }

    #[test]
    fn blocking_timers_drain_before_next_fetch() {
        let (tx, keypad) = ChannelKeypad::channel();
        let beeps = Arc::new(AtomicU32::new(0));
        let mut emu = Emulator::new(
            &EmulatorConfig::headless(1),
            Box::new(Headless::default()),
            Box::new(SharedSpeaker(Arc::clone(&beeps))),
            Box::new(keypad),
        );
        emu.regs.set_register(1, 5);
        exec(&mut emu, 0xF115);
        exec(&mut emu, 0xF118);
        assert_eq!(emu.timers.sound.count, 5);
        assert_eq!(emu.timers.delay.count, 0);

        exec(&mut emu, 0xF207);
        assert_eq!(emu.regs.get(2), 0);
        assert_eq!(emu.timers.sound.count, 0);
        assert_eq!(beeps.load(Ordering::Relaxed), 5);
        drop(tx);
    }

    #[test]
    fn realtime_timers_keep_value_between_ticks() {
        let (mut emu, _tx) = emu_with(EmulatorConfig {
            timer_mode: TimerMode::Realtime,
            tick_interval: Duration::from_secs(3600),
            seed: Some(1),
            step_mode: false,
        });
        emu.regs.set_register(1, 42);
        exec(&mut emu, 0xF115);
        exec(&mut emu, 0xF207);
        assert_eq!(emu.regs.get(2), 42);
    }

    #[test]
    fn add_to_index_is_not_masked() {
        let (mut emu, _tx) = emu();
        emu.mem.set_index(0xFFF);
        emu.regs.set_register(1, 2);
        exec(&mut emu, 0xF11E);
        assert_eq!(emu.mem.index.0, 0x1001);
    }

    #[test]
    fn sprite_address() {
        let (mut emu, _tx) = emu();
        emu.regs.set_register(1, 0xA);
        exec(&mut emu, 0xF129);
        assert_eq!(emu.mem.index.0 as usize, FONT_BASE + 5 * 10);
    }

    #[test]
    fn binary_coded_decimal() {
        let (mut emu, _tx) = emu();
        emu.regs.set_register(1, 0x1A5u16 as u8);
        emu.mem.set_index(0x300);
        exec(&mut emu, 0xF133);
        assert_eq!(emu.mem.slice(0x300, 3).unwrap(), &[1, 6, 5]);

        emu.regs.set_register(1, 7);
        exec(&mut emu, 0xF133);
        assert_eq!(emu.mem.slice(0x300, 3).unwrap(), &[0, 0, 7]);
    }

    #[test]
    fn store_and_load_registers() {
        let (mut emu, _tx) = emu();
        for reg in 0..=3 {
            emu.regs.set_register(reg, 0x10 + reg);
        }
        emu.regs.set_register(4, 0xEE);
        emu.mem.set_index(0x400);
        exec(&mut emu, 0xF355);
        assert_eq!(emu.mem.slice(0x400, 5).unwrap(), &[0x10, 0x11, 0x12, 0x13, 0x00]);
        // I is left alone
        assert_eq!(emu.mem.index.0, 0x400);

        for reg in 0..=4 {
            emu.regs.set_register(reg, 0);
        }
        exec(&mut emu, 0xF365);
        assert_eq!(&emu.regs.as_slice()[..5], &[0x10, 0x11, 0x12, 0x13, 0x00]);
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        let (mut emu, _tx) = emu();
        emu.load_program(&[0x00, 0x00, 0x81, 0x2F]).unwrap();
        emu.step().unwrap();
        let err = emu.run().unwrap_err();
        assert!(matches!(
            err,
            EmuError::UnknownOpcode { opcode: 0x812F, pc: 0x202 }
        ));
    }

    #[test]
    fn run_stops_on_quit_flag() {
        let (mut emu, _tx) = emu();
        emu.quit_handle().store(true, Ordering::Release);
        emu.run().unwrap();
        assert_eq!(emu.mem.pc.0 as usize, PROGRAM_START);
    }

    #[test]
    fn step_mode_waits_for_step_events() {
        let (mut emu, tx) = emu_with(EmulatorConfig {
            step_mode: true,
            ..EmulatorConfig::headless(1)
        });
        emu.load_program(&[0x60, 0x01, 0x61, 0x02, 0x62, 0x03, 0x12, 0x06])
            .unwrap();
        tx.send(InputEvent::Step).unwrap();
        tx.send(InputEvent::Quit).unwrap();
        emu.run().unwrap();
        assert_eq!(emu.regs.get(0), 1);
        assert_eq!(emu.regs.get(1), 2);
        assert_eq!(emu.regs.get(2), 0);
        assert_eq!(emu.mem.pc.0, 0x204);
    }

    #[test]
    fn step_mode_runs_first_instruction_immediately() {
        let (mut emu, tx) = emu_with(EmulatorConfig {
            step_mode: true,
            ..EmulatorConfig::headless(1)
        });
        emu.load_program(&[0x60, 0x01, 0x61, 0x02]).unwrap();
        tx.send(InputEvent::Quit).unwrap();
        assert_eq!(emu.step().unwrap(), Flow::Continue);
        assert_eq!(emu.step().unwrap(), Flow::Halt);
        assert_eq!(emu.regs.get(0), 1);
        assert_eq!(emu.regs.get(1), 0);
        assert_eq!(emu.mem.pc.0, 0x202);
    }

    #[test]
    fn state_dump_lists_machine_state() {
        let (mut emu, _tx) = emu();
        exec(&mut emu, 0x6A7F);
        let dump = emu.state_dump();
        assert!(dump.contains("A: 0x7f"));
        assert!(dump.contains("PC: 0x202"));
        assert!(dump.contains("Opcode: 6A7F"));
    }
}
