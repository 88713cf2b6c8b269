use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use minifb::Key;

pub const KEY_COUNT: usize = 16;

/// Events sent by the input side to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown(u8),
    KeyUp(u8),
    /// Run one instruction in step mode.
    Step,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyWait {
    Pressed(u8),
    Quit,
}

/// Logical 16-key keypad as seen by the engine.
pub trait Keypad {
    fn is_pressed(&mut self, key: u8) -> bool;

    /// Blocks until a key is down and returns its value, or `KeyWait::Quit` if
    /// the input side shut down first.
    fn wait_for_key(&mut self) -> KeyWait;

    /// Blocks until a step is requested. Returns false on quit.
    fn wait_for_step(&mut self) -> bool;
}

/// Keypad fed by an mpsc channel of `InputEvent`s.
pub struct ChannelKeypad {
    keys: [bool; KEY_COUNT],
    events: Receiver<InputEvent>,
    pending_steps: u32,
    quit: bool,
}

impl ChannelKeypad {
    pub fn new(events: Receiver<InputEvent>) -> Self {
        Self {
            keys: [false; KEY_COUNT],
            events,
            pending_steps: 0,
            quit: false,
        }
    }

    pub fn channel() -> (Sender<InputEvent>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self::new(rx))
    }

    pub fn is_quit(&self) -> bool {
        self.quit
    }

    fn apply(&mut self, event: InputEvent) {
        match event {
            InputEvent::KeyDown(k) if (k as usize) < KEY_COUNT => self.keys[k as usize] = true,
            InputEvent::KeyUp(k) if (k as usize) < KEY_COUNT => self.keys[k as usize] = false,
            InputEvent::KeyDown(_) | InputEvent::KeyUp(_) => {}
            InputEvent::Step => self.pending_steps += 1,
            InputEvent::Quit => self.quit = true,
        }
    }

    fn drain(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.apply(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.quit = true;
                    break;
                }
            }
        }
    }

    fn held_key(&self) -> Option<u8> {
        self.keys.iter().position(|down| *down).map(|k| k as u8)
    }
}

impl Keypad for ChannelKeypad {
    fn is_pressed(&mut self, key: u8) -> bool {
        self.drain();
        self.keys.get(key as usize).copied().unwrap_or(false)
    }

    fn wait_for_key(&mut self) -> KeyWait {
        self.drain();
        if self.quit {
            return KeyWait::Quit;
        }
        if let Some(key) = self.held_key() {
            return KeyWait::Pressed(key);
        }
        while let Ok(event) = self.events.recv() {
            self.apply(event);
            match event {
                InputEvent::KeyDown(k) if (k as usize) < KEY_COUNT => return KeyWait::Pressed(k),
                InputEvent::Quit => return KeyWait::Quit,
                _ => {}
            }
        }
        self.quit = true;
        KeyWait::Quit
    }

    fn wait_for_step(&mut self) -> bool {
        self.drain();
        loop {
            if self.pending_steps > 0 {
                self.pending_steps -= 1;
                return true;
            }
            if self.quit {
                return false;
            }
            match self.events.recv() {
                Ok(event) => self.apply(event),
                Err(_) => self.quit = true,
            }
        }
    }
}

// 1 2 3 C      1 2 3 4
// 4 5 6 D  <-  Q W E R
// 7 8 9 E      A S D F
// A 0 B F      Z X C V
pub fn key_to_num(key: Key) -> Option<u8> {
    match key {
        Key::Key1 => Some(0x1),
        Key::Key2 => Some(0x2),
        Key::Key3 => Some(0x3),
        Key::Key4 => Some(0xC),
        Key::Q => Some(0x4),
        Key::W => Some(0x5),
        Key::E => Some(0x6),
        Key::R => Some(0xD),
        Key::A => Some(0x7),
        Key::S => Some(0x8),
        Key::D => Some(0x9),
        Key::F => Some(0xE),
        Key::Z => Some(0xA),
        Key::X => Some(0x0),
        Key::C => Some(0xB),
        Key::V => Some(0xF),
        _ => None,
    }
}
