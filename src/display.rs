use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const WIDTH: usize = 64;
pub const HEIGHT: usize = 32;

/// 64x32 monochrome screen, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    bit_buffer: Vec<bool>,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            bit_buffer: vec![false; WIDTH * HEIGHT],
        }
    }

    pub fn clear_buffer(&mut self) {
        self.bit_buffer.fill(false);
    }

    pub fn get(&self, x: usize, y: usize) -> bool {
        self.bit_buffer[(y % HEIGHT) * WIDTH + (x % WIDTH)]
    }

    pub fn bits(&self) -> &[bool] {
        &self.bit_buffer
    }

    pub fn lit_pixels(&self) -> usize {
        self.bit_buffer.iter().filter(|lit| **lit).count()
    }

    /// XORs `sprite` (one byte per row, MSB leftmost) onto the screen at (x, y),
    /// wrapping around both edges. Returns true if any lit pixel was switched off.
    pub fn paint(&mut self, x: u8, y: u8, sprite: &[u8]) -> bool {
        let mut collision = false;
        for (i, row) in sprite.iter().enumerate() {
            let ny = (y as usize + i) % HEIGHT;
            for j in 0..8 {
                let bit = (row >> (7 - j)) & 1 == 1;
                if !bit {
                    continue;
                }
                let nx = (x as usize + j) % WIDTH;
                let index = ny * WIDTH + nx;
                if self.bit_buffer[index] {
                    collision = true;
                }
                self.bit_buffer[index] ^= true;
            }
        }
        collision
    }

    /// Text rendering, one line per row.
    pub fn to_ascii(&self) -> String {
        let mut out = String::with_capacity((WIDTH + 1) * HEIGHT);
        for row in self.bit_buffer.chunks(WIDTH) {
            out.extend(row.iter().map(|lit| if *lit { '#' } else { '.' }));
            out.push('\n');
        }
        out
    }
}

/// Presents the framebuffer after every clear or draw.
pub trait Screen {
    fn present(&mut self, fb: &FrameBuffer);
}

/// Counts presents and keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Headless {
    pub frames: u32,
}

impl Screen for Headless {
    fn present(&mut self, _fb: &FrameBuffer) {
        self.frames += 1;
    }
}

/// Single-frame mailbox between the engine and the window. Presenting
/// overwrites the pending frame, so a fast engine never queues more than one.
#[derive(Debug, Clone, Default)]
pub struct FrameSlot(Arc<Mutex<Option<FrameBuffer>>>);

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<FrameBuffer>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the latest frame presented since the last call, if any.
    pub fn take(&self) -> Option<FrameBuffer> {
        self.lock().take()
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }
}

impl Screen for FrameSlot {
    fn present(&mut self, fb: &FrameBuffer) {
        let mut slot = self.lock();
        match slot.as_mut() {
            // reuse the pending allocation
            Some(pending) => pending.bit_buffer.copy_from_slice(&fb.bit_buffer),
            None => *slot = Some(fb.clone()),
        }
    }
}
