use std::sync::mpsc::Sender;

use log::debug;
use minifb::{Key, KeyRepeat, Scale, WindowOptions};

use crate::{
    display::{FrameBuffer, HEIGHT, WIDTH},
    error::EmuError,
    keyboard::{key_to_num, InputEvent, KEY_COUNT},
};

/// Desktop window: shows frames and turns keyboard state into `InputEvent`s.
pub struct Window {
    window: minifb::Window,
    pixel_buffer: Vec<u32>,
    held: [bool; KEY_COUNT],
}

fn from_u16_rgb(r: u16, g: u16, b: u16) -> u32 {
    let (r, g, b) = (r as u32, g as u32, b as u32);
    (r << 16) | (g << 8) | b
}

pub fn scale_from_factor(factor: u8) -> Scale {
    match factor {
        0..=1 => Scale::X1,
        2..=3 => Scale::X2,
        4..=7 => Scale::X4,
        8..=15 => Scale::X8,
        16..=31 => Scale::X16,
        _ => Scale::X32,
    }
}

impl Window {
    pub fn new(title: &str, scale: Scale) -> Result<Self, EmuError> {
        let mut window = minifb::Window::new(
            title,
            WIDTH,
            HEIGHT,
            WindowOptions {
                scale,
                ..WindowOptions::default()
            },
        )
        .map_err(|err| EmuError::Window(err.to_string()))?;
        // Limit to max ~60 fps update rate
        window.limit_update_rate(Some(std::time::Duration::from_micros(16600)));
        Ok(Self {
            window,
            pixel_buffer: vec![0; WIDTH * HEIGHT],
            held: [false; KEY_COUNT],
        })
    }

    pub fn is_open(&self) -> bool {
        self.window.is_open() && !self.window.is_key_down(Key::Escape)
    }

    pub fn blit(&mut self, fb: &FrameBuffer) {
        for (pixel, lit) in self.pixel_buffer.iter_mut().zip(fb.bits()) {
            *pixel = if *lit {
                from_u16_rgb(0, 127, 255)
            } else {
                from_u16_rgb(0, 0, 0)
            };
        }
    }

    pub fn sync(&mut self) -> Result<(), EmuError> {
        self.window
            .update_with_buffer(&self.pixel_buffer, WIDTH, HEIGHT)
            .map_err(|err| EmuError::Window(err.to_string()))
    }

    /// Sends a KeyDown/KeyUp for every logical key whose state changed since
    /// the last poll, and a Step for each F1 press.
    pub fn poll_input(&mut self, input: &Sender<InputEvent>) {
        let mut now = [false; KEY_COUNT];
        for key in self.window.get_keys() {
            if let Some(num) = key_to_num(key) {
                now[num as usize] = true;
            }
        }

        let mut events: Vec<InputEvent> = now
            .iter()
            .zip(self.held.iter())
            .enumerate()
            .filter(|(_, (down, was))| down != was)
            .map(|(num, (down, _))| {
                if *down {
                    InputEvent::KeyDown(num as u8)
                } else {
                    InputEvent::KeyUp(num as u8)
                }
            })
            .collect();
        if self.window.is_key_pressed(Key::F1, KeyRepeat::No) {
            events.push(InputEvent::Step);
        }
        self.held = now;

        for event in events {
            if input.send(event).is_err() {
                debug!("engine stopped listening for input");
                break;
            }
        }
    }
}
