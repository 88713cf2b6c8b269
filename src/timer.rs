use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{config::TimerMode, sound::Speaker};

// ~59 Hz
pub const TICK_INTERVAL: Duration = Duration::from_millis(17);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    pub count: u8,
}

impl Timer {
    pub fn new(init_count: u8) -> Self {
        Self { count: init_count }
    }

    pub fn set(&mut self, value: u8) {
        self.count = value;
    }

    /// Decrements once. Returns false if the timer was already at zero.
    pub fn tick(&mut self) -> bool {
        if self.count == 0 {
            return false;
        }
        self.count -= 1;
        true
    }
}

/// Delay and sound timers plus the policy deciding when they tick.
#[derive(Debug)]
pub struct Timers {
    pub delay: Timer,
    pub sound: Timer,
    mode: TimerMode,
    interval: Duration,
    last_tick: Instant,
}

impl Timers {
    pub fn new(mode: TimerMode, interval: Duration) -> Self {
        Self {
            delay: Timer::default(),
            sound: Timer::default(),
            mode,
            interval,
            last_tick: Instant::now(),
        }
    }

    /// Runs at the start of every cycle. Returns how many ticks were consumed.
    pub fn sync<S: Speaker + ?Sized>(&mut self, speaker: &mut S) -> u32 {
        match self.mode {
            TimerMode::Blocking => self.decay_to_zero(speaker),
            TimerMode::Realtime => self.catch_up(speaker),
        }
    }

    // sound first, then delay, each one tick per interval until empty
    fn decay_to_zero<S: Speaker + ?Sized>(&mut self, speaker: &mut S) -> u32 {
        let mut ticks = 0;
        while self.sound.tick() {
            speaker.beep();
            thread::sleep(self.interval);
            ticks += 1;
        }
        while self.delay.tick() {
            thread::sleep(self.interval);
            ticks += 1;
        }
        self.last_tick = Instant::now();
        ticks
    }

    fn catch_up<S: Speaker + ?Sized>(&mut self, speaker: &mut S) -> u32 {
        let elapsed = self.last_tick.elapsed();
        let due = if self.interval.is_zero() {
            1
        } else {
            elapsed.as_nanos() / self.interval.as_nanos()
        };
        if due == 0 {
            return 0;
        }
        let due = u32::try_from(due).unwrap_or(u32::MAX);
        self.last_tick = match self.interval.checked_mul(due) {
            Some(step) => self.last_tick + step,
            None => Instant::now(),
        };

        // nothing changes after 255 ticks
        for _ in 0..due.min(u8::MAX as u32) {
            if self.sound.tick() {
                speaker.beep();
            }
            self.delay.tick();
        }
        due
    }
}
