use std::time::Duration;

use clap::ValueEnum;

use crate::timer::TICK_INTERVAL;

/// When the delay and sound timers count down.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TimerMode {
    /// Before each fetch, run any nonzero timer all the way down to zero,
    /// one tick every interval. Instructions wait for the countdown.
    #[default]
    Blocking,
    /// Count down by wall-clock time without holding up instructions.
    Realtime,
}

#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    pub timer_mode: TimerMode,
    pub tick_interval: Duration,
    /// Seed for the random instruction. `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Wait for a step request before every instruction.
    pub step_mode: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            timer_mode: TimerMode::default(),
            tick_interval: TICK_INTERVAL,
            seed: None,
            step_mode: false,
        }
    }
}

impl EmulatorConfig {
    /// Deterministic settings with no real-time waits.
    pub fn headless(seed: u64) -> Self {
        Self {
            tick_interval: Duration::ZERO,
            seed: Some(seed),
            ..Self::default()
        }
    }
}
