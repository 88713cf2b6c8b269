use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use log::{debug, error};

use crate::{error::EmuError, timer::TICK_INTERVAL};

const TONE_HZ: f32 = 440.0;
const VOLUME: f32 = 0.1;

/// Receives one trigger per timer tick while the sound timer is nonzero.
pub trait Speaker {
    fn beep(&mut self);
}

/// Drops every trigger.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Speaker for Silent {
    fn beep(&mut self) {}
}

/// Counts triggers, for headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct CountingSpeaker {
    pub beeps: u32,
}

impl Speaker for CountingSpeaker {
    fn beep(&mut self) {
        self.beeps += 1;
    }
}

/// Owns the output stream. Must stay alive (and on the thread that made it)
/// for as long as a `BeepHandle` is in use.
pub struct Beeper {
    _stream: cpal::Stream,
}

/// Sendable side of a `Beeper`: each beep keeps the tone on for one tick.
#[derive(Debug, Clone)]
pub struct BeepHandle {
    remaining: Arc<AtomicU32>,
    samples_per_beep: u32,
}

impl Speaker for BeepHandle {
    fn beep(&mut self) {
        self.remaining
            .fetch_max(self.samples_per_beep, Ordering::Relaxed);
    }
}

fn audio_err(err: impl std::fmt::Display) -> EmuError {
    EmuError::Audio(err.to_string())
}

impl Beeper {
    pub fn new() -> Result<(Self, BeepHandle), EmuError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| audio_err("no output device available"))?;
        let supported_config = device.default_output_config().map_err(audio_err)?;
        let sample_format = supported_config.sample_format();
        let config: cpal::StreamConfig = supported_config.into();
        let remaining = Arc::new(AtomicU32::new(0));

        let stream = match sample_format {
            cpal::SampleFormat::I8 => Self::run::<i8>(&device, &config, remaining.clone()),
            cpal::SampleFormat::I16 => Self::run::<i16>(&device, &config, remaining.clone()),
            cpal::SampleFormat::I32 => Self::run::<i32>(&device, &config, remaining.clone()),
            cpal::SampleFormat::I64 => Self::run::<i64>(&device, &config, remaining.clone()),
            cpal::SampleFormat::U8 => Self::run::<u8>(&device, &config, remaining.clone()),
            cpal::SampleFormat::U16 => Self::run::<u16>(&device, &config, remaining.clone()),
            cpal::SampleFormat::U32 => Self::run::<u32>(&device, &config, remaining.clone()),
            cpal::SampleFormat::U64 => Self::run::<u64>(&device, &config, remaining.clone()),
            cpal::SampleFormat::F32 => Self::run::<f32>(&device, &config, remaining.clone()),
            cpal::SampleFormat::F64 => Self::run::<f64>(&device, &config, remaining.clone()),
            sample_format => {
                return Err(audio_err(format!(
                    "Unsupported sample format '{sample_format}'"
                )))
            }
        }?;
        stream.play().map_err(audio_err)?;

        let samples_per_beep =
            (config.sample_rate.0 as u128 * TICK_INTERVAL.as_millis() / 1000) as u32;
        debug!(
            "audio stream open: {} Hz, {} channels, {sample_format}",
            config.sample_rate.0, config.channels
        );

        Ok((
            Self { _stream: stream },
            BeepHandle {
                remaining,
                samples_per_beep,
            },
        ))
    }

    fn run<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        remaining: Arc<AtomicU32>,
    ) -> Result<cpal::Stream, EmuError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let sample_rate = config.sample_rate.0 as f32;
        let channels = config.channels as usize;

        let mut sample_clock = 0f32;
        let mut next_value = move || {
            sample_clock = (sample_clock + 1.0) % sample_rate;
            (sample_clock * TONE_HZ * 2.0 * std::f32::consts::PI / sample_rate).sin() * VOLUME
        };

        let err_fn = |err: cpal::StreamError| error!("an error occurred on stream: {}", err);

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    Self::write_data(data, channels, &remaining, &mut next_value)
                },
                err_fn,
                None,
            )
            .map_err(audio_err)
    }

    fn write_data<T>(
        output: &mut [T],
        channels: usize,
        remaining: &AtomicU32,
        next_sample: &mut dyn FnMut() -> f32,
    ) where
        T: Sample + FromSample<f32>,
    {
        for frame in output.chunks_mut(channels) {
            let playing = remaining
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok();
            let value: T = if playing {
                T::from_sample(next_sample())
            } else {
                T::from_sample(0.0f32)
            };
            for sample in frame.iter_mut() {
                *sample = value;
            }
        }
    }
}
