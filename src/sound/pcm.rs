//! PCM sidetone backend: a continuously running cpal output stream that
//! synthesizes a sine wave with a linear amplitude envelope, keyed on and
//! off by [`PcmAudio::key_down`]/[`key_up`][PcmAudio::key_up].
//!
//! Adapted from the teacher crate's `cpal_backend.rs` `Arc<Mutex<SharedState>>`
//! + generic `build_stream` pattern, generalized with the envelope ramp and
//! phase continuity the original C generator has (`cw_oss_generator_calculate_amplitude`,
//! `generator->slope`) that the teacher's hard on/off sine lacked — without
//! the ramp, keying produces an audible click at every element edge.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use std::sync::{Arc, Mutex};

use super::AudioOutput;
use crate::error::{CwError, CwResult};

/// Attack/decay time for the amplitude ramp. The original's magic constant
/// `CW_OSS_GENERATOR_SLOPE = 100` was tuned by ear for a fixed 48 kHz device
/// sample rate; expressing it as a duration instead makes the ramp behave
/// the same regardless of the host's actual sample rate.
const ENVELOPE_ATTACK_SECS: f32 = 0.002;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Envelope {
    Silent,
    Rising,
    Steady,
    Falling,
}

struct SharedState {
    envelope: Envelope,
    amplitude: f32,
    frequency: f32,
    volume: f32,
    phase: f32,
    sample_rate: f32,
    slope_per_sample: f32,
}

impl SharedState {
    fn advance_amplitude(&mut self) {
        match self.envelope {
            Envelope::Silent => self.amplitude = 0.0,
            Envelope::Steady => self.amplitude = self.volume,
            Envelope::Rising => {
                self.amplitude += self.slope_per_sample;
                if self.amplitude >= self.volume {
                    self.amplitude = self.volume;
                    self.envelope = Envelope::Steady;
                }
            }
            Envelope::Falling => {
                self.amplitude -= self.slope_per_sample;
                if self.amplitude <= 0.0 {
                    self.amplitude = 0.0;
                    self.envelope = Envelope::Silent;
                }
            }
        }
    }
}

pub struct PcmAudio {
    state: Arc<Mutex<SharedState>>,
    _stream: Stream,
}

// cpal::Stream is !Send on some hosts purely because of a raw platform
// handle it never shares across threads concurrently; we only ever touch
// it from the thread that owns `PcmAudio`.
unsafe impl Send for PcmAudio {}

impl PcmAudio {
    pub fn new(initial_frequency: u32, initial_volume_percent: u32) -> CwResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(CwError::NotFound("no default audio output device"))?;
        let config = device
            .default_output_config()
            .map_err(|e| CwError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        let sample_rate = config.sample_rate().0 as f32;
        // Amplitude is tracked as a normalized [0.0, 1.0] fraction of full
        // scale, so the ramp's slope is simply 1.0 over the attack window.
        let slope_per_sample = 1.0 / (sample_rate * ENVELOPE_ATTACK_SECS);

        let state = Arc::new(Mutex::new(SharedState {
            envelope: Envelope::Silent,
            amplitude: 0.0,
            frequency: initial_frequency as f32,
            volume: initial_volume_percent as f32 / 100.0,
            phase: 0.0,
            sample_rate,
            slope_per_sample,
        }));

        let shared = Arc::clone(&state);
        let stream = match config.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config.into(), shared)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config.into(), shared)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config.into(), shared)?,
            other => return Err(CwError::Unsupported(sample_format_name(other))),
        };
        stream.play().map_err(|e| CwError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        Ok(Self { state, _stream: stream })
    }
}

fn sample_format_name(_format: SampleFormat) -> &'static str {
    "unsupported cpal sample format"
}

fn build_stream<S>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    state: Arc<Mutex<SharedState>>,
) -> CwResult<Stream>
where
    S: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [S], _: &cpal::OutputCallbackInfo| {
                let mut s = state.lock().unwrap();
                let step = s.frequency / s.sample_rate;
                for frame in data.chunks_mut(channels) {
                    s.advance_amplitude();
                    let sample = if s.amplitude > 0.0 {
                        let v = (s.phase * 2.0 * std::f32::consts::PI).sin() * s.amplitude;
                        s.phase = (s.phase + step) % 1.0;
                        v
                    } else {
                        // Phase is intentionally preserved across silence so a
                        // tone resuming mid-cycle doesn't click from a phase jump.
                        0.0
                    };
                    let out = S::from_sample(sample);
                    for channel_sample in frame.iter_mut() {
                        *channel_sample = out;
                    }
                }
            },
            |e| log::error!("audio stream error: {e}"),
            None,
        )
        .map_err(|e| CwError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    Ok(stream)
}

impl AudioOutput for PcmAudio {
    fn key_down(&mut self) -> CwResult<()> {
        let mut s = self.state.lock().unwrap();
        s.envelope = Envelope::Rising;
        Ok(())
    }

    fn key_up(&mut self) -> CwResult<()> {
        let mut s = self.state.lock().unwrap();
        if s.envelope != Envelope::Silent {
            s.envelope = Envelope::Falling;
        }
        Ok(())
    }

    fn set_frequency(&mut self, hz: u32) -> CwResult<()> {
        self.state.lock().unwrap().frequency = hz as f32;
        Ok(())
    }

    fn set_volume(&mut self, percent: u32) -> CwResult<()> {
        self.state.lock().unwrap().volume = percent as f32 / 100.0;
        Ok(())
    }
}
