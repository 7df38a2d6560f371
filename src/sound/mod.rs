//! Sound generation backends: the trait every backend implements, plus a
//! null backend used for tests and whenever no audio device is wanted.
//!
//! Generalizes the teacher crate's `AudioOutput` trait (a single
//! play/tone-on/tone-off/frequency/volume interface) to the keyed sidetone
//! contract the rest of this crate drives it with: a backend does not play
//! whole sequences, it just tracks "key is down at frequency F, volume V"
//! and is polled for samples by its own audio thread.

pub mod console;
#[cfg(feature = "audio-cpal")]
pub mod pcm;

use std::sync::Arc;

use crate::error::CwResult;

/// A keyed sidetone output. Implementations own whatever audio/device
/// resource they need and react to `key_down`/`key_up` by starting/stopping
/// tone generation; the actual sample synthesis (envelope, phase
/// continuity) lives in the PCM backend.
pub trait AudioOutput: Send {
    /// Begin tone output at the generator's current frequency/volume.
    fn key_down(&mut self) -> CwResult<()>;
    /// Stop tone output. Implementations that ramp down should not block
    /// here; the ramp happens on the audio thread.
    fn key_up(&mut self) -> CwResult<()>;
    fn set_frequency(&mut self, hz: u32) -> CwResult<()>;
    fn set_volume(&mut self, percent: u32) -> CwResult<()>;
}

/// Silent backend: tracks state but produces no sound. Used for tests and
/// headless operation.
#[derive(Debug, Default)]
pub struct NullAudio {
    pub keyed: bool,
    pub frequency: u32,
    pub volume: u32,
}

impl AudioOutput for NullAudio {
    fn key_down(&mut self) -> CwResult<()> {
        self.keyed = true;
        Ok(())
    }

    fn key_up(&mut self) -> CwResult<()> {
        self.keyed = false;
        Ok(())
    }

    fn set_frequency(&mut self, hz: u32) -> CwResult<()> {
        self.frequency = hz;
        Ok(())
    }

    fn set_volume(&mut self, percent: u32) -> CwResult<()> {
        self.volume = percent;
        Ok(())
    }
}

/// Opens a fresh backend instance. [`crate::CwInstance`] calls this once at
/// construction and again whenever activity resumes after the finalizer (or
/// `complete_reset`) has released the backend — mirrors the original's
/// `cw_release_sound_internal`/reopen-on-next-tone device lifecycle.
pub type AudioFactory = Arc<dyn Fn() -> CwResult<Box<dyn AudioOutput>> + Send + Sync>;

/// Sample rate the PCM backend's envelope math is tuned for.
pub const SAMPLE_RATE: u32 = 44_100;

/// Fragment size used by the amplitude ramp (kept as a named constant
/// purely for documentation/testing symmetry with the original's
/// `CW_OSS_GENERATOR_BUF_SIZE`; the cpal backend streams whatever buffer
/// size the host gives it).
pub const GENERATOR_FRAGMENT_SIZE: usize = 128;

/// Full-scale amplitude for a signed 16-bit sample.
pub const VOLUME_RANGE: i32 = 1 << 15;
