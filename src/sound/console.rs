//! Console beeper backend contract.
//!
//! The actual ioctl/device glue for a kernel console beeper is explicitly
//! out of scope for this crate (it is platform-specific glue code, not
//! library logic) — this type exists so client code has something that
//! satisfies [`super::AudioOutput`] and documents the real hardware's
//! limitation: a console beeper is on/off only, it has no volume control.

use super::AudioOutput;
use crate::error::{CwError, CwResult};

#[derive(Debug, Default)]
pub struct ConsoleBeeper {
    frequency: u32,
}

impl ConsoleBeeper {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioOutput for ConsoleBeeper {
    fn key_down(&mut self) -> CwResult<()> {
        log::trace!("console beeper on at {} Hz (no device backend wired up)", self.frequency);
        Ok(())
    }

    fn key_up(&mut self) -> CwResult<()> {
        log::trace!("console beeper off");
        Ok(())
    }

    fn set_frequency(&mut self, hz: u32) -> CwResult<()> {
        self.frequency = hz;
        Ok(())
    }

    fn set_volume(&mut self, _percent: u32) -> CwResult<()> {
        Err(CwError::Unsupported("console beeper has no volume control"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_control_is_unsupported() {
        let mut beeper = ConsoleBeeper::new();
        assert!(matches!(beeper.set_volume(50), Err(CwError::Unsupported(_))));
    }
}
