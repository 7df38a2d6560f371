//! Straight key: a simple key-up/key-down shim that keeps the sound
//! generator fed with a keep-alive tick while the key is held down.
//!
//! Grounded on `cw_notify_straight_key_event`/`cw_straight_key_clock_internal`
//! of the C original.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CwError, CwResult};
use crate::owner::{Claimant, Owner};

/// Tones generated by the sidetone backend are buffered in chunks shorter
/// than this; while the key is held, a tick is requested at this interval
/// to keep feeding the device so it doesn't underrun.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_micros(500_000);

pub struct StraightKey {
    key_down: AtomicBool,
    owner: Arc<Owner>,
}

impl StraightKey {
    pub fn new(owner: Arc<Owner>) -> Self {
        Self { key_down: AtomicBool::new(false), owner }
    }

    pub fn is_down(&self) -> bool {
        self.key_down.load(Ordering::SeqCst)
    }

    /// Notify a key state change. A call that doesn't change state is
    /// ignored (matching the original, which treats repeated identical
    /// notifications as a no-op rather than an error). Returns `None` if
    /// the call was a no-op, or `Some(now_down)` if the key actually
    /// transitioned, so the caller knows whether to key the audio backend
    /// on and arm the keep-alive tick, or key it off and schedule
    /// finalization.
    pub fn notify_key_event(&self, down: bool) -> CwResult<Option<bool>> {
        if !self.owner.is_free() && self.owner.current() != Some(Claimant::StraightKey) {
            return Err(CwError::Busy("tone queue or keyer owns the keying output"));
        }

        let was_down = self.key_down.swap(down, Ordering::SeqCst);
        if was_down == down {
            return Ok(None);
        }

        if down {
            self.owner.claim(Claimant::StraightKey)?;
        } else {
            self.owner.release(Claimant::StraightKey);
        }
        Ok(Some(down))
    }

    /// Called on every keep-alive tick. Returns whether another tick should
    /// be scheduled (true as long as the key is still down).
    pub fn clock(&self) -> bool {
        self.is_down()
    }
}
