//! Idle-shutdown countdown: after a period of no keying activity, the
//! registered callback is invoked once to release any held audio/hardware
//! resources. Any new activity cancels a pending countdown.
//!
//! Grounded on the finalization timer of the C original (a ten-second
//! `SIGALRM` countdown armed whenever the library goes idle, cancelled by
//! any further send/receive call).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::timer::TimerSource;

/// Countdown length before the idle callback fires, matching the original's
/// `FINALIZATION_DELAY`.
pub const FINALIZATION_DELAY: Duration = Duration::from_micros(10_000_000);

/// Tick granularity the countdown is driven at.
const TICK: Duration = Duration::from_micros(1_000_000);

/// Ticks remaining before the callback fires; armed to `TICKS_TOTAL` by
/// [`Finalizer::schedule`] and decremented by [`Finalizer::clock`].
const TICKS_TOTAL: u32 = (FINALIZATION_DELAY.as_micros() / TICK.as_micros()) as u32;

/// Drives an idle-timeout callback on a 1-second tick cadence. Not itself a
/// `TimerSource` registrant — [`crate::CwInstance`] calls [`Finalizer::clock`]
/// from its own registered handler once a second.
pub struct Finalizer {
    armed: AtomicBool,
    ticks_remaining: AtomicU32,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl Finalizer {
    pub fn new(callback: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self { armed: AtomicBool::new(false), ticks_remaining: AtomicU32::new(0), callback }
    }

    /// Arm (or re-arm) the countdown from the top. Called whenever the
    /// library goes idle (tone queue empties, keyer/straight key releases
    /// the owner token).
    pub fn schedule(&self) {
        self.ticks_remaining.store(TICKS_TOTAL, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Cancel a pending countdown. Called on any new send/receive activity.
    pub fn cancel(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Advance the countdown by one tick. Invokes the callback and disarms
    /// once the countdown reaches zero; a no-op while disarmed.
    pub fn clock(&self) {
        if !self.armed.load(Ordering::SeqCst) {
            return;
        }
        let remaining = self.ticks_remaining.fetch_sub(1, Ordering::SeqCst);
        if remaining <= 1 {
            self.armed.store(false, Ordering::SeqCst);
            (self.callback)();
        }
    }

    /// Register this finalizer's tick with `timer`, driven at [`TICK`]
    /// granularity forever (the handler is cheap and a no-op while
    /// disarmed, so it is simplest to just always request the next tick).
    pub fn drive(self: &Arc<Self>, timer: Arc<dyn TimerSource>, id: crate::timer::HandlerId) {
        let weak = Arc::downgrade(self);
        let timer_for_handler = Arc::clone(&timer);
        let _ = timer.register_handler(
            id,
            Arc::new(move || {
                if let Some(finalizer) = weak.upgrade() {
                    finalizer.clock();
                }
                timer_for_handler.request_timeout(TICK);
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::VirtualClock;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn fires_after_ten_seconds_of_ticks() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let finalizer = Finalizer::new(Arc::new(move || { f.fetch_add(1, Ordering::SeqCst); }));
        finalizer.schedule();
        for _ in 0..(TICKS_TOTAL - 1) {
            finalizer.clock();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        finalizer.clock();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!finalizer.is_armed());
    }

    #[test]
    fn cancel_before_expiry_suppresses_callback() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let finalizer = Finalizer::new(Arc::new(move || { f.fetch_add(1, Ordering::SeqCst); }));
        finalizer.schedule();
        finalizer.clock();
        finalizer.cancel();
        for _ in 0..TICKS_TOTAL {
            finalizer.clock();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unarmed_clock_is_a_no_op() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let finalizer = Finalizer::new(Arc::new(move || { f.fetch_add(1, Ordering::SeqCst); }));
        for _ in 0..TICKS_TOTAL {
            finalizer.clock();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drives_via_virtual_clock_registration() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let finalizer = Arc::new(Finalizer::new(Arc::new(move || { f.fetch_add(1, Ordering::SeqCst); })));
        let clock = Arc::new(VirtualClock::new());
        let as_source: Arc<dyn TimerSource> = clock.clone();
        finalizer.drive(as_source, crate::timer::HandlerId(31));
        finalizer.schedule();
        clock.request_timeout(TICK);
        for _ in 0..TICKS_TOTAL {
            clock.advance(TICK);
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
