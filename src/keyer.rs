//! Iambic keyer: a nine-state machine driving dot/dash generation from two
//! paddle inputs, with Curtis mode A and mode B squeeze behavior.
//!
//! Grounded on `cw_keyer_clock_internal`/`cw_notify_keyer_paddle_event` of
//! the C original. The state graph, paddle latches, and Curtis-B "iambic
//! squeeze adds one more opposite element" latch are carried over exactly;
//! the SIGALRM-driven clock becomes a [`crate::timer::TimerSource`]
//! registration per the Design Notes' re-architecture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{CwError, CwResult};
use crate::owner::{Claimant, Owner};
use crate::params::Parameters;
use crate::tone_queue::ToneQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyerState {
    Idle,
    InDotA,
    InDashA,
    AfterDotA,
    AfterDashA,
    InDotB,
    InDashB,
    AfterDotB,
    AfterDashB,
}

struct Latches {
    dot_paddle: AtomicBool,
    dash_paddle: AtomicBool,
    dot_latch: AtomicBool,
    dash_latch: AtomicBool,
    curtis_b_latch: AtomicBool,
    curtis_mode_b: AtomicBool,
}

/// The iambic keyer. Owns its paddle/latch state; element generation is
/// driven by calling [`Keyer::clock`] whenever the registered timer fires.
pub struct Keyer {
    state: Mutex<KeyerState>,
    state_changed: Condvar,
    latches: Latches,
    queue: Arc<ToneQueue>,
    owner: Arc<Owner>,
}

impl Keyer {
    pub fn new(queue: Arc<ToneQueue>, owner: Arc<Owner>) -> Self {
        Self {
            state: Mutex::new(KeyerState::Idle),
            state_changed: Condvar::new(),
            latches: Latches {
                dot_paddle: AtomicBool::new(false),
                dash_paddle: AtomicBool::new(false),
                dot_latch: AtomicBool::new(false),
                dash_latch: AtomicBool::new(false),
                curtis_b_latch: AtomicBool::new(false),
                curtis_mode_b: AtomicBool::new(false),
            },
            queue,
            owner,
        }
    }

    /// Block until the keyer returns to `IDLE`. Fails immediately with
    /// `Deadlock` if either paddle is currently held down, since then the
    /// keyer would never go idle on its own and the wait would never
    /// return — matching the original's `cw_wait_for_keyer`.
    pub fn wait_for_keyer(&self) -> CwResult<()> {
        if self.latches.dot_paddle.load(Ordering::SeqCst) || self.latches.dash_paddle.load(Ordering::SeqCst) {
            return Err(CwError::Deadlock("a paddle is held down; the keyer will never go idle"));
        }
        let mut state = self.state.lock().unwrap();
        while *state != KeyerState::Idle {
            state = self.state_changed.wait(state).unwrap();
        }
        Ok(())
    }

    /// Block until the current element (or idle period) finishes, i.e.
    /// until the state machine has moved on from whatever state it was in
    /// when called, matching the original's `cw_wait_for_element`.
    pub fn wait_for_element(&self) -> CwResult<()> {
        let mut state = self.state.lock().unwrap();
        let observed = *state;
        while *state == observed {
            state = self.state_changed.wait(state).unwrap();
        }
        Ok(())
    }

    pub fn enable_curtis_mode_b(&self) {
        self.latches.curtis_mode_b.store(true, Ordering::SeqCst);
    }

    pub fn disable_curtis_mode_b(&self) {
        self.latches.curtis_mode_b.store(false, Ordering::SeqCst);
    }

    pub fn is_curtis_mode_b(&self) -> bool {
        self.latches.curtis_mode_b.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        *self.state.lock().unwrap() != KeyerState::Idle
    }

    /// Notify the keyer that the paddle states changed. Fails with `Busy`
    /// if the tone queue or straight key currently own the keying output.
    ///
    /// Returns the initial delay (if any) the caller should schedule via
    /// its `TimerSource` to kick the state machine off from idle, mirroring
    /// the original's "pretend we just finished the opposite element, then
    /// request an immediate timeout" idle-nudge.
    pub fn notify_paddle_event(&self, dot_down: bool, dash_down: bool, params: &mut Parameters) -> CwResult<Option<Duration>> {
        if !self.owner.is_free() && self.owner.current() != Some(Claimant::Keyer) {
            return Err(CwError::Busy("tone queue or straight key owns the keying output"));
        }

        self.latches.dot_paddle.store(dot_down, Ordering::SeqCst);
        self.latches.dash_paddle.store(dash_down, Ordering::SeqCst);
        if dot_down {
            self.latches.dot_latch.store(true, Ordering::SeqCst);
        }
        if dash_down {
            self.latches.dash_latch.store(true, Ordering::SeqCst);
        }
        if self.is_curtis_mode_b() && dot_down && dash_down {
            self.latches.curtis_b_latch.store(true, Ordering::SeqCst);
        }

        let mut state = self.state.lock().unwrap();
        if *state == KeyerState::Idle {
            self.owner.claim(Claimant::Keyer)?;
            if dot_down {
                *state = if self.latches.curtis_b_latch.load(Ordering::SeqCst) {
                    KeyerState::AfterDashB
                } else {
                    KeyerState::AfterDashA
                };
                self.state_changed.notify_all();
                return Ok(Some(Duration::ZERO));
            } else if dash_down {
                *state = if self.latches.curtis_b_latch.load(Ordering::SeqCst) {
                    KeyerState::AfterDotB
                } else {
                    KeyerState::AfterDotA
                };
                self.state_changed.notify_all();
                return Ok(Some(Duration::ZERO));
            }
        }
        Ok(None)
    }

    /// Advance the state machine one tick. Returns the delay the caller
    /// should schedule for the next tick, or `None` if the keyer has gone
    /// idle (in which case it releases the shared owner token).
    pub fn clock(&self, params: &mut Parameters) -> Option<Duration> {
        let t = params.send_timing();
        let mut state = self.state.lock().unwrap();
        let before = *state;

        let result = match *state {
            KeyerState::Idle => None,

            KeyerState::InDotA | KeyerState::InDotB => {
                let _ = self.queue.enqueue(Duration::ZERO, 0); // silence
                *state = if *state == KeyerState::InDotA { KeyerState::AfterDotA } else { KeyerState::AfterDotB };
                Some(duration_from_usecs(t.end_of_ele_delay))
            }

            KeyerState::InDashA | KeyerState::InDashB => {
                let _ = self.queue.enqueue(Duration::ZERO, 0);
                *state = if *state == KeyerState::InDashA { KeyerState::AfterDashA } else { KeyerState::AfterDashB };
                Some(duration_from_usecs(t.end_of_ele_delay))
            }

            KeyerState::AfterDotA | KeyerState::AfterDotB => {
                if !self.latches.dot_paddle.load(Ordering::SeqCst) {
                    self.latches.dot_latch.store(false, Ordering::SeqCst);
                }
                if *state == KeyerState::AfterDotB {
                    self.key_element(params.frequency(), t.dash_length);
                    *state = KeyerState::InDashA;
                    Some(duration_from_usecs(t.dash_length))
                } else if self.latches.dash_latch.load(Ordering::SeqCst) {
                    self.key_element(params.frequency(), t.dash_length);
                    *state = if self.latches.curtis_b_latch.swap(false, Ordering::SeqCst) {
                        KeyerState::InDashB
                    } else {
                        KeyerState::InDashA
                    };
                    Some(duration_from_usecs(t.dash_length))
                } else if self.latches.dot_latch.load(Ordering::SeqCst) {
                    self.key_element(params.frequency(), t.dot_length);
                    *state = KeyerState::InDotA;
                    Some(duration_from_usecs(t.dot_length))
                } else {
                    *state = KeyerState::Idle;
                    self.owner.release(Claimant::Keyer);
                    None
                }
            }

            KeyerState::AfterDashA | KeyerState::AfterDashB => {
                if !self.latches.dash_paddle.load(Ordering::SeqCst) {
                    self.latches.dash_latch.store(false, Ordering::SeqCst);
                }
                if *state == KeyerState::AfterDashB {
                    self.key_element(params.frequency(), t.dot_length);
                    *state = KeyerState::InDotA;
                    Some(duration_from_usecs(t.dot_length))
                } else if self.latches.dot_latch.load(Ordering::SeqCst) {
                    self.key_element(params.frequency(), t.dot_length);
                    *state = if self.latches.curtis_b_latch.swap(false, Ordering::SeqCst) {
                        KeyerState::InDotB
                    } else {
                        KeyerState::InDotA
                    };
                    Some(duration_from_usecs(t.dot_length))
                } else if self.latches.dash_latch.load(Ordering::SeqCst) {
                    self.key_element(params.frequency(), t.dash_length);
                    *state = KeyerState::InDashA;
                    Some(duration_from_usecs(t.dash_length))
                } else {
                    *state = KeyerState::Idle;
                    self.owner.release(Claimant::Keyer);
                    None
                }
            }
        };
        if *state != before {
            self.state_changed.notify_all();
        }
        result
    }

    fn key_element(&self, frequency: u32, duration_usecs: i64) {
        let _ = self.queue.enqueue(duration_from_usecs(duration_usecs), frequency);
    }
}

fn duration_from_usecs(usecs: i64) -> Duration {
    Duration::from_micros(usecs.max(0) as u64)
}
