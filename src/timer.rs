//! Timer service: dispatches periodic/one-shot wakeups to subsystems that
//! registered interest, and exposes a `block_callback` critical section.
//!
//! Grounded on `cw_request_timeout_internal`/`cw_sigalrm_handler_internal`
//! of the C original, with the Design Notes' required re-architecture:
//! no process-wide `SIGALRM`, just a `TimerSource` capability object that
//! calls back on expiry. Two implementations are provided — [`HostTimer`],
//! a real background-thread timer for production use, and [`VirtualClock`],
//! a manually-advanced logical clock for deterministic tests.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{CwError, CwResult};

/// Identifies a registered tick handler so re-registration is a no-op,
/// mirroring the original's dedup-by-function-pointer behavior in
/// `cw_request_timeout_internal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u32);

pub const MAX_HANDLERS: usize = 32;

type Handler = Arc<dyn Fn() + Send + Sync>;

/// Capability to request a one-shot wakeup after a delay, optionally
/// registering a recurring handler that is invoked on every subsequent tick
/// this source delivers (any tick, not just ones the registrant requested).
pub trait TimerSource: Send + Sync {
    /// Register `handler` under `id` if not already registered. Returns
    /// `OutOfMemory` if the handler table is full.
    fn register_handler(&self, id: HandlerId, handler: Handler) -> CwResult<()>;

    /// Request a wakeup in `delay`. A delay of zero fires the dispatch
    /// immediately (synchronously, on the calling thread), matching the
    /// original's `raise(SIGALRM)` short-circuit for `usecs <= 0`.
    fn request_timeout(&self, delay: Duration);

    /// Block (or unblock) tick dispatch for the duration of a critical
    /// section. Nested calls are not supported; callers must balance
    /// block/unblock, exactly as the original's SIGALRM-blocking did.
    fn block_callback(&self, is_block: bool);

    /// Cancel any pending timeout. Used by the finalization controller:
    /// any new timer activity cancels a scheduled shutdown.
    fn cancel_pending(&self);
}

struct Shared {
    handlers: Mutex<Vec<(HandlerId, Handler)>>,
    blocked: Mutex<bool>,
}

impl Shared {
    fn new() -> Self {
        Self { handlers: Mutex::new(Vec::new()), blocked: Mutex::new(false) }
    }

    fn register(&self, id: HandlerId, handler: Handler) -> CwResult<()> {
        let mut handlers = self.handlers.lock().unwrap();
        if handlers.iter().any(|(hid, _)| *hid == id) {
            return Ok(());
        }
        if handlers.len() >= MAX_HANDLERS {
            return Err(CwError::OutOfMemory("tick handler table is full"));
        }
        handlers.push((id, handler));
        Ok(())
    }

    fn dispatch(&self) {
        if *self.blocked.lock().unwrap() {
            return;
        }
        let handlers: Vec<Handler> = self.handlers.lock().unwrap().iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler();
        }
    }
}

/// Production timer backed by a background thread that sleeps to the next
/// requested deadline and then dispatches every registered handler.
pub struct HostTimer {
    shared: Arc<Shared>,
    deadline: Arc<(Mutex<Option<Instant>>, Condvar)>,
    _worker: thread::JoinHandle<()>,
}

impl HostTimer {
    pub fn new() -> Self {
        let shared = Arc::new(Shared::new());
        let deadline = Arc::new((Mutex::new(None::<Instant>), Condvar::new()));

        let worker_shared = Arc::clone(&shared);
        let worker_deadline = Arc::clone(&deadline);
        let worker = thread::spawn(move || loop {
            let (lock, cvar) = &*worker_deadline;
            let mut guard = lock.lock().unwrap();
            loop {
                match *guard {
                    None => guard = cvar.wait(guard).unwrap(),
                    Some(when) => {
                        let now = Instant::now();
                        if now >= when {
                            *guard = None;
                            break;
                        }
                        let (g, timeout_result) = cvar.wait_timeout(guard, when - now).unwrap();
                        guard = g;
                        if timeout_result.timed_out() {
                            continue;
                        }
                    }
                }
            }
            drop(guard);
            worker_shared.dispatch();
        });

        Self { shared, deadline, _worker: worker }
    }
}

impl Default for HostTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerSource for HostTimer {
    fn register_handler(&self, id: HandlerId, handler: Handler) -> CwResult<()> {
        self.shared.register(id, handler)
    }

    fn request_timeout(&self, delay: Duration) {
        if delay.is_zero() {
            self.shared.dispatch();
            return;
        }
        let (lock, cvar) = &*self.deadline;
        let mut guard = lock.lock().unwrap();
        *guard = Some(Instant::now() + delay);
        cvar.notify_all();
    }

    fn block_callback(&self, is_block: bool) {
        *self.shared.blocked.lock().unwrap() = is_block;
    }

    fn cancel_pending(&self) {
        let (lock, cvar) = &*self.deadline;
        *lock.lock().unwrap() = None;
        cvar.notify_all();
    }
}

/// Deterministic logical clock for tests: time only moves when
/// [`VirtualClock::advance`] is called, which synchronously dispatches every
/// registered handler whose requested delay has elapsed.
pub struct VirtualClock {
    shared: Shared,
    pending: Mutex<VecDeque<Duration>>,
    now: Mutex<Duration>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self {
            shared: Shared::new(),
            pending: Mutex::new(VecDeque::new()),
            now: Mutex::new(Duration::ZERO),
        }
    }

    /// Advance the clock by `step`, dispatching handlers for any pending
    /// request whose deadline has now been reached.
    pub fn advance(&self, step: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += step;
        let mut pending = self.pending.lock().unwrap();
        let mut fired = false;
        pending.retain(|deadline| {
            if *deadline <= *now {
                fired = true;
                false
            } else {
                true
            }
        });
        drop(pending);
        drop(now);
        if fired {
            self.shared.dispatch();
        }
    }

    pub fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerSource for VirtualClock {
    fn register_handler(&self, id: HandlerId, handler: Handler) -> CwResult<()> {
        self.shared.register(id, handler)
    }

    fn request_timeout(&self, delay: Duration) {
        if delay.is_zero() {
            self.shared.dispatch();
            return;
        }
        let deadline = *self.now.lock().unwrap() + delay;
        self.pending.lock().unwrap().push_back(deadline);
    }

    fn block_callback(&self, is_block: bool) {
        *self.shared.blocked.lock().unwrap() = is_block;
    }

    fn cancel_pending(&self) {
        self.pending.lock().unwrap().clear();
    }
}
