//! Bounded FIFO of pending tones, drained one at a time by the timer
//! service. Grounded on `cw_tone_queue_clock_internal`/the `cw_tone_queue`
//! ring buffer of the C original.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{CwError, CwResult};

/// Ring buffer capacity. One slot is always kept free as a sentinel (the
/// original's head==tail-means-empty discipline), so the usable capacity is
/// [`CAPACITY`] - 1.
pub const CAPACITY: usize = 3_000;

/// Enqueues are refused once fewer than 100 slots remain free.
pub const HIGH_WATER_MARK: usize = 2_900;

#[derive(Debug, Clone, Copy)]
pub struct QueuedTone {
    pub duration: Duration,
    pub frequency: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueState {
    Idle,
    Busy,
}

struct Inner {
    queue: VecDeque<QueuedTone>,
    state: DequeueState,
    low_water_mark: usize,
}

/// The tone queue itself. Not `Sync`-sensitive logic beyond a single mutex:
/// enqueue happens from sender/keyer/straight-key threads, dequeue happens
/// from the timer dispatch thread.
pub struct ToneQueue {
    inner: Mutex<Inner>,
}

impl ToneQueue {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { queue: VecDeque::new(), state: DequeueState::Idle, low_water_mark: 0 }) }
    }

    /// Current number of tones held in the queue.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dequeue_state(&self) -> DequeueState {
        self.inner.lock().unwrap().state
    }

    /// Enqueue one tone. Fails with `Again` if the queue is completely
    /// full. The high-water pre-flight refusal (§4.6) that reserves room
    /// for a whole representation lives in [`crate::sender::Sender`], not
    /// here — a single tone enqueue never refuses just for being above the
    /// high-water mark, only for being genuinely out of room.
    pub fn enqueue(&self, duration: Duration, frequency: u32) -> CwResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.queue.len() >= CAPACITY - 1 {
            return Err(CwError::Again("tone queue is full"));
        }
        inner.queue.push_back(QueuedTone { duration, frequency });
        inner.state = DequeueState::Busy;
        Ok(())
    }

    /// Set the low-water callback threshold. `callback` fires from
    /// [`dequeue_next`][Self::dequeue_next] the first time the queue length
    /// drops to or below `level` after having been above it.
    pub fn set_low_water_mark(&self, level: usize) -> CwResult<()> {
        if level >= CAPACITY - 1 {
            return Err(CwError::InvalidArgument { field: "low_water_mark", value: level as i64 });
        }
        self.inner.lock().unwrap().low_water_mark = level;
        Ok(())
    }

    /// Dequeue the next tone with nonzero duration, skipping any
    /// zero-duration entries in between (a zero-duration entry means "leave
    /// the keying state as it is," per the original). Returns `None` and
    /// transitions to `Idle` if the queue is now empty.
    ///
    /// Also returns whether the queue just crossed at or below its
    /// low-water mark, so the caller can invoke its refill callback after
    /// updating its own state (never from inside this call).
    pub fn dequeue_next(&self) -> (Option<QueuedTone>, bool) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == DequeueState::Idle {
            return (None, false);
        }

        let length_before = inner.queue.len();

        let mut next = None;
        while let Some(tone) = inner.queue.pop_front() {
            if !tone.duration.is_zero() {
                next = Some(tone);
                break;
            }
        }

        if next.is_none() {
            inner.state = DequeueState::Idle;
        }

        let length_after = inner.queue.len();
        let crossed_low_water =
            length_before > inner.low_water_mark && length_after <= inner.low_water_mark;

        (next, crossed_low_water)
    }

    pub fn flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.clear();
        inner.state = DequeueState::Idle;
    }
}

impl Default for ToneQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_queue_dequeues_nothing() {
        let q = ToneQueue::new();
        let (tone, crossed) = q.dequeue_next();
        assert!(tone.is_none());
        assert!(!crossed);
    }

    #[test]
    fn enqueue_then_dequeue_round_trips() {
        let q = ToneQueue::new();
        q.enqueue(Duration::from_millis(50), 800).unwrap();
        let (tone, _) = q.dequeue_next();
        let tone = tone.unwrap();
        assert_eq!(tone.duration, Duration::from_millis(50));
        assert_eq!(tone.frequency, 800);
        assert!(q.is_empty());
        assert_eq!(q.dequeue_state(), DequeueState::Idle);
    }

    #[test]
    fn zero_duration_entries_are_skipped() {
        let q = ToneQueue::new();
        q.enqueue(Duration::ZERO, 0).unwrap();
        q.enqueue(Duration::ZERO, 0).unwrap();
        q.enqueue(Duration::from_millis(10), 600).unwrap();
        let (tone, _) = q.dequeue_next();
        assert_eq!(tone.unwrap().frequency, 600);
    }

    #[test]
    fn refuses_enqueue_once_completely_full() {
        let q = ToneQueue::new();
        for _ in 0..CAPACITY - 1 {
            q.enqueue(Duration::from_millis(1), 600).unwrap();
        }
        assert!(matches!(q.enqueue(Duration::from_millis(1), 600), Err(CwError::Again(_))));
    }

    #[test]
    fn low_water_callback_fires_once_on_crossing() {
        let q = ToneQueue::new();
        q.set_low_water_mark(1).unwrap();
        q.enqueue(Duration::from_millis(1), 600).unwrap();
        q.enqueue(Duration::from_millis(1), 600).unwrap();
        q.enqueue(Duration::from_millis(1), 600).unwrap();
        let (_, crossed1) = q.dequeue_next(); // 3 -> 2, still above 1
        assert!(!crossed1);
        let (_, crossed2) = q.dequeue_next(); // 2 -> 1, crosses
        assert!(crossed2);
    }
}
