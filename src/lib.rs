//! A library for sending and receiving International Morse Code.
//!
//! [`CwInstance`] is the single entry point: it owns the parameter block,
//! the tone queue, the iambic keyer, the straight key, the receiver, and
//! the audio backend, and wires them to a [`timer::TimerSource`] so that
//! queued tones get dequeued, keyer elements get clocked, and a straight
//! key gets its keep-alive tick, all without the caller polling anything.
//!
//! Nothing here spawns a process-wide timer automatically except
//! [`CwInstance::new`]'s [`timer::HostTimer`] convenience path — pass a
//! [`timer::VirtualClock`] instead to drive everything deterministically
//! from a test.

pub mod error;
pub mod finalizer;
pub mod keyer;
pub mod owner;
pub mod params;
pub mod receiver;
pub mod sender;
#[cfg(all(unix, feature = "signal"))]
pub mod signal;
pub mod sound;
pub mod straight_key;
pub mod tables;
pub mod timer;
pub mod tone_queue;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub use error::{CwError, CwResult};
pub use params::Parameters;
pub use receiver::ReceiveStatistics;

use crate::finalizer::Finalizer;
use crate::keyer::Keyer;
use crate::owner::{Claimant, Owner};
use crate::receiver::Receiver;
use crate::sender::Sender;
use crate::sound::{AudioFactory, AudioOutput};
use crate::straight_key::StraightKey;
use crate::timer::{HandlerId, HostTimer, TimerSource};
use crate::tone_queue::{DequeueState, ToneQueue};

const HANDLER_TONE_QUEUE: HandlerId = HandlerId(0);
const HANDLER_KEYER: HandlerId = HandlerId(1);
const HANDLER_STRAIGHT_KEY: HandlerId = HandlerId(2);
const HANDLER_FINALIZER: HandlerId = HandlerId(3);

/// Whether `CW_CORE_DEBUG` is set in the environment, read once on first
/// query and cached for the life of the process. There is no per-instance
/// debug flag; this crate holds no other process-wide mutable state.
pub fn debug_enabled() -> bool {
    static DEBUG: std::sync::OnceLock<bool> = std::sync::OnceLock::new();
    *DEBUG.get_or_init(|| std::env::var_os("CW_CORE_DEBUG").is_some())
}

/// One Morse send/receive session: the parameter block, the tone queue and
/// the three things that feed it (sender, iambic keyer, straight key), the
/// receiver, and the audio backend they all key.
///
/// Every queueing/keying/receiving subsystem claims the shared [`Owner`]
/// token before touching the audio backend, so at most one of them is ever
/// mid-sequence at a time — this is what lets each one drive its own
/// timer ticks independently without racing the others.
pub struct CwInstance {
    params: Arc<Mutex<Parameters>>,
    queue: Arc<ToneQueue>,
    owner: Arc<Owner>,
    keyer: Arc<Keyer>,
    straight_key: Arc<StraightKey>,
    receiver: Arc<Mutex<Receiver>>,
    finalizer: Arc<Finalizer>,
    timer: Arc<dyn TimerSource>,
    /// `None` whenever finalization (or a complete reset) has released the
    /// device; the next operation that actually keys the output reopens it
    /// via `audio_factory`.
    audio: Arc<Mutex<Option<Box<dyn AudioOutput>>>>,
    audio_factory: AudioFactory,
    low_water_callback: Arc<Mutex<Option<Arc<dyn Fn() + Send + Sync>>>>,
    /// Last effective keying state actually reported to the audio backend,
    /// shared by the tone-queue dispatch loop and the straight key so
    /// consecutive silent tones or no-op notifications never produce two
    /// identical edges in a row (§8: keying edges must strictly alternate).
    keyed: Arc<AtomicBool>,
}

impl CwInstance {
    /// Build an instance driven by a real background-thread timer. `audio_factory`
    /// is called once immediately, and again any time the backend has been
    /// released by finalization or [`Self::complete_reset`] and activity resumes.
    pub fn new(audio_factory: AudioFactory) -> CwResult<Self> {
        Self::with_timer(Arc::new(HostTimer::new()), audio_factory)
    }

    /// Build an instance driven by the caller-supplied `timer` (typically a
    /// [`timer::VirtualClock`] in tests, a [`HostTimer`] in production).
    pub fn with_timer(timer: Arc<dyn TimerSource>, audio_factory: AudioFactory) -> CwResult<Self> {
        let params = Arc::new(Mutex::new(Parameters::new()));
        let queue = Arc::new(ToneQueue::new());
        let owner = Arc::new(Owner::new());
        let keyer = Arc::new(Keyer::new(Arc::clone(&queue), Arc::clone(&owner)));
        let straight_key = Arc::new(StraightKey::new(Arc::clone(&owner)));
        let receiver = Arc::new(Mutex::new(Receiver::new(params.lock().unwrap().receive_timing().dot_length)));

        let audio: Arc<Mutex<Option<Box<dyn AudioOutput>>>> = Arc::new(Mutex::new(None));
        {
            let mut slot = audio.lock().unwrap();
            let p = params.lock().unwrap();
            ensure_backend_open(&mut slot, &audio_factory, &p)?;
        }

        let keyed = Arc::new(AtomicBool::new(false));

        let finalizer_audio = Arc::clone(&audio);
        let finalizer_queue = Arc::clone(&queue);
        let finalizer_keyed = Arc::clone(&keyed);
        let finalizer = Arc::new(Finalizer::new(Arc::new(move || {
            finalizer_queue.flush();
            let mut slot = finalizer_audio.lock().unwrap();
            if finalizer_keyed.swap(false, Ordering::SeqCst) {
                if let Some(backend) = slot.as_mut() {
                    let _ = backend.key_up();
                }
            }
            // Release the backend entirely; the next keying operation
            // reopens it through `audio_factory`.
            *slot = None;
        })));

        let low_water_callback: Arc<Mutex<Option<Arc<dyn Fn() + Send + Sync>>>> = Arc::new(Mutex::new(None));

        install_tone_queue_handler(&queue, &owner, &audio, &audio_factory, &params, &finalizer, &timer, &low_water_callback, &keyed);
        install_keyer_handler(&keyer, &params, &finalizer, &timer);
        install_straight_key_handler(&straight_key, &timer);
        finalizer.drive(Arc::clone(&timer), HANDLER_FINALIZER);

        Ok(Self {
            params,
            queue,
            owner,
            keyer,
            straight_key,
            receiver,
            finalizer,
            timer,
            audio,
            audio_factory,
            low_water_callback,
            keyed,
        })
    }

    /// Restore every parameter to its documented default, without touching
    /// anything currently queued or in flight.
    pub fn reset_all(&self) {
        self.params.lock().unwrap().reset_all();
    }

    /// Reset every parameter, receive statistic, and buffered state to its
    /// initial default, return to silence, flush anything still queued to be
    /// sent, and close the audio backend (the next send reopens it).
    pub fn complete_reset(&self) {
        self.params.lock().unwrap().reset_all();
        self.queue.flush();
        self.receiver.lock().unwrap().clear_buffer();
        self.owner.release(Claimant::ToneQueue);
        self.owner.release(Claimant::Keyer);
        self.owner.release(Claimant::StraightKey);
        let mut slot = self.audio.lock().unwrap();
        if self.keyed.swap(false, Ordering::SeqCst) {
            if let Some(backend) = slot.as_mut() {
                let _ = backend.key_up();
            }
        }
        *slot = None;
        drop(slot);
        self.finalizer.cancel();
    }

    pub fn is_busy(&self) -> bool {
        !self.owner.is_free()
    }

    /// Block (or unblock) timer dispatch for the duration of a critical
    /// section the caller is about to run. See [`TimerSource::block_callback`].
    pub fn block_callback(&self, is_block: bool) {
        self.timer.block_callback(is_block);
    }

    /// Register a callback invoked the first time the tone queue's length
    /// drops to or below `level` after having been above it, and set that
    /// threshold. `level` must be less than the queue's reported capacity.
    pub fn register_low_water_callback(&self, level: usize, callback: Arc<dyn Fn() + Send + Sync>) -> CwResult<()> {
        self.queue.set_low_water_mark(level)?;
        *self.low_water_callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    /// Block until the iambic keyer returns to idle. Fails with `Deadlock`
    /// if a paddle is currently held down.
    pub fn wait_for_keyer(&self) -> CwResult<()> {
        self.keyer.wait_for_keyer()
    }

    /// Block until the iambic keyer's current element (or idle period)
    /// finishes.
    pub fn wait_for_element(&self) -> CwResult<()> {
        self.keyer.wait_for_element()
    }

    // -- parameters -----------------------------------------------------

    pub fn send_speed(&self) -> u32 {
        self.params.lock().unwrap().send_speed()
    }

    pub fn set_send_speed(&self, wpm: u32) -> CwResult<()> {
        self.params.lock().unwrap().set_send_speed(wpm)
    }

    pub fn receive_speed(&self) -> u32 {
        self.params.lock().unwrap().receive_speed()
    }

    pub fn set_receive_speed(&self, wpm: u32) -> CwResult<()> {
        self.params.lock().unwrap().set_receive_speed(wpm)
    }

    pub fn frequency(&self) -> u32 {
        self.params.lock().unwrap().frequency()
    }

    pub fn set_frequency(&self, hz: u32) -> CwResult<()> {
        self.params.lock().unwrap().set_frequency(hz)
    }

    pub fn volume(&self) -> u32 {
        self.params.lock().unwrap().volume()
    }

    pub fn set_volume(&self, percent: u32) -> CwResult<()> {
        self.params.lock().unwrap().set_volume(percent)?;
        // If the backend is currently closed (finalized or reset), the new
        // volume still takes effect the next time it's reopened, read back
        // from `params`.
        if let Some(backend) = self.audio.lock().unwrap().as_mut() {
            backend.set_volume(percent)?;
        }
        Ok(())
    }

    pub fn gap(&self) -> u32 {
        self.params.lock().unwrap().gap()
    }

    pub fn set_gap(&self, dots: u32) -> CwResult<()> {
        self.params.lock().unwrap().set_gap(dots)
    }

    pub fn tolerance(&self) -> u32 {
        self.params.lock().unwrap().tolerance()
    }

    pub fn set_tolerance(&self, percent: u32) -> CwResult<()> {
        self.params.lock().unwrap().set_tolerance(percent)
    }

    pub fn weighting(&self) -> u32 {
        self.params.lock().unwrap().weighting()
    }

    pub fn set_weighting(&self, percent: u32) -> CwResult<()> {
        self.params.lock().unwrap().set_weighting(percent)
    }

    pub fn is_adaptive_receive_enabled(&self) -> bool {
        self.params.lock().unwrap().is_adaptive_receive_enabled()
    }

    pub fn enable_adaptive_receive(&self) {
        self.params.lock().unwrap().enable_adaptive_receive();
    }

    pub fn disable_adaptive_receive(&self) {
        self.params.lock().unwrap().disable_adaptive_receive();
    }

    pub fn set_noise_spike_threshold(&self, usecs: i64) -> CwResult<()> {
        self.params.lock().unwrap().set_noise_spike_threshold(usecs)
    }

    pub fn enable_curtis_mode_b(&self) {
        self.keyer.enable_curtis_mode_b();
    }

    pub fn disable_curtis_mode_b(&self) {
        self.keyer.disable_curtis_mode_b();
    }

    // -- sending ----------------------------------------------------------

    pub fn send_dot(&self) -> CwResult<()> {
        self.with_sender(|s, p| s.send_dot(p))
    }

    pub fn send_dash(&self) -> CwResult<()> {
        self.with_sender(|s, p| s.send_dash(p))
    }

    pub fn send_character_space(&self) -> CwResult<()> {
        self.with_sender(|s, p| s.send_character_space(p))
    }

    pub fn send_word_space(&self) -> CwResult<()> {
        self.with_sender(|s, p| s.send_word_space(p))
    }

    pub fn send_representation(&self, representation: &str) -> CwResult<()> {
        self.with_sender(|s, p| s.send_representation(representation, false, p))
    }

    /// As [`Self::send_representation`], but without the trailing
    /// end-of-character gap — for building a combination character out of
    /// more than one representation.
    pub fn send_representation_partial(&self, representation: &str) -> CwResult<()> {
        self.with_sender(|s, p| s.send_representation(representation, true, p))
    }

    pub fn send_character(&self, character: char) -> CwResult<()> {
        self.with_sender(|s, p| s.send_character(character, false, p))
    }

    /// As [`Self::send_character`], but without the trailing
    /// end-of-character gap.
    pub fn send_character_partial(&self, character: char) -> CwResult<()> {
        self.with_sender(|s, p| s.send_character(character, true, p))
    }

    pub fn send_string(&self, text: &str) -> CwResult<()> {
        self.with_sender(|s, p| s.send_string(text, p))
    }

    fn with_sender<F>(&self, f: F) -> CwResult<()>
    where
        F: FnOnce(&Sender<'_>, &mut Parameters) -> CwResult<()>,
    {
        let was_idle = self.queue.dequeue_state() == DequeueState::Idle;
        let mut params = self.params.lock().unwrap();
        let sender = Sender::new(&self.queue, &self.owner);
        f(&sender, &mut params)?;
        drop(params);
        self.finalizer.cancel();
        if was_idle {
            self.timer.request_timeout(Duration::ZERO);
        }
        Ok(())
    }

    // -- keying -------------------------------------------------------------

    /// Notify the keyer that the dot and/or dash paddle changed state.
    pub fn notify_keyer_paddle_event(&self, dot_down: bool, dash_down: bool) -> CwResult<()> {
        let mut params = self.params.lock().unwrap();
        let delay = self.keyer.notify_paddle_event(dot_down, dash_down, &mut params)?;
        drop(params);
        self.finalizer.cancel();
        if let Some(delay) = delay {
            self.timer.request_timeout(delay);
        }
        Ok(())
    }

    pub fn is_keyer_busy(&self) -> bool {
        self.keyer.is_busy()
    }

    /// Notify the straight key that it went up or down. A call that
    /// doesn't change the key's state is a no-op, matching the original.
    pub fn notify_straight_key_event(&self, key_down: bool) -> CwResult<()> {
        let transition = self.straight_key.notify_key_event(key_down)?;
        match transition {
            Some(true) => {
                self.finalizer.cancel();
                let mut slot = self.audio.lock().unwrap();
                let p = self.params.lock().unwrap();
                ensure_backend_open(&mut slot, &self.audio_factory, &p)?;
                let frequency = p.frequency();
                drop(p);
                let output = slot.as_mut().expect("just opened");
                let _ = output.set_frequency(frequency);
                if !self.keyed.swap(true, Ordering::SeqCst) {
                    let _ = output.key_down();
                }
                drop(slot);
                self.timer.request_timeout(straight_key::KEEP_ALIVE_INTERVAL);
            }
            Some(false) => {
                if self.keyed.swap(false, Ordering::SeqCst) {
                    if let Some(backend) = self.audio.lock().unwrap().as_mut() {
                        let _ = backend.key_up();
                    }
                }
                self.finalizer.schedule();
            }
            None => {}
        }
        Ok(())
    }

    pub fn is_straight_key_down(&self) -> bool {
        self.straight_key.is_down()
    }

    // -- receiving ----------------------------------------------------------

    pub fn start_receive_tone(&self, timestamp: Instant) -> CwResult<()> {
        let mut params = self.params.lock().unwrap();
        self.finalizer.cancel();
        self.receiver.lock().unwrap().start_receive_tone(timestamp, &mut params)
    }

    pub fn end_receive_tone(&self, timestamp: Instant) -> CwResult<()> {
        let mut params = self.params.lock().unwrap();
        self.receiver.lock().unwrap().end_receive_tone(timestamp, &mut params)
    }

    pub fn poll_representation(&self, now: Instant) -> CwResult<(String, bool, bool)> {
        let mut params = self.params.lock().unwrap();
        self.receiver.lock().unwrap().poll_representation(now, &mut params)
    }

    pub fn poll_character(&self, now: Instant) -> CwResult<(char, bool, bool)> {
        let mut params = self.params.lock().unwrap();
        self.receiver.lock().unwrap().poll_character(now, &mut params)
    }

    pub fn clear_after_poll(&self) {
        self.receiver.lock().unwrap().clear_after_poll();
    }

    pub fn clear_receive_buffer(&self) {
        self.receiver.lock().unwrap().clear_buffer();
    }

    pub fn reset_receive_statistics(&self) {
        self.receiver.lock().unwrap().reset_statistics();
    }

    pub fn get_receive_statistics(&self) -> ReceiveStatistics {
        self.receiver.lock().unwrap().get_statistics()
    }
}

/// Dequeues tones as they come due and keys the audio backend accordingly.
/// Registered once; any enqueue that finds the queue idle kicks it off
/// again with an immediate (`Duration::ZERO`) timeout.
fn install_tone_queue_handler(
    queue: &Arc<ToneQueue>,
    owner: &Arc<Owner>,
    audio: &Arc<Mutex<Option<Box<dyn AudioOutput>>>>,
    audio_factory: &AudioFactory,
    params: &Arc<Mutex<Parameters>>,
    finalizer: &Arc<Finalizer>,
    timer: &Arc<dyn TimerSource>,
    low_water_callback: &Arc<Mutex<Option<Arc<dyn Fn() + Send + Sync>>>>,
    keyed: &Arc<AtomicBool>,
) {
    let queue = Arc::clone(queue);
    let owner = Arc::clone(owner);
    let audio = Arc::clone(audio);
    let audio_factory = Arc::clone(audio_factory);
    let params = Arc::clone(params);
    let finalizer = Arc::clone(finalizer);
    let timer_for_handler = Arc::clone(timer);
    let low_water_callback = Arc::clone(low_water_callback);
    let keyed = Arc::clone(keyed);
    let went_idle = Arc::new(AtomicBool::new(false));
    let _ = timer.register_handler(
        HANDLER_TONE_QUEUE,
        Arc::new(move || {
            let (tone, crossed_low_water) = queue.dequeue_next();
            if debug_enabled() {
                log::trace!("tone queue dequeue: {tone:?}");
            }
            let mut slot = audio.lock().unwrap();
            match tone {
                Some(t) if t.frequency > 0 => {
                    went_idle.store(false, Ordering::SeqCst);
                    let p = params.lock().unwrap();
                    let opened = ensure_backend_open(&mut slot, &audio_factory, &p).is_ok();
                    drop(p);
                    if opened {
                        let output = slot.as_mut().expect("just opened");
                        let _ = output.set_frequency(t.frequency);
                        // Coalesce: only report a down edge if we weren't
                        // already down (adjacent tone-only entries with no
                        // intervening silence never happen, but this keeps
                        // the invariant true regardless of what the queue
                        // contains).
                        if !keyed.swap(true, Ordering::SeqCst) {
                            let _ = output.key_down();
                        }
                    }
                    drop(slot);
                    timer_for_handler.request_timeout(t.duration);
                }
                Some(t) => {
                    went_idle.store(false, Ordering::SeqCst);
                    if keyed.swap(false, Ordering::SeqCst) {
                        if let Some(output) = slot.as_mut() {
                            let _ = output.key_up();
                        }
                    }
                    drop(slot);
                    timer_for_handler.request_timeout(t.duration);
                }
                None => {
                    if keyed.swap(false, Ordering::SeqCst) {
                        if let Some(output) = slot.as_mut() {
                            let _ = output.key_up();
                        }
                    }
                    drop(slot);
                    owner.release(Claimant::ToneQueue);
                    // Every dispatch re-enters this arm for as long as the
                    // queue stays idle (the timer keeps ticking the
                    // finalizer's own 1s handler forever); only arm the
                    // countdown on the actual busy->idle transition, or it
                    // never reaches zero.
                    if !went_idle.swap(true, Ordering::SeqCst) {
                        finalizer.schedule();
                    }
                }
            }
            if crossed_low_water {
                if let Some(callback) = low_water_callback.lock().unwrap().as_ref() {
                    callback();
                }
            }
        }),
    );
}

/// Opens the backend via `factory` if `slot` is currently empty (closed by
/// finalization or a complete reset), syncing the generator's current
/// frequency/volume onto the freshly-opened device. A no-op if already open.
fn ensure_backend_open(
    slot: &mut Option<Box<dyn AudioOutput>>,
    factory: &AudioFactory,
    params: &Parameters,
) -> CwResult<()> {
    if slot.is_some() {
        return Ok(());
    }
    let mut backend = factory()?;
    // A console-beeper backend has no volume control and returns
    // `Unsupported` here; that must not abort the reopen.
    if let Err(e) = backend.set_volume(params.volume()) {
        log::debug!("backend does not support volume sync on open: {e}");
    }
    backend.set_frequency(params.frequency())?;
    *slot = Some(backend);
    Ok(())
}

/// Clocks the iambic keyer's state machine forward, rescheduling itself for
/// as long as the keyer has an element in flight.
fn install_keyer_handler(
    keyer: &Arc<Keyer>,
    params: &Arc<Mutex<Parameters>>,
    finalizer: &Arc<Finalizer>,
    timer: &Arc<dyn TimerSource>,
) {
    let keyer = Arc::clone(keyer);
    let params = Arc::clone(params);
    let finalizer = Arc::clone(finalizer);
    let timer_for_handler = Arc::clone(timer);
    let went_idle = Arc::new(AtomicBool::new(false));
    let _ = timer.register_handler(
        HANDLER_KEYER,
        Arc::new(move || {
            let mut p = params.lock().unwrap();
            let next = keyer.clock(&mut p);
            drop(p);
            match next {
                Some(delay) => {
                    went_idle.store(false, Ordering::SeqCst);
                    timer_for_handler.request_timeout(delay);
                }
                // The keyer reports idle on every clock tick for as long as
                // it stays idle, not just on the transition; only arm the
                // finalizer countdown once per genuine busy->idle edge or it
                // gets re-armed to TICKS_TOTAL before it can ever reach zero.
                None => {
                    if !went_idle.swap(true, Ordering::SeqCst) {
                        finalizer.schedule();
                    }
                }
            }
        }),
    );
}

/// Keeps a straight key's keep-alive tick going for as long as the key is
/// held down.
fn install_straight_key_handler(key: &Arc<StraightKey>, timer: &Arc<dyn TimerSource>) {
    let key = Arc::clone(key);
    let timer_for_handler = Arc::clone(timer);
    let _ = timer.register_handler(
        HANDLER_STRAIGHT_KEY,
        Arc::new(move || {
            if key.clock() {
                timer_for_handler.request_timeout(straight_key::KEEP_ALIVE_INTERVAL);
            }
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::NullAudio;
    use crate::timer::VirtualClock;

    fn instance() -> (CwInstance, Arc<VirtualClock>) {
        let clock = Arc::new(VirtualClock::new());
        let as_source: Arc<dyn TimerSource> = Arc::clone(&clock);
        let factory: AudioFactory = Arc::new(|| Ok(Box::new(NullAudio::default()) as Box<dyn AudioOutput>));
        let instance = CwInstance::with_timer(as_source, factory).unwrap();
        (instance, clock)
    }

    #[test]
    fn sending_paris_eventually_goes_idle() {
        let (instance, clock) = instance();
        instance.set_send_speed(20).unwrap();
        instance.send_string("PARIS").unwrap();
        assert!(instance.is_busy());

        for _ in 0..20_000 {
            clock.advance(Duration::from_micros(500));
            if !instance.is_busy() {
                break;
            }
        }
        assert!(!instance.is_busy());
    }

    #[test]
    fn paddle_event_drives_keyer_to_completion() {
        let (instance, clock) = instance();
        instance.notify_keyer_paddle_event(true, false).unwrap();
        assert!(instance.is_keyer_busy());
        instance.notify_keyer_paddle_event(false, false).unwrap();

        for _ in 0..2_000 {
            clock.advance(Duration::from_micros(500));
            if !instance.is_keyer_busy() {
                break;
            }
        }
        assert!(!instance.is_keyer_busy());
    }

    #[test]
    fn complete_reset_clears_buffered_state() {
        let (instance, _clock) = instance();
        instance.set_send_speed(30).unwrap();
        instance.send_string("TEST").unwrap();
        instance.complete_reset();
        assert_eq!(instance.send_speed(), params::INITIAL_SEND_SPEED);
        assert!(!instance.is_busy());
    }

    #[test]
    fn straight_key_keeps_ticking_while_down() {
        let (instance, clock) = instance();
        instance.notify_straight_key_event(true).unwrap();
        assert!(instance.is_straight_key_down());
        clock.advance(straight_key::KEEP_ALIVE_INTERVAL);
        assert!(instance.is_straight_key_down());
        instance.notify_straight_key_event(false).unwrap();
        assert!(!instance.is_straight_key_down());
    }

    #[test]
    fn reset_all_restores_defaults_without_touching_queue() {
        let (instance, _clock) = instance();
        instance.set_send_speed(40).unwrap();
        instance.send_string("E").unwrap();
        instance.reset_all();
        assert_eq!(instance.send_speed(), params::INITIAL_SEND_SPEED);
        assert!(instance.is_busy());
    }

    #[test]
    fn low_water_callback_fires_once_queue_drains_below_threshold() {
        let (instance, clock) = instance();
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        instance.register_low_water_callback(1, Arc::new(move || { f.fetch_add(1, std::sync::atomic::Ordering::SeqCst); })).unwrap();

        instance.send_string("E").unwrap();
        for _ in 0..20_000 {
            clock.advance(Duration::from_micros(500));
            if !instance.is_busy() {
                break;
            }
        }
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_for_keyer_refuses_while_paddle_held() {
        let (instance, _clock) = instance();
        instance.notify_keyer_paddle_event(true, false).unwrap();
        assert!(matches!(instance.wait_for_keyer(), Err(CwError::Deadlock(_))));
    }

    /// Records every `key_down`/`key_up` call it receives, so a test can
    /// check that consecutive identical edges never occur even when the
    /// tone queue holds back-to-back silent entries.
    struct EdgeRecorder {
        edges: Arc<Mutex<Vec<bool>>>,
    }

    impl crate::sound::AudioOutput for EdgeRecorder {
        fn key_down(&mut self) -> CwResult<()> {
            self.edges.lock().unwrap().push(true);
            Ok(())
        }
        fn key_up(&mut self) -> CwResult<()> {
            self.edges.lock().unwrap().push(false);
            Ok(())
        }
        fn set_frequency(&mut self, _hz: u32) -> CwResult<()> {
            Ok(())
        }
        fn set_volume(&mut self, _percent: u32) -> CwResult<()> {
            Ok(())
        }
    }

    #[test]
    fn keying_edges_never_repeat_consecutively_across_silent_gaps() {
        // 'E' sends a tone, then an inter-element gap and an end-of-character
        // gap back to back — two zero-frequency queue entries in a row. The
        // second one must not re-report a key-up edge that already happened.
        let edges = Arc::new(Mutex::new(Vec::new()));
        let clock = Arc::new(crate::timer::VirtualClock::new());
        let as_source: Arc<dyn TimerSource> = Arc::clone(&clock);
        let factory_edges = Arc::clone(&edges);
        let factory: AudioFactory =
            Arc::new(move || Ok(Box::new(EdgeRecorder { edges: Arc::clone(&factory_edges) }) as Box<dyn AudioOutput>));
        let instance = CwInstance::with_timer(as_source, factory).unwrap();
        instance.set_send_speed(20).unwrap();
        instance.send_character('E').unwrap();

        for _ in 0..20_000 {
            clock.advance(Duration::from_micros(500));
            if !instance.is_busy() {
                break;
            }
        }

        let recorded = edges.lock().unwrap().clone();
        assert!(recorded.len() >= 2, "expected at least a down and an up edge, got {recorded:?}");
        for pair in recorded.windows(2) {
            assert_ne!(pair[0], pair[1], "consecutive identical keying edge in {recorded:?}");
        }
    }

    #[test]
    fn finalization_closes_the_backend_and_a_later_send_reopens_it() {
        let opens = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let clock = Arc::new(VirtualClock::new());
        let as_source: Arc<dyn TimerSource> = Arc::clone(&clock);
        let factory_opens = Arc::clone(&opens);
        let factory: AudioFactory = Arc::new(move || {
            factory_opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(NullAudio::default()) as Box<dyn AudioOutput>)
        });
        let instance = CwInstance::with_timer(as_source, factory).unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 1, "backend should open once at construction");

        instance.send_string("E").unwrap();
        for _ in 0..20_000 {
            clock.advance(Duration::from_micros(500));
            if !instance.is_busy() {
                break;
            }
        }
        assert!(!instance.is_busy());

        // Let the finalizer's one-tick-per-second countdown run all the way
        // out; each advance crosses (and re-arms) one tick of the chain the
        // finalizer's own `drive` handler requested.
        for _ in 0..15 {
            clock.advance(Duration::from_secs(1));
        }
        assert!(instance.audio.lock().unwrap().is_none(), "backend should be closed after finalization");

        instance.send_dot().unwrap();
        assert!(instance.audio.lock().unwrap().is_some(), "a later send should reopen the backend");
        assert_eq!(opens.load(Ordering::SeqCst), 2, "backend should have been reopened exactly once");
    }
}
