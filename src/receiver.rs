//! Receive pipeline: turns mark/space edge timestamps into dot/dash
//! representations and characters, with adaptive speed tracking and a
//! running accuracy statistics buffer.
//!
//! Grounded on `cw_start_receive_tone`/`cw_end_receive_tone`/
//! `cw_receive_representation`/`cw_update_adaptive_tracking_internal`/
//! `cw_get_receive_statistic_internal` of the C original.

use std::time::{Duration, Instant};

use crate::error::{CwError, CwResult};
use crate::params::Parameters;
use crate::tables;

const RECEIVE_CAPACITY: usize = 256;
const AVERAGE_ARRAY_LENGTH: usize = 4;
const STATISTICS_ARRAY_LENGTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiveState {
    Idle,
    InTone,
    AfterTone,
    EndChar,
    EndWord,
    ErrChar,
    ErrWord,
}

/// A 4-slot circular moving average, used independently for dot and dash
/// element lengths under adaptive speed tracking.
struct AdaptiveAverage {
    buffer: [i64; AVERAGE_ARRAY_LENGTH],
    cursor: usize,
    sum: i64,
}

impl AdaptiveAverage {
    fn new(initial: i64) -> Self {
        Self { buffer: [initial; AVERAGE_ARRAY_LENGTH], cursor: 0, sum: initial * AVERAGE_ARRAY_LENGTH as i64 }
    }

    fn update(&mut self, element_usec: i64) {
        self.sum += element_usec - self.buffer[self.cursor];
        self.buffer[self.cursor] = element_usec;
        self.cursor = (self.cursor + 1) % AVERAGE_ARRAY_LENGTH;
    }

    fn average(&self) -> i64 {
        self.sum / AVERAGE_ARRAY_LENGTH as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatType {
    Dot,
    Dash,
    EndElement,
    EndCharacter,
}

#[derive(Debug, Clone, Copy)]
struct StatEntry {
    stat_type: StatType,
    delta: i64,
}

/// Accuracy statistics: one population standard deviation per timing
/// category, computed as the RMS of each sample's delta from the category's
/// *ideal* target (not from the sample mean).
struct Statistics {
    entries: [Option<StatEntry>; STATISTICS_ARRAY_LENGTH],
    cursor: usize,
}

impl Statistics {
    fn new() -> Self {
        Self { entries: [None; STATISTICS_ARRAY_LENGTH], cursor: 0 }
    }

    fn add(&mut self, stat_type: StatType, delta: i64) {
        self.entries[self.cursor] = Some(StatEntry { stat_type, delta });
        self.cursor = (self.cursor + 1) % STATISTICS_ARRAY_LENGTH;
    }

    fn std_dev(&self, stat_type: StatType) -> f64 {
        let mut sum_of_squares = 0.0;
        let mut count = 0;
        for entry in self.entries.iter().flatten() {
            if entry.stat_type == stat_type {
                sum_of_squares += (entry.delta * entry.delta) as f64;
                count += 1;
            }
        }
        if count > 0 {
            (sum_of_squares / count as f64).sqrt()
        } else {
            0.0
        }
    }

    fn clear(&mut self) {
        self.entries = [None; STATISTICS_ARRAY_LENGTH];
        self.cursor = 0;
    }
}

/// Summary of the receiver's current timing accuracy, one standard
/// deviation (in microseconds) per category; `0.0` means no samples yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiveStatistics {
    pub dot_sd: f64,
    pub dash_sd: f64,
    pub element_end_sd: f64,
    pub character_end_sd: f64,
}

/// The receiver. Not `Sync` by itself (wrap in a `Mutex` at the instance
/// level, as the rest of this crate's shared state is) — edges arrive from
/// whatever thread is reading the audio/paddle device.
pub struct Receiver {
    state: ReceiveState,
    start_timestamp: Option<Instant>,
    end_timestamp: Option<Instant>,
    representation: Vec<char>,
    dot_tracking: AdaptiveAverage,
    dash_tracking: AdaptiveAverage,
    statistics: Statistics,
}

impl Receiver {
    pub fn new(initial_dot_usec: i64) -> Self {
        Self {
            state: ReceiveState::Idle,
            start_timestamp: None,
            end_timestamp: None,
            representation: Vec::with_capacity(RECEIVE_CAPACITY),
            dot_tracking: AdaptiveAverage::new(initial_dot_usec),
            dash_tracking: AdaptiveAverage::new(3 * initial_dot_usec),
            statistics: Statistics::new(),
        }
    }

    pub fn clear_buffer(&mut self) {
        self.state = ReceiveState::Idle;
        self.representation.clear();
        self.start_timestamp = None;
        self.end_timestamp = None;
    }

    pub fn reset_statistics(&mut self) {
        self.statistics.clear();
    }

    pub fn get_statistics(&self) -> ReceiveStatistics {
        ReceiveStatistics {
            dot_sd: self.statistics.std_dev(StatType::Dot),
            dash_sd: self.statistics.std_dev(StatType::Dash),
            element_end_sd: self.statistics.std_dev(StatType::EndElement),
            character_end_sd: self.statistics.std_dev(StatType::EndCharacter),
        }
    }

    /// Mark the start of a tone (key/paddle/squelch going active).
    pub fn start_receive_tone(&mut self, timestamp: Instant, params: &mut Parameters) -> CwResult<()> {
        if self.state == ReceiveState::InTone {
            return Err(CwError::OutOfRange { field: "receive_state", value: self.state as i64 });
        }

        // A polled-but-unconfirmed character/word boundary is implicitly
        // finished by the arrival of the next tone; start fresh for it.
        if matches!(self.state, ReceiveState::EndChar | ReceiveState::EndWord | ReceiveState::ErrChar | ReceiveState::ErrWord) {
            self.representation.clear();
        }

        if self.state == ReceiveState::AfterTone {
            if let (Some(end), ) = (self.end_timestamp,) {
                let space_usec = duration_usec(timestamp.saturating_duration_since(end));
                self.statistics.add(StatType::EndElement, space_usec - params.receive_timing().eoe_range_ideal);
            }
        }

        self.start_timestamp = Some(timestamp);
        self.state = ReceiveState::InTone;
        Ok(())
    }

    /// Mark the end of a tone. Classifies it as a dot, a dash, noise (too
    /// short to be real), or an error (too long/short to be either given
    /// the current timing ranges), updates adaptive tracking and
    /// statistics, and appends to the representation buffer on success.
    pub fn end_receive_tone(&mut self, timestamp: Instant, params: &mut Parameters) -> CwResult<()> {
        if self.state != ReceiveState::InTone {
            return Err(CwError::OutOfRange { field: "receive_state", value: self.state as i64 });
        }

        let saved_end = self.end_timestamp;
        let start = self.start_timestamp.expect("InTone implies a recorded start");
        let element_usec = duration_usec(timestamp.saturating_duration_since(start));
        self.end_timestamp = Some(timestamp);

        let noise_threshold = params.noise_spike_threshold();
        if noise_threshold > 0 && element_usec <= noise_threshold {
            self.state = if self.representation.is_empty() { ReceiveState::Idle } else { ReceiveState::AfterTone };
            self.end_timestamp = saved_end;
            return Err(CwError::Again("tone shorter than the noise threshold, ignored"));
        }

        let t = params.receive_timing();
        let is_dot = element_usec >= t.dot_range_minimum && element_usec <= t.dot_range_maximum;
        let is_dash = element_usec >= t.dash_range_minimum && element_usec <= t.dash_range_maximum;

        let representation = if is_dot {
            tables::DOT_REPRESENTATION
        } else if is_dash {
            tables::DASH_REPRESENTATION
        } else {
            self.state = if element_usec > t.eoc_range_maximum { ReceiveState::ErrWord } else { ReceiveState::ErrChar };
            return Err(CwError::NotFound("tone length matches neither a dot nor a dash"));
        };

        if params.is_adaptive_receive_enabled() {
            self.update_adaptive_tracking(element_usec, representation, params);
        }

        let ideal = if representation == tables::DOT_REPRESENTATION { t.dot_length } else { t.dash_length };
        let stat_type = if representation == tables::DOT_REPRESENTATION { StatType::Dot } else { StatType::Dash };
        self.statistics.add(stat_type, element_usec - ideal);

        if self.representation.len() >= RECEIVE_CAPACITY - 1 {
            self.state = ReceiveState::ErrChar;
            return Err(CwError::OutOfMemory("receive representation buffer is full"));
        }
        self.representation.push(representation);
        self.state = ReceiveState::AfterTone;
        Ok(())
    }

    fn update_adaptive_tracking(&mut self, element_usec: i64, representation: char, params: &mut Parameters) {
        if representation == tables::DOT_REPRESENTATION {
            self.dot_tracking.update(element_usec);
        } else {
            self.dash_tracking.update(element_usec);
        }

        let average_dot = self.dot_tracking.average();
        let average_dash = self.dash_tracking.average();
        let threshold = (average_dash - average_dot) / 2 + average_dot;
        params.set_adaptive_threshold(threshold);
        params.sync();
    }

    /// Poll the buffered representation. Returns `Again` if not enough time
    /// has elapsed since the last tone to decide between character-end and
    /// word-end, `OutOfRange` if called while idle or mid-tone with
    /// nothing buffered yet.
    pub fn poll_representation(&mut self, now: Instant, params: &mut Parameters) -> CwResult<(String, bool, bool)> {
        if self.state == ReceiveState::EndWord || self.state == ReceiveState::ErrWord {
            let is_error = self.state == ReceiveState::ErrWord;
            return Ok((self.representation.iter().collect(), true, is_error));
        }

        if self.state != ReceiveState::AfterTone && self.state != ReceiveState::EndChar && self.state != ReceiveState::ErrChar {
            return Err(CwError::OutOfRange { field: "receive_state", value: self.state as i64 });
        }

        let end = self.end_timestamp.expect("non-idle, non-in-tone state implies an end timestamp");
        let space_usec = duration_usec(now.saturating_duration_since(end));
        let t = params.receive_timing();

        if space_usec >= t.eoc_range_minimum && space_usec <= t.eoc_range_maximum {
            if self.state == ReceiveState::AfterTone {
                self.statistics.add(StatType::EndCharacter, space_usec - t.eoc_range_ideal);
                self.state = ReceiveState::EndChar;
            }
            let is_error = self.state == ReceiveState::ErrChar;
            return Ok((self.representation.iter().collect(), false, is_error));
        }

        if space_usec > t.eoc_range_maximum {
            self.state = if self.state == ReceiveState::ErrChar { ReceiveState::ErrWord } else { ReceiveState::EndWord };
            let is_error = self.state == ReceiveState::ErrWord;
            return Ok((self.representation.iter().collect(), true, is_error));
        }

        Err(CwError::Again("too early to tell character end from word end"))
    }

    /// Poll the buffered representation and translate it to a character.
    pub fn poll_character(&mut self, now: Instant, params: &mut Parameters) -> CwResult<(char, bool, bool)> {
        let (representation, is_end_of_word, is_error) = self.poll_representation(now, params)?;
        let character = tables::lookup_representation(&representation)?;
        Ok((character, is_end_of_word, is_error))
    }

    /// Clear the buffer after a successfully polled character/word, ready
    /// to receive the next one.
    pub fn clear_after_poll(&mut self) {
        self.representation.clear();
        self.state = ReceiveState::Idle;
    }

    pub fn is_busy(&self) -> bool {
        self.state != ReceiveState::Idle
    }
}

fn duration_usec(d: Duration) -> i64 {
    d.as_micros() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Parameters;
    use std::time::Duration;

    fn tick(receiver: &mut Receiver, params: &mut Parameters, start: Instant, mark: Duration, space: Duration) -> Instant {
        receiver.start_receive_tone(start, params).unwrap();
        let end = start + mark;
        receiver.end_receive_tone(end, params).unwrap();
        end + space
    }

    #[test]
    fn fixed_speed_paris_word_round_trips() {
        let mut params = Parameters::new();
        params.set_send_speed(20).unwrap();
        params.set_receive_speed(20).unwrap();
        let dot = Duration::from_micros(params.receive_timing().dot_length as u64);
        let dash = Duration::from_micros(params.receive_timing().dash_length as u64);
        let eoe = Duration::from_micros(params.receive_timing().eoe_range_ideal as u64);

        let mut receiver = Receiver::new(params.receive_timing().dot_length);
        let mut now = Instant::now();
        // 'P' = .--.
        now = tick(&mut receiver, &mut params, now, dot, eoe);
        now = tick(&mut receiver, &mut params, now, dash, eoe);
        now = tick(&mut receiver, &mut params, now, dash, eoe);
        now = tick(&mut receiver, &mut params, now, dot, Duration::from_micros(params.receive_timing().eoc_range_ideal as u64));

        let (character, is_end_of_word, is_error) = receiver.poll_character(now, &mut params).unwrap();
        assert_eq!(character, 'P');
        assert!(!is_end_of_word);
        assert!(!is_error);
    }

    #[test]
    fn noise_spike_is_rejected_and_state_reverts() {
        let mut params = Parameters::new();
        let mut receiver = Receiver::new(params.receive_timing().dot_length);
        let now = Instant::now();
        receiver.start_receive_tone(now, &mut params).unwrap();
        let tiny = now + Duration::from_micros(1);
        let result = receiver.end_receive_tone(tiny, &mut params);
        assert!(matches!(result, Err(CwError::Again(_))));
        assert!(!receiver.is_busy());
    }

    #[test]
    fn adaptive_tracking_converges_toward_actual_speed() {
        let mut params = Parameters::new();
        params.enable_adaptive_receive();
        let mut receiver = Receiver::new(params.receive_timing().dot_length);

        // Feed several dots and dashes at a fixed, faster-than-initial speed.
        let fast_dot = Duration::from_micros((crate::params::DOT_CALIBRATION / 30) as u64);
        let fast_dash = fast_dot * 3;
        let mut now = Instant::now();
        for _ in 0..8 {
            now = tick(&mut receiver, &mut params, now, fast_dot, fast_dot);
            now = tick(&mut receiver, &mut params, now, fast_dash, fast_dot);
        }
        assert!(params.receive_speed() > crate::params::INITIAL_RECEIVE_SPEED);
    }

    #[test]
    fn polling_too_early_returns_again() {
        let mut params = Parameters::new();
        let mut receiver = Receiver::new(params.receive_timing().dot_length);
        let now = Instant::now();
        receiver.start_receive_tone(now, &mut params).unwrap();
        let dot = Duration::from_micros(params.receive_timing().dot_length as u64);
        receiver.end_receive_tone(now + dot, &mut params).unwrap();
        let result = receiver.poll_representation(now + dot + Duration::from_micros(1), &mut params);
        assert!(matches!(result, Err(CwError::Again(_))));
    }
}
