//! High-level send API: enqueues dots, dashes, characters, representations
//! and full strings onto the tone queue with the correct inter-element,
//! inter-character, and inter-word gaps.
//!
//! Grounded on `cw_send_dot`/`cw_send_dash`/`cw_send_character_space`/
//! `cw_send_word_space`/`cw_send_representation_internal`/
//! `cw_send_character_internal`/`cw_send_string` of the C original.

use std::time::Duration;

use crate::error::{CwError, CwResult};
use crate::owner::{Claimant, Owner};
use crate::params::Parameters;
use crate::tables;
use crate::tone_queue::{ToneQueue, HIGH_WATER_MARK};

/// Sends dots, dashes, and text by enqueuing tones. Does not own a timer or
/// audio backend directly — [`crate::CwInstance`] wires this to the tone
/// queue dequeue loop that actually keys the sound generator.
pub struct Sender<'a> {
    queue: &'a ToneQueue,
    owner: &'a Owner,
}

impl<'a> Sender<'a> {
    pub fn new(queue: &'a ToneQueue, owner: &'a Owner) -> Self {
        Self { queue, owner }
    }

    fn claim(&self) -> CwResult<()> {
        self.owner.claim(Claimant::ToneQueue)
    }

    /// Enqueue a single dot, a trailing inter-element gap, plus any
    /// Farnsworth/gap adjustment.
    pub fn send_dot(&self, params: &mut Parameters) -> CwResult<()> {
        self.claim()?;
        let t = params.send_timing();
        self.queue.enqueue(usecs(t.dot_length), params.frequency())?;
        self.queue.enqueue(usecs(t.end_of_ele_delay), 0)
    }

    pub fn send_dash(&self, params: &mut Parameters) -> CwResult<()> {
        self.claim()?;
        let t = params.send_timing();
        self.queue.enqueue(usecs(t.dash_length), params.frequency())?;
        self.queue.enqueue(usecs(t.end_of_ele_delay), 0)
    }

    /// Enqueue the gap that separates two characters, including any
    /// additional Farnsworth gap.
    pub fn send_character_space(&self, params: &mut Parameters) -> CwResult<()> {
        self.claim()?;
        let t = params.send_timing();
        let gap = t.end_of_char_delay + t.additional_delay;
        self.queue.enqueue(usecs(gap), 0)
    }

    /// Enqueue the gap that separates two words, including any additional
    /// Farnsworth gap and its extra word-end adjustment.
    pub fn send_word_space(&self, params: &mut Parameters) -> CwResult<()> {
        self.claim()?;
        let t = params.send_timing();
        let gap = t.end_of_word_delay + t.additional_delay + t.adjustment_delay;
        self.queue.enqueue(usecs(gap), 0)
    }

    /// Enqueue an entire dot/dash representation (e.g. `"-..-"`), with
    /// inter-element gaps between elements, plus a trailing end-of-character
    /// gap unless `partial` is set (for building up a combination character
    /// out of more than one representation).
    ///
    /// Refuses with `Again` up front if the queue is already within 100
    /// elements of full, so a representation is never split across an
    /// enqueue that succeeds and one that doesn't.
    pub fn send_representation(&self, representation: &str, partial: bool, params: &mut Parameters) -> CwResult<()> {
        if !tables::check_representation(representation) {
            return Err(CwError::InvalidArgument { field: "representation", value: representation.len() as i64 });
        }
        if self.queue.len() >= HIGH_WATER_MARK {
            return Err(CwError::Again("tone queue is above its high water mark"));
        }
        self.claim()?;
        let t = params.send_timing();
        for c in representation.chars() {
            let duration = if c == '-' { t.dash_length } else { t.dot_length };
            self.queue.enqueue(usecs(duration), params.frequency())?;
            self.queue.enqueue(usecs(t.end_of_ele_delay), 0)?;
        }
        if !partial {
            self.send_character_space(params)?;
        }
        Ok(())
    }

    /// Enqueue one character by looking up its representation, including
    /// the trailing end-of-character gap unless `partial` is set. The space
    /// character is a special case handled as a word gap, not a lookup.
    pub fn send_character(&self, character: char, partial: bool, params: &mut Parameters) -> CwResult<()> {
        if character == ' ' {
            return self.send_word_space(params);
        }
        let representation = tables::lookup_character(character)?;
        self.send_representation(representation, partial, params)
    }

    /// Enqueue a full string: every character (including spaces, which
    /// become word gaps) sent in full, one after another.
    pub fn send_string(&self, text: &str, params: &mut Parameters) -> CwResult<()> {
        for c in text.chars() {
            self.send_character(c, false, params)?;
        }
        Ok(())
    }
}

fn usecs(usec: i64) -> Duration {
    Duration::from_micros(usec.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_dot_enqueues_tone_then_gap() {
        let queue = ToneQueue::new();
        let owner = Owner::new();
        let sender = Sender::new(&queue, &owner);
        let mut params = Parameters::new();
        sender.send_dot(&mut params).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn send_string_paris_enqueues_expected_tone_count() {
        let queue = ToneQueue::new();
        let owner = Owner::new();
        let sender = Sender::new(&queue, &owner);
        let mut params = Parameters::new();
        // "PARIS" is the classic calibration word: 5 letters, no inter-word gap.
        sender.send_string("PARIS", &mut params).unwrap();
        assert!(!queue.is_empty());
    }

    #[test]
    fn rejects_malformed_representation() {
        let queue = ToneQueue::new();
        let owner = Owner::new();
        let sender = Sender::new(&queue, &owner);
        let mut params = Parameters::new();
        assert!(sender.send_representation("x-", false, &mut params).is_err());
        assert!(sender.send_representation("", false, &mut params).is_err());
    }

    #[test]
    fn unrepresentable_character_is_not_found() {
        let queue = ToneQueue::new();
        let owner = Owner::new();
        let sender = Sender::new(&queue, &owner);
        let mut params = Parameters::new();
        assert!(sender.send_character('\u{1}', false, &mut params).is_err());
    }

    #[test]
    fn send_character_includes_trailing_character_gap() {
        let queue = ToneQueue::new();
        let owner = Owner::new();
        let sender = Sender::new(&queue, &owner);
        let mut params = Parameters::new();
        params.set_send_speed(20).unwrap();
        // 'E' = "." — one element, one inter-element gap, one trailing
        // end-of-character gap.
        sender.send_character('E', false, &mut params).unwrap();
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn partial_representation_omits_trailing_character_gap() {
        let queue = ToneQueue::new();
        let owner = Owner::new();
        let sender = Sender::new(&queue, &owner);
        let mut params = Parameters::new();
        sender.send_representation(".", true, &mut params).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn space_character_sends_a_word_gap() {
        let queue = ToneQueue::new();
        let owner = Owner::new();
        let sender = Sender::new(&queue, &owner);
        let mut params = Parameters::new();
        sender.send_character(' ', false, &mut params).unwrap();
        assert_eq!(queue.len(), 1);
    }
}
