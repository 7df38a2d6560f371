//! Shared ownership token mediating exclusive use of the sound card/keying
//! system between the tone queue (driven by the sender), the iambic keyer,
//! and the straight key.
//!
//! The C original checked `cw_is_straight_key_busy()`/`cw_is_tone_busy()`
//! directly from each subsystem, a tight coupling the Design Notes call out
//! for replacement. Here every subsystem instead asks a single [`Owner`]
//! token for a lease before keying, and releases it when idle.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{CwError, CwResult};

const NONE: u8 = 0;
const TONE_QUEUE: u8 = 1;
const KEYER: u8 = 2;
const STRAIGHT_KEY: u8 = 3;

/// Which subsystem currently has exclusive use of the keying output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claimant {
    ToneQueue,
    Keyer,
    StraightKey,
}

impl Claimant {
    fn tag(self) -> u8 {
        match self {
            Claimant::ToneQueue => TONE_QUEUE,
            Claimant::Keyer => KEYER,
            Claimant::StraightKey => STRAIGHT_KEY,
        }
    }
}

/// Lock-free single-owner token. `claim` fails with `Busy` if another
/// subsystem already holds it; `release` is idempotent.
#[derive(Default)]
pub struct Owner {
    holder: AtomicU8,
}

impl Owner {
    pub fn new() -> Self {
        Self { holder: AtomicU8::new(NONE) }
    }

    /// Attempt to claim exclusive use for `who`. Succeeds if the owner is
    /// free or already held by `who`.
    pub fn claim(&self, who: Claimant) -> CwResult<()> {
        let tag = who.tag();
        loop {
            match self.holder.compare_exchange(NONE, tag, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(()),
                Err(current) if current == tag => return Ok(()),
                Err(_) => return Err(CwError::Busy("keying output is owned by another subsystem")),
            }
        }
    }

    /// Release `who`'s claim. A no-op if `who` does not currently hold it.
    pub fn release(&self, who: Claimant) {
        let tag = who.tag();
        let _ = self.holder.compare_exchange(tag, NONE, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn is_free(&self) -> bool {
        self.holder.load(Ordering::Acquire) == NONE
    }

    pub fn current(&self) -> Option<Claimant> {
        match self.holder.load(Ordering::Acquire) {
            TONE_QUEUE => Some(Claimant::ToneQueue),
            KEYER => Some(Claimant::Keyer),
            STRAIGHT_KEY => Some(Claimant::StraightKey),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claimant_is_refused_while_held() {
        let owner = Owner::new();
        owner.claim(Claimant::ToneQueue).unwrap();
        assert!(matches!(owner.claim(Claimant::Keyer), Err(CwError::Busy(_))));
        owner.release(Claimant::ToneQueue);
        assert!(owner.claim(Claimant::Keyer).is_ok());
    }

    #[test]
    fn same_claimant_can_reclaim() {
        let owner = Owner::new();
        owner.claim(Claimant::StraightKey).unwrap();
        assert!(owner.claim(Claimant::StraightKey).is_ok());
    }

    #[test]
    fn releasing_someone_elses_claim_is_a_no_op() {
        let owner = Owner::new();
        owner.claim(Claimant::Keyer).unwrap();
        owner.release(Claimant::ToneQueue);
        assert_eq!(owner.current(), Some(Claimant::Keyer));
    }
}
