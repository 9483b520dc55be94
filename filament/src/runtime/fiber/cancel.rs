//! Timeout cancelation tokens.
//!
//! Every fiber carries one 32-bit cancelation word:
//!
//! ```text
//!  31                                 1   0
//! +-------------------------------------+---+
//! |             generation              | A |
//! +-------------------------------------+---+
//! ```
//!
//! Arming a timeout sets `A` and bumps the generation; the resulting word is
//! the [`CancelationToken`]. Whoever wants to resume the fiber because of
//! that arming (the timer on expiry, or a waker on an explicit event)
//! must first win a compare-and-swap from `token` to `token & !A`. Exactly
//! one party wins, so the fiber is never resumed twice and never zero
//! times. Re-arming bumps the generation, which turns any in-flight resolve
//! still holding the old token into a failed CAS (the ABA case).
//!
//! The generation wraps after 2^31 arms of the same fiber; a resolver would
//! have to sleep through all of them to be confused. That bound is accepted.
//!
//! The winner also records which side won in a second cell keyed by
//! generation, so the resumed fiber can tell [`TimeoutOutcome::Expired`]
//! from [`TimeoutOutcome::Canceled`] even when it is polled spuriously.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const ARMED: u32 = 1;
const GENERATION_BITS: u32 = 31;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;

const OUTCOME_PRESENT: u64 = 1 << 32;
const OUTCOME_EXPIRED: u64 = 1;

/// The value of a fiber's cancelation word captured when a timeout was armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CancelationToken(u32);

impl CancelationToken {
    /// Generation counter encoded in the token.
    pub fn generation(self) -> u32 {
        self.0 >> 1
    }

    /// Raw word value.
    pub fn into_raw(self) -> u32 {
        self.0
    }
}

/// How an armed timeout ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// The timer fired before anyone resolved the token.
    Expired,
    /// Someone resolved the token before the timer fired.
    Canceled,
}

pub(crate) struct CancelationWord {
    word: AtomicU32,
    outcome: AtomicU64,
}

impl CancelationWord {
    pub(crate) const fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
            outcome: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    fn with_word(word: u32) -> Self {
        Self {
            word: AtomicU32::new(word),
            outcome: AtomicU64::new(0),
        }
    }

    /// Arms a new timeout.
    ///
    /// Must only be called by the fiber owning this word, which is the only
    /// writer outside of [`resolve`](Self::resolve).
    pub(crate) fn arm(&self) -> CancelationToken {
        let current = self.word.load(Ordering::Acquire);
        let next = (current & !ARMED).wrapping_add(2) | ARMED;
        self.word.store(next, Ordering::Release);

        CancelationToken(next)
    }

    /// Tries to take ownership of the resumption tied to `token`.
    pub(crate) fn resolve(&self, token: CancelationToken) -> bool {
        self.word
            .compare_exchange(
                token.0,
                token.0 & !ARMED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Whether `token` is still armed and unresolved.
    pub(crate) fn is_live(&self, token: CancelationToken) -> bool {
        self.word.load(Ordering::Acquire) == token.0
    }

    /// Records the outcome decided by the winner of [`resolve`](Self::resolve).
    ///
    /// An older generation never overwrites a newer one.
    pub(crate) fn publish(&self, token: CancelationToken, outcome: TimeoutOutcome) {
        let generation = token.generation();
        let mut value = OUTCOME_PRESENT | ((generation as u64) << 1);
        if outcome == TimeoutOutcome::Expired {
            value |= OUTCOME_EXPIRED;
        }

        let _ = self
            .outcome
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current & OUTCOME_PRESENT == 0 {
                    return Some(value);
                }

                let stored = ((current >> 1) as u32) & GENERATION_MASK;
                let ahead = generation.wrapping_sub(stored) & GENERATION_MASK;
                (ahead < 1 << (GENERATION_BITS - 1)).then_some(value)
            });
    }

    /// The published outcome for `token`, if its resolver has finished.
    pub(crate) fn outcome(&self, token: CancelationToken) -> Option<TimeoutOutcome> {
        let current = self.outcome.load(Ordering::Acquire);
        if current & OUTCOME_PRESENT == 0 {
            return None;
        }

        let stored = ((current >> 1) as u32) & GENERATION_MASK;
        if stored != token.generation() {
            return None;
        }

        Some(if current & OUTCOME_EXPIRED != 0 {
            TimeoutOutcome::Expired
        } else {
            TimeoutOutcome::Canceled
        })
    }
}
