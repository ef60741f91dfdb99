//! Bitstream-state keying for loop-closure detection.
//!
//! A state is `{source-event index, current PWM range, pending-events queue}`. Two states with
//! matching index and pending queue are the same compiler state *unless* both have a nonzero
//! range and those ranges differ: a `range = 0` (nothing emitted yet) matches any range, which is
//! what lets a freshly-compiled successor stream splice into a predecessor whose range is already
//! known. This relation is reflexive and symmetric but deliberately not transitive, so it is
//! implemented as a lookup function rather than a `HashMap` keyed on a `PartialEq` impl.

use std::collections::HashMap;

use crate::bitstream::EVENT_DELAY;

/// The GPIO-affecting markers that can be in flight in the two-DREQ delay queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingEvent {
    RailComCutoutStart,
    RailComCutoutEnd,
    DebugStart,
    DebugEnd,
}

/// One entry in the pending-event queue: an event and the number of words remaining before it is
/// due at the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingEntry {
    pub event: PendingEvent,
    pub countdown: u8,
}

/// The ordered queue of not-yet-due GPIO events, bounded at `EVENT_DELAY` entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PendingQueue {
    entries: Vec<PendingEntry>,
}

impl PendingQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a newly-scheduled event at the back of the queue, with the full event delay.
    pub fn push(&mut self, event: PendingEvent) {
        debug_assert!((self.entries.len() as u8) < EVENT_DELAY, "pending queue overflow");
        self.entries.push(PendingEntry {
            event,
            countdown: EVENT_DELAY,
        });
    }

    /// Decrements every entry's countdown by one (one word was just appended to the output), and
    /// removes+returns any entries that have reached zero, in FIFO order.
    pub fn tick(&mut self) -> Vec<PendingEvent> {
        let mut due = Vec::new();
        self.entries.retain_mut(|entry| {
            entry.countdown -= 1;
            if entry.countdown == 0 {
                due.push(entry.event);
                false
            } else {
                true
            }
        });
        due
    }

    /// Whether any entry is due right now without ticking (used to decide whether a coalesced
    /// Data CB must close before accepting another word).
    #[must_use]
    pub fn has_due(&self) -> bool {
        self.entries.iter().any(|entry| entry.countdown == 1)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `{source-event index, current PWM range, pending-events queue}`, keying a point the compiler
/// has already reached so it can close a loop instead of unrolling forever.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub index: usize,
    pub range: u32,
    pub pending: PendingQueue,
}

/// Records every state key the compiler has emitted a control block for, keyed by `(index,
/// pending)` with ranges kept in a small side list so the range=0 wildcard rule can be applied at
/// lookup time without breaking `Eq`/`Hash`'s transitivity requirements.
#[derive(Debug, Default)]
pub struct StateTable {
    buckets: HashMap<(usize, Vec<PendingEntry>), Vec<(u32, usize)>>,
}

impl StateTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_key(key: &StateKey) -> (usize, Vec<PendingEntry>) {
        (key.index, key.pending.entries.clone())
    }

    /// Records that `key` was reached at control-block index `cb_index`.
    pub fn insert(&mut self, key: &StateKey, cb_index: usize) {
        self.buckets.entry(Self::bucket_key(key)).or_default().push((key.range, cb_index));
    }

    /// Looks up a control-block index for a state equal to `key` under the asymmetric range
    /// rule: `key.range == 0` matches any recorded range; otherwise the recorded range must equal
    /// `key.range` or have been recorded as `0`.
    #[must_use]
    pub fn find(&self, key: &StateKey) -> Option<usize> {
        let bucket = self.buckets.get(&Self::bucket_key(key))?;
        if key.range == 0 {
            bucket.first().map(|(_, cb_index)| *cb_index)
        } else {
            bucket
                .iter()
                .find(|(range, _)| *range == key.range || *range == 0)
                .map(|(_, cb_index)| *cb_index)
        }
    }
}

/// A recorded safe handover point: `{control-block index, PWM range in effect, pending-events
/// queue}`. Two breakpoints compare equal iff all three fields match exactly (ordinary, symmetric
/// equality -- unlike [`StateKey`], breakpoints are only ever compared to other breakpoints of
/// streams that have already committed, so there is no "unknown incoming range" to reconcile).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub control_block_index: usize,
    pub range: u32,
    pub pending: PendingQueue,
}
