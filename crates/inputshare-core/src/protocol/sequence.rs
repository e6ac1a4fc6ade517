//! Sequence numbering for outbound envelopes and loss detection for inbound
//! ones.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// A thread-safe, monotonically increasing counter for envelope sequence
/// numbers.
///
/// Numbers start at 0 and increment by 1 per [`next`](SequenceCounter::next).
/// The counter wraps at `u64::MAX` without panicking; a session never comes
/// close to that bound.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next sequence number and atomically advances the counter.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the current value without advancing.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

/// Observes inbound sequence numbers from one remote peer.
///
/// Sequence numbers must strictly increase within a session; a jump of more
/// than one implies frames were lost in transit and is surfaced for
/// diagnostics. Out-of-order or repeated numbers indicate a misbehaving
/// peer and are reported as [`SequenceObservation::NotMonotonic`].
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last: Option<u64>,
}

/// Result of feeding one inbound sequence number to a [`SequenceTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceObservation {
    /// The number followed its predecessor directly (or was the first seen).
    InOrder,
    /// `missing` numbers were skipped since the previous observation.
    Gap { missing: u64 },
    /// The number did not increase relative to the previous observation.
    NotMonotonic { previous: u64 },
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `sequence` and classifies it against the previous observation.
    pub fn observe(&mut self, sequence: u64) -> SequenceObservation {
        let observation = match self.last {
            None => SequenceObservation::InOrder,
            Some(previous) if sequence == previous.wrapping_add(1) => {
                SequenceObservation::InOrder
            }
            Some(previous) if sequence > previous => {
                let missing = sequence - previous - 1;
                debug!(missing, sequence, "inbound sequence gap; frames lost in transit");
                SequenceObservation::Gap { missing }
            }
            Some(previous) => {
                debug!(sequence, previous, "inbound sequence not monotonic");
                SequenceObservation::NotMonotonic { previous }
            }
        };
        // A non-monotonic number still becomes the new reference point so a
        // peer restart resynchronizes after one report.
        self.last = Some(sequence);
        observation
    }

    /// Forgets all prior observations (new session, same tracker).
    pub fn reset(&mut self) {
        self.last = None;
    }
}
