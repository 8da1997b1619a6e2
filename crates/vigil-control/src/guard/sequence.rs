//! Per-connection sequence-number tracking.

/// Outcome of offering a sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Greater than the last accepted. `gap` counts skipped numbers.
    Accept { gap: u64 },
    /// At or below the last accepted; `expected` is the next acceptable.
    Stale { expected: u64 },
}

#[derive(Debug, Default)]
pub struct SequenceTracker {
    last_accepted: Option<u64>,
}

impl SequenceTracker {
    /// Start after `last`, as declared at registration.
    pub fn starting_after(last: Option<u64>) -> Self {
        Self {
            last_accepted: last,
        }
    }

    pub fn last_accepted(&self) -> Option<u64> {
        self.last_accepted
    }

    /// Check `seq` without recording it.
    pub fn check(&self, seq: u64) -> SequenceCheck {
        match self.last_accepted {
            Some(last) if seq <= last => SequenceCheck::Stale { expected: last + 1 },
            Some(last) => SequenceCheck::Accept { gap: seq - last - 1 },
            // the first event of a connection sets the baseline
            None => SequenceCheck::Accept { gap: 0 },
        }
    }

    pub fn commit(&mut self, seq: u64) {
        if self.last_accepted.map_or(true, |last| seq > last) {
            self.last_accepted = Some(seq);
        }
    }
}
