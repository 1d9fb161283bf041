//! Sequence guard

/// How one incoming sequence number relates to the last applied one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Already covered by the book; drop
    Stale,
    /// Exactly the next sequence; apply
    InOrder,
    /// At least one sequence is missing; resync
    Gapped { expected: u64, received: u64 },
}

/// Tracks `last_applied`. Owned by the ingestion path, which is the only
/// caller of `advance` and `reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGuard {
    last_applied: u64,
}

impl SequenceGuard {
    pub fn new(last_applied: u64) -> Self {
        Self { last_applied }
    }

    #[inline]
    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn classify(&self, seq: u64) -> Classification {
        if seq <= self.last_applied {
            return Classification::Stale;
        }
        // seq > last_applied, so last_applied + 1 cannot overflow
        let expected = self.last_applied + 1;
        if seq == expected {
            Classification::InOrder
        } else {
            Classification::Gapped {
                expected,
                received: seq,
            }
        }
    }

    /// Record that `seq` was applied. Only valid after `classify` returned
    /// `InOrder` for it.
    pub fn advance(&mut self, seq: u64) {
        debug_assert_eq!(seq, self.last_applied + 1);
        self.last_applied = seq;
    }

    /// Adopt the sequence of a freshly installed snapshot.
    pub fn reset(&mut self, snapshot_sequence: u64) {
        self.last_applied = snapshot_sequence;
    }
}
