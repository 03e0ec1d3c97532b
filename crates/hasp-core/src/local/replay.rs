//! Bounded, time-compacted record of recently accepted signatures.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Hard compile-time bound on ledger capacity.
///
/// A configured capacity above this is silently clamped down to it; the clamp
/// is load-bearing behavior, not a validation gap.
pub const REPLAY_LEDGER_MAX: usize = 32;

/// One accepted signature and the timestamp it authorized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRecord {
    /// Unix timestamp the signature covered.
    pub ts: u64,

    /// Lowercase hex signature exactly as accepted.
    pub sig: String,
}

/// Insertion-ordered ledger of recently accepted signatures.
///
/// Entries older than the retention window are dropped lazily by
/// [`compact`](Self::compact) before each lookup; when the ledger is full the
/// oldest record is evicted to admit a new one.
#[derive(Debug)]
pub struct ReplayLedger {
    records: VecDeque<ReplayRecord>,
    capacity: usize,
    retention_secs: u64,
}

impl ReplayLedger {
    /// Creates an empty ledger.
    ///
    /// `capacity` is clamped to [`REPLAY_LEDGER_MAX`].
    #[must_use]
    pub fn new(capacity: usize, retention_secs: u64) -> Self {
        let capacity = capacity.min(REPLAY_LEDGER_MAX);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            retention_secs,
        }
    }

    /// Creates a ledger pre-populated from persisted records.
    ///
    /// Records beyond the clamped capacity are dropped, oldest first.
    #[must_use]
    pub fn from_records(
        records: Vec<ReplayRecord>,
        capacity: usize,
        retention_secs: u64,
    ) -> Self {
        let mut ledger = Self::new(capacity, retention_secs);
        for record in records {
            if ledger.records.len() == ledger.capacity {
                ledger.records.pop_front();
            }
            ledger.records.push_back(record);
        }
        ledger
    }

    /// Drops entries strictly older than the retention window.
    ///
    /// Age is computed as a signed difference so that entries time-stamped
    /// slightly in the future (legal under the symmetric acceptance window)
    /// are retained until they actually age out.
    #[allow(clippy::cast_possible_wrap)]
    pub fn compact(&mut self, now_secs: u64) {
        let retention = self.retention_secs as i64;
        self.records
            .retain(|record| (now_secs as i64).saturating_sub(record.ts as i64) <= retention);
    }

    /// Whether `sig` was already accepted and is still retained.
    #[must_use]
    pub fn contains(&self, sig: &str) -> bool {
        self.records.iter().any(|record| record.sig == sig)
    }

    /// Records an accepted signature, evicting the oldest entry at capacity.
    pub fn remember(&mut self, sig: &str, ts: u64) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(ReplayRecord {
            ts,
            sig: sig.to_string(),
        });
    }

    /// Current entries, oldest first.
    #[must_use]
    pub fn records(&self) -> impl Iterator<Item = &ReplayRecord> {
        self.records.iter()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the ledger holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: u64, sig: &str) -> ReplayRecord {
        ReplayRecord {
            ts,
            sig: sig.to_string(),
        }
    }

    #[test]
    fn capacity_is_clamped_to_hard_bound() {
        let ledger = ReplayLedger::new(1_000, 600);
        assert_eq!(ledger.capacity, REPLAY_LEDGER_MAX);
    }

    #[test]
    fn eviction_is_fifo() {
        let mut ledger = ReplayLedger::new(3, 600);
        ledger.remember("a", 1);
        ledger.remember("b", 2);
        ledger.remember("c", 3);
        ledger.remember("d", 4);

        assert_eq!(ledger.len(), 3);
        assert!(!ledger.contains("a"));
        assert!(ledger.contains("b"));
        assert!(ledger.contains("d"));
    }

    #[test]
    fn compact_drops_only_expired_entries() {
        let mut ledger = ReplayLedger::new(8, 600);
        ledger.remember("old", 1_000);
        ledger.remember("fresh", 1_500);

        ledger.compact(1_601);
        assert!(!ledger.contains("old"));
        assert!(ledger.contains("fresh"));
    }

    #[test]
    fn compact_retains_future_dated_entries() {
        let mut ledger = ReplayLedger::new(8, 600);
        ledger.remember("ahead", 2_000);

        // Entry timestamp is ahead of "now"; it must survive compaction.
        ledger.compact(1_800);
        assert!(ledger.contains("ahead"));
    }

    #[test]
    fn from_records_respects_capacity() {
        let records = (0..10).map(|i| record(i, &format!("sig{i}"))).collect();
        let ledger = ReplayLedger::from_records(records, 4, 600);

        assert_eq!(ledger.len(), 4);
        assert!(!ledger.contains("sig5"));
        assert!(ledger.contains("sig9"));
    }
}
