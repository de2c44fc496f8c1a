//! Entry and timeout-reference types for the expiring store.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// One live record in the store: the value, its absolute deadline, and
/// the duration the deadline was computed from (kept so callers can
/// inspect the configured lifetime of an entry).
#[derive(Debug, Clone)]
pub(crate) struct Entry<T> {
    pub(crate) value: T,
    pub(crate) deadline: Instant,
    pub(crate) expires_after: Duration,
}

impl<T> Entry<T> {
    pub(crate) fn new(value: T, expires_after: Duration) -> Self {
        Self {
            value,
            deadline: Instant::now() + expires_after,
            expires_after,
        }
    }

    pub(crate) fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Scheduling handle placed in the min-heap. Does not own the value;
/// a reference is only actionable while the live entry for `key`
/// carries the same deadline (a later put strands the old reference).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TimeoutRef {
    pub(crate) deadline: Instant,
    pub(crate) key: String,
}

impl Ord for TimeoutRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for TimeoutRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Point-in-time view of one entry, as returned by
/// [`TtlStore::entries`](crate::TtlStore::entries).
#[derive(Debug, Clone)]
pub struct EntrySnapshot<T> {
    pub value: T,
    pub deadline: Instant,
    pub expires_after: Duration,
}

/// Wire form of one entry for persistence: the value plus a wall-clock
/// deadline. Entries whose deadline has passed at restore time are
/// dropped rather than re-armed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry<T> {
    pub value: T,
    /// Absolute expiry as Unix epoch milliseconds.
    pub expires_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_not_expired_before_deadline() {
        let entry = Entry::new(7u32, Duration::from_secs(60));
        assert!(!entry.expired());
        assert_eq!(entry.expires_after, Duration::from_secs(60));
    }

    #[test]
    fn entry_expired_after_deadline() {
        let entry = Entry::new(7u32, Duration::ZERO);
        assert!(entry.expired());
    }

    #[test]
    fn timeout_refs_order_by_deadline() {
        let now = Instant::now();
        let early = TimeoutRef {
            deadline: now + Duration::from_secs(1),
            key: "b".to_string(),
        };
        let late = TimeoutRef {
            deadline: now + Duration::from_secs(2),
            key: "a".to_string(),
        };
        assert!(early < late);
    }
}
