//! TtlStore — concurrency-safe registry with per-key expiration.
//!
//! Keys map to values with independent deadlines. A background
//! reclamation loop pops due timeout references off a min-heap,
//! validates them against the backing table, deletes genuinely expired
//! entries, and fires the expiry callback for each — asynchronously and
//! outside the store lock. Reads additionally evict lazily, so an entry
//! past its deadline is never observable even before the loop gets to it.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, trace};

use crate::entry::{Entry, EntrySnapshot, PersistedEntry, TimeoutRef};
use crate::error::{TtlError, TtlResult};

/// Reap interval used when the caller passes a zero interval.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(20);

/// Floor for the smoothed loop interval.
const MIN_REAP_INTERVAL: Duration = Duration::from_millis(1);

/// Boxed future returned by expiry callbacks.
pub type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Callback invoked (in its own task) when an entry expires.
///
/// Receives the key and the value that was evicted. Fires at most once
/// per put that reaches its deadline unmodified.
pub type ExpiryCallback<T> = Arc<dyn Fn(String, T) -> BoxFuture + Send + Sync>;

/// Table and heap, guarded together: the heap is only touched while
/// holding the same lock as the table.
struct Shared<T> {
    table: HashMap<String, Entry<T>>,
    heap: BinaryHeap<Reverse<TimeoutRef>>,
}

/// Expiring key/value store, generic over the stored value type.
///
/// Cloning is cheap and clones share the same backing table. The owner
/// must call [`stop`](TtlStore::stop) exactly once at shutdown;
/// operations on a stopped store are undefined.
pub struct TtlStore<T> {
    shared: Arc<Mutex<Shared<T>>>,
    on_expire: Option<ExpiryCallback<T>>,
    shutdown_tx: watch::Sender<bool>,
}

impl<T> Clone for TtlStore<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            on_expire: self.on_expire.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> TtlStore<T> {
    /// Create a store with no expiry callback.
    ///
    /// `reap_interval` is the loop's fallback wake-up period when no
    /// deadline is pending; zero selects [`DEFAULT_REAP_INTERVAL`].
    /// Must be called inside a Tokio runtime.
    pub fn new(reap_interval: Duration) -> Self {
        Self::build(reap_interval, None)
    }

    /// Create a store that notifies `on_expire` for every expired entry.
    pub fn with_expiry(reap_interval: Duration, on_expire: ExpiryCallback<T>) -> Self {
        Self::build(reap_interval, Some(on_expire))
    }

    fn build(reap_interval: Duration, on_expire: Option<ExpiryCallback<T>>) -> Self {
        let reap_interval = if reap_interval.is_zero() {
            DEFAULT_REAP_INTERVAL
        } else {
            reap_interval
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Mutex::new(Shared {
            table: HashMap::new(),
            heap: BinaryHeap::new(),
        }));

        tokio::spawn(run_reap_loop(
            Arc::clone(&shared),
            on_expire.clone(),
            reap_interval,
            shutdown_rx,
        ));

        Self {
            shared,
            on_expire,
            shutdown_tx,
        }
    }

    /// Insert or replace the entry for `key`, expiring `expires_after`
    /// from now. A replacement strands the previous timeout reference.
    ///
    /// Concurrent puts for the same key race and the last write wins —
    /// both for the cached value and the deadline.
    pub fn put(&self, key: &str, value: T, expires_after: Duration) {
        let entry = Entry::new(value, expires_after);
        let mut shared = self.lock();
        shared.heap.push(Reverse(TimeoutRef {
            deadline: entry.deadline,
            key: key.to_string(),
        }));
        shared.table.insert(key.to_string(), entry);
    }

    /// Guarded put: applied only if `guard` accepts the current value
    /// (`None` when the key is absent).
    ///
    /// When the guard accepts over an existing entry, the existing
    /// deadline is kept and `expires_after` is ignored — an unrelated
    /// write must not move the inactivity clock. On a fresh key the new
    /// `expires_after` applies.
    pub fn compare_and_put<F>(
        &self,
        key: &str,
        value: T,
        expires_after: Duration,
        guard: F,
    ) -> TtlResult<()>
    where
        F: FnOnce(Option<&T>) -> bool,
    {
        let mut shared = self.lock();
        if let Some(existing) = shared.table.get_mut(key) {
            if !guard(Some(&existing.value)) {
                return Err(TtlError::GuardRejected);
            }
            existing.value = value;
            return Ok(());
        }
        if !guard(None) {
            return Err(TtlError::GuardRejected);
        }
        let entry = Entry::new(value, expires_after);
        shared.heap.push(Reverse(TimeoutRef {
            deadline: entry.deadline,
            key: key.to_string(),
        }));
        shared.table.insert(key.to_string(), entry);
        Ok(())
    }

    /// Get the live value for `key`.
    ///
    /// An entry past its deadline that the loop has not reaped yet is
    /// evicted here, its notification fired asynchronously, and `None`
    /// returned.
    pub fn get(&self, key: &str) -> Option<T> {
        let evicted = {
            let mut shared = self.lock();
            match shared.table.get(key) {
                None => return None,
                Some(entry) if !entry.expired() => return Some(entry.value.clone()),
                Some(_) => shared.table.remove(key),
            }
        };
        if let Some(entry) = evicted {
            trace!(%key, "evicted expired entry on read");
            dispatch_expirations(&self.on_expire, vec![(key.to_string(), entry.value)]);
        }
        None
    }

    /// Remove an entry immediately. Removing an absent key is a no-op.
    pub fn delete(&self, key: &str) {
        self.lock().table.remove(key);
    }

    /// Remove an entry immediately and return its value.
    pub fn take(&self, key: &str) -> Option<T> {
        self.lock().table.remove(key).map(|e| e.value)
    }

    /// Point-in-time key snapshot. No ordering guarantee.
    pub fn keys(&self) -> Vec<String> {
        self.lock().table.keys().cloned().collect()
    }

    /// Point-in-time value snapshot. No ordering guarantee.
    pub fn values(&self) -> Vec<T> {
        self.lock().table.values().map(|e| e.value.clone()).collect()
    }

    /// Point-in-time snapshot of all entries with their deadlines.
    pub fn entries(&self) -> HashMap<String, EntrySnapshot<T>> {
        self.lock()
            .table
            .iter()
            .map(|(k, e)| {
                (
                    k.clone(),
                    EntrySnapshot {
                        value: e.value.clone(),
                        deadline: e.deadline,
                        expires_after: e.expires_after,
                    },
                )
            })
            .collect()
    }

    /// Export all live entries with wall-clock deadlines, for
    /// serialization by the caller.
    pub fn snapshot(&self) -> HashMap<String, PersistedEntry<T>> {
        let now = Instant::now();
        let wall = SystemTime::now();
        self.lock()
            .table
            .iter()
            .map(|(k, e)| {
                let remaining = e.deadline.saturating_duration_since(now);
                let expires_at_ms = (wall + remaining)
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64;
                (
                    k.clone(),
                    PersistedEntry {
                        value: e.value.clone(),
                        expires_at_ms,
                    },
                )
            })
            .collect()
    }

    /// Re-arm entries from a snapshot. Entries whose wall-clock deadline
    /// has already passed are dropped, not re-armed.
    pub fn restore(&self, snapshot: HashMap<String, PersistedEntry<T>>) {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        for (key, entry) in snapshot {
            if entry.expires_at_ms <= now_ms {
                debug!(%key, "dropping already-expired entry from snapshot");
                continue;
            }
            self.put(
                &key,
                entry.value,
                Duration::from_millis(entry.expires_at_ms - now_ms),
            );
        }
    }

    /// Terminate the background reclamation loop. Idempotent.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn lock(&self) -> MutexGuard<'_, Shared<T>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background reclamation loop: sleep, sweep, reschedule.
///
/// The next sleep targets the earliest remaining deadline, smoothed with
/// a weighted moving average of recent waits so the loop does not
/// oscillate between very short and very long sleeps. With an empty heap
/// it falls back to `base_interval`.
async fn run_reap_loop<T: Send + 'static>(
    shared: Arc<Mutex<Shared<T>>>,
    on_expire: Option<ExpiryCallback<T>>,
    base_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = base_interval;
    debug!(base_ms = base_interval.as_millis() as u64, "reclamation loop started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let (expired, next_wait) = sweep(&shared);
                if !expired.is_empty() {
                    trace!(count = expired.len(), "reaped expired entries");
                }
                dispatch_expirations(&on_expire, expired);

                interval = match next_wait {
                    Some(wait) if wait <= base_interval => (interval * 2 + wait) / 3,
                    _ => base_interval,
                };
                if interval < MIN_REAP_INTERVAL {
                    interval = MIN_REAP_INTERVAL;
                }
            }
            _ = shutdown.changed() => {
                debug!("reclamation loop shutting down");
                break;
            }
        }
    }
}

/// Pop due references, discard stale ones, and remove expired entries.
///
/// Returns the evicted `(key, value)` pairs and the time until the
/// earliest remaining actionable deadline, if any. A reference is
/// actionable only while the live entry carries the same deadline;
/// anything else is leftover from an overwritten put or a deleted key.
fn sweep<T>(shared: &Mutex<Shared<T>>) -> (Vec<(String, T)>, Option<Duration>) {
    let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
    let now = Instant::now();
    let mut expired = Vec::new();

    let next_wait = loop {
        let head = match guard.heap.peek() {
            Some(Reverse(h)) => h.clone(),
            None => break None,
        };
        let actionable = guard
            .table
            .get(&head.key)
            .is_some_and(|e| e.deadline == head.deadline);
        if !actionable {
            guard.heap.pop();
            continue;
        }
        if head.deadline > now {
            break Some(head.deadline - now);
        }
        guard.heap.pop();
        if let Some(entry) = guard.table.remove(&head.key) {
            expired.push((head.key, entry.value));
        }
    };

    (expired, next_wait)
}

/// Fire the expiry callback for each evicted entry, each in its own
/// task so one slow or failing callback cannot hold up the others. A
/// panic is caught and logged; it never reaches the reclamation loop.
fn dispatch_expirations<T: Send + 'static>(
    on_expire: &Option<ExpiryCallback<T>>,
    expired: Vec<(String, T)>,
) {
    let Some(on_expire) = on_expire else {
        return;
    };
    for (key, value) in expired {
        let callback = Arc::clone(on_expire);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(callback(key.clone(), value))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                error!(%key, "expiry callback panicked");
            }
        });
    }
}
