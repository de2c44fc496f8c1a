//! siesta-ttl — expiring key/value registry for session tracking.
//!
//! A `TtlStore<T>` maps string keys to values with independent
//! expiration deadlines. Expiration is scheduled through a binary
//! min-heap of timeout references so the background reclamation loop
//! wakes close to the earliest deadline instead of polling every key.
//!
//! # Architecture
//!
//! The backing table is the single source of truth; heap references are
//! scheduling hints that are validated against the table when popped
//! (a re-put leaves the old reference stale, and stale references are
//! discarded). Expiry notifications run as independent spawned tasks
//! outside the store lock, so a slow or panicking callback cannot block
//! reads and writes or stop the loop.
//!
//! The `TtlStore` is `Clone` + `Send` + `Sync` (shared interior behind
//! an `Arc`) and can be handed to async tasks freely.

pub mod entry;
pub mod error;
pub mod store;

pub use entry::{EntrySnapshot, PersistedEntry};
pub use error::{TtlError, TtlResult};
pub use store::{BoxFuture, ExpiryCallback, TtlStore, DEFAULT_REAP_INTERVAL};
