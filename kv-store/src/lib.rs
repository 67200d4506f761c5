//! The shared, concurrent key/value store backing `kvd`.
//!
//! A [`Store`] holds an in-memory mapping from string key to [`Entry`]
//! (value plus read/write counters), built around a persistent ordered map
//! held inside a compare-and-swap cell. `get` is lock-free; `set` only
//! retries on contention when it has to install a brand new key. The store
//! periodically snapshots itself to a binary file on disk (see
//! [`snapshot`]).

mod entry;
mod snapshot;
mod store;

pub use entry::{CounterSnapshot, Entry};
pub use snapshot::Error as SnapshotError;
pub use store::{EntryView, Error, Store};
