use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;

/// One stored value plus its per-key read and write counters.
///
/// The value is an opaque byte string (spec.md §3): arbitrary bytes, not
/// necessarily valid UTF-8, carried as [`Bytes`] rather than `String` so
/// nothing in the store ever transcodes or validates it.
///
/// Identity matters: the same `Entry` (behind the same `Arc`) is retained
/// across `SET`s to an existing key, so counters keep counting even as the
/// map snapshot holding it is swapped out from under readers.
#[derive(Debug)]
pub struct Entry {
    value: ArcSwap<Bytes>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl Entry {
    /// A freshly-created entry as installed by the first `SET` of a key:
    /// zero reads, one write.
    pub(crate) fn new(value: Bytes) -> Self {
        Self {
            value: ArcSwap::from_pointee(value),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(1),
        }
    }

    /// An entry loaded from a snapshot file: counters reset to zero, per
    /// spec.md's snapshot round-trip invariant.
    pub(crate) fn from_snapshot(value: Bytes) -> Self {
        Self {
            value: ArcSwap::from_pointee(value),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// The current value.
    #[must_use]
    pub fn value(&self) -> Arc<Bytes> {
        self.value.load_full()
    }

    /// Replace the value and bump the write counter. Called on a `SET` to an
    /// already-present key.
    pub(crate) fn overwrite(&self, value: Bytes) {
        self.value.store(Arc::new(value));
        self.writes.fetch_add(1, Ordering::AcqRel);
    }

    /// Bump the read counter. Called on every successful `GET`.
    pub(crate) fn mark_read(&self) {
        self.reads.fetch_add(1, Ordering::AcqRel);
    }

    /// Current read count.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Acquire)
    }

    /// Current write count.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }
}

/// Process-wide GET/SET counters: a cumulative total and a window reset by
/// the stats timer.
#[derive(Debug, Default)]
pub struct Counters {
    get_total: AtomicU64,
    set_total: AtomicU64,
    get_window: AtomicU64,
    set_window: AtomicU64,
}

/// A point-in-time view of [`Counters`], returned by [`Counters::snapshot_and_reset_window`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub get_total: u64,
    pub set_total: u64,
    pub get_window: u64,
    pub set_window: u64,
}

impl Counters {
    pub(crate) fn add_get(&self) {
        self.get_total.fetch_add(1, Ordering::Relaxed);
        self.get_window.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_set(&self) {
        self.set_total.fetch_add(1, Ordering::Relaxed);
        self.set_window.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all four counters and reset the window pair to zero, as the
    /// stats timer does every tick.
    pub fn snapshot_and_reset_window(&self) -> CounterSnapshot {
        CounterSnapshot {
            get_total: self.get_total.load(Ordering::Relaxed),
            set_total: self.set_total.load(Ordering::Relaxed),
            get_window: self.get_window.swap(0, Ordering::Relaxed),
            set_window: self.set_window.swap(0, Ordering::Relaxed),
        }
    }
}
