use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;

use crate::entry::{CounterSnapshot, Counters, Entry};
use crate::snapshot::{self, SnapshotEntry};

/// A persistent (structurally-shared, immutable) ordered map from key to
/// entry. Swapping the [`ArcSwap`] that wraps it is how [`Store::set`]
/// publishes a new version without ever locking a reader. Keys are opaque
/// byte strings, per spec.md §3; `Bytes` orders lexicographically by its
/// underlying bytes, which is all the "ordering used for deterministic
/// snapshot output" requires.
type Map = im::OrdMap<Bytes, Arc<Entry>>;

/// Errors surfaced by [`Store`]. Everything other than snapshot I/O is
/// impossible by construction: `get`/`set` cannot fail.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Snapshot(#[from] snapshot::Error),
}

/// An observation of a stored key, returned by [`Store::get`].
#[derive(Debug, Clone)]
pub struct EntryView {
    key: Bytes,
    entry: Arc<Entry>,
}

impl EntryView {
    /// The key that was looked up.
    #[must_use]
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// The value observed at lookup time. A concurrent `SET` may have since
    /// replaced it; this is a snapshot, not a live view.
    #[must_use]
    pub fn value(&self) -> Arc<Bytes> {
        self.entry.value()
    }

    /// Read count as of lookup time (already incremented for this read).
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.entry.reads()
    }

    /// Write count as of lookup time.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.entry.writes()
    }
}

/// The shared, concurrent key/value store.
///
/// `get` is lock-free: it loads the current map snapshot and borrows from
/// it, bumping atomic counters on the retained entry. `set` installs a new
/// map snapshot via compare-and-swap when a key is created for the first
/// time; overwriting an existing key mutates the retained entry in place and
/// requires no map-level CAS at all, since every snapshot that has ever
/// contained that key points at the same `Entry`.
pub struct Store {
    root: ArcSwap<Map>,
    dirty: AtomicBool,
    path: PathBuf,
    stats: Counters,
}

impl Store {
    /// Open (or create) a store backed by the snapshot file at `path`. If
    /// the file exists it is loaded synchronously before this call returns,
    /// matching the reference implementation's constructor-time load.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let entries = snapshot::load(&path)?;
        let mut map = Map::new();
        for SnapshotEntry { key, value } in entries {
            map.insert(key, Arc::new(Entry::from_snapshot(value)));
        }
        Ok(Self {
            root: ArcSwap::from_pointee(map),
            dirty: AtomicBool::new(false),
            path,
            stats: Counters::default(),
        })
    }

    /// Look up `key`. On a hit, increments that entry's read counter and the
    /// process-wide GET counters before returning the observation.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<EntryView> {
        let snapshot = self.root.load();
        let entry = snapshot.get(key)?.clone();
        entry.mark_read();
        self.stats.add_get();
        Some(EntryView {
            key: Bytes::copy_from_slice(key),
            entry,
        })
    }

    /// Insert or update `key`. See the type-level docs for why this only
    /// retries a compare-and-swap on the *create* path.
    pub fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        let key = key.into();
        let value = value.into();

        loop {
            let current = self.root.load_full();
            if let Some(entry) = current.get(&key) {
                entry.overwrite(value);
                break;
            }

            let new_entry = Arc::new(Entry::new(value.clone()));
            let mut next = (*current).clone();
            next.insert(key.clone(), new_entry);
            let next = Arc::new(next);

            let previous = self.root.compare_and_swap(&current, next);
            if Arc::ptr_eq(&*previous, &current) {
                break;
            }
            // Another writer installed a snapshot between our load and our
            // compare_and_swap. Retry: it may have created this same key,
            // in which case the next iteration takes the overwrite path.
        }

        self.stats.add_set();
        self.dirty.store(true, Ordering::Release);
    }

    /// If the store has been mutated since the last successful flush, write
    /// a fresh snapshot to disk and clear the dirty flag. The write itself
    /// runs on a blocking-pool thread so the caller (typically the snapshot
    /// timer, sharing the async runtime with every connection) never blocks
    /// a worker on disk I/O.
    ///
    /// Returns `Ok(true)` if a write occurred, `Ok(false)` if the store was
    /// already clean. On I/O failure the dirty flag stays cleared for this
    /// attempt; the next `set` re-arms it.
    pub async fn flush_if_dirty(&self) -> Result<bool, Error> {
        if self
            .dirty
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return Ok(false);
        }

        let snapshot = self.root.load_full();
        let path = self.path.clone();
        let write_result = tokio::task::spawn_blocking(move || {
            let pairs: Vec<(Bytes, Bytes)> = snapshot
                .iter()
                .map(|(k, v)| (k.clone(), (*v.value()).clone()))
                .collect();
            let borrowed: Vec<(&[u8], &[u8])> =
                pairs.iter().map(|(k, v)| (k.as_ref(), v.as_ref())).collect();
            snapshot::write(&path, borrowed.into_iter())
        })
        .await;

        match write_result {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed to write snapshot");
                Err(Error::Snapshot(e))
            }
            Err(join_err) => {
                tracing::error!(error = %join_err, "snapshot write task panicked");
                Err(Error::Snapshot(snapshot::Error::Write {
                    path: self.path.display().to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, join_err),
                }))
            }
        }
    }

    /// The shared GET/SET counters, resetting the window pair as a side
    /// effect (the stats timer calls this once per tick).
    #[must_use]
    pub fn get_stats(&self) -> CounterSnapshot {
        self.stats.snapshot_and_reset_window()
    }

    /// The snapshot file path this store was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct keys currently stored. Test/diagnostic helper.
    #[must_use]
    pub fn len(&self) -> usize {
        self.root.load().len()
    }

    /// Whether the store currently holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
