//! Binary snapshot file format.
//!
//! ```text
//! count : u64              (fixed-width, little-endian)
//! repeated count times:
//!   key_size   : u64
//!   key_bytes  : key_size bytes
//!   value_size : u64
//!   value_bytes: value_size bytes
//! ```
//!
//! The reference implementation uses host-native `size_t` widths here, which
//! spec.md flags as non-portable. This format fixes the width at `u64`
//! little-endian instead, per §6's resolution of that open question.
//! Counters are never persisted: entries loaded from a snapshot start with
//! `reads = 0, writes = 0`. Keys and values are opaque bytes; no encoding is
//! assumed or enforced, so a value need not be valid UTF-8 to round-trip.

use std::io::{self, Read, Write};
use std::path::Path;

use bytes::Bytes;

/// Errors raised while reading or writing a snapshot file.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open snapshot file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read snapshot file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write snapshot file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// A single key/value pair as loaded from or about to be written to disk.
pub struct SnapshotEntry {
    pub key: Bytes,
    pub value: Bytes,
}

/// Load a snapshot from `path`. If the file does not exist, returns an empty
/// vector rather than an error, matching the reference implementation's
/// "absent file means empty store" behavior.
pub fn load(path: &Path) -> Result<Vec<SnapshotEntry>, Error> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(Error::Open {
                path: path.display().to_string(),
                source,
            })
        }
    };
    let mut reader = io::BufReader::new(file);
    let map_err = |source| Error::Read {
        path: path.display().to_string(),
        source,
    };

    let count = read_u64(&mut reader).map_err(map_err)?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let key = read_bytes(&mut reader).map_err(map_err)?;
        let value = read_bytes(&mut reader).map_err(map_err)?;
        entries.push(SnapshotEntry { key, value });
    }
    Ok(entries)
}

/// Write `entries` to `path`, overwriting any existing file. Keys are
/// written in the order given by the caller; the store iterates its
/// persistent map in key order for deterministic output.
pub fn write<'a>(
    path: &Path,
    entries: impl ExactSizeIterator<Item = (&'a [u8], &'a [u8])>,
) -> Result<(), Error> {
    let file = std::fs::File::create(path).map_err(|source| Error::Open {
        path: path.display().to_string(),
        source,
    })?;
    let mut writer = io::BufWriter::new(file);
    let map_err = |source| Error::Write {
        path: path.display().to_string(),
        source,
    };

    write_u64(&mut writer, entries.len() as u64).map_err(map_err)?;
    for (key, value) in entries {
        write_bytes(&mut writer, key).map_err(map_err)?;
        write_bytes(&mut writer, value).map_err(map_err)?;
    }
    writer.flush().map_err(map_err)?;
    Ok(())
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_bytes<R: Read>(r: &mut R) -> io::Result<Bytes> {
    let len = read_u64(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(Bytes::from(buf))
}

fn write_u64<W: Write>(w: &mut W, value: u64) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

fn write_bytes<W: Write>(w: &mut W, value: &[u8]) -> io::Result<()> {
    write_u64(w, value.len() as u64)?;
    w.write_all(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.dat");
        let entries = load(&path).expect("load of missing file should succeed");
        assert!(entries.is_empty());
    }

    #[test]
    fn round_trips_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.dat");

        let pairs: Vec<(&[u8], &[u8])> = vec![(b"a", b"1"), (b"b", b"2"), (b"c", b"")];
        write(&path, pairs.clone().into_iter()).expect("write");

        let loaded = load(&path).expect("load");
        let loaded_pairs: Vec<(Bytes, Bytes)> =
            loaded.into_iter().map(|e| (e.key, e.value)).collect();
        let expected: Vec<(Bytes, Bytes)> = pairs
            .into_iter()
            .map(|(k, v)| (Bytes::copy_from_slice(k), Bytes::copy_from_slice(v)))
            .collect();
        assert_eq!(loaded_pairs, expected);
    }

    #[test]
    fn non_utf8_value_round_trips_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("binary.dat");

        let value: &[u8] = &[0xFF, 0x00, 0xFE, b'x'];
        write(&path, [(b"k".as_slice(), value)].into_iter()).expect("write");

        let loaded = load(&path).expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].value.as_ref(), value);
    }

    #[test]
    fn empty_snapshot_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.dat");
        write(&path, Vec::<(&[u8], &[u8])>::new().into_iter()).expect("write");
        let loaded = load(&path).expect("load");
        assert!(loaded.is_empty());
    }
}
