//! Portable snapshots of a channel projection.
//!
//! A snapshot is a zip archive holding a single UTF-8 JSON document:
//!
//! ```text
//! {
//!   "startSequenceNumbers": [{"shard": "shard-0", "sequenceNumber": "4711"}],
//!   "data": {"key-1": "value", "key-2": null}
//! }
//! ```
//!
//! `data` lists the projection in the order the writer produced it; a `null`
//! value is a tombstone and is replayed as a deletion. Unknown top-level
//! fields are ignored. Snapshot objects are named
//! `compaction-<channel>-snapshot-<millis>.json.zip`.

mod reader;
mod writer;

pub use reader::SnapshotReader;
pub use writer::SnapshotWriter;

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const FILE_EXTENSION: &str = ".json.zip";

/// Prefix shared by all snapshot object names of `channel_name`.
pub fn file_name_prefix(channel_name: &str) -> String {
    format!("compaction-{channel_name}-snapshot-")
}

/// Object name of the snapshot of `channel_name` taken at `stamp`
/// (milliseconds since the Unix epoch).
pub fn file_name(channel_name: &str, stamp: u64) -> String {
    format!("{}{stamp}{FILE_EXTENSION}", file_name_prefix(channel_name))
}

/// Whether `name` is a snapshot object name of `channel_name`.
pub fn is_snapshot_of(name: &str, channel_name: &str) -> bool {
    name.starts_with(&file_name_prefix(channel_name)) && name.ends_with(FILE_EXTENSION)
}

/// Delete a local snapshot file.
///
/// Idempotent: does not error if the file doesn't exist.
pub fn delete(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// A local snapshot file that is deleted when dropped.
///
/// Both downloaded and freshly written snapshots are held as
/// `SnapshotFile`s, so they disappear from local storage however the pass
/// that uses them ends. Deletion failures are logged, never raised. Use
/// [`keep`](SnapshotFile::keep) to retain the file.
#[derive(Debug)]
pub struct SnapshotFile {
    path: PathBuf,
    keep: bool,
}

impl SnapshotFile {
    /// Take ownership of the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotFile {
            path: path.into(),
            keep: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file name, which is also the snapshot's object name.
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    /// Size of the file in bytes.
    pub fn byte_len(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Release the file from deletion and return its path.
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for SnapshotFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match delete(&self.path) {
            Ok(()) => log::debug!("deleted local snapshot {}", self.path.display()),
            Err(e) => log::warn!(
                "failed to delete local snapshot {}: {e}",
                self.path.display()
            ),
        }
    }
}

/// One element of the `startSequenceNumbers` array, as written.
#[derive(Serialize)]
struct SequenceNumberRef<'a> {
    shard: &'a str,
    #[serde(rename = "sequenceNumber")]
    sequence_number: &'a str,
}

/// One element of the `startSequenceNumbers` array, as read.
#[derive(Deserialize)]
struct SequenceNumberEntry {
    shard: String,
    #[serde(rename = "sequenceNumber")]
    sequence_number: SequenceNumberText,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SequenceNumberText {
    Text(String),
    Number(serde_json::Number),
}

impl SequenceNumberText {
    fn into_string(self) -> String {
        match self {
            SequenceNumberText::Text(text) => text,
            SequenceNumberText::Number(number) => number.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_the_channel_convention() {
        assert_eq!(
            file_name("orders", 1_700_000_000_000),
            "compaction-orders-snapshot-1700000000000.json.zip"
        );
        assert!(is_snapshot_of(
            "compaction-orders-snapshot-1700000000000.json.zip",
            "orders"
        ));
        assert!(!is_snapshot_of(
            "compaction-orders-snapshot-1700000000000.json.zip",
            "order"
        ));
        assert!(!is_snapshot_of("compaction-orders-snapshot-1.json", "orders"));
    }

    #[test]
    fn sequence_numbers_accept_strings_and_numbers() {
        let entries: Vec<SequenceNumberEntry> = serde_json::from_str(
            r#"[{"shard":"a","sequenceNumber":"0815"},{"shard":"b","sequenceNumber":42}]"#,
        )
        .unwrap();
        let texts: Vec<(String, String)> = entries
            .into_iter()
            .map(|e| (e.shard, e.sequence_number.into_string()))
            .collect();
        assert_eq!(
            texts,
            vec![
                ("a".to_string(), "0815".to_string()),
                ("b".to_string(), "42".to_string())
            ]
        );
    }
}
