use super::{SequenceNumberRef, SnapshotFile};
use crate::archive;
use crate::error::SnapshotError;
use crate::position::ChannelPosition;
use crate::state::StateRepository;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Writes snapshots into a local directory.
///
/// The document is streamed through the deflate encoder as it is produced,
/// so only one repository entry is serialized at a time. Each writer hands
/// out strictly increasing millisecond stamps, so two snapshots it writes
/// never share a name.
#[derive(Debug)]
pub struct SnapshotWriter {
    output_dir: PathBuf,
    last_stamp: AtomicU64,
}

impl SnapshotWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        SnapshotWriter {
            output_dir: output_dir.into(),
            last_stamp: AtomicU64::new(0),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write `position` and the contents of `repository` as a snapshot of
    /// `channel_name`.
    ///
    /// Returns the written file, which is deleted once dropped.
    ///
    /// # Errors
    ///
    /// Any I/O or encoding failure deletes the partial file and is returned
    /// to the caller unretried.
    pub fn write<V>(
        &self,
        channel_name: &str,
        position: &ChannelPosition,
        repository: &StateRepository<V>,
    ) -> Result<SnapshotFile, SnapshotError>
    where
        V: Serialize + DeserializeOwned + Clone + Send + Sync,
    {
        let name = super::file_name(channel_name, self.next_stamp());
        let file = SnapshotFile::new(self.output_dir.join(&name));
        let entry_name = name.trim_end_matches(".zip");

        let mut zip = archive::create_single_entry(file.path(), entry_name)?;
        let entries = write_document(&mut zip, file.path(), position, repository)?;
        archive::finish_single_entry(zip, file.path())?;

        log::info!(
            "wrote snapshot {} of channel '{channel_name}': {} shards, {entries} entries, {} bytes",
            file.file_name(),
            position.shards().len(),
            file.byte_len().unwrap_or_default()
        );
        Ok(file)
    }

    fn next_stamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        let previous = self
            .last_stamp
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }
}

fn write_document<V>(
    out: impl Write,
    path: &Path,
    position: &ChannelPosition,
    repository: &StateRepository<V>,
) -> Result<u64, SnapshotError>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    let io_err = |e| SnapshotError::io(path, e);
    let mut out = BufWriter::new(out);

    out.write_all(b"{\"startSequenceNumbers\":[").map_err(io_err)?;
    for (i, shard) in position.positions().enumerate() {
        if i > 0 {
            out.write_all(b",").map_err(io_err)?;
        }
        let entry = SequenceNumberRef {
            shard: shard.shard_id(),
            sequence_number: shard.position(),
        };
        serde_json::to_writer(&mut out, &entry).map_err(|source| SnapshotError::Encode {
            key: shard.shard_id().to_string(),
            source,
        })?;
    }

    out.write_all(b"],\"data\":{").map_err(io_err)?;
    let mut entries = 0u64;
    for (key, value) in repository.iter() {
        if entries > 0 {
            out.write_all(b",").map_err(io_err)?;
        }
        let encode_err = |source| SnapshotError::Encode {
            key: key.clone(),
            source,
        };
        serde_json::to_writer(&mut out, &key).map_err(encode_err)?;
        out.write_all(b":").map_err(io_err)?;
        serde_json::to_writer(&mut out, &value).map_err(encode_err)?;
        entries += 1;
    }
    out.write_all(b"}}").map_err(io_err)?;
    out.flush().map_err(io_err)?;
    Ok(entries)
}
