use crate::error::SnapshotError;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub(crate) type EntryWriter = ZipWriter<BufWriter<File>>;

/// Create a zip archive at `path` with a single deflated entry named
/// `entry_name`, ready to receive the entry's bytes.
pub(crate) fn create_single_entry(path: &Path, entry_name: &str) -> Result<EntryWriter, SnapshotError> {
    let file = File::create(path).map_err(|e| SnapshotError::io(path, e))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);
    writer.start_file(entry_name, options)?;
    Ok(writer)
}

/// Write the central directory and flush the archive to disk.
pub(crate) fn finish_single_entry(writer: EntryWriter, path: &Path) -> Result<(), SnapshotError> {
    let file = writer
        .finish()?
        .into_inner()
        .map_err(|e| SnapshotError::io(path, e.into_error()))?;
    file.sync_data().map_err(|e| SnapshotError::io(path, e))
}

/// Open the archive at `path` and hand a streaming decompressor over its
/// first entry to `read`.
///
/// Archives holding more than one entry are accepted; only the first entry
/// is read.
pub(crate) fn read_single_entry<T>(
    path: &Path,
    read: impl FnOnce(&mut dyn Read) -> T,
) -> Result<T, SnapshotError> {
    let file = File::open(path).map_err(|e| SnapshotError::io(path, e))?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    if archive.is_empty() {
        return Err(SnapshotError::Format("archive contains no entry".to_string()));
    }
    let entry = archive.by_index(0)?;
    let mut reader = BufReader::new(entry);
    Ok(read(&mut reader))
}
