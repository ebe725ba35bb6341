#![allow(dead_code)]

use channelfold::codec::RawRecord;
use channelfold::{
    ChannelPosition, Header, Key, Message, SnapshotFile, SnapshotReader, SnapshotWriter,
    StateRepository,
};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use zip::write::SimpleFileOptions;

pub fn arrival() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

pub fn record(shard: &str, sequence_number: &str, key: &str, data: &str) -> RawRecord {
    RawRecord::new(shard, sequence_number, key, data, arrival())
}

pub fn message(key: &str, payload: Option<&str>) -> Message {
    Message::new(
        Key::of(key),
        Header::new(arrival()),
        payload.map(str::to_string),
    )
}

pub fn repository_of(entries: &[(&str, &str)]) -> StateRepository<String> {
    let repository = StateRepository::in_memory();
    for (key, value) in entries {
        repository.put(*key, value.to_string()).unwrap();
    }
    repository
}

/// Write a snapshot of `entries` at `position` into `dir`.
pub fn write_snapshot(
    dir: &Path,
    channel: &str,
    position: &ChannelPosition,
    entries: &[(&str, &str)],
) -> SnapshotFile {
    SnapshotWriter::new(dir)
        .write(channel, position, &repository_of(entries))
        .unwrap()
}

/// Read a whole snapshot, collecting every message it yields.
pub fn read_all(file: SnapshotFile, channel: &str) -> (ChannelPosition, Vec<Message>) {
    let mut messages = Vec::new();
    let position = SnapshotReader::new()
        .consume(file, channel, |_| false, |m| {
            messages.push(m.clone());
            Ok(())
        })
        .unwrap();
    (position, messages)
}

/// Create a single-entry zip at `path` holding `document` verbatim.
pub fn raw_snapshot(path: &Path, document: &str) -> SnapshotFile {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file("snapshot.json", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(document.as_bytes()).unwrap();
    zip.finish().unwrap();
    SnapshotFile::new(path)
}

pub fn payloads(messages: &[Message]) -> Vec<(String, Option<String>)> {
    messages
        .iter()
        .map(|m| (m.key.compaction_key().to_string(), m.payload.clone()))
        .collect()
}
