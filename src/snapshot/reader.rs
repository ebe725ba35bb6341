use super::{SequenceNumberEntry, SnapshotFile};
use crate::archive;
use crate::codec::payload_text;
use crate::error::{ConsumeError, SnapshotError};
use crate::message::{Header, Key, Message};
use crate::position::{ChannelPosition, ShardPosition};
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, Visitor};
use serde_json::Value;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

const STOPPED: &str = "snapshot consumption stopped";
const HANDLER_FAILED: &str = "snapshot handler failed";

/// Streams the contents of a snapshot into a message handler.
///
/// The document is pulled token by token from the decompressing entry
/// reader; at no point is the whole document held in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotReader;

impl SnapshotReader {
    pub fn new() -> Self {
        SnapshotReader
    }

    /// Replay `file` as messages of `channel_name` and return the snapshot's
    /// channel position.
    ///
    /// Every `data` entry becomes a [`Message`] keyed by the entry key, with
    /// the snapshot's position of shard `channel_name` as its origin and the
    /// Unix epoch as arrival time; `null` entries become tombstones.
    /// `handler` sees each message first, then `stop` is asked whether to
    /// continue. Once `stop` returns `true` the rest of the document is left
    /// unread and the position decoded so far is returned.
    ///
    /// `file` is deleted when this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// A corrupt archive, a malformed document, an I/O failure or a failing
    /// `handler` aborts the pass. The returned [`ConsumeError`] carries the
    /// position decoded before the failure.
    pub fn consume<S, H>(
        &self,
        file: SnapshotFile,
        channel_name: &str,
        stop: S,
        handler: H,
    ) -> Result<ChannelPosition, ConsumeError>
    where
        S: FnMut(&Message) -> bool,
        H: FnMut(&Message) -> Result<(), SnapshotError>,
    {
        let mut pass = Pass {
            channel_name,
            position: ChannelPosition::from_horizon(),
            stop,
            handler,
            entries: 0,
            stopped: false,
            failure: None,
        };

        let outcome = archive::read_single_entry(file.path(), |entry| pass.run(entry, file.path()))
            .and_then(|result| result);

        match outcome {
            Ok(()) => {
                log::info!(
                    "consumed {} entries of snapshot {}{}",
                    pass.entries,
                    file.file_name(),
                    if pass.stopped { " (stopped early)" } else { "" }
                );
                Ok(pass.position)
            }
            Err(source) => {
                log::warn!(
                    "aborted snapshot {} after {} entries: {source}",
                    file.file_name(),
                    pass.entries
                );
                Err(ConsumeError {
                    position: pass.position,
                    source,
                })
            }
        }
    }
}

struct Pass<'a, S, H> {
    channel_name: &'a str,
    position: ChannelPosition,
    stop: S,
    handler: H,
    entries: u64,
    stopped: bool,
    failure: Option<SnapshotError>,
}

impl<S, H> Pass<'_, S, H>
where
    S: FnMut(&Message) -> bool,
    H: FnMut(&Message) -> Result<(), SnapshotError>,
{
    fn run(&mut self, entry: &mut dyn Read, path: &Path) -> Result<(), SnapshotError> {
        let mut de = serde_json::Deserializer::from_reader(entry);
        match Document(&mut *self).deserialize(&mut de) {
            Ok(()) => Ok(()),
            Err(_) if self.stopped => Ok(()),
            Err(e) => Err(self.failure.take().unwrap_or_else(|| {
                if e.is_io() {
                    SnapshotError::io(path, e.into())
                } else {
                    SnapshotError::Format(e.to_string())
                }
            })),
        }
    }

    /// Hand one `data` entry to the handler. Returns `false` once the pass
    /// must not continue.
    fn dispatch(&mut self, key: String, value: Value) -> bool {
        let origin = self.position.shard(self.channel_name);
        let message = Message::new(
            Key::of(key),
            Header::new(UNIX_EPOCH).with_shard_position(origin),
            payload_text(value),
        );
        if let Err(e) = (self.handler)(&message) {
            self.failure = Some(e);
            return false;
        }
        self.entries += 1;
        if (self.stop)(&message) {
            self.stopped = true;
            return false;
        }
        true
    }
}

fn to_position(entries: Vec<SequenceNumberEntry>) -> ChannelPosition {
    entries
        .into_iter()
        .map(|entry| {
            let sequence_number = entry.sequence_number.into_string();
            if sequence_number.is_empty() {
                ShardPosition::from_horizon(entry.shard)
            } else {
                ShardPosition::from_position(entry.shard, sequence_number)
            }
        })
        .collect()
}

/// The top-level snapshot object.
struct Document<'p, 'a, S, H>(&'p mut Pass<'a, S, H>);

impl<'de, S, H> DeserializeSeed<'de> for Document<'_, '_, S, H>
where
    S: FnMut(&Message) -> bool,
    H: FnMut(&Message) -> Result<(), SnapshotError>,
{
    type Value = ();

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, S, H> Visitor<'de> for Document<'_, '_, S, H>
where
    S: FnMut(&Message) -> bool,
    H: FnMut(&Message) -> Result<(), SnapshotError>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a snapshot object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        while let Some(field) = map.next_key::<String>()? {
            match field.as_str() {
                "startSequenceNumbers" => {
                    let entries = map.next_value::<Option<Vec<SequenceNumberEntry>>>()?;
                    self.0.position = to_position(entries.unwrap_or_default());
                }
                "data" => map.next_value_seed(Data(&mut *self.0))?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

/// The `data` object, dispatched entry by entry.
struct Data<'p, 'a, S, H>(&'p mut Pass<'a, S, H>);

impl<'de, S, H> DeserializeSeed<'de> for Data<'_, '_, S, H>
where
    S: FnMut(&Message) -> bool,
    H: FnMut(&Message) -> Result<(), SnapshotError>,
{
    type Value = ();

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de, S, H> Visitor<'de> for Data<'_, '_, S, H>
where
    S: FnMut(&Message) -> bool,
    H: FnMut(&Message) -> Result<(), SnapshotError>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an object of snapshot entries")
    }

    fn visit_unit<E: de::Error>(self) -> Result<(), E> {
        Ok(())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            let value = map.next_value::<Value>()?;
            if !self.0.dispatch(key, value) {
                let reason = if self.0.stopped { STOPPED } else { HANDLER_FAILED };
                return Err(de::Error::custom(reason));
            }
        }
        Ok(())
    }
}
