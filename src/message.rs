use crate::position::ShardPosition;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime};

/// The key of a message.
///
/// Channels partition by `partition_key`; projections and compaction use the
/// compaction key, which is the single key unless a compound key was given.
///
/// # Examples
///
/// ```
/// use channelfold::Key;
///
/// let simple = Key::of("42");
/// assert_eq!(simple.compaction_key(), "42");
///
/// let compound = Key::compound("order-7", "order-7#line-2");
/// assert_eq!(compound.partition_key(), "order-7");
/// assert_eq!(compound.compaction_key(), "order-7#line-2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Single(String),
    Compound {
        partition_key: String,
        compaction_key: String,
    },
}

impl Key {
    pub fn of(key: impl Into<String>) -> Self {
        Key::Single(key.into())
    }

    pub fn compound(partition_key: impl Into<String>, compaction_key: impl Into<String>) -> Self {
        Key::Compound {
            partition_key: partition_key.into(),
            compaction_key: compaction_key.into(),
        }
    }

    pub fn partition_key(&self) -> &str {
        match self {
            Key::Single(key) => key,
            Key::Compound { partition_key, .. } => partition_key,
        }
    }

    /// The key under which the message is projected.
    pub fn compaction_key(&self) -> &str {
        match self {
            Key::Single(key) => key,
            Key::Compound { compaction_key, .. } => compaction_key,
        }
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, Key::Compound { .. })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Single(key) => f.write_str(key),
            Key::Compound {
                partition_key,
                compaction_key,
            } => write!(f, "{partition_key}:{compaction_key}"),
        }
    }
}

/// Transport metadata attached to a message.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Header {
    /// When the record arrived in the channel. Messages replayed from a
    /// snapshot carry [`SystemTime::UNIX_EPOCH`].
    pub arrival_timestamp: SystemTime,

    /// Shard and position the message was read from.
    pub shard_position: Option<ShardPosition>,

    /// How far the reader was behind the channel tip when it read the message.
    pub duration_behind_tip: Option<Duration>,

    /// Open attribute map, filled from v2 envelope headers.
    pub attributes: BTreeMap<String, String>,
}

impl Header {
    pub fn new(arrival_timestamp: SystemTime) -> Self {
        Header {
            arrival_timestamp,
            shard_position: None,
            duration_behind_tip: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_shard_position(mut self, shard_position: ShardPosition) -> Self {
        self.shard_position = Some(shard_position);
        self
    }

    pub fn with_duration_behind_tip(mut self, behind: Duration) -> Self {
        self.duration_behind_tip = Some(behind);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

impl Default for Header {
    fn default() -> Self {
        Header::new(SystemTime::UNIX_EPOCH)
    }
}

/// A message read from a channel.
///
/// A `payload` of `None` is a tombstone: it deletes `key` from any
/// projection. This is distinct from `Some(String::new())`, an empty payload.
///
/// # Examples
///
/// ```
/// use channelfold::{Header, Key, Message};
///
/// let update = Message::new(Key::of("42"), Header::default(), Some("{}".to_string()));
/// assert!(!update.is_tombstone());
///
/// let deletion = Message::tombstone(Key::of("42"), Header::default());
/// assert!(deletion.is_tombstone());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub key: Key,
    pub header: Header,
    pub payload: Option<String>,
}

impl Message {
    pub fn new(key: Key, header: Header, payload: Option<String>) -> Self {
        Message {
            key,
            header,
            payload,
        }
    }

    pub fn tombstone(key: Key, header: Header) -> Self {
        Message::new(key, header, None)
    }

    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }
}

/// A message together with the channel it was received from.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageStoreEntry {
    pub channel_name: String,
    pub message: Message,
}

impl MessageStoreEntry {
    pub fn of(channel_name: impl Into<String>, message: Message) -> Self {
        MessageStoreEntry {
            channel_name: channel_name.into(),
            message,
        }
    }
}
