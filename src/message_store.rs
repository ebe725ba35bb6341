use crate::message::MessageStoreEntry;
use crate::position::ChannelPosition;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Journal {
    entries: Vec<MessageStoreEntry>,
    positions: HashMap<String, ChannelPosition>,
}

/// An append-only, in-memory journal of received messages.
///
/// Alongside the entries it tracks, per channel, the shard position of the
/// last message added for each shard. Adding and position tracking happen
/// under one lock, so concurrent shard workers never leave a stale position.
///
/// # Examples
///
/// ```
/// use channelfold::{Header, InMemoryMessageStore, Key, Message, MessageStoreEntry, ShardPosition};
///
/// let store = InMemoryMessageStore::new();
/// let header = Header::default().with_shard_position(ShardPosition::from_position("s0", "7"));
/// store.add(MessageStoreEntry::of("orders", Message::new(Key::of("1"), header, None)));
///
/// assert_eq!(store.size(), 1);
/// assert_eq!(store.latest_channel_position("orders").shard("s0").position(), "7");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    journal: RwLock<Journal>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        InMemoryMessageStore::default()
    }

    pub fn add(&self, entry: MessageStoreEntry) {
        let mut journal = self.journal.write();
        if let Some(position) = &entry.message.header.shard_position {
            journal
                .positions
                .entry(entry.channel_name.clone())
                .or_default()
                .advance(position.clone());
        }
        journal.entries.push(entry);
    }

    /// Position of the latest message per shard of `channel_name`.
    pub fn latest_channel_position(&self, channel_name: &str) -> ChannelPosition {
        self.journal
            .read()
            .positions
            .get(channel_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn size(&self) -> usize {
        self.journal.read().entries.len()
    }

    /// All entries in the order they were added.
    pub fn entries(&self) -> Vec<MessageStoreEntry> {
        self.journal.read().entries.clone()
    }

    /// Entries of `channel_name` in the order they were added.
    pub fn entries_of(&self, channel_name: &str) -> Vec<MessageStoreEntry> {
        self.journal
            .read()
            .entries
            .iter()
            .filter(|entry| entry.channel_name == channel_name)
            .cloned()
            .collect()
    }
}
