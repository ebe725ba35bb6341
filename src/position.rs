//! Read positions within a sharded channel.

use crate::error::PositionError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Where a shard starts reading from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartFrom {
    /// The beginning of the shard.
    Horizon,
    /// Right after the recorded `position`.
    Position,
}

/// The read position of a single shard.
///
/// A `Horizon` position always carries an empty `position` string.
///
/// # Examples
///
/// ```
/// use channelfold::{ShardPosition, StartFrom};
///
/// let pos = ShardPosition::from_position("shard-0", "4711");
/// assert_eq!(pos.start_from(), StartFrom::Position);
/// assert_eq!(pos.position(), "4711");
///
/// let horizon = ShardPosition::from_horizon("shard-1");
/// assert_eq!(horizon.position(), "");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardPosition {
    shard_id: String,
    start_from: StartFrom,
    position: String,
}

impl ShardPosition {
    /// Start reading `shard_id` from its very beginning.
    pub fn from_horizon(shard_id: impl Into<String>) -> Self {
        ShardPosition {
            shard_id: shard_id.into(),
            start_from: StartFrom::Horizon,
            position: String::new(),
        }
    }

    /// Continue reading `shard_id` after `position`.
    pub fn from_position(shard_id: impl Into<String>, position: impl Into<String>) -> Self {
        ShardPosition {
            shard_id: shard_id.into(),
            start_from: StartFrom::Position,
            position: position.into(),
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn start_from(&self) -> StartFrom {
        self.start_from
    }

    pub fn position(&self) -> &str {
        &self.position
    }
}

/// How far each shard of a channel has been read.
///
/// Looking up a shard that is not tracked yields a synthesized horizon
/// position instead of failing, so a fresh `ChannelPosition` means "read
/// everything".
///
/// # Examples
///
/// ```
/// use channelfold::{ChannelPosition, ShardPosition, StartFrom};
///
/// let pos = ChannelPosition::of([ShardPosition::from_position("foo", "42")]).unwrap();
/// assert_eq!(pos.shard("foo").position(), "42");
/// assert_eq!(pos.shard("unknown").start_from(), StartFrom::Horizon);
/// assert!(!pos.shards().contains("unknown"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelPosition {
    shards: HashMap<String, ShardPosition>,
}

impl ChannelPosition {
    /// A position that tracks no shards: every shard reads from the horizon.
    pub fn from_horizon() -> Self {
        ChannelPosition::default()
    }

    /// Build a position from shard positions.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError::DuplicateShard`] if two positions name the
    /// same shard.
    pub fn of(
        positions: impl IntoIterator<Item = ShardPosition>,
    ) -> Result<Self, PositionError> {
        let mut shards = HashMap::new();
        for position in positions {
            if shards.contains_key(position.shard_id()) {
                return Err(PositionError::DuplicateShard(position.shard_id));
            }
            shards.insert(position.shard_id.clone(), position);
        }
        Ok(ChannelPosition { shards })
    }

    /// The position of `shard_id`, or a horizon position if it is not tracked.
    pub fn shard(&self, shard_id: &str) -> ShardPosition {
        self.shards
            .get(shard_id)
            .cloned()
            .unwrap_or_else(|| ShardPosition::from_horizon(shard_id))
    }

    /// Ids of the shards actually tracked by this position.
    pub fn shards(&self) -> HashSet<&str> {
        self.shards.keys().map(String::as_str).collect()
    }

    /// Iterate over the tracked shard positions in no particular order.
    pub fn positions(&self) -> impl Iterator<Item = &ShardPosition> {
        self.shards.values()
    }

    /// Record `position`, replacing any earlier position of the same shard.
    pub fn advance(&mut self, position: ShardPosition) {
        self.shards.insert(position.shard_id.clone(), position);
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Union of all inputs, where a shard present in several inputs takes
    /// the position from the last input containing it.
    ///
    /// This is last-write-wins in sequence order, not "furthest position".
    pub fn merge<'a>(positions: impl IntoIterator<Item = &'a ChannelPosition>) -> Self {
        let mut merged = ChannelPosition::default();
        for channel_position in positions {
            for position in channel_position.positions() {
                merged.advance(position.clone());
            }
        }
        merged
    }
}

impl FromIterator<ShardPosition> for ChannelPosition {
    /// Collects shard positions, keeping the last one seen for each shard.
    fn from_iter<I: IntoIterator<Item = ShardPosition>>(iter: I) -> Self {
        let mut position = ChannelPosition::default();
        for shard in iter {
            position.advance(shard);
        }
        position
    }
}
