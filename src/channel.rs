//! Reading sharded channels.

use crate::codec::{self, RawRecord};
use crate::error::{BoxError, ReplayError};
use crate::message::Message;
use crate::position::{ChannelPosition, ShardPosition, StartFrom};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::thread;

/// Decides, per message, whether a read pass should end after it.
pub type StopCondition<'a> = dyn Fn(&Message) -> bool + Send + Sync + 'a;

/// Receives every message read from a channel. May be called from several
/// shard workers at once.
pub type MessageHandler<'a> = dyn Fn(Message) -> Result<(), BoxError> + Send + Sync + 'a;

/// A transport that replays a channel from a position.
pub trait ChannelReader: Send + Sync {
    fn channel_name(&self) -> &str;

    /// Read every shard from its position in `start` up to the channel tip,
    /// passing each message to `handler`, and return the position reached.
    ///
    /// Shards are read independently, so `handler` sees messages in
    /// shard-interleaved order. A shard stops after the first message for
    /// which `stop` holds. Shards that deliver nothing keep their `start`
    /// position in the result.
    fn consume(
        &self,
        start: &ChannelPosition,
        stop: &StopCondition<'_>,
        handler: &MessageHandler<'_>,
    ) -> Result<ChannelPosition, ReplayError>;
}

/// A channel kept in memory as raw records, one ordered list per shard.
///
/// Reading runs one worker thread per shard. Records that fail to decode are
/// logged and skipped; the shard's position still moves past them.
///
/// # Examples
///
/// ```
/// use channelfold::codec::RawRecord;
/// use channelfold::{ChannelPosition, ChannelReader, InMemoryChannel};
/// use std::time::SystemTime;
///
/// let channel = InMemoryChannel::new("orders");
/// channel.append(RawRecord::new("shard-0", "1", "42", "hello", SystemTime::now()));
///
/// let end = channel
///     .consume(&ChannelPosition::from_horizon(), &|_| false, &|_| Ok(()))
///     .unwrap();
/// assert_eq!(end.shard("shard-0").position(), "1");
/// ```
#[derive(Debug)]
pub struct InMemoryChannel {
    name: String,
    shards: RwLock<BTreeMap<String, Vec<RawRecord>>>,
}

impl InMemoryChannel {
    pub fn new(name: impl Into<String>) -> Self {
        InMemoryChannel {
            name: name.into(),
            shards: RwLock::new(BTreeMap::new()),
        }
    }

    /// Append a record to the end of its shard.
    pub fn append(&self, record: RawRecord) {
        self.shards
            .write()
            .entry(record.shard_id.clone())
            .or_default()
            .push(record);
    }

    /// Append `message` to `shard_id` as a v2 envelope at `sequence_number`.
    pub fn send(&self, shard_id: &str, sequence_number: &str, message: &Message) {
        let mut record = RawRecord::new(
            shard_id,
            sequence_number,
            message.key.partition_key(),
            codec::encode(message),
            message.header.arrival_timestamp,
        );
        record.behind_tip = message.header.duration_behind_tip;
        self.append(record);
    }

    /// Total number of records across all shards.
    pub fn len(&self) -> usize {
        self.shards.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChannelReader for InMemoryChannel {
    fn channel_name(&self) -> &str {
        &self.name
    }

    fn consume(
        &self,
        start: &ChannelPosition,
        stop: &StopCondition<'_>,
        handler: &MessageHandler<'_>,
    ) -> Result<ChannelPosition, ReplayError> {
        let shards = self.shards.read().clone();

        let reached = thread::scope(|scope| {
            let workers: Vec<_> = shards
                .iter()
                .map(|(shard_id, records)| {
                    let from = start.shard(shard_id);
                    let worker =
                        scope.spawn(move || replay_shard(&self.name, from, records, stop, handler));
                    (shard_id, worker)
                })
                .collect();

            workers
                .into_iter()
                .map(|(shard_id, worker)| {
                    worker
                        .join()
                        .map_err(|_| ReplayError::WorkerPanicked(shard_id.clone()))?
                })
                .collect::<Result<Vec<_>, _>>()
        })?;

        let reached: ChannelPosition = reached.into_iter().flatten().collect();
        Ok(ChannelPosition::merge([start, &reached]))
    }
}

/// Replay one shard, returning the position of the last record passed.
fn replay_shard(
    channel: &str,
    from: ShardPosition,
    records: &[RawRecord],
    stop: &StopCondition<'_>,
    handler: &MessageHandler<'_>,
) -> Result<Option<ShardPosition>, ReplayError> {
    let mut reached = None;
    let mut replayed = 0u64;
    for record in records.iter().filter(|record| is_after(&record.sequence_number, &from)) {
        reached = Some(ShardPosition::from_position(
            &record.shard_id,
            &record.sequence_number,
        ));
        let message = match codec::decode(record) {
            Ok(message) => message,
            Err(e) => {
                log::warn!(
                    "channel '{channel}': skipping undecodable record {} of shard {}: {e}",
                    record.sequence_number,
                    record.shard_id
                );
                continue;
            }
        };
        let done = stop(&message);
        handler(message).map_err(ReplayError::Handler)?;
        replayed += 1;
        if done {
            break;
        }
    }
    log::info!(
        "channel '{channel}': replayed {replayed} messages of shard {}",
        from.shard_id()
    );
    Ok(reached)
}

fn is_after(sequence_number: &str, from: &ShardPosition) -> bool {
    match from.start_from() {
        StartFrom::Horizon => true,
        StartFrom::Position => compare_sequence_numbers(sequence_number, from.position()).is_gt(),
    }
}

/// Orders decimal sequence numbers of any length numerically and anything
/// else lexicographically.
fn compare_sequence_numbers(a: &str, b: &str) -> Ordering {
    let is_decimal = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if is_decimal(a) && is_decimal(b) {
        let a = a.trim_start_matches('0');
        let b = b.trim_start_matches('0');
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    } else {
        a.cmp(b)
    }
}
