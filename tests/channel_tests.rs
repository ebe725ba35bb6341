mod common;

use channelfold::{
    ChannelPosition, ChannelReader, InMemoryChannel, Message, ReplayError, ShardPosition,
    StartFrom,
};
use common::{message, record};
use parking_lot::Mutex;
use std::collections::HashSet;

fn collect(
    channel: &InMemoryChannel,
    start: &ChannelPosition,
    stop: impl Fn(&Message) -> bool + Send + Sync,
) -> (ChannelPosition, Vec<Message>) {
    let seen = Mutex::new(Vec::new());
    let reached = channel
        .consume(start, &stop, &|m| {
            seen.lock().push(m);
            Ok(())
        })
        .unwrap();
    (reached, seen.into_inner())
}

fn keys_of(messages: &[Message]) -> HashSet<String> {
    messages
        .iter()
        .map(|m| m.key.compaction_key().to_string())
        .collect()
}

#[test]
fn test_consume_from_horizon_reads_all_shards() {
    let channel = InMemoryChannel::new("orders");
    channel.append(record("s0", "1", "a", "1"));
    channel.append(record("s0", "2", "b", "2"));
    channel.append(record("s1", "1", "c", "3"));
    assert_eq!(channel.len(), 3);

    let (reached, messages) = collect(&channel, &ChannelPosition::from_horizon(), |_| false);

    assert_eq!(keys_of(&messages), HashSet::from(["a", "b", "c"].map(String::from)));
    assert_eq!(reached.shard("s0").position(), "2");
    assert_eq!(reached.shard("s1").position(), "1");
    assert_eq!(channel.channel_name(), "orders");
}

#[test]
fn test_consume_from_position_skips_earlier_records() {
    let channel = InMemoryChannel::new("orders");
    for seq in ["98", "99", "100", "101", "102"] {
        channel.append(record("s0", seq, seq, "x"));
    }
    let start = ChannelPosition::of([ShardPosition::from_position("s0", "100")]).unwrap();

    let (reached, messages) = collect(&channel, &start, |_| false);

    assert_eq!(keys_of(&messages), HashSet::from(["101", "102"].map(String::from)));
    assert_eq!(reached.shard("s0").position(), "102");
}

#[test]
fn test_sequence_numbers_compare_numerically() {
    let channel = InMemoryChannel::new("orders");
    channel.append(record("s0", "9", "nine", "x"));
    channel.append(record("s0", "10", "ten", "x"));
    let start = ChannelPosition::of([ShardPosition::from_position("s0", "9")]).unwrap();

    let (reached, messages) = collect(&channel, &start, |_| false);
    assert_eq!(keys_of(&messages), HashSet::from(["ten".to_string()]));
    assert_eq!(reached.shard("s0").position(), "10");
}

#[test]
fn test_caught_up_shard_keeps_start_position() {
    let channel = InMemoryChannel::new("orders");
    channel.append(record("s0", "5", "a", "x"));
    let start = ChannelPosition::of([
        ShardPosition::from_position("s0", "5"),
        ShardPosition::from_position("gone", "77"),
    ])
    .unwrap();

    let (reached, messages) = collect(&channel, &start, |_| false);
    assert!(messages.is_empty());
    assert_eq!(reached, start);
}

#[test]
fn test_stop_condition_ends_shard_after_matching_message() {
    let channel = InMemoryChannel::new("orders");
    for seq in 1..=5 {
        channel.append(record("s0", &seq.to_string(), &format!("k{seq}"), "x"));
    }

    let (reached, messages) = collect(&channel, &ChannelPosition::from_horizon(), |m| {
        m.key.compaction_key() == "k3"
    });

    assert_eq!(messages.len(), 3);
    assert_eq!(reached.shard("s0").position(), "3");
}

#[test]
fn test_undecodable_records_are_skipped_but_advance_position() {
    let channel = InMemoryChannel::new("orders");
    channel.append(record("s0", "1", "a", "1"));
    channel.append(record(
        "s0",
        "2",
        "b",
        r#"{"_synapse_msg_format":"v2","_synapse_msg_key":42}"#,
    ));

    let (reached, messages) = collect(&channel, &ChannelPosition::from_horizon(), |_| false);
    assert_eq!(keys_of(&messages), HashSet::from(["a".to_string()]));
    assert_eq!(reached.shard("s0").position(), "2");
}

#[test]
fn test_sent_messages_decode_as_v2() {
    let channel = InMemoryChannel::new("orders");
    channel.send("s0", "1", &message("a", Some("{\"n\":1}")));
    channel.send("s0", "2", &message("a", None));

    let (_, messages) = collect(&channel, &ChannelPosition::from_horizon(), |_| false);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].payload.as_deref(), Some("{\"n\":1}"));
    assert!(messages[1].is_tombstone());
    assert_eq!(
        messages[1].header.shard_position.as_ref().map(|p| p.start_from()),
        Some(StartFrom::Position)
    );
}

#[test]
fn test_handler_failure_is_reported() {
    let channel = InMemoryChannel::new("orders");
    channel.append(record("s0", "1", "a", "1"));

    let err = channel
        .consume(&ChannelPosition::from_horizon(), &|_| false, &|_| {
            Err("handler refused".into())
        })
        .unwrap_err();
    assert!(matches!(err, ReplayError::Handler(_)));
}

#[test]
fn test_empty_channel_returns_start() {
    let channel = InMemoryChannel::new("orders");
    assert!(channel.is_empty());
    let start = ChannelPosition::of([ShardPosition::from_position("s0", "1")]).unwrap();
    let (reached, messages) = collect(&channel, &start, |_| false);
    assert!(messages.is_empty());
    assert_eq!(reached, start);
}
