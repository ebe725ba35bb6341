//! Decoding raw channel records into [`Message`]s.
//!
//! Two wire formats exist. Legacy v1 records carry the payload verbatim and
//! take their key from the transport. v2 records wrap the payload in a JSON
//! envelope that may add a compound key and header attributes:
//!
//! ```text
//! {"_synapse_msg_format":"v2",
//!  "_synapse_msg_key":{"partitionKey":"1","compactionKey":"2"},
//!  "_synapse_msg_headers":{"attr":"value"},
//!  "_synapse_msg_payload":{"some":"payload"}}
//! ```
//!
//! Everything but the format marker is optional. A missing or `null` payload
//! is a tombstone.

use crate::error::DecodeError;
use crate::message::{Header, Key, Message};
use crate::position::ShardPosition;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

pub const FORMAT_FIELD: &str = "_synapse_msg_format";
pub const KEY_FIELD: &str = "_synapse_msg_key";
pub const HEADERS_FIELD: &str = "_synapse_msg_headers";
pub const PAYLOAD_FIELD: &str = "_synapse_msg_payload";
pub const FORMAT_V2: &str = "v2";

/// A record as delivered by a channel transport, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub partition_key: String,
    pub data: Vec<u8>,
    pub arrival_timestamp: SystemTime,
    pub sequence_number: String,
    pub shard_id: String,
    pub behind_tip: Option<Duration>,
}

impl RawRecord {
    pub fn new(
        shard_id: impl Into<String>,
        sequence_number: impl Into<String>,
        partition_key: impl Into<String>,
        data: impl Into<Vec<u8>>,
        arrival_timestamp: SystemTime,
    ) -> Self {
        RawRecord {
            partition_key: partition_key.into(),
            data: data.into(),
            arrival_timestamp,
            sequence_number: sequence_number.into(),
            shard_id: shard_id.into(),
            behind_tip: None,
        }
    }

    pub fn with_behind_tip(mut self, behind: Duration) -> Self {
        self.behind_tip = Some(behind);
        self
    }
}

/// The wire format of a record, as determined by a single structural probe.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFormat {
    /// No envelope: the bytes are the payload.
    V1Raw,
    /// A JSON object carrying the v2 format marker.
    V2Envelope(Map<String, Value>),
}

impl WireFormat {
    /// Inspect `data` once to decide how it must be decoded.
    ///
    /// Anything that is not a JSON object with `"_synapse_msg_format":"v2"`
    /// is treated as v1, including bytes that are not JSON at all.
    pub fn probe(data: &[u8]) -> WireFormat {
        match serde_json::from_slice::<Value>(data) {
            Ok(Value::Object(envelope))
                if envelope.get(FORMAT_FIELD).and_then(Value::as_str) == Some(FORMAT_V2) =>
            {
                WireFormat::V2Envelope(envelope)
            }
            _ => WireFormat::V1Raw,
        }
    }
}

/// Decode a raw record into a message.
///
/// The header always carries the record's arrival time and its
/// `(shard_id, sequence_number)` position. v1 payloads are UTF-8 text;
/// invalid sequences are replaced with U+FFFD.
///
/// # Errors
///
/// Returns a [`DecodeError`] if the record is a v2 envelope whose key or
/// headers are malformed. Such records are never downgraded to v1.
///
/// # Examples
///
/// ```
/// use channelfold::codec::{decode, RawRecord};
/// use channelfold::Key;
/// use std::time::SystemTime;
///
/// let record = RawRecord::new("shard-0", "1", "42", "plain text", SystemTime::now());
/// let message = decode(&record).unwrap();
/// assert_eq!(message.key, Key::of("42"));
/// assert_eq!(message.payload.as_deref(), Some("plain text"));
/// ```
pub fn decode(record: &RawRecord) -> Result<Message, DecodeError> {
    let mut header = Header::new(record.arrival_timestamp).with_shard_position(
        ShardPosition::from_position(&record.shard_id, &record.sequence_number),
    );
    header.duration_behind_tip = record.behind_tip;

    match WireFormat::probe(&record.data) {
        WireFormat::V1Raw => Ok(Message::new(
            Key::of(&record.partition_key),
            header,
            Some(String::from_utf8_lossy(&record.data).into_owned()),
        )),
        WireFormat::V2Envelope(mut envelope) => {
            let key = match envelope.remove(KEY_FIELD) {
                None | Some(Value::Null) => Key::of(&record.partition_key),
                Some(value) => decode_key(value)?,
            };
            if let Some(value) = envelope.remove(HEADERS_FIELD) {
                header.attributes.extend(decode_headers(value)?);
            }
            let payload = envelope.remove(PAYLOAD_FIELD).and_then(payload_text);
            Ok(Message::new(key, header, payload))
        }
    }
}

/// Encode a message as a v2 envelope.
///
/// The compound key is only written for compound keys. Payload text that is
/// valid JSON is embedded as JSON, anything else as a JSON string, so that
/// [`decode`] yields the same key, attributes and payload.
pub fn encode(message: &Message) -> Vec<u8> {
    let envelope = Envelope {
        format: FORMAT_V2,
        key: match &message.key {
            Key::Single(_) => None,
            Key::Compound {
                partition_key,
                compaction_key,
            } => Some(CompoundKey {
                partition_key,
                compaction_key,
            }),
        },
        headers: &message.header.attributes,
        payload: message.payload.as_deref().map(|text| {
            serde_json::from_str::<Value>(text).unwrap_or_else(|_| Value::String(text.to_string()))
        }),
    };
    // Serializing borrowed strings and JSON values cannot fail.
    serde_json::to_vec(&envelope).unwrap_or_default()
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "_synapse_msg_format")]
    format: &'static str,
    #[serde(rename = "_synapse_msg_key", skip_serializing_if = "Option::is_none")]
    key: Option<CompoundKey<'a>>,
    #[serde(rename = "_synapse_msg_headers")]
    headers: &'a BTreeMap<String, String>,
    #[serde(rename = "_synapse_msg_payload")]
    payload: Option<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompoundKey<'a> {
    partition_key: &'a str,
    compaction_key: &'a str,
}

/// Payload text of an envelope value: strings unwrapped, `null` a tombstone,
/// anything else as compact JSON.
pub(crate) fn payload_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

fn decode_key(value: Value) -> Result<Key, DecodeError> {
    let Value::Object(mut key) = value else {
        return Err(DecodeError::Key(format!("expected an object, found {value}")));
    };
    let partition_key = match key.remove("partitionKey") {
        Some(Value::String(partition_key)) => partition_key,
        Some(other) => {
            return Err(DecodeError::Key(format!(
                "partitionKey must be a string, found {other}"
            )));
        }
        None => return Err(DecodeError::Key("missing partitionKey".to_string())),
    };
    match key.remove("compactionKey") {
        None | Some(Value::Null) => Ok(Key::Single(partition_key)),
        Some(Value::String(compaction_key)) => Ok(Key::Compound {
            partition_key,
            compaction_key,
        }),
        Some(other) => Err(DecodeError::Key(format!(
            "compactionKey must be a string, found {other}"
        ))),
    }
}

fn decode_headers(value: Value) -> Result<BTreeMap<String, String>, DecodeError> {
    match value {
        Value::Null => Ok(BTreeMap::new()),
        Value::Object(headers) => Ok(headers
            .into_iter()
            .filter_map(|(name, value)| match value {
                Value::Null => None,
                Value::String(text) => Some((name, text)),
                other => Some((name, other.to_string())),
            })
            .collect()),
        other => Err(DecodeError::Headers(format!(
            "expected an object, found {other}"
        ))),
    }
}
