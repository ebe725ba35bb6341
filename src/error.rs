//! Error types shared across the crate.

use crate::position::ChannelPosition;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Boxed error raised by a transport or storage collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A [`ChannelPosition`] was built from an invalid set of shard positions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PositionError {
    #[error("duplicate shard id '{0}' in channel position")]
    DuplicateShard(String),
}

/// A record carried the v2 format marker but its envelope could not be read.
///
/// Records without the marker never produce this error: they are decoded as
/// legacy v1 payloads instead.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("v2 envelope has a malformed '_synapse_msg_key': {0}")]
    Key(String),

    #[error("v2 envelope has malformed '_synapse_msg_headers': {0}")]
    Headers(String),
}

/// Errors raised by a [`StateRepository`](crate::StateRepository).
///
/// A closed repository is not an error: operations on it are silent no-ops.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to serialize value for key '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to compress value for key '{key}': {source}")]
    Compression {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("storing key '{key}' would use {requested} bytes, exceeding the bound of {max_bytes}")]
    CapacityExceeded {
        key: String,
        requested: u64,
        max_bytes: u64,
    },
}

/// Errors raised while reading or writing a snapshot container.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt snapshot archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("malformed snapshot document: {0}")]
    Format(String),

    #[error("failed to encode snapshot entry '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

impl SnapshotError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SnapshotError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A snapshot read pass aborted before reaching the end of the document.
///
/// `position` holds whatever was decoded before the failure (empty if the
/// `startSequenceNumbers` section was never reached). Whether a partial
/// replay is usable is for the caller to decide.
#[derive(Debug, Error)]
#[error("snapshot consumption aborted: {source}")]
pub struct ConsumeError {
    pub position: ChannelPosition,
    #[source]
    pub source: SnapshotError,
}

/// Failure reported by a [`BlobStore`](crate::BlobStore).
#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("object '{name}' not found in bucket '{bucket}'")]
    NotFound { bucket: String, name: String },

    #[error("blob store I/O error on '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("blob store failure: {0}")]
    Other(#[source] BoxError),
}

/// Failure reported by a [`ChannelReader`](crate::ChannelReader).
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("channel '{channel}' failed during replay: {source}")]
    Transport {
        channel: String,
        #[source]
        source: BoxError,
    },

    #[error("message handler failed: {0}")]
    Handler(#[source] BoxError),

    #[error("replay worker for shard '{0}' panicked")]
    WorkerPanicked(String),
}

/// A compaction run failed. The previous remote snapshot is left untouched.
#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("downloading the latest snapshot failed: {0}")]
    Download(#[source] BlobStoreError),

    #[error("seeding from snapshot failed: {0}")]
    Seed(#[source] ConsumeError),

    #[error("replaying the channel failed: {0}")]
    Replay(#[source] ReplayError),

    #[error("writing the snapshot failed: {0}")]
    Write(#[source] SnapshotError),

    #[error("uploading the snapshot failed: {0}")]
    Upload(#[source] BlobStoreError),

    #[error("a compaction run for channel '{0}' is already in progress")]
    AlreadyRunning(String),

    #[error("the state repository of channel '{0}' was closed during compaction")]
    RepositoryClosed(String),
}
