mod archive;
pub mod blob;
pub mod channel;
pub mod codec;
pub mod compaction;
mod config;
pub mod error;
mod interceptor;
mod message;
mod message_store;
mod position;
pub mod snapshot;
mod state;

pub use blob::{BlobObject, BlobStore, FsBlobStore};
pub use channel::{ChannelReader, InMemoryChannel, MessageHandler, StopCondition};
pub use compaction::{CompactionPhase, CompactionReport, CompactionService};
pub use config::{CompactionConfig, StorageConfig, StorageStrategy};
pub use error::{
    BlobStoreError, CompactionError, ConsumeError, DecodeError, PositionError, ReplayError,
    SnapshotError, StateError,
};
pub use interceptor::{Interceptor, InterceptorChain};
pub use message::{Header, Key, Message, MessageStoreEntry};
pub use message_store::InMemoryMessageStore;
pub use position::{ChannelPosition, ShardPosition, StartFrom};
pub use snapshot::{SnapshotFile, SnapshotReader, SnapshotWriter};
pub use state::StateRepository;
