//! Compaction runs: snapshot in, channel replay, snapshot out.

use crate::blob::{BlobObject, BlobStore};
use crate::channel::{ChannelReader, StopCondition};
use crate::config::CompactionConfig;
use crate::error::{BlobStoreError, BoxError, CompactionError, SnapshotError, StateError};
use crate::interceptor::InterceptorChain;
use crate::message::Message;
use crate::position::ChannelPosition;
use crate::snapshot::{self, SnapshotFile, SnapshotReader, SnapshotWriter};
use crate::state::StateRepository;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The step a compaction run is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompactionPhase {
    Idle,
    Downloading,
    Seeding,
    Replaying,
    Writing,
    Uploading,
    Cleanup,
    Failed,
}

/// Outcome of a successful compaction run.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionReport {
    /// Object name of the uploaded snapshot.
    pub snapshot_name: String,
    /// Object name of the snapshot the run was seeded from, if any.
    pub seeded_from: Option<String>,
    /// Channel position recorded in the uploaded snapshot.
    pub position: ChannelPosition,
    /// Messages applied while replaying the channel, after interception.
    pub replayed_messages: u64,
    /// Keys in the uploaded snapshot.
    pub entries: usize,
    /// Superseded snapshots removed from the bucket.
    pub deleted_snapshots: Vec<String>,
}

/// Apply `message` to `repository`: a payload is stored under the
/// message's compaction key, a tombstone removes that key.
pub fn apply(repository: &StateRepository<String>, message: &Message) -> Result<(), StateError> {
    let key = message.key.compaction_key();
    match &message.payload {
        Some(payload) => {
            repository.put(key, payload.clone())?;
        }
        None => {
            repository.remove(key);
        }
    }
    Ok(())
}

/// Rebuilds a channel's snapshot from its latest snapshot plus everything
/// the channel received since.
///
/// A run moves through `Downloading`, `Seeding`, `Replaying`, `Writing`,
/// `Uploading` and `Cleanup`, then back to `Idle`. A failure in any step is
/// logged, passes through `Failed` and returns to `Idle`; local snapshot
/// files are deleted and the bucket keeps its previous snapshot. Runs are
/// never retried internally.
pub struct CompactionService {
    config: CompactionConfig,
    blob_store: Arc<dyn BlobStore>,
    channel: Arc<dyn ChannelReader>,
    interceptors: InterceptorChain,
    stop: Arc<StopCondition<'static>>,
    reader: SnapshotReader,
    writer: SnapshotWriter,
    phase: Mutex<CompactionPhase>,
}

impl std::fmt::Debug for CompactionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionService")
            .field("config", &self.config)
            .field("channel", &self.channel.channel_name())
            .field("interceptors", &self.interceptors)
            .field("phase", &self.phase())
            .finish()
    }
}

impl CompactionService {
    pub fn new(
        config: CompactionConfig,
        blob_store: Arc<dyn BlobStore>,
        channel: Arc<dyn ChannelReader>,
    ) -> Self {
        let writer = SnapshotWriter::new(config.local_dir.clone());
        CompactionService {
            config,
            blob_store,
            channel,
            interceptors: InterceptorChain::empty(),
            stop: Arc::new(|_: &Message| false),
            reader: SnapshotReader::new(),
            writer,
            phase: Mutex::new(CompactionPhase::Idle),
        }
    }

    /// Interceptors applied to replayed channel messages before they reach
    /// the repository. Snapshot entries are not intercepted.
    pub fn with_interceptors(mut self, interceptors: InterceptorChain) -> Self {
        self.interceptors = interceptors;
        self
    }

    /// End replay early once `stop` holds for a message. Without one, replay
    /// runs until the channel reader has caught up with the tip.
    pub fn with_stop_condition(
        mut self,
        stop: impl Fn(&Message) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.stop = Arc::new(stop);
        self
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    pub fn phase(&self) -> CompactionPhase {
        *self.phase.lock()
    }

    /// Run a compaction into a fresh repository built from the configured
    /// storage settings. The repository is closed afterwards.
    pub fn compact(&self) -> Result<CompactionReport, CompactionError> {
        let repository = StateRepository::new(self.config.storage.clone());
        let result = self.compact_into(&repository);
        repository.close();
        result
    }

    /// Run a compaction, seeding and updating `repository`.
    ///
    /// On failure `repository` holds whatever prefix of messages was applied
    /// before the failing step. A repository that is closed before or during
    /// the run fails it with [`CompactionError::RepositoryClosed`] and
    /// nothing is uploaded.
    pub fn compact_into(
        &self,
        repository: &StateRepository<String>,
    ) -> Result<CompactionReport, CompactionError> {
        {
            let mut phase = self.phase.lock();
            if *phase != CompactionPhase::Idle {
                return Err(CompactionError::AlreadyRunning(
                    self.config.channel_name.clone(),
                ));
            }
            *phase = CompactionPhase::Downloading;
        }

        let result = self.run(repository);
        if let Err(e) = &result {
            self.enter(CompactionPhase::Failed);
            log::error!(
                "compaction of channel '{}' failed: {e}",
                self.config.channel_name
            );
        }
        self.enter(CompactionPhase::Idle);
        result
    }

    fn run(&self, repository: &StateRepository<String>) -> Result<CompactionReport, CompactionError> {
        let channel_name = self.config.channel_name.as_str();
        log::info!("starting compaction of channel '{channel_name}'");

        self.enter(CompactionPhase::Downloading);
        let latest = self.download_latest().map_err(CompactionError::Download)?;

        let mut seeded_from = None;
        let mut position = ChannelPosition::from_horizon();
        if let Some(file) = latest {
            self.enter(CompactionPhase::Seeding);
            seeded_from = Some(file.file_name().to_string());
            position = self
                .reader
                .consume(
                    file,
                    channel_name,
                    |_| false,
                    |message| apply(repository, message).map_err(SnapshotError::from),
                )
                .map_err(CompactionError::Seed)?;
            self.ensure_open(repository)?;
            log::info!(
                "seeded {} entries from {}",
                repository.size(),
                seeded_from.as_deref().unwrap_or_default()
            );
        }

        self.enter(CompactionPhase::Replaying);
        let replayed = AtomicU64::new(0);
        let handler = |message: Message| -> Result<(), BoxError> {
            if let Some(message) = self.interceptors.intercept(message) {
                apply(repository, &message)?;
                replayed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        };
        let reached = self
            .channel
            .consume(&position, self.stop.as_ref(), &handler)
            .map_err(CompactionError::Replay)?;
        let position = ChannelPosition::merge([&position, &reached]);
        let replayed_messages = replayed.into_inner();
        log::info!("replayed {replayed_messages} messages of channel '{channel_name}'");

        // A closed repository has silently dropped every write.
        self.ensure_open(repository)?;
        self.enter(CompactionPhase::Writing);
        let file = self
            .writer
            .write(channel_name, &position, repository)
            .map_err(CompactionError::Write)?;
        self.ensure_open(repository)?;

        self.enter(CompactionPhase::Uploading);
        let snapshot_name = file.file_name().to_string();
        self.blob_store
            .put(&self.config.bucket, &snapshot_name, file.path())
            .map_err(CompactionError::Upload)?;
        log::info!(
            "uploaded {snapshot_name} to bucket {}",
            self.config.bucket
        );

        self.enter(CompactionPhase::Cleanup);
        drop(file);
        let deleted_snapshots = self.prune(&snapshot_name);

        Ok(CompactionReport {
            snapshot_name,
            seeded_from,
            position,
            replayed_messages,
            entries: repository.size(),
            deleted_snapshots,
        })
    }

    fn ensure_open(&self, repository: &StateRepository<String>) -> Result<(), CompactionError> {
        if repository.is_closed() {
            return Err(CompactionError::RepositoryClosed(
                self.config.channel_name.clone(),
            ));
        }
        Ok(())
    }

    fn enter(&self, phase: CompactionPhase) {
        log::info!(
            "compaction of channel '{}' entering {phase:?}",
            self.config.channel_name
        );
        *self.phase.lock() = phase;
    }

    /// Download the newest snapshot of the channel, if the bucket has one.
    fn download_latest(&self) -> Result<Option<SnapshotFile>, BlobStoreError> {
        let local_dir = &self.config.local_dir;
        fs::create_dir_all(local_dir).map_err(|source| BlobStoreError::Io {
            name: local_dir.display().to_string(),
            source,
        })?;

        let Some(latest) = latest_snapshot(
            self.blob_store.list(&self.config.bucket)?,
            &self.config.channel_name,
        ) else {
            log::warn!(
                "no snapshot of channel '{}' in bucket {}, replaying from horizon",
                self.config.channel_name,
                self.config.bucket
            );
            return Ok(None);
        };

        log::info!("downloading snapshot {}", latest.name);
        log_disk_usage(local_dir);
        let file = SnapshotFile::new(local_dir.join(&latest.name));
        self.blob_store
            .get(&self.config.bucket, &latest.name, file.path())?;
        log::info!("downloaded snapshot {} ({} bytes)", latest.name, latest.size);
        log_disk_usage(local_dir);
        Ok(Some(file))
    }

    /// Delete all but the newest snapshots of the channel. Failures are
    /// logged and swallowed.
    fn prune(&self, uploaded: &str) -> Vec<String> {
        let bucket = &self.config.bucket;
        let objects = match self.blob_store.list(bucket) {
            Ok(objects) => objects,
            Err(e) => {
                log::warn!("cannot list bucket {bucket} for cleanup: {e}");
                return Vec::new();
            }
        };

        let mut older: Vec<BlobObject> = objects
            .into_iter()
            .filter(|object| {
                object.name != uploaded
                    && snapshot::is_snapshot_of(&object.name, &self.config.channel_name)
            })
            .collect();
        older.sort_by_key(|object| Reverse((object.last_modified, object.name.clone())));

        let keep = self.config.retain_snapshots.max(1) - 1;
        let mut deleted = Vec::new();
        for object in older.into_iter().skip(keep) {
            match self.blob_store.delete(bucket, &object.name) {
                Ok(()) => {
                    log::info!("deleted superseded snapshot {}", object.name);
                    deleted.push(object.name);
                }
                Err(e) => log::warn!("failed to delete snapshot {}: {e}", object.name),
            }
        }
        deleted
    }
}

/// The newest snapshot of `channel_name` among `objects`: greatest
/// modification time, ties broken by name.
pub fn latest_snapshot(objects: Vec<BlobObject>, channel_name: &str) -> Option<BlobObject> {
    objects
        .into_iter()
        .filter(|object| snapshot::is_snapshot_of(&object.name, channel_name))
        .max_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.name.cmp(&b.name))
        })
}

fn log_disk_usage(dir: &Path) {
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    match (fs2::available_space(dir), fs2::free_space(dir)) {
        (Ok(available), Ok(free)) => log::info!(
            "available disk space: usable {:.3} GB / free {:.3} GB",
            available as f64 / GIB,
            free as f64 / GIB
        ),
        (Err(e), _) | (_, Err(e)) => log::debug!("cannot determine disk usage: {e}"),
    }
}
