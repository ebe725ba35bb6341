//! Object storage for snapshot files.

use crate::error::BlobStoreError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// An object listed in a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobObject {
    pub name: String,
    pub last_modified: SystemTime,
    pub size: u64,
}

/// A plain blob store holding snapshot objects.
///
/// Implementations own their timeout and retry policy; any error they
/// return ends the current compaction step.
pub trait BlobStore: Send + Sync {
    /// Upload the local file at `source` as object `name`.
    fn put(&self, bucket: &str, name: &str, source: &Path) -> Result<(), BlobStoreError>;

    /// Download object `name` into the local file `destination`.
    fn get(&self, bucket: &str, name: &str, destination: &Path) -> Result<(), BlobStoreError>;

    /// List all objects of `bucket`. A missing bucket lists as empty.
    fn list(&self, bucket: &str) -> Result<Vec<BlobObject>, BlobStoreError>;

    /// Delete object `name`. Deleting a missing object is not an error.
    fn delete(&self, bucket: &str, name: &str) -> Result<(), BlobStoreError>;

    /// Delete every object whose name starts with `prefix`, returning the
    /// deleted names.
    fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        let mut deleted = Vec::new();
        for object in self.list(bucket)? {
            if object.name.starts_with(prefix) {
                self.delete(bucket, &object.name)?;
                deleted.push(object.name);
            }
        }
        Ok(deleted)
    }
}

/// A [`BlobStore`] backed by a local directory, one subdirectory per bucket.
///
/// Uploads are written to a `.tmp` file first and renamed into place, so a
/// listing never shows a partially uploaded object.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsBlobStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, name: &str) -> PathBuf {
        self.root.join(bucket).join(name)
    }
}

fn io_error(name: &str, source: io::Error) -> BlobStoreError {
    BlobStoreError::Io {
        name: name.to_string(),
        source,
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, bucket: &str, name: &str, source: &Path) -> Result<(), BlobStoreError> {
        let path = self.object_path(bucket, name);
        let tmp_path = path.with_extension("tmp");
        fs::create_dir_all(self.root.join(bucket)).map_err(|e| io_error(name, e))?;
        fs::copy(source, &tmp_path).map_err(|e| io_error(name, e))?;
        fs::rename(&tmp_path, &path).map_err(|e| io_error(name, e))?;
        log::debug!("uploaded {name} to bucket {bucket}");
        Ok(())
    }

    fn get(&self, bucket: &str, name: &str, destination: &Path) -> Result<(), BlobStoreError> {
        let path = self.object_path(bucket, name);
        match fs::copy(&path, destination) {
            Ok(_) => {
                log::debug!("downloaded {name} from bucket {bucket}");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && !path.exists() => {
                Err(BlobStoreError::NotFound {
                    bucket: bucket.to_string(),
                    name: name.to_string(),
                })
            }
            Err(e) => Err(io_error(name, e)),
        }
    }

    fn list(&self, bucket: &str) -> Result<Vec<BlobObject>, BlobStoreError> {
        let dir = match fs::read_dir(self.root.join(bucket)) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(bucket, e)),
        };

        let mut objects = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| io_error(bucket, e))?;
            let metadata = entry.metadata().map_err(|e| io_error(bucket, e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !metadata.is_file() || name.ends_with(".tmp") {
                continue;
            }
            objects.push(BlobObject {
                last_modified: metadata.modified().map_err(|e| io_error(&name, e))?,
                size: metadata.len(),
                name,
            });
        }
        Ok(objects)
    }

    fn delete(&self, bucket: &str, name: &str) -> Result<(), BlobStoreError> {
        match fs::remove_file(self.object_path(bucket, name)) {
            Ok(()) => {
                log::debug!("deleted {name} from bucket {bucket}");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(name, e)),
        }
    }
}
