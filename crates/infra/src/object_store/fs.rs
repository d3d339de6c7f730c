use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::instrument;

use super::{ObjectStore, ObjectStoreError};

/// Local-directory object store: objects live at `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, bucket: &str, key: &str) -> Result<PathBuf, ObjectStoreError> {
        for part in [bucket, key] {
            let normal = !part.is_empty()
                && Path::new(part)
                    .components()
                    .all(|c| matches!(c, Component::Normal(_)));
            if !normal {
                return Err(ObjectStoreError::InvalidKey(format!("{bucket}/{key}")));
            }
        }
        Ok(self.root.join(bucket).join(key))
    }
}

fn io_error(bucket: &str, key: &str, e: std::io::Error) -> ObjectStoreError {
    if e.kind() == ErrorKind::NotFound {
        ObjectStoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        ObjectStoreError::Io(e.to_string())
    }
}

impl ObjectStore for FsObjectStore {
    fn head(&self, bucket: &str, key: &str) -> Result<u64, ObjectStoreError> {
        let meta = std::fs::metadata(self.path(bucket, key)?).map_err(|e| io_error(bucket, key, e))?;
        if !meta.is_file() {
            return Err(ObjectStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(meta.len())
    }

    #[instrument(skip(self), err)]
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        std::fs::read(self.path(bucket, key)?).map_err(|e| io_error(bucket, key, e))
    }

    #[instrument(skip(self, body), fields(bytes = body.len()), err)]
    fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), ObjectStoreError> {
        let path = self.path(bucket, key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ObjectStoreError::Io(e.to_string()))?;
        }
        std::fs::write(&path, body).map_err(|e| ObjectStoreError::Io(e.to_string()))
    }
}
