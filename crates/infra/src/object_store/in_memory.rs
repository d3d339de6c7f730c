use std::collections::HashMap;
use std::sync::RwLock;

use super::{ObjectStore, ObjectStoreError};

/// In-memory object store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys in `bucket` starting with `prefix`, sorted.
    pub fn keys(&self, bucket: &str, prefix: &str) -> Vec<String> {
        let Ok(objects) = self.objects.read() else {
            return Vec::new();
        };
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

fn poisoned() -> ObjectStoreError {
    ObjectStoreError::Io("object store lock poisoned".into())
}

impl ObjectStore for InMemoryObjectStore {
    fn head(&self, bucket: &str, key: &str) -> Result<u64, ObjectStoreError> {
        self.get(bucket, key).map(|b| b.len() as u64)
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), ObjectStoreError> {
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        objects.insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }
}
