//! Object Store Gateway: existence checks, reads and writes of uploaded files.

mod fs;
mod in_memory;

pub use fs::FsObjectStore;
pub use in_memory::InMemoryObjectStore;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("object store io error: {0}")]
    Io(String),
}

pub trait ObjectStore: Send + Sync {
    /// Confirm the object exists; returns its size in bytes.
    fn head(&self, bucket: &str, key: &str) -> Result<u64, ObjectStoreError>;

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError>;

    fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), ObjectStoreError>;
}

/// Where rejected rows of `key` are written: `errors/<file name>-<unix secs>.csv`.
pub fn quarantine_key(key: &str, at: DateTime<Utc>) -> String {
    let base = key.trim_end_matches('/').rsplit('/').next().unwrap_or(key);
    format!("errors/{}-{}.csv", base, at.timestamp())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn quarantine_key_uses_base_name_and_timestamp() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(quarantine_key("uploads/2024/batch.csv", at), "errors/batch.csv-1700000000.csv");
        assert_eq!(quarantine_key("batch.csv", at), "errors/batch.csv-1700000000.csv");
    }
}
