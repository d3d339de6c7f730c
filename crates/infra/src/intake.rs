use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use orderflow_events::WorkQueue;
use orderflow_orders::IngestionTask;

use crate::error::PipelineError;
use crate::object_store::ObjectStore;

/// Acknowledgement returned to the uploader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionReceipt {
    pub message_id: String,
    pub bucket: String,
    pub key: String,
}

/// Confirms an uploaded file exists and enqueues an ingestion task for it.
///
/// Re-submitting the same path enqueues another task; nothing is deduplicated
/// at this stage.
#[derive(Clone)]
pub struct IntakeValidator {
    objects: Arc<dyn ObjectStore>,
    queue: Arc<dyn WorkQueue>,
    bucket: String,
}

impl IntakeValidator {
    pub fn new(objects: Arc<dyn ObjectStore>, queue: Arc<dyn WorkQueue>, bucket: impl Into<String>) -> Self {
        Self {
            objects,
            queue,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self), fields(bucket = %self.bucket), err)]
    pub fn submit(&self, path: &str) -> Result<IngestionReceipt, PipelineError> {
        let key = path.trim().trim_start_matches('/');
        if key.is_empty() {
            return Err(PipelineError::Validation("path is required".into()));
        }

        let size = self.objects.head(&self.bucket, key)?;
        let task = IngestionTask::new(&self.bucket, key);
        let message_id = self.queue.send(task.to_json())?;

        info!(key, size, %message_id, "ingestion task enqueued");
        Ok(IngestionReceipt {
            message_id,
            bucket: task.bucket,
            key: task.key,
        })
    }
}

#[cfg(test)]
mod tests {
    use orderflow_events::InMemoryWorkQueue;

    use super::*;
    use crate::object_store::InMemoryObjectStore;

    fn setup() -> (Arc<InMemoryObjectStore>, Arc<InMemoryWorkQueue>, IntakeValidator) {
        let objects = Arc::new(InMemoryObjectStore::new());
        let queue = Arc::new(InMemoryWorkQueue::new(5));
        let intake = IntakeValidator::new(objects.clone(), queue.clone(), "orders");
        (objects, queue, intake)
    }

    #[test]
    fn existing_file_enqueues_task() {
        let (objects, queue, intake) = setup();
        objects.put("orders", "in/a.csv", b"h\n".to_vec()).unwrap();

        let receipt = intake.submit("in/a.csv").unwrap();
        assert_eq!(receipt.key, "in/a.csv");
        assert_eq!(queue.len(), 1);

        let d = queue.receive(1, std::time::Duration::from_secs(1)).unwrap().remove(0);
        assert_eq!(d.message_id, receipt.message_id);
        assert_eq!(IngestionTask::parse(&d.body).unwrap(), IngestionTask::new("orders", "in/a.csv"));
    }

    #[test]
    fn missing_file_is_not_found_and_enqueues_nothing() {
        let (_, queue, intake) = setup();
        assert!(matches!(intake.submit("nope.csv"), Err(PipelineError::NotFound(_))));
        assert!(queue.is_empty());
    }

    #[test]
    fn empty_path_is_invalid() {
        let (_, _, intake) = setup();
        assert!(matches!(intake.submit("  "), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn duplicate_submission_enqueues_twice() {
        let (objects, queue, intake) = setup();
        objects.put("orders", "a.csv", Vec::new()).unwrap();
        let a = intake.submit("a.csv").unwrap();
        let b = intake.submit("a.csv").unwrap();
        assert_ne!(a.message_id, b.message_id);
        assert_eq!(queue.len(), 2);
    }
}
