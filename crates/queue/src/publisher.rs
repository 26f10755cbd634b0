//! Job publishing for submitters.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::MessageQueue;
use crate::error::QueueError;
use crate::message::Envelope;
use pushlab_common::AppResult;
use pushlab_core::{Enqueuer, NotificationJob};

/// Publishes notification jobs onto the work queue.
pub struct QueuePublisher {
    queue: Arc<dyn MessageQueue>,
}

impl QueuePublisher {
    /// Create a publisher.
    #[must_use]
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Enqueuer for QueuePublisher {
    async fn publish(&self, job: &NotificationJob) -> AppResult<()> {
        let body = serde_json::to_string(job).map_err(QueueError::from)?;
        self.queue.publish(&Envelope::new(body)).await?;

        debug!(
            notification_id = %job.notification_id,
            tokens = job.device_token_ids.len(),
            "Job published"
        );
        Ok(())
    }
}
