//! Routes queued jobs to the notification processor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::MessageQueue;
use crate::consumer::Consumer;
use crate::error::QueueError;
use crate::message::{DeadLetterReason, Disposition, QueueMessage};
use crate::retry::RedeliveryPolicy;
use pushlab_common::{AppError, AppResult, QueueConfig};
use pushlab_core::{NotificationJob, NotificationProcessor};

/// Processes one decoded job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Handle a job. An error makes the message eligible for redelivery.
    async fn handle(&self, job: &NotificationJob, cancel: &CancellationToken) -> AppResult<()>;
}

#[async_trait]
impl JobHandler for NotificationProcessor {
    async fn handle(&self, job: &NotificationJob, cancel: &CancellationToken) -> AppResult<()> {
        self.process(job, cancel).await.map(|_| ())
    }
}

/// Dispatcher tuning.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherSettings {
    /// Messages held unsettled at once.
    pub prefetch: usize,
    /// How long one receive blocks.
    pub poll_timeout: Duration,
    /// Pause after a failed receive or settle.
    pub retry_delay: Duration,
    /// When a failed job goes back to the queue.
    pub policy: RedeliveryPolicy,
}

impl From<&QueueConfig> for DispatcherSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            prefetch: usize::from(config.prefetch_count),
            poll_timeout: config.poll_timeout(),
            retry_delay: config.reconnect_delay(),
            policy: RedeliveryPolicy::new(config.max_deliveries),
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            prefetch: 10,
            poll_timeout: Duration::from_secs(1),
            retry_delay: Duration::from_secs(5),
            policy: RedeliveryPolicy::default(),
        }
    }
}

/// Counts of settled messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Messages acknowledged.
    pub acked: u64,
    /// Messages put back for another delivery.
    pub requeued: u64,
    /// Messages moved to the dead-letter queue.
    pub dead_lettered: u64,
}

/// Consumes the work queue one message at a time.
pub struct Dispatcher {
    queue: Arc<dyn MessageQueue>,
    handler: Arc<dyn JobHandler>,
    settings: DispatcherSettings,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        handler: Arc<dyn JobHandler>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            queue,
            handler,
            settings,
        }
    }

    /// Run until `cancel` fires or the queue closes.
    ///
    /// A message whose processing observed cancellation is left unsettled so
    /// the broker delivers it again.
    pub async fn run(&self, cancel: CancellationToken) -> DispatchStats {
        let consumer = Consumer::new(
            self.queue.clone(),
            self.settings.prefetch,
            self.settings.poll_timeout,
            self.settings.retry_delay,
        );
        let (mut deliveries, consumer_task) = consumer.start(cancel.child_token());
        let mut stats = DispatchStats::default();

        info!(prefetch = self.settings.prefetch, "Dispatcher started");

        loop {
            let received = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                received = deliveries.recv() => match received {
                    Some(received) => received,
                    None => break,
                },
            };

            let Some(disposition) = self.dispatch(&received.message, &cancel).await else {
                info!("Shutdown during processing, leaving message unacknowledged");
                break;
            };

            if cancel.is_cancelled() {
                info!("Shutdown before settlement, leaving message unacknowledged");
                break;
            }

            if self.settle(&received.message, disposition, &cancel).await {
                match disposition {
                    Disposition::Ack => stats.acked += 1,
                    Disposition::NackRequeue { .. } => stats.requeued += 1,
                    Disposition::NackDeadLetter { .. } => stats.dead_lettered += 1,
                }
            }
        }

        drop(deliveries);
        if let Err(e) = consumer_task.await {
            warn!(error = %e, "Consumer task failed");
        }

        info!(
            acked = stats.acked,
            requeued = stats.requeued,
            dead_lettered = stats.dead_lettered,
            "Dispatcher stopped"
        );
        stats
    }

    /// Settle a message, retrying every `retry_delay` while the broker is
    /// unreachable. Returns `false` if the message was left in flight.
    async fn settle(
        &self,
        message: &QueueMessage,
        disposition: Disposition,
        cancel: &CancellationToken,
    ) -> bool {
        loop {
            match self.queue.settle(message, disposition).await {
                Ok(()) => return true,
                Err(e @ (QueueError::Closed | QueueError::Serialization(_))) => {
                    error!(error = %e, ?disposition, "Failed to settle message");
                    return false;
                }
                Err(e) => {
                    warn!(error = %e, ?disposition, "Failed to settle message, retrying");
                    tokio::select! {
                        () = cancel.cancelled() => {
                            info!("Shutdown while settling, leaving message in flight");
                            return false;
                        }
                        () = tokio::time::sleep(self.settings.retry_delay) => {}
                    }
                }
            }
        }
    }

    /// Decide how to settle one message. `None` means leave it unsettled.
    async fn dispatch(
        &self,
        message: &QueueMessage,
        cancel: &CancellationToken,
    ) -> Option<Disposition> {
        let job: NotificationJob = match serde_json::from_str(&message.envelope.body) {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "Malformed job, dead-lettering");
                return Some(Disposition::NackDeadLetter {
                    reason: DeadLetterReason::Malformed,
                });
            }
        };

        let retry_count = message.envelope.retry_count();
        debug!(
            notification_id = %job.notification_id,
            tokens = job.device_token_ids.len(),
            retry_count,
            "Processing job"
        );

        match self.handler.handle(&job, cancel).await {
            Ok(()) => Some(Disposition::Ack),
            Err(AppError::Cancelled) => None,
            Err(_) if cancel.is_cancelled() => None,
            Err(e) if self.settings.policy.should_requeue(retry_count) => {
                warn!(
                    notification_id = %job.notification_id,
                    retry_count,
                    error = %e,
                    "Job failed, requeueing"
                );
                Some(Disposition::NackRequeue {
                    retry_count: retry_count + 1,
                })
            }
            Err(e) => {
                error!(
                    notification_id = %job.notification_id,
                    retry_count,
                    error = %e,
                    "Job failed on final delivery, dead-lettering"
                );
                Some(Disposition::NackDeadLetter {
                    reason: DeadLetterReason::MaxRetries,
                })
            }
        }
    }
}
