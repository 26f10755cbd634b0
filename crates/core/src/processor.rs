//! Per-job notification processing.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::apns::{ApnsNotification, SendError, Sender, UNREGISTERED_STATUS};
use crate::models::{DeliveryStatus, NotificationJob, NotificationStatus};
use crate::stores::{CredentialStore, DeliveryStore, DeviceStore, JobStatusStore};
use crate::token_prefix;
use pushlab_common::{AppError, AppResult};

/// Result of one processed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSummary {
    /// Final aggregate status written for the job.
    pub status: NotificationStatus,
    /// Tokens delivered.
    pub succeeded: usize,
    /// Tokens that failed.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenResult {
    Delivered,
    Failed,
}

/// Fans a job out to its device tokens and records the outcomes.
pub struct NotificationProcessor {
    devices: Arc<dyn DeviceStore>,
    credentials: Arc<dyn CredentialStore>,
    deliveries: Arc<dyn DeliveryStore>,
    jobs: Arc<dyn JobStatusStore>,
    sender: Arc<Sender>,
    max_send_retries: u32,
}

impl NotificationProcessor {
    /// Create a processor.
    ///
    /// `max_send_retries` is the number of retries after the first push
    /// attempt for each token.
    #[must_use]
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        credentials: Arc<dyn CredentialStore>,
        deliveries: Arc<dyn DeliveryStore>,
        jobs: Arc<dyn JobStatusStore>,
        sender: Arc<Sender>,
        max_send_retries: u32,
    ) -> Self {
        Self {
            devices,
            credentials,
            deliveries,
            jobs,
            sender,
            max_send_retries,
        }
    }

    /// Process one job.
    ///
    /// Tokens are handled one after another; a failing token never stops
    /// the rest. Errors are returned only when state could not be persisted
    /// or shutdown interrupted the job.
    pub async fn process(
        &self,
        job: &NotificationJob,
        cancel: &CancellationToken,
    ) -> AppResult<ProcessSummary> {
        info!(
            notification_id = %job.notification_id,
            tokens = job.device_token_ids.len(),
            "Processing notification"
        );

        self.jobs
            .update_status(job.notification_id, NotificationStatus::Sent)
            .await?;

        let mut succeeded = 0;
        let mut failed = 0;

        for &token_id in &job.device_token_ids {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            match self.process_token(job, token_id, cancel).await? {
                TokenResult::Delivered => succeeded += 1,
                TokenResult::Failed => failed += 1,
            }
        }

        let status = NotificationStatus::from_success_count(succeeded);
        self.jobs.update_status(job.notification_id, status).await?;

        info!(
            notification_id = %job.notification_id,
            %status,
            succeeded,
            failed,
            "Notification processed"
        );

        Ok(ProcessSummary {
            status,
            succeeded,
            failed,
        })
    }

    async fn process_token(
        &self,
        job: &NotificationJob,
        token_id: Uuid,
        cancel: &CancellationToken,
    ) -> AppResult<TokenResult> {
        // A delivery must reference an existing token
        let Some(token) = self.devices.get_device_token(token_id).await? else {
            warn!(
                notification_id = %job.notification_id,
                device_token_id = %token_id,
                "Device token not found"
            );
            return Ok(TokenResult::Failed);
        };

        let mut delivery = self.deliveries.create(job.notification_id, token.id).await?;

        // Redelivered job: never push twice to a token that already got it
        if delivery.status == DeliveryStatus::Delivered {
            debug!(
                notification_id = %job.notification_id,
                device_token_id = %token.id,
                "Token already delivered"
            );
            return Ok(TokenResult::Delivered);
        }

        if !token.is_valid {
            delivery.mark_failed(None, "token invalid", 0);
            self.deliveries.update_status(&delivery).await?;
            warn!(device_token_id = %token.id, "Skipping invalid device token");
            return Ok(TokenResult::Failed);
        }

        let Some(device) = self.devices.get_device(token.device_id).await? else {
            delivery.mark_failed(None, "device not found", 0);
            self.deliveries.update_status(&delivery).await?;
            warn!(
                device_token_id = %token.id,
                device_id = %token.device_id,
                "Device not found"
            );
            return Ok(TokenResult::Failed);
        };

        let Some(credential) = self
            .credentials
            .lookup(device.user_id, &token.bundle_id, token.environment)
            .await?
        else {
            delivery.mark_failed(None, "credentials not found", 0);
            self.deliveries.update_status(&delivery).await?;
            warn!(
                device_token_id = %token.id,
                bundle_id = %token.bundle_id,
                environment = %token.environment,
                "APNs credentials not found"
            );
            return Ok(TokenResult::Failed);
        };

        let notification = ApnsNotification::new(&token.token, &token.bundle_id, &job.payload);

        let result = self
            .sender
            .send_with_retry(&credential, &notification, self.max_send_retries, cancel)
            .await;

        match result {
            Ok(outcome) if outcome.success => {
                delivery.mark_delivered(outcome.status_code, outcome.attempts);
                self.deliveries.update_status(&delivery).await?;

                if let Err(e) = self.devices.touch_token_last_used(token.id).await {
                    warn!(device_token_id = %token.id, error = %e, "Failed to update token last used");
                }

                info!(
                    notification_id = %job.notification_id,
                    device_token_id = %token.id,
                    token_prefix = token_prefix(&token.token),
                    attempts = outcome.attempts,
                    "Notification delivered"
                );
                Ok(TokenResult::Delivered)
            }
            Ok(outcome) => {
                let reason = outcome
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("status {}", outcome.status_code));
                delivery.mark_failed(Some(outcome.status_code), reason.as_str(), outcome.attempts);
                self.deliveries.update_status(&delivery).await?;

                warn!(
                    notification_id = %job.notification_id,
                    device_token_id = %token.id,
                    status = outcome.status_code,
                    reason = %reason,
                    "Notification rejected"
                );

                if outcome.status_code == UNREGISTERED_STATUS {
                    self.devices.mark_token_invalid(token.id, &reason).await?;
                    info!(device_token_id = %token.id, "Device token marked invalid");
                }
                Ok(TokenResult::Failed)
            }
            Err(SendError::Cancelled { attempts }) => {
                // Left pending for the redelivered job to finish
                debug!(device_token_id = %token.id, attempts, "Send cancelled");
                Err(AppError::Cancelled)
            }
            Err(e) => {
                delivery.mark_failed(e.response_code(), e.to_string(), e.attempts());
                self.deliveries.update_status(&delivery).await?;

                error!(
                    notification_id = %job.notification_id,
                    device_token_id = %token.id,
                    attempts = e.attempts(),
                    error = %e,
                    "Notification failed"
                );
                Ok(TokenResult::Failed)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::apns::PushClientCache;
    use crate::models::{Environment, NotificationPayload, Priority};
    use crate::testing::{MemoryStore, ScriptedFactory, ScriptedGateway};
    use tokio::time::Instant;

    struct Harness {
        store: Arc<MemoryStore>,
        gateway: Arc<ScriptedGateway>,
        processor: NotificationProcessor,
        user_id: Uuid,
        device_id: Uuid,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let gateway = Arc::new(ScriptedGateway::new());
            let factory = Arc::new(ScriptedFactory::new(gateway.clone()));
            let sender = Arc::new(Sender::new(Arc::new(PushClientCache::new(factory))));

            let user_id = Uuid::new_v4();
            let device_id = store.add_device(user_id).id;

            let processor = NotificationProcessor::new(
                store.clone(),
                store.clone(),
                store.clone(),
                store.clone(),
                sender,
                3,
            );

            Self {
                store,
                gateway,
                processor,
                user_id,
                device_id,
            }
        }

        fn token(&self, token: &str) -> Uuid {
            self.store
                .add_token(self.device_id, token, "com.app", Environment::Production)
                .id
        }

        fn job(&self, device_token_ids: Vec<Uuid>) -> NotificationJob {
            NotificationJob {
                notification_id: Uuid::new_v4(),
                user_id: self.user_id,
                device_token_ids,
                payload: NotificationPayload {
                    title: Some("Hi".to_string()),
                    body: "Hello".to_string(),
                    badge: None,
                    sound: "default".to_string(),
                    category: None,
                    priority: Priority::High,
                    data: serde_json::Map::new(),
                },
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_outcomes_job() {
        let h = Harness::new();
        h.store
            .add_credential(h.user_id, "com.app", Environment::Production);
        let a = h.token("aaaaaaaaaaaa");
        let b = h.token("bbbbbbbbbbbb");
        let c = h.token("cccccccccccc");
        h.gateway.script("aaaaaaaaaaaa", [(200, None)]);
        h.gateway.script("bbbbbbbbbbbb", [(410, Some("Unregistered"))]);
        h.gateway
            .script("cccccccccccc", [(500, Some("InternalServerError")); 4]);

        let job = h.job(vec![a, b, c]);
        let start = Instant::now();
        let summary = h
            .processor
            .process(&job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, NotificationStatus::Delivered);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(
            h.store.status_history(job.notification_id),
            vec![NotificationStatus::Sent, NotificationStatus::Delivered]
        );

        let delivery_a = h.store.delivery_for(a).unwrap();
        assert_eq!(delivery_a.status, DeliveryStatus::Delivered);
        assert_eq!(delivery_a.response_code, Some(200));
        assert!(delivery_a.delivered_at.is_some());

        let delivery_b = h.store.delivery_for(b).unwrap();
        assert_eq!(delivery_b.status, DeliveryStatus::Failed);
        assert_eq!(delivery_b.response_code, Some(410));
        assert_eq!(delivery_b.attempt_count, 1);
        assert_eq!(delivery_b.error_reason.as_deref(), Some("Unregistered"));

        let delivery_c = h.store.delivery_for(c).unwrap();
        assert_eq!(delivery_c.status, DeliveryStatus::Failed);
        assert_eq!(delivery_c.response_code, Some(500));
        assert_eq!(delivery_c.attempt_count, 4);

        let offsets: Vec<u64> = h
            .gateway
            .calls("cccccccccccc")
            .iter()
            .map(|at| at.duration_since(start).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 1, 5, 14]);

        assert!(h.store.token(a).unwrap().is_valid);
        assert!(!h.store.token(b).unwrap().is_valid);
        assert!(h.store.token(c).unwrap().is_valid);
        assert_eq!(h.store.token(b).unwrap().error_count, 1);
        assert_eq!(h.store.touched(), vec![a]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_tokens_failing_marks_job_failed() {
        let h = Harness::new();
        h.store
            .add_credential(h.user_id, "com.app", Environment::Production);
        let a = h.token("aaaaaaaaaaaa");
        let b = h.token("bbbbbbbbbbbb");
        h.gateway.script("aaaaaaaaaaaa", [(400, Some("BadDeviceToken"))]);
        h.gateway.script("bbbbbbbbbbbb", [(413, Some("PayloadTooLarge"))]);

        let job = h.job(vec![a, b]);
        let summary = h
            .processor
            .process(&job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, NotificationStatus::Failed);
        // Only 410 invalidates a token
        assert!(h.store.token(a).unwrap().is_valid);
        assert!(h.store.token(b).unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_invalid_token_not_sent() {
        let h = Harness::new();
        h.store
            .add_credential(h.user_id, "com.app", Environment::Production);
        let a = h.token("aaaaaaaaaaaa");
        h.store.mark_token_invalid(a, "Unregistered").await.unwrap();

        let job = h.job(vec![a]);
        let summary = h
            .processor
            .process(&job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, NotificationStatus::Failed);
        let delivery = h.store.delivery_for(a).unwrap();
        assert_eq!(delivery.error_reason.as_deref(), Some("token invalid"));
        assert_eq!(delivery.attempt_count, 0);
        assert!(h.gateway.calls("aaaaaaaaaaaa").is_empty());
    }

    #[tokio::test]
    async fn test_missing_credentials_recorded() {
        let h = Harness::new();
        h.store
            .add_credential(h.user_id, "com.app", Environment::Sandbox);
        let a = h.token("aaaaaaaaaaaa");

        let job = h.job(vec![a]);
        let summary = h
            .processor
            .process(&job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, NotificationStatus::Failed);
        let delivery = h.store.delivery_for(a).unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.error_reason.as_deref(), Some("credentials not found"));
        assert!(h.gateway.calls("aaaaaaaaaaaa").is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_does_not_stop_siblings() {
        let h = Harness::new();
        h.store
            .add_credential(h.user_id, "com.app", Environment::Production);
        let a = h.token("aaaaaaaaaaaa");

        let job = h.job(vec![Uuid::new_v4(), a]);
        let summary = h
            .processor
            .process(&job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, NotificationStatus::Delivered);
        assert_eq!(summary.failed, 1);
        assert_eq!(h.store.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_job_is_failed() {
        let h = Harness::new();

        let job = h.job(Vec::new());
        let summary = h
            .processor
            .process(&job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, NotificationStatus::Failed);
        assert_eq!(
            h.store.status_history(job.notification_id),
            vec![NotificationStatus::Sent, NotificationStatus::Failed]
        );
    }

    #[tokio::test]
    async fn test_status_store_failure_is_error() {
        let h = Harness::new();
        h.store.fail_job_status(true);

        let job = h.job(vec![h.token("aaaaaaaaaaaa")]);
        let err = h
            .processor
            .process(&job, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(h.store.deliveries().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_store_failure_is_error() {
        let h = Harness::new();
        h.store
            .add_credential(h.user_id, "com.app", Environment::Production);
        h.store.fail_delivery_writes(true);

        let job = h.job(vec![h.token("aaaaaaaaaaaa")]);
        let err = h
            .processor
            .process(&job, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Database(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let h = Harness::new();
        h.store
            .add_credential(h.user_id, "com.app", Environment::Production);
        let a = h.token("aaaaaaaaaaaa");
        let b = h.token("bbbbbbbbbbbb");
        h.gateway.script("aaaaaaaaaaaa", [(503, None); 4]);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let job = h.job(vec![a, b]);
        let err = h.processor.process(&job, &cancel).await.unwrap_err();

        assert!(matches!(err, AppError::Cancelled));
        let delivery = h.store.delivery_for(a).unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert!(delivery.error_reason.is_none());
        assert!(h.gateway.calls("bbbbbbbbbbbb").is_empty());
        assert_eq!(
            h.store.status_history(job.notification_id),
            vec![NotificationStatus::Sent]
        );
    }

    #[tokio::test]
    async fn test_reprocessed_job_keeps_one_delivery_per_token() {
        let h = Harness::new();
        h.store
            .add_credential(h.user_id, "com.app", Environment::Production);
        let a = h.token("aaaaaaaaaaaa");
        let b = h.token("bbbbbbbbbbbb");
        h.gateway.script("aaaaaaaaaaaa", [(200, None)]);
        h.gateway
            .script("bbbbbbbbbbbb", [(400, Some("BadDeviceToken")), (200, None)]);

        let job = h.job(vec![a, b]);
        let first = h
            .processor
            .process(&job, &CancellationToken::new())
            .await
            .unwrap();
        let second = h
            .processor
            .process(&job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!((first.succeeded, first.failed), (1, 1));
        assert_eq!((second.succeeded, second.failed), (2, 0));
        assert_eq!(h.store.deliveries().len(), 2);
        assert_eq!(h.gateway.calls("aaaaaaaaaaaa").len(), 1);
        assert_eq!(h.gateway.calls("bbbbbbbbbbbb").len(), 2);

        let delivery_b = h.store.delivery_for(b).unwrap();
        assert_eq!(delivery_b.status, DeliveryStatus::Delivered);
        assert_eq!(delivery_b.response_code, Some(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_job_resumes_on_rerun() {
        let h = Harness::new();
        h.store
            .add_credential(h.user_id, "com.app", Environment::Production);
        let a = h.token("aaaaaaaaaaaa");
        h.gateway
            .script("aaaaaaaaaaaa", [(503, None), (200, None)]);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let job = h.job(vec![a]);
        h.processor.process(&job, &cancel).await.unwrap_err();
        let summary = h
            .processor
            .process(&job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, NotificationStatus::Delivered);
        assert_eq!(h.store.deliveries().len(), 1);
        assert_eq!(
            h.store.delivery_for(a).unwrap().status,
            DeliveryStatus::Delivered
        );
    }
}
