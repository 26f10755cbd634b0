//! Storage contracts consumed by the pipeline.
//!
//! Lookups that find nothing return `Ok(None)`. An `Err` always means the
//! store itself failed and the job should be retried later.

mod db;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Credential, Delivery, Device, DeviceToken, Environment, NotificationJob, NotificationStatus,
};
use pushlab_common::AppResult;

/// Resolves signing credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find the active credential for an account, bundle and environment.
    async fn lookup(
        &self,
        user_id: Uuid,
        bundle_id: &str,
        environment: Environment,
    ) -> AppResult<Option<Credential>>;
}

/// Devices and their push tokens.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Fetch a device token.
    async fn get_device_token(&self, token_id: Uuid) -> AppResult<Option<DeviceToken>>;

    /// Fetch a device.
    async fn get_device(&self, device_id: Uuid) -> AppResult<Option<Device>>;

    /// Flag a token as no longer routable.
    async fn mark_token_invalid(&self, token_id: Uuid, reason: &str) -> AppResult<()>;

    /// Record a successful push to a token.
    async fn touch_token_last_used(&self, token_id: Uuid) -> AppResult<()>;
}

/// Per-token delivery records.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Return the delivery for this token, creating it as `pending` if absent.
    async fn create(&self, notification_id: Uuid, device_token_id: Uuid) -> AppResult<Delivery>;

    /// Persist the current state of a delivery.
    async fn update_status(&self, delivery: &Delivery) -> AppResult<()>;
}

/// Aggregate notification status.
#[async_trait]
pub trait JobStatusStore: Send + Sync {
    /// Set the status of a notification.
    async fn update_status(&self, notification_id: Uuid, status: NotificationStatus)
    -> AppResult<()>;
}

/// Hands jobs to the work queue.
#[async_trait]
pub trait Enqueuer: Send + Sync {
    /// Publish a job for asynchronous processing.
    async fn publish(&self, job: &NotificationJob) -> AppResult<()>;
}
