//! Core delivery pipeline for pushlab.
//!
//! Holds the domain model, the store contracts the pipeline depends on,
//! the APNs client cache and retrying sender, and the per-job
//! [`NotificationProcessor`].

pub mod apns;
pub mod models;
pub mod processor;
pub mod stores;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use models::*;
pub use processor::{NotificationProcessor, ProcessSummary};
pub use stores::{CredentialStore, DeliveryStore, DeviceStore, Enqueuer, JobStatusStore};

/// Shorten a device token for log output.
#[must_use]
pub fn token_prefix(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}
