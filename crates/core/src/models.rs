//! Domain model for the delivery pipeline.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::apns::ClientFingerprint;

/// Gateway environment a token or credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development builds, served by the sandbox gateway.
    Sandbox,
    /// App Store and TestFlight builds.
    Production,
}

impl Environment {
    /// Parse a stored environment name.
    ///
    /// Anything other than `production` targets the sandbox gateway.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("production") {
            Self::Production
        } else {
            Self::Sandbox
        }
    }

    /// Stored name of the environment.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Production => "production",
        }
    }

    /// Gateway host serving this environment.
    #[must_use]
    pub const fn host(self) -> &'static str {
        match self {
            Self::Sandbox => "api.sandbox.push.apple.com",
            Self::Production => "api.push.apple.com",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery priority requested by the submitter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Delivered at a time that conserves power on the device.
    #[default]
    Normal,
    /// Delivered immediately.
    High,
}

impl Priority {
    /// Value of the `apns-priority` header.
    #[must_use]
    pub const fn header_value(self) -> &'static str {
        match self {
            Self::High => "10",
            Self::Normal => "5",
        }
    }
}

/// Content of a notification, shared by every target token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(default)]
    pub title: Option<String>,
    pub body: String,
    #[serde(default)]
    pub badge: Option<i32>,
    /// Sound name; empty means silent.
    #[serde(default)]
    pub sound: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Custom data placed at the root of the gateway payload.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Map<String, Value>,
}

/// A queued notification request.
///
/// This is the body of every work queue message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub device_token_ids: Vec<Uuid>,
    pub payload: NotificationPayload,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: Uuid,
    pub user_id: Uuid,
}

/// A push routing token issued to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceToken {
    pub id: Uuid,
    pub device_id: Uuid,
    pub token: String,
    pub environment: Environment,
    pub bundle_id: String,
    pub is_valid: bool,
    pub error_count: i32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Token-based signing credential for one bundle and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub id: Uuid,
    pub team_id: String,
    pub key_id: String,
    pub bundle_id: String,
    pub environment: Environment,
    /// Location of the `.p8` signing key.
    pub private_key_path: PathBuf,
}

impl Credential {
    /// Identity of the gateway client this credential signs for.
    #[must_use]
    pub fn fingerprint(&self) -> ClientFingerprint {
        ClientFingerprint {
            team_id: self.team_id.clone(),
            key_id: self.key_id.clone(),
            environment: self.environment,
            key_path: self.private_key_path.clone(),
        }
    }
}

/// State of one (notification, token) delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Created, no final outcome yet.
    Pending,
    /// Accepted by the gateway.
    Delivered,
    /// Rejected, unresolvable or out of retries.
    Failed,
}

impl DeliveryStatus {
    /// Stored name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored status name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Aggregate status of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// Accepted, waiting in the work queue.
    Queued,
    /// Picked up by a worker.
    Sent,
    /// At least one token accepted the push.
    Delivered,
    /// No token accepted the push.
    Failed,
}

impl NotificationStatus {
    /// Stored name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    /// Final status of a job given how many of its tokens succeeded.
    #[must_use]
    pub const fn from_success_count(succeeded: usize) -> Self {
        if succeeded == 0 {
            Self::Failed
        } else {
            Self::Delivered
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome record for one (notification, token) pair.
///
/// There is at most one per pair; a redelivered job reuses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub device_token_id: Uuid,
    pub status: DeliveryStatus,
    /// Gateway requests actually made.
    pub attempt_count: u32,
    pub response_code: Option<u16>,
    pub error_reason: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Delivery {
    /// A fresh record for a token that has not been attempted yet.
    #[must_use]
    pub fn pending(notification_id: Uuid, device_token_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            notification_id,
            device_token_id,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            response_code: None,
            error_reason: None,
            delivered_at: None,
        }
    }

    /// Move to `delivered`.
    pub fn mark_delivered(&mut self, response_code: u16, attempts: u32) {
        self.status = DeliveryStatus::Delivered;
        self.attempt_count = attempts;
        self.response_code = Some(response_code);
        self.error_reason = None;
        self.delivered_at = Some(Utc::now());
    }

    /// Move to `failed`.
    pub fn mark_failed(
        &mut self,
        response_code: Option<u16>,
        reason: impl Into<String>,
        attempts: u32,
    ) {
        self.status = DeliveryStatus::Failed;
        self.attempt_count = attempts;
        self.response_code = response_code;
        self.error_reason = Some(reason.into());
    }
}
