//! Message envelope and settlement outcomes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header holding the number of times a message was requeued.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Header recording why a message was dead-lettered.
pub const DEATH_REASON_HEADER: &str = "x-death-reason";

/// Header recording when a message was dead-lettered.
pub const DEAD_LETTERED_AT_HEADER: &str = "x-dead-lettered-at";

/// A queued message body with its headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub headers: BTreeMap<String, Value>,
    /// Job JSON, kept as text so malformed jobs survive the trip.
    pub body: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Wrap a body for publishing.
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: body.into(),
            published_at: Some(Utc::now()),
        }
    }

    /// Decode a stored envelope.
    ///
    /// Text that is not an envelope is treated as a bare body with no
    /// headers.
    #[must_use]
    pub fn decode(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| Self {
            headers: BTreeMap::new(),
            body: raw.to_string(),
            published_at: None,
        })
    }

    /// Encode for storage.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Prior requeues of this message.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.headers
            .get(RETRY_COUNT_HEADER)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0)
    }

    /// Copy with the retry counter set.
    #[must_use]
    pub fn with_retry_count(&self, retry_count: u32) -> Self {
        let mut envelope = self.clone();
        envelope
            .headers
            .insert(RETRY_COUNT_HEADER.to_string(), Value::from(retry_count));
        envelope
    }

    /// Copy marked for the dead-letter queue.
    #[must_use]
    pub fn dead_lettered(&self, reason: DeadLetterReason) -> Self {
        let mut envelope = self.clone();
        envelope.headers.insert(
            DEATH_REASON_HEADER.to_string(),
            Value::from(reason.as_str()),
        );
        envelope.headers.insert(
            DEAD_LETTERED_AT_HEADER.to_string(),
            Value::from(Utc::now().to_rfc3339()),
        );
        envelope
    }

    /// Why this message was dead-lettered, if it was.
    #[must_use]
    pub fn death_reason(&self) -> Option<&str> {
        self.headers.get(DEATH_REASON_HEADER).and_then(Value::as_str)
    }
}

/// A message received from the queue and not yet settled.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    /// Stored form, used to remove the message from the in-flight list.
    pub raw: String,
    pub envelope: Envelope,
}

impl QueueMessage {
    /// Wrap a stored message.
    #[must_use]
    pub fn from_raw(raw: String) -> Self {
        let envelope = Envelope::decode(&raw);
        Self { raw, envelope }
    }
}

/// Why a message went to the dead-letter queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The body is not a valid job.
    Malformed,
    /// Processing failed on every allowed delivery.
    MaxRetries,
}

impl DeadLetterReason {
    /// Header value for this reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::MaxRetries => "max-retries",
        }
    }
}

/// How a received message is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed; remove it.
    Ack,
    /// Return to the queue with an updated retry counter.
    NackRequeue {
        /// Counter value stored on the requeued message.
        retry_count: u32,
    },
    /// Move to the dead-letter queue.
    NackDeadLetter {
        /// Recorded on the dead-lettered message.
        reason: DeadLetterReason,
    },
}
