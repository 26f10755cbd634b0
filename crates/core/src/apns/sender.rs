//! Push sending with bounded retry.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ApnsError, ApnsNotification, PushClientCache, PushResponse};
use crate::models::Credential;
use crate::token_prefix;

/// Status codes that never succeed on retry.
///
/// Bad request, invalid topic, invalid method, unregistered token and
/// payload too large.
pub const TERMINAL_STATUS_CODES: [u16; 5] = [400, 403, 405, 410, 413];

/// The token is no longer routable and must not be used again.
pub const UNREGISTERED_STATUS: u16 = 410;

/// Whether a response code ends the retry loop.
#[must_use]
pub fn is_terminal_status(status_code: u16) -> bool {
    TERMINAL_STATUS_CODES.contains(&status_code)
}

/// Delay before retry `attempt` (1-based): `attempt²` seconds.
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt).pow(2))
}

/// Classified result of a completed push request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// Only 200 counts as success.
    pub success: bool,
    /// HTTP status of the last request.
    pub status_code: u16,
    /// Failure reason from the response body.
    pub reason: Option<String>,
    /// `apns-id` response header.
    pub apns_id: Option<String>,
    /// Requests made to reach this outcome.
    pub attempts: u32,
}

impl SendOutcome {
    fn from_response(response: PushResponse) -> Self {
        Self {
            success: response.status_code == 200,
            status_code: response.status_code,
            reason: response.reason,
            apns_id: response.apns_id,
            attempts: 1,
        }
    }

    /// Whether retrying cannot change this outcome.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.success || is_terminal_status(self.status_code)
    }
}

/// Send failures that produced no usable outcome.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// No client could be built for the credential.
    #[error("APNs client unavailable: {0}")]
    Client(#[source] ApnsError),

    /// The request failed before a response arrived.
    #[error("{0}")]
    Transport(#[source] ApnsError),

    /// Shutdown was requested between attempts.
    #[error("send cancelled after {attempts} attempts")]
    Cancelled {
        /// Requests made before cancellation.
        attempts: u32,
    },

    /// Every attempt failed with a retryable result.
    #[error("max retries exceeded after {attempts} attempts: {}", last_failure(.last_outcome.as_ref(), .last_error.as_deref()))]
    RetriesExhausted {
        /// Requests made.
        attempts: u32,
        /// Last completed response, if the last attempt got one.
        last_outcome: Option<SendOutcome>,
        /// Last error, if the last attempt produced no response.
        last_error: Option<String>,
    },
}

fn last_failure(outcome: Option<&SendOutcome>, error: Option<&str>) -> String {
    match (outcome, error) {
        (Some(outcome), _) => outcome
            .reason
            .clone()
            .unwrap_or_else(|| format!("status {}", outcome.status_code)),
        (None, Some(error)) => error.to_string(),
        (None, None) => "no attempts made".to_string(),
    }
}

impl SendError {
    /// Requests made before this error.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Client(_) | Self::Transport(_) => 1,
            Self::Cancelled { attempts } | Self::RetriesExhausted { attempts, .. } => *attempts,
        }
    }

    /// Last response code seen, if any.
    #[must_use]
    pub fn response_code(&self) -> Option<u16> {
        match self {
            Self::RetriesExhausted {
                last_outcome: Some(outcome),
                ..
            } => Some(outcome.status_code),
            _ => None,
        }
    }
}

/// Sends notifications through cached gateway clients.
pub struct Sender {
    cache: Arc<PushClientCache>,
}

impl Sender {
    /// Create a sender over a client cache.
    #[must_use]
    pub const fn new(cache: Arc<PushClientCache>) -> Self {
        Self { cache }
    }

    /// Make one push attempt.
    pub async fn send(
        &self,
        credential: &Credential,
        notification: &ApnsNotification,
    ) -> Result<SendOutcome, SendError> {
        let client = self
            .cache
            .get(&credential.fingerprint())
            .await
            .map_err(SendError::Client)?;

        let response = client
            .push(notification)
            .await
            .map_err(SendError::Transport)?;

        let outcome = SendOutcome::from_response(response);
        debug!(
            token_prefix = token_prefix(&notification.device_token),
            status = outcome.status_code,
            apns_id = ?outcome.apns_id,
            "APNs response"
        );

        Ok(outcome)
    }

    /// Push with up to `max_retries` retries after the first attempt.
    ///
    /// Retry `n` waits `n²` seconds first. Successes and terminal status
    /// codes return immediately; cancellation during a wait stops the loop.
    pub async fn send_with_retry(
        &self,
        credential: &Credential,
        notification: &ApnsNotification,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<SendOutcome, SendError> {
        let mut last_outcome = None;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        return Err(SendError::Cancelled { attempts: attempt });
                    }
                    () = tokio::time::sleep(backoff_delay(attempt)) => {}
                }
            }

            match self.send(credential, notification).await {
                Ok(mut outcome) => {
                    outcome.attempts = attempt + 1;
                    if outcome.is_terminal() {
                        return Ok(outcome);
                    }

                    warn!(
                        token_prefix = token_prefix(&notification.device_token),
                        attempt = attempt + 1,
                        status = outcome.status_code,
                        reason = ?outcome.reason,
                        "APNs send failed, will retry"
                    );
                    last_outcome = Some(outcome);
                    last_error = None;
                }
                Err(e) => {
                    warn!(
                        token_prefix = token_prefix(&notification.device_token),
                        attempt = attempt + 1,
                        error = %e,
                        "APNs send error, will retry"
                    );
                    last_outcome = None;
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(SendError::RetriesExhausted {
            attempts: max_retries + 1,
            last_outcome,
            last_error,
        })
    }
}
