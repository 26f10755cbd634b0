//! HTTP/2 gateway client.
//!
//! Uses `reqwest` for transport and `jsonwebtoken` for ES256 provider tokens.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::cache::{ClientFactory, ClientFingerprint};
use super::{ApnsError, ApnsNotification};
use crate::models::Environment;
use crate::token_prefix;

/// Provider tokens are refreshed before the gateway's one hour limit.
const TOKEN_VALIDITY: Duration = Duration::from_secs(55 * 60);

/// Gateway answer to one push request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResponse {
    pub status_code: u16,
    /// Failure reason from the response body.
    pub reason: Option<String>,
    /// Gateway-assigned notification ID.
    pub apns_id: Option<String>,
}

/// A reusable connection to the push gateway.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Issue one push request.
    async fn push(&self, notification: &ApnsNotification) -> Result<PushResponse, ApnsError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ProviderClaims {
    /// Team ID.
    iss: String,
    iat: i64,
}

struct CachedToken {
    token: String,
    created_at: Instant,
}

#[derive(Deserialize)]
struct ErrorBody {
    reason: Option<String>,
}

/// Token-authenticated client bound to one signing key and environment.
pub struct ApnsClient {
    team_id: String,
    key_id: String,
    environment: Environment,
    encoding_key: EncodingKey,
    http: reqwest::Client,
    cached_token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for ApnsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApnsClient")
            .field("team_id", &self.team_id)
            .field("key_id", &self.key_id)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

impl ApnsClient {
    /// Build a client from PEM-encoded PKCS#8 key material.
    pub fn new(
        team_id: &str,
        key_id: &str,
        environment: Environment,
        key_pem: &[u8],
        request_timeout: Duration,
    ) -> Result<Self, ApnsError> {
        let encoding_key = EncodingKey::from_ec_pem(key_pem).map_err(|e| ApnsError::KeyParse {
            reason: e.to_string(),
        })?;

        let http = reqwest::Client::builder()
            .http2_prior_knowledge()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ApnsError::ClientBuild {
                reason: e.to_string(),
            })?;

        Ok(Self {
            team_id: team_id.to_string(),
            key_id: key_id.to_string(),
            environment,
            encoding_key,
            http,
            cached_token: Mutex::new(None),
        })
    }

    /// Build a client for a fingerprint, reading the key from disk.
    pub async fn from_fingerprint(
        fingerprint: &ClientFingerprint,
        request_timeout: Duration,
    ) -> Result<Self, ApnsError> {
        let key_pem = tokio::fs::read(&fingerprint.key_path)
            .await
            .map_err(|e| ApnsError::KeyRead {
                path: fingerprint.key_path.display().to_string(),
                reason: e.to_string(),
            })?;

        let client = Self::new(
            &fingerprint.team_id,
            &fingerprint.key_id,
            fingerprint.environment,
            &key_pem,
            request_timeout,
        )?;

        info!(
            team_id = %fingerprint.team_id,
            key_id = %fingerprint.key_id,
            environment = %fingerprint.environment,
            "APNs client initialized"
        );

        Ok(client)
    }

    /// Endpoint for a device token.
    #[must_use]
    pub fn device_url(&self, device_token: &str) -> String {
        format!(
            "https://{}:443/3/device/{}",
            self.environment.host(),
            device_token
        )
    }

    /// Get a cached provider token or sign a new one.
    pub fn provider_token(&self) -> Result<String, ApnsError> {
        let mut cached = self
            .cached_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(ref token) = *cached {
            if token.created_at.elapsed() < TOKEN_VALIDITY {
                return Ok(token.token.clone());
            }
        }

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());

        let claims = ProviderClaims {
            iss: self.team_id.clone(),
            iat: chrono::Utc::now().timestamp(),
        };

        let token = jsonwebtoken::encode(&header, &claims, &self.encoding_key).map_err(|e| {
            ApnsError::JwtSign {
                reason: e.to_string(),
            }
        })?;

        *cached = Some(CachedToken {
            token: token.clone(),
            created_at: Instant::now(),
        });

        Ok(token)
    }
}

#[async_trait]
impl PushGateway for ApnsClient {
    async fn push(&self, notification: &ApnsNotification) -> Result<PushResponse, ApnsError> {
        let jwt = self.provider_token()?;
        let url = self.device_url(&notification.device_token);

        debug!(
            token_prefix = token_prefix(&notification.device_token),
            topic = %notification.topic,
            priority = notification.priority.header_value(),
            "APNs request"
        );

        let response = self
            .http
            .post(&url)
            .header("authorization", format!("bearer {jwt}"))
            .header("apns-topic", &notification.topic)
            .header("apns-push-type", "alert")
            .header("apns-priority", notification.priority.header_value())
            .header("apns-expiration", "0")
            .json(&notification.payload)
            .send()
            .await
            .map_err(|e| ApnsError::Transport(e.to_string()))?;

        let status_code = response.status().as_u16();
        let apns_id = response
            .headers()
            .get("apns-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let reason = if response.status().is_success() {
            None
        } else {
            let body = response.text().await.unwrap_or_default();
            serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.reason)
        };

        Ok(PushResponse {
            status_code,
            reason,
            apns_id,
        })
    }
}

/// Creates [`ApnsClient`]s for the client cache.
#[derive(Debug, Clone)]
pub struct ApnsClientFactory {
    request_timeout: Duration,
}

impl ApnsClientFactory {
    /// Create a factory whose clients use the given request timeout.
    #[must_use]
    pub const fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl ClientFactory for ApnsClientFactory {
    async fn create(
        &self,
        fingerprint: &ClientFingerprint,
    ) -> Result<Arc<dyn PushGateway>, ApnsError> {
        let client = ApnsClient::from_fingerprint(fingerprint, self.request_timeout).await?;
        Ok(Arc::new(client))
    }
}
