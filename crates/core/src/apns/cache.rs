//! Credential-scoped gateway client cache.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{ApnsError, PushGateway};
use crate::models::Environment;

/// Identity of a reusable gateway client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientFingerprint {
    pub team_id: String,
    pub key_id: String,
    pub environment: Environment,
    /// Location of the signing key.
    pub key_path: PathBuf,
}

impl fmt::Display for ClientFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.team_id,
            self.key_id,
            self.environment,
            self.key_path.display()
        )
    }
}

/// Builds a gateway client for a fingerprint.
///
/// Construction loads and parses the key material, so it runs at most once
/// per fingerprint.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Create a new client.
    async fn create(
        &self,
        fingerprint: &ClientFingerprint,
    ) -> Result<Arc<dyn PushGateway>, ApnsError>;
}

/// Process-wide registry of gateway clients.
///
/// Exactly one client is constructed per fingerprint; concurrent first
/// requests for the same fingerprint all receive that client.
pub struct PushClientCache {
    factory: Arc<dyn ClientFactory>,
    clients: RwLock<HashMap<ClientFingerprint, Arc<dyn PushGateway>>>,
}

impl PushClientCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Get the client for a fingerprint, creating it on first use.
    pub async fn get(
        &self,
        fingerprint: &ClientFingerprint,
    ) -> Result<Arc<dyn PushGateway>, ApnsError> {
        if let Some(client) = self.clients.read().await.get(fingerprint) {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write().await;

        // Another caller may have created it while we waited for the lock
        if let Some(client) = clients.get(fingerprint) {
            debug!(fingerprint = %fingerprint, "APNs client created concurrently");
            return Ok(client.clone());
        }

        let client = self.factory.create(fingerprint).await?;
        clients.insert(fingerprint.clone(), client.clone());

        info!(
            team_id = %fingerprint.team_id,
            key_id = %fingerprint.key_id,
            environment = %fingerprint.environment,
            cached = clients.len(),
            "APNs client cached"
        );

        Ok(client)
    }

    /// Number of cached clients.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Whether no client has been cached yet.
    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Drop every cached client, closing their connections.
    pub async fn close(&self) {
        let mut clients = self.clients.write().await;
        let count = clients.len();
        clients.clear();

        info!(count, "APNs client cache closed");
    }
}
