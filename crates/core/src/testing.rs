//! In-memory doubles for the store contracts and the push gateway.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use crate::apns::{
    ApnsError, ApnsNotification, ClientFactory, ClientFingerprint, PushGateway, PushResponse,
};
use crate::models::{Credential, Delivery, Device, DeviceToken, Environment, NotificationStatus};
use crate::stores::{CredentialStore, DeliveryStore, DeviceStore, JobStatusStore};
use pushlab_common::{AppError, AppResult};

#[derive(Default)]
struct StoreState {
    devices: HashMap<Uuid, Device>,
    tokens: HashMap<Uuid, DeviceToken>,
    credentials: Vec<(Uuid, Credential)>,
    deliveries: Vec<Delivery>,
    statuses: Vec<(Uuid, NotificationStatus)>,
    touched: Vec<Uuid>,
    fail_job_status: bool,
    fail_delivery_writes: bool,
}

/// Devices, credentials, deliveries and job statuses held in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a device for an account.
    pub fn add_device(&self, user_id: Uuid) -> Device {
        let device = Device {
            id: Uuid::new_v4(),
            user_id,
        };
        self.state().devices.insert(device.id, device.clone());
        device
    }

    /// Register a valid token for a device.
    pub fn add_token(
        &self,
        device_id: Uuid,
        token: &str,
        bundle_id: &str,
        environment: Environment,
    ) -> DeviceToken {
        let token = DeviceToken {
            id: Uuid::new_v4(),
            device_id,
            token: token.to_string(),
            environment,
            bundle_id: bundle_id.to_string(),
            is_valid: true,
            error_count: 0,
            last_used_at: None,
            last_error: None,
        };
        self.state().tokens.insert(token.id, token.clone());
        token
    }

    /// Register an active credential for an account.
    pub fn add_credential(
        &self,
        user_id: Uuid,
        bundle_id: &str,
        environment: Environment,
    ) -> Credential {
        let credential = Credential {
            id: Uuid::new_v4(),
            team_id: "TEAM123456".to_string(),
            key_id: "KEY1234567".to_string(),
            bundle_id: bundle_id.to_string(),
            environment,
            private_key_path: format!("/keys/{bundle_id}.p8").into(),
        };
        self.state().credentials.push((user_id, credential.clone()));
        credential
    }

    /// Current state of a token.
    #[must_use]
    pub fn token(&self, token_id: Uuid) -> Option<DeviceToken> {
        self.state().tokens.get(&token_id).cloned()
    }

    /// All deliveries in creation order.
    #[must_use]
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.state().deliveries.clone()
    }

    /// The delivery recorded for a token.
    #[must_use]
    pub fn delivery_for(&self, token_id: Uuid) -> Option<Delivery> {
        self.state()
            .deliveries
            .iter()
            .find(|d| d.device_token_id == token_id)
            .cloned()
    }

    /// Every status written for a notification, oldest first.
    #[must_use]
    pub fn status_history(&self, notification_id: Uuid) -> Vec<NotificationStatus> {
        self.state()
            .statuses
            .iter()
            .filter(|(id, _)| *id == notification_id)
            .map(|(_, status)| *status)
            .collect()
    }

    /// Tokens whose last-used time was touched.
    #[must_use]
    pub fn touched(&self) -> Vec<Uuid> {
        self.state().touched.clone()
    }

    /// Make job status writes fail.
    pub fn fail_job_status(&self, fail: bool) {
        self.state().fail_job_status = fail;
    }

    /// Make delivery writes fail.
    pub fn fail_delivery_writes(&self, fail: bool) {
        self.state().fail_delivery_writes = fail;
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn lookup(
        &self,
        user_id: Uuid,
        bundle_id: &str,
        environment: Environment,
    ) -> AppResult<Option<Credential>> {
        Ok(self
            .state()
            .credentials
            .iter()
            .find(|(owner, c)| {
                *owner == user_id && c.bundle_id == bundle_id && c.environment == environment
            })
            .map(|(_, c)| c.clone()))
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn get_device_token(&self, token_id: Uuid) -> AppResult<Option<DeviceToken>> {
        Ok(self.token(token_id))
    }

    async fn get_device(&self, device_id: Uuid) -> AppResult<Option<Device>> {
        Ok(self.state().devices.get(&device_id).cloned())
    }

    async fn mark_token_invalid(&self, token_id: Uuid, reason: &str) -> AppResult<()> {
        let mut state = self.state();
        let token = state
            .tokens
            .get_mut(&token_id)
            .ok_or_else(|| AppError::NotFound(format!("Device token {token_id} not found")))?;
        token.is_valid = false;
        token.error_count += 1;
        token.last_error = Some(reason.to_string());
        Ok(())
    }

    async fn touch_token_last_used(&self, token_id: Uuid) -> AppResult<()> {
        let mut state = self.state();
        if let Some(token) = state.tokens.get_mut(&token_id) {
            token.last_used_at = Some(chrono::Utc::now());
        }
        state.touched.push(token_id);
        Ok(())
    }
}

#[async_trait]
impl DeliveryStore for MemoryStore {
    async fn create(&self, notification_id: Uuid, device_token_id: Uuid) -> AppResult<Delivery> {
        let mut state = self.state();
        if state.fail_delivery_writes {
            return Err(AppError::Database("delivery insert failed".to_string()));
        }
        let existing = state.deliveries.iter().find(|d| {
            d.notification_id == notification_id && d.device_token_id == device_token_id
        });
        if let Some(existing) = existing {
            return Ok(existing.clone());
        }
        let delivery = Delivery::pending(notification_id, device_token_id);
        state.deliveries.push(delivery.clone());
        Ok(delivery)
    }

    async fn update_status(&self, delivery: &Delivery) -> AppResult<()> {
        let mut state = self.state();
        if state.fail_delivery_writes {
            return Err(AppError::Database("delivery update failed".to_string()));
        }
        let stored = state
            .deliveries
            .iter_mut()
            .find(|d| d.id == delivery.id)
            .ok_or_else(|| AppError::NotFound(format!("Delivery {} not found", delivery.id)))?;
        *stored = delivery.clone();
        Ok(())
    }
}

#[async_trait]
impl JobStatusStore for MemoryStore {
    async fn update_status(
        &self,
        notification_id: Uuid,
        status: NotificationStatus,
    ) -> AppResult<()> {
        let mut state = self.state();
        if state.fail_job_status {
            return Err(AppError::Database("status update failed".to_string()));
        }
        state.statuses.push((notification_id, status));
        Ok(())
    }
}

enum Scripted {
    Response(u16, Option<String>),
    TransportError,
}

/// Push gateway answering from per-token scripts.
///
/// Tokens without a remaining script entry get `200`.
#[derive(Default)]
pub struct ScriptedGateway {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<HashMap<String, Vec<Instant>>>,
}

impl ScriptedGateway {
    /// Create a gateway that accepts every push.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses for a token.
    pub fn script<'a>(
        &self,
        device_token: &str,
        responses: impl IntoIterator<Item = (u16, Option<&'a str>)>,
    ) {
        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = scripts.entry(device_token.to_string()).or_default();
        for (status, reason) in responses {
            queue.push_back(Scripted::Response(status, reason.map(String::from)));
        }
    }

    /// Queue transport failures for a token.
    pub fn fail_transport(&self, device_token: &str, times: usize) {
        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = scripts.entry(device_token.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(Scripted::TransportError);
        }
    }

    /// When each push to a token was made.
    #[must_use]
    pub fn calls(&self, device_token: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_token)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PushGateway for ScriptedGateway {
    async fn push(&self, notification: &ApnsNotification) -> Result<PushResponse, ApnsError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(notification.device_token.clone())
            .or_default()
            .push(Instant::now());

        let next = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&notification.device_token)
            .and_then(VecDeque::pop_front);

        match next {
            Some(Scripted::TransportError) => {
                Err(ApnsError::Transport("connection reset".to_string()))
            }
            Some(Scripted::Response(status_code, reason)) => Ok(PushResponse {
                status_code,
                reason,
                apns_id: Some(Uuid::new_v4().to_string()),
            }),
            None => Ok(PushResponse {
                status_code: 200,
                reason: None,
                apns_id: Some(Uuid::new_v4().to_string()),
            }),
        }
    }
}

/// A distinct client handle over a shared script.
struct GatewayHandle(Arc<ScriptedGateway>);

#[async_trait]
impl PushGateway for GatewayHandle {
    async fn push(&self, notification: &ApnsNotification) -> Result<PushResponse, ApnsError> {
        self.0.push(notification).await
    }
}

/// Client factory that counts constructions.
pub struct ScriptedFactory {
    gateway: Option<Arc<ScriptedGateway>>,
    created: AtomicUsize,
}

impl ScriptedFactory {
    /// Every client created answers from `gateway`.
    #[must_use]
    pub const fn new(gateway: Arc<ScriptedGateway>) -> Self {
        Self {
            gateway: Some(gateway),
            created: AtomicUsize::new(0),
        }
    }

    /// A factory whose key material never loads.
    #[must_use]
    pub const fn failing() -> Self {
        Self {
            gateway: None,
            created: AtomicUsize::new(0),
        }
    }

    /// Clients constructed so far.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientFactory for ScriptedFactory {
    async fn create(
        &self,
        fingerprint: &ClientFingerprint,
    ) -> Result<Arc<dyn PushGateway>, ApnsError> {
        let gateway = self.gateway.clone().ok_or_else(|| ApnsError::KeyRead {
            path: fingerprint.key_path.display().to_string(),
            reason: "No such file or directory".to_string(),
        })?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(GatewayHandle(gateway)))
    }
}
