//! Store contracts backed by the `pushlab-db` repositories.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{CredentialStore, DeliveryStore, DeviceStore, JobStatusStore};
use crate::models::{
    Credential, Delivery, DeliveryStatus, Device, DeviceToken, Environment, NotificationStatus,
};
use pushlab_common::{AppError, AppResult};
use pushlab_db::entities::{apns_credential, device, device_token, notification_delivery};
use pushlab_db::repositories::{
    ApnsCredentialRepository, DeliveryUpdate, DeviceRepository, NotificationRepository,
};

impl From<device::Model> for Device {
    fn from(model: device::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
        }
    }
}

impl From<device_token::Model> for DeviceToken {
    fn from(model: device_token::Model) -> Self {
        Self {
            id: model.id,
            device_id: model.device_id,
            token: model.token,
            environment: Environment::parse(&model.environment),
            bundle_id: model.bundle_id,
            is_valid: model.is_valid,
            error_count: model.error_count,
            last_used_at: model.last_used_at.map(|t| t.with_timezone(&Utc)),
            last_error: model.last_error,
        }
    }
}

impl From<apns_credential::Model> for Credential {
    fn from(model: apns_credential::Model) -> Self {
        Self {
            id: model.id,
            team_id: model.team_id,
            key_id: model.key_id,
            bundle_id: model.bundle_id,
            environment: Environment::parse(&model.environment),
            private_key_path: model.private_key_path.into(),
        }
    }
}

impl TryFrom<notification_delivery::Model> for Delivery {
    type Error = AppError;

    fn try_from(model: notification_delivery::Model) -> AppResult<Self> {
        let status = DeliveryStatus::parse(&model.delivery_status).ok_or_else(|| {
            AppError::Internal(format!(
                "Unknown delivery status: {}",
                model.delivery_status
            ))
        })?;

        Ok(Self {
            id: model.id,
            notification_id: model.notification_id,
            device_token_id: model.device_token_id,
            status,
            attempt_count: u32::try_from(model.attempt_count).unwrap_or_default(),
            response_code: model
                .apns_response_code
                .and_then(|code| u16::try_from(code).ok()),
            error_reason: model.apns_error_reason,
            delivered_at: model.delivered_at.map(|t| t.with_timezone(&Utc)),
        })
    }
}

#[async_trait]
impl CredentialStore for ApnsCredentialRepository {
    async fn lookup(
        &self,
        user_id: Uuid,
        bundle_id: &str,
        environment: Environment,
    ) -> AppResult<Option<Credential>> {
        Ok(self
            .find_active(user_id, bundle_id, environment.as_str())
            .await?
            .map(Credential::from))
    }
}

#[async_trait]
impl DeviceStore for DeviceRepository {
    async fn get_device_token(&self, token_id: Uuid) -> AppResult<Option<DeviceToken>> {
        Ok(self.find_token_by_id(token_id).await?.map(DeviceToken::from))
    }

    async fn get_device(&self, device_id: Uuid) -> AppResult<Option<Device>> {
        Ok(self.find_by_id(device_id).await?.map(Device::from))
    }

    async fn mark_token_invalid(&self, token_id: Uuid, reason: &str) -> AppResult<()> {
        Self::mark_token_invalid(self, token_id, reason).await
    }

    async fn touch_token_last_used(&self, token_id: Uuid) -> AppResult<()> {
        Self::touch_token_last_used(self, token_id).await
    }
}

#[async_trait]
impl DeliveryStore for NotificationRepository {
    async fn create(&self, notification_id: Uuid, device_token_id: Uuid) -> AppResult<Delivery> {
        self.create_delivery(notification_id, device_token_id)
            .await?
            .try_into()
    }

    async fn update_status(&self, delivery: &Delivery) -> AppResult<()> {
        let update = DeliveryUpdate {
            status: delivery.status.as_str().to_string(),
            attempt_count: i32::try_from(delivery.attempt_count).unwrap_or(i32::MAX),
            response_code: delivery.response_code.map(i32::from),
            error_reason: delivery.error_reason.clone(),
            delivered_at: delivery.delivered_at,
        };

        self.update_delivery(delivery.id, update).await
    }
}

#[async_trait]
impl JobStatusStore for NotificationRepository {
    async fn update_status(
        &self,
        notification_id: Uuid,
        status: NotificationStatus,
    ) -> AppResult<()> {
        Self::update_status(self, notification_id, status.as_str()).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::sync::Arc;

    fn token_model(environment: &str) -> device_token::Model {
        device_token::Model {
            id: Uuid::new_v4(),
            device_id: Uuid::new_v4(),
            token: "abcdef0123456789".to_string(),
            environment: environment.to_string(),
            bundle_id: "com.example.app".to_string(),
            issued_at: Utc::now().into(),
            is_valid: false,
            last_used_at: None,
            error_count: 2,
            last_error: Some("Unregistered".to_string()),
            updated_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_device_store_maps_token() {
        let model = token_model("production");
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[model.clone()]])
                .into_connection(),
        );

        let store = DeviceRepository::new(db);
        let token = store.get_device_token(model.id).await.unwrap().unwrap();

        assert_eq!(token.environment, Environment::Production);
        assert!(!token.is_valid);
        assert_eq!(token.error_count, 2);
    }

    #[tokio::test]
    async fn test_credential_store_maps_key_path() {
        let user_id = Uuid::new_v4();
        let model = apns_credential::Model {
            id: Uuid::new_v4(),
            user_id,
            team_id: "TEAM123456".to_string(),
            key_id: "KEY1234567".to_string(),
            bundle_id: "com.example.app".to_string(),
            environment: "sandbox".to_string(),
            private_key_path: "/keys/AuthKey.p8".to_string(),
            created_at: Utc::now().into(),
            is_active: true,
        };
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[model]])
                .into_connection(),
        );

        let store = ApnsCredentialRepository::new(db);
        let credential = store
            .lookup(user_id, "com.example.app", Environment::Sandbox)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(credential.environment, Environment::Sandbox);
        assert_eq!(
            credential.fingerprint().key_path,
            std::path::PathBuf::from("/keys/AuthKey.p8")
        );
    }

    #[test]
    fn test_unknown_delivery_status_rejected() {
        let model = notification_delivery::Model {
            id: Uuid::new_v4(),
            notification_id: Uuid::new_v4(),
            device_token_id: Uuid::new_v4(),
            delivery_status: "bounced".to_string(),
            attempt_count: 1,
            apns_response_code: None,
            apns_error_reason: None,
            delivered_at: None,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        };

        assert!(Delivery::try_from(model).is_err());
    }
}
