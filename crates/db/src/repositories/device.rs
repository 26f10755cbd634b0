//! Device and device token repository.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, sea_query::Expr};
use uuid::Uuid;

use crate::entities::{Device, DeviceToken, device, device_token};
use pushlab_common::{AppError, AppResult};

/// Repository for devices and their push tokens.
#[derive(Clone)]
pub struct DeviceRepository {
    db: Arc<DatabaseConnection>,
}

impl DeviceRepository {
    /// Create a new device repository.
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a device by ID.
    pub async fn find_by_id(&self, id: Uuid) -> AppResult<Option<device::Model>> {
        Device::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a device token by ID.
    pub async fn find_token_by_id(&self, id: Uuid) -> AppResult<Option<device_token::Model>> {
        DeviceToken::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Mark a token as no longer routable.
    ///
    /// Increments the error counter and records the gateway's reason.
    pub async fn mark_token_invalid(&self, id: Uuid, reason: &str) -> AppResult<()> {
        let result = DeviceToken::update_many()
            .col_expr(device_token::Column::IsValid, Expr::value(false))
            .col_expr(
                device_token::Column::ErrorCount,
                Expr::col(device_token::Column::ErrorCount).add(1),
            )
            .col_expr(device_token::Column::LastError, Expr::value(reason))
            .col_expr(device_token::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(device_token::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("Device token {id} not found")));
        }

        Ok(())
    }

    /// Record that a push to this token succeeded just now.
    pub async fn touch_token_last_used(&self, id: Uuid) -> AppResult<()> {
        let now = Utc::now();

        DeviceToken::update_many()
            .col_expr(device_token::Column::LastUsedAt, Expr::value(now))
            .col_expr(device_token::Column::UpdatedAt, Expr::value(now))
            .filter(device_token::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}
