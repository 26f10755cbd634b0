//! Notification and delivery repository.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    prelude::DateTimeWithTimeZone, sea_query::Expr,
};
use uuid::Uuid;

use crate::entities::{Notification, NotificationDelivery, notification, notification_delivery};
use pushlab_common::{AppError, AppResult};

/// Terminal state written to a delivery record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryUpdate {
    /// `delivered` or `failed`.
    pub status: String,
    /// Number of gateway requests actually made.
    pub attempt_count: i32,
    /// Last gateway status code, if a request completed.
    pub response_code: Option<i32>,
    /// Last gateway or resolution error.
    pub error_reason: Option<String>,
    /// Set when the push was accepted.
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Repository for notifications and their per-token deliveries.
#[derive(Clone)]
pub struct NotificationRepository {
    db: Arc<DatabaseConnection>,
}

impl NotificationRepository {
    /// Create a new notification repository.
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a notification by ID.
    pub async fn find_by_id(&self, id: Uuid) -> AppResult<Option<notification::Model>> {
        Notification::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Set the aggregate status of a notification.
    pub async fn update_status(&self, id: Uuid, status: &str) -> AppResult<()> {
        let result = Notification::update_many()
            .col_expr(notification::Column::Status, Expr::value(status))
            .filter(notification::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("Notification {id} not found")));
        }

        Ok(())
    }

    /// Find the delivery for a device token, or create it as pending.
    ///
    /// There is at most one delivery per notification and device token.
    pub async fn create_delivery(
        &self,
        notification_id: Uuid,
        device_token_id: Uuid,
    ) -> AppResult<notification_delivery::Model> {
        let existing = NotificationDelivery::find()
            .filter(notification_delivery::Column::NotificationId.eq(notification_id))
            .filter(notification_delivery::Column::DeviceTokenId.eq(device_token_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if let Some(delivery) = existing {
            return Ok(delivery);
        }

        let now: DateTimeWithTimeZone = Utc::now().into();

        let model = notification_delivery::ActiveModel {
            id: Set(Uuid::now_v7()),
            notification_id: Set(notification_id),
            device_token_id: Set(device_token_id),
            delivery_status: Set("pending".to_string()),
            attempt_count: Set(0),
            apns_response_code: Set(None),
            apns_error_reason: Set(None),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Write the terminal state of a delivery.
    pub async fn update_delivery(&self, id: Uuid, update: DeliveryUpdate) -> AppResult<()> {
        let delivered_at = update.delivered_at.map(DateTimeWithTimeZone::from);

        let result = NotificationDelivery::update_many()
            .col_expr(
                notification_delivery::Column::DeliveryStatus,
                Expr::value(update.status),
            )
            .col_expr(
                notification_delivery::Column::AttemptCount,
                Expr::value(update.attempt_count),
            )
            .col_expr(
                notification_delivery::Column::ApnsResponseCode,
                Expr::value(update.response_code),
            )
            .col_expr(
                notification_delivery::Column::ApnsErrorReason,
                Expr::value(update.error_reason),
            )
            .col_expr(
                notification_delivery::Column::DeliveredAt,
                Expr::value(delivered_at),
            )
            .col_expr(
                notification_delivery::Column::UpdatedAt,
                Expr::value(Utc::now()),
            )
            .filter(notification_delivery::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("Delivery {id} not found")));
        }

        Ok(())
    }

    /// List the deliveries of a notification in creation order.
    pub async fn find_deliveries(
        &self,
        notification_id: Uuid,
    ) -> AppResult<Vec<notification_delivery::Model>> {
        NotificationDelivery::find()
            .filter(notification_delivery::Column::NotificationId.eq(notification_id))
            .order_by_asc(notification_delivery::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
