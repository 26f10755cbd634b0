//! Notification delivery entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Outcome of one notification for one device token.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification_delivery")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(indexed)]
    pub notification_id: Uuid,

    #[sea_orm(indexed)]
    pub device_token_id: Uuid,

    /// `pending`, `delivered` or `failed`
    pub delivery_status: String,

    #[sea_orm(default_value = 0)]
    pub attempt_count: i32,

    #[sea_orm(nullable)]
    pub apns_response_code: Option<i32>,

    #[sea_orm(nullable)]
    pub apns_error_reason: Option<String>,

    #[sea_orm(nullable)]
    pub delivered_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::notification::Entity",
        from = "Column::NotificationId",
        to = "super::notification::Column::Id",
        on_delete = "Cascade"
    )]
    Notification,
    #[sea_orm(
        belongs_to = "super::device_token::Entity",
        from = "Column::DeviceTokenId",
        to = "super::device_token::Column::Id",
        on_delete = "Cascade"
    )]
    DeviceToken,
}

impl Related<super::notification::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Notification.def()
    }
}

impl Related<super::device_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeviceToken.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
