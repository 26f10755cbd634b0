//! Notification entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A notification request and its aggregate delivery status.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(indexed)]
    pub user_id: Uuid,

    #[sea_orm(nullable)]
    pub title: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub body: String,

    /// Custom key/value data delivered with the alert
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub data: Option<Json>,

    #[sea_orm(nullable)]
    pub badge: Option<i32>,

    pub sound: String,

    #[sea_orm(nullable)]
    pub category: Option<String>,

    /// `normal` or `high`
    pub priority: String,

    /// `queued`, `sent`, `delivered` or `failed`
    pub status: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::notification_delivery::Entity")]
    NotificationDelivery,
}

impl Related<super::notification_delivery::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::NotificationDelivery.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
