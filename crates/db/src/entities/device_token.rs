//! Device token entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Push routing token issued to a device by the gateway.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device_token")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(indexed)]
    pub device_id: Uuid,

    /// Opaque hex token
    #[sea_orm(column_type = "Text")]
    pub token: String,

    /// `sandbox` or `production`
    pub environment: String,

    pub bundle_id: String,

    pub issued_at: DateTimeWithTimeZone,

    /// Cleared when the gateway reports the token as unregistered
    #[sea_orm(default_value = true)]
    pub is_valid: bool,

    #[sea_orm(nullable)]
    pub last_used_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(default_value = 0)]
    pub error_count: i32,

    #[sea_orm(nullable)]
    pub last_error: Option<String>,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::device::Entity",
        from = "Column::DeviceId",
        to = "super::device::Column::Id",
        on_delete = "Cascade"
    )]
    Device,
}

impl Related<super::device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Device.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
