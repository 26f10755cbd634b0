//! Device entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A registered device owned by an account.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning account
    #[sea_orm(indexed)]
    pub user_id: Uuid,

    pub device_name: String,

    /// Client-chosen identifier, unique per account
    pub device_identifier: String,

    /// Targeting tags (JSON array of strings)
    #[sea_orm(column_type = "JsonBinary")]
    pub tags: Json,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub last_seen_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::device_token::Entity")]
    DeviceToken,
}

impl Related<super::device_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeviceToken.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
