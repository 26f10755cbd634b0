//! APNs signing credential entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Token-based APNs credential for one (account, bundle, environment).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "apns_credential")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(indexed)]
    pub user_id: Uuid,

    /// Apple developer team ID
    pub team_id: String,

    /// Signing key ID
    pub key_id: String,

    pub bundle_id: String,

    /// `sandbox` or `production`
    pub environment: String,

    /// Path to the `.p8` private key on the worker's filesystem
    #[serde(skip_serializing)]
    #[sea_orm(column_type = "Text")]
    pub private_key_path: String,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(default_value = true)]
    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
