//! APNs credential repository.

use std::sync::Arc;

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use crate::entities::apns_credential::{Column, Entity, Model};
use pushlab_common::{AppError, AppResult};

/// Repository for APNs signing credentials.
#[derive(Clone)]
pub struct ApnsCredentialRepository {
    db: Arc<DatabaseConnection>,
}

impl ApnsCredentialRepository {
    /// Create a new credential repository.
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find the active credential for an account, bundle and environment.
    ///
    /// When several are active the most recently created one wins.
    pub async fn find_active(
        &self,
        user_id: Uuid,
        bundle_id: &str,
        environment: &str,
    ) -> AppResult<Option<Model>> {
        Entity::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::BundleId.eq(bundle_id))
            .filter(Column::Environment.eq(environment))
            .filter(Column::IsActive.eq(true))
            .order_by_desc(Column::CreatedAt)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
