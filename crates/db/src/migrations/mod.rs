//! Database migrations.
//!
//! Schema migrations for the database.

#![allow(missing_docs)]

use sea_orm_migration::prelude::*;

mod m20250601_000001_create_device_table;
mod m20250601_000002_create_device_token_table;
mod m20250601_000003_create_apns_credential_table;
mod m20250601_000004_create_notification_table;
mod m20250601_000005_create_notification_delivery_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250601_000001_create_device_table::Migration),
            Box::new(m20250601_000002_create_device_token_table::Migration),
            Box::new(m20250601_000003_create_apns_credential_table::Migration),
            Box::new(m20250601_000004_create_notification_table::Migration),
            Box::new(m20250601_000005_create_notification_delivery_table::Migration),
        ]
    }
}
