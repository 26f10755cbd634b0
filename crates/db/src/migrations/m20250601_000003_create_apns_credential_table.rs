//! Create apns_credential table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ApnsCredential::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ApnsCredential::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ApnsCredential::UserId).uuid().not_null())
                    .col(ColumnDef::new(ApnsCredential::TeamId).string().not_null())
                    .col(ColumnDef::new(ApnsCredential::KeyId).string().not_null())
                    .col(ColumnDef::new(ApnsCredential::BundleId).string().not_null())
                    .col(
                        ColumnDef::new(ApnsCredential::Environment)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ApnsCredential::PrivateKeyPath)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ApnsCredential::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ApnsCredential::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .to_owned(),
            )
            .await?;

        // Lookup path used by the worker
        manager
            .create_index(
                Index::create()
                    .name("idx_apns_credential_lookup")
                    .table(ApnsCredential::Table)
                    .col(ApnsCredential::UserId)
                    .col(ApnsCredential::BundleId)
                    .col(ApnsCredential::Environment)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ApnsCredential::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(Iden)]
enum ApnsCredential {
    Table,
    Id,
    UserId,
    TeamId,
    KeyId,
    BundleId,
    Environment,
    PrivateKeyPath,
    CreatedAt,
    IsActive,
}
