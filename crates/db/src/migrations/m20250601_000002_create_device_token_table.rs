//! Create device_token table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DeviceToken::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeviceToken::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DeviceToken::DeviceId).uuid().not_null())
                    .col(ColumnDef::new(DeviceToken::Token).text().not_null())
                    .col(ColumnDef::new(DeviceToken::Environment).string().not_null())
                    .col(ColumnDef::new(DeviceToken::BundleId).string().not_null())
                    .col(
                        ColumnDef::new(DeviceToken::IssuedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeviceToken::IsValid)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(DeviceToken::LastUsedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DeviceToken::ErrorCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(DeviceToken::LastError).string().null())
                    .col(
                        ColumnDef::new(DeviceToken::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_device_token_device")
                            .from(DeviceToken::Table, DeviceToken::DeviceId)
                            .to(Device::Table, Device::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_device_token_device_id")
                    .table(DeviceToken::Table)
                    .col(DeviceToken::DeviceId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_device_token_is_valid")
                    .table(DeviceToken::Table)
                    .col(DeviceToken::IsValid)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DeviceToken::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(Iden)]
enum DeviceToken {
    Table,
    Id,
    DeviceId,
    Token,
    Environment,
    BundleId,
    IssuedAt,
    IsValid,
    LastUsedAt,
    ErrorCount,
    LastError,
    UpdatedAt,
}

#[derive(Iden)]
enum Device {
    Table,
    Id,
}
