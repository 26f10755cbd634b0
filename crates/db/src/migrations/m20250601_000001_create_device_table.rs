//! Create device table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Device::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Device::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Device::UserId).uuid().not_null())
                    .col(ColumnDef::new(Device::DeviceName).string().not_null())
                    .col(ColumnDef::new(Device::DeviceIdentifier).string().not_null())
                    .col(
                        ColumnDef::new(Device::Tags)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'[]'::jsonb")),
                    )
                    .col(
                        ColumnDef::new(Device::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Device::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Device::LastSeenAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // One identifier per account
        manager
            .create_index(
                Index::create()
                    .name("idx_device_user_identifier")
                    .table(Device::Table)
                    .col(Device::UserId)
                    .col(Device::DeviceIdentifier)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Device::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(Iden)]
enum Device {
    Table,
    Id,
    UserId,
    DeviceName,
    DeviceIdentifier,
    Tags,
    CreatedAt,
    UpdatedAt,
    LastSeenAt,
}
