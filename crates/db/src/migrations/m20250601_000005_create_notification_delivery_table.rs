//! Create notification_delivery table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(NotificationDelivery::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(NotificationDelivery::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(NotificationDelivery::NotificationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationDelivery::DeviceTokenId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationDelivery::DeliveryStatus)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(NotificationDelivery::AttemptCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(NotificationDelivery::ApnsResponseCode)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NotificationDelivery::ApnsErrorReason)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NotificationDelivery::DeliveredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NotificationDelivery::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationDelivery::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_notification_delivery_notification")
                            .from(
                                NotificationDelivery::Table,
                                NotificationDelivery::NotificationId,
                            )
                            .to(Notification::Table, Notification::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_notification_delivery_device_token")
                            .from(
                                NotificationDelivery::Table,
                                NotificationDelivery::DeviceTokenId,
                            )
                            .to(DeviceToken::Table, DeviceToken::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notification_delivery_notification_token")
                    .table(NotificationDelivery::Table)
                    .col(NotificationDelivery::NotificationId)
                    .col(NotificationDelivery::DeviceTokenId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notification_delivery_device_token_id")
                    .table(NotificationDelivery::Table)
                    .col(NotificationDelivery::DeviceTokenId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(NotificationDelivery::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(Iden)]
enum NotificationDelivery {
    Table,
    Id,
    NotificationId,
    DeviceTokenId,
    DeliveryStatus,
    AttemptCount,
    ApnsResponseCode,
    ApnsErrorReason,
    DeliveredAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Notification {
    Table,
    Id,
}

#[derive(Iden)]
enum DeviceToken {
    Table,
    Id,
}
