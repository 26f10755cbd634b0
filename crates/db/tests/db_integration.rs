//! Database integration tests.
//!
//! These tests require a running `PostgreSQL` instance.
//! Run with: `cargo test --test db_integration -- --ignored`
//!
//! Environment variables:
//!   `TEST_DB_HOST` (default: localhost)
//!   `TEST_DB_PORT` (default: 5433)
//!   `TEST_DB_USER` (default: `pushlab_test`)
//!   `TEST_DB_PASSWORD` (default: `pushlab_test`)
//!   `TEST_DB_NAME` (default: `pushlab_test`)

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use chrono::Utc;
use pushlab_db::entities::{device, device_token, notification};
use pushlab_db::repositories::{DeliveryUpdate, DeviceRepository, NotificationRepository};
use pushlab_db::test_utils::{TestDatabase, TestDbConfig};
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

async fn seed(conn: &sea_orm::DatabaseConnection) -> (Uuid, Uuid) {
    let now = Utc::now();
    let user_id = Uuid::new_v4();

    let device = device::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        device_name: Set("Test iPhone".to_string()),
        device_identifier: Set(Uuid::new_v4().to_string()),
        tags: Set(serde_json::json!([])),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
        last_seen_at: Set(None),
    }
    .insert(conn)
    .await
    .unwrap();

    let token = device_token::ActiveModel {
        id: Set(Uuid::new_v4()),
        device_id: Set(device.id),
        token: Set("f".repeat(64)),
        environment: Set("sandbox".to_string()),
        bundle_id: Set("com.example.app".to_string()),
        issued_at: Set(now.into()),
        is_valid: Set(true),
        last_used_at: Set(None),
        error_count: Set(0),
        last_error: Set(None),
        updated_at: Set(now.into()),
    }
    .insert(conn)
    .await
    .unwrap();

    let notification = notification::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        title: Set(Some("Hello".to_string())),
        body: Set("World".to_string()),
        data: Set(None),
        badge: Set(Some(1)),
        sound: Set("default".to_string()),
        category: Set(None),
        priority: Set("high".to_string()),
        status: Set("queued".to_string()),
        created_at: Set(now.into()),
    }
    .insert(conn)
    .await
    .unwrap();

    (notification.id, token.id)
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_database_connection() {
    let config = TestDbConfig::default();
    let result = TestDatabase::with_config(config).await;
    assert!(result.is_ok(), "Failed to connect: {:?}", result.err());
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_delivery_lifecycle() {
    let db = TestDatabase::create_unique().await.unwrap();
    let (notification_id, token_id) = seed(db.connection()).await;
    let conn = Arc::new(db.connection().clone());

    let notifications = NotificationRepository::new(conn.clone());
    let devices = DeviceRepository::new(conn);

    let delivery = notifications
        .create_delivery(notification_id, token_id)
        .await
        .unwrap();
    assert_eq!(delivery.delivery_status, "pending");

    let again = notifications
        .create_delivery(notification_id, token_id)
        .await
        .unwrap();
    assert_eq!(again.id, delivery.id);

    notifications
        .update_delivery(
            delivery.id,
            DeliveryUpdate {
                status: "failed".to_string(),
                attempt_count: 1,
                response_code: Some(410),
                error_reason: Some("Unregistered".to_string()),
                delivered_at: None,
            },
        )
        .await
        .unwrap();
    devices
        .mark_token_invalid(token_id, "Unregistered")
        .await
        .unwrap();
    notifications
        .update_status(notification_id, "failed")
        .await
        .unwrap();

    let deliveries = notifications.find_deliveries(notification_id).await.unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].apns_response_code, Some(410));
    assert_eq!(deliveries[0].attempt_count, 1);

    let token = devices.find_token_by_id(token_id).await.unwrap().unwrap();
    assert!(!token.is_valid);
    assert_eq!(token.error_count, 1);
    assert_eq!(token.last_error.as_deref(), Some("Unregistered"));

    let stored = notifications
        .find_by_id(notification_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "failed");

    db.drop_database().await.unwrap();
}

#[test]
fn test_config_from_env() {
    let config = TestDbConfig::default();
    assert!(!config.host.is_empty());
    assert!(config.port > 0);
    assert!(!config.username.is_empty());
    assert!(!config.database.is_empty());
}

#[test]
fn test_postgres_url_format() {
    let config = TestDbConfig::default();
    let url = config.postgres_url();
    assert!(url.ends_with("/postgres"));
}
