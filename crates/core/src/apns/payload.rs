//! Gateway payload construction.

use serde_json::{Map, Value, json};

use crate::models::{NotificationPayload, Priority};

/// One push request addressed to a single device token.
#[derive(Debug, Clone, PartialEq)]
pub struct ApnsNotification {
    /// Hex device token.
    pub device_token: String,
    /// `apns-topic`, the app bundle ID.
    pub topic: String,
    pub priority: Priority,
    /// Request body.
    pub payload: Value,
}

impl ApnsNotification {
    /// Address a notification payload to one device token.
    #[must_use]
    pub fn new(device_token: &str, topic: &str, payload: &NotificationPayload) -> Self {
        Self {
            device_token: device_token.to_string(),
            topic: topic.to_string(),
            priority: payload.priority,
            payload: build_payload(payload),
        }
    }
}

/// Build the JSON body sent to the gateway.
///
/// Custom data is merged at the root next to `aps`; a custom `aps` key is
/// ignored.
#[must_use]
pub fn build_payload(notification: &NotificationPayload) -> Value {
    let mut alert = Map::new();
    if let Some(ref title) = notification.title {
        alert.insert("title".to_string(), json!(title));
    }
    alert.insert("body".to_string(), json!(notification.body));

    let mut aps = Map::new();
    aps.insert("alert".to_string(), Value::Object(alert));
    if let Some(badge) = notification.badge {
        aps.insert("badge".to_string(), json!(badge));
    }
    if !notification.sound.is_empty() {
        aps.insert("sound".to_string(), json!(notification.sound));
    }
    if let Some(ref category) = notification.category {
        aps.insert("category".to_string(), json!(category));
    }

    let mut root = Map::new();
    for (key, value) in &notification.data {
        if key != "aps" {
            root.insert(key.clone(), value.clone());
        }
    }
    root.insert("aps".to_string(), Value::Object(aps));

    Value::Object(root)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn payload() -> NotificationPayload {
        NotificationPayload {
            title: Some("Order shipped".to_string()),
            body: "Your order is on its way".to_string(),
            badge: Some(2),
            sound: "default".to_string(),
            category: Some("ORDER".to_string()),
            priority: Priority::High,
            data: Map::new(),
        }
    }

    #[test]
    fn test_full_payload() {
        let body = build_payload(&payload());

        assert_eq!(body["aps"]["alert"]["title"], "Order shipped");
        assert_eq!(body["aps"]["alert"]["body"], "Your order is on its way");
        assert_eq!(body["aps"]["badge"], 2);
        assert_eq!(body["aps"]["sound"], "default");
        assert_eq!(body["aps"]["category"], "ORDER");
    }

    #[test]
    fn test_minimal_payload_omits_optional_fields() {
        let minimal = NotificationPayload {
            title: None,
            body: "Ping".to_string(),
            badge: None,
            sound: String::new(),
            category: None,
            priority: Priority::Normal,
            data: Map::new(),
        };

        let body = build_payload(&minimal);
        let aps = body["aps"].as_object().unwrap();

        assert_eq!(aps.len(), 1);
        assert!(body["aps"]["alert"].get("title").is_none());
        assert_eq!(body["aps"]["alert"]["body"], "Ping");
    }

    #[test]
    fn test_custom_data_at_root() {
        let mut with_data = payload();
        with_data.data.insert("order_id".to_string(), json!(42));
        with_data.data.insert("aps".to_string(), json!("overwritten"));

        let body = build_payload(&with_data);

        assert_eq!(body["order_id"], 42);
        assert_eq!(body["aps"]["badge"], 2);
    }

    #[test]
    fn test_notification_carries_topic_and_priority() {
        let notification = ApnsNotification::new("deadbeef", "com.example.app", &payload());

        assert_eq!(notification.topic, "com.example.app");
        assert_eq!(notification.priority.header_value(), "10");
        assert_eq!(notification.payload["aps"]["alert"]["body"], "Your order is on its way");
    }
}
