//! Database entities.

pub mod apns_credential;
pub mod device;
pub mod device_token;
pub mod notification;
pub mod notification_delivery;

pub use apns_credential::Entity as ApnsCredential;
pub use device::Entity as Device;
pub use device_token::Entity as DeviceToken;
pub use notification::Entity as Notification;
pub use notification_delivery::Entity as NotificationDelivery;
