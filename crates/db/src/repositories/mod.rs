//! Repositories over the push tables.

mod apns_credential;
mod device;
mod notification;

pub use apns_credential::ApnsCredentialRepository;
pub use device::DeviceRepository;
pub use notification::{DeliveryUpdate, NotificationRepository};
