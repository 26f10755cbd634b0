//! APNs access: payload building, the client cache and the retrying sender.

mod cache;
mod client;
mod payload;
mod sender;

pub use cache::{ClientFactory, ClientFingerprint, PushClientCache};
pub use client::{ApnsClient, ApnsClientFactory, PushGateway, PushResponse};
pub use payload::{ApnsNotification, build_payload};
pub use sender::{
    SendError, SendOutcome, Sender, TERMINAL_STATUS_CODES, UNREGISTERED_STATUS, backoff_delay,
    is_terminal_status,
};

/// Errors raised while building or using a gateway client.
#[derive(Debug, thiserror::Error)]
pub enum ApnsError {
    /// Failed to read the private key file.
    #[error("failed to read APNs key at {path}: {reason}")]
    KeyRead {
        /// Key file path.
        path: String,
        /// Error description.
        reason: String,
    },
    /// The key is not a PKCS#8 EC private key.
    #[error("failed to parse APNs key: {reason}")]
    KeyParse {
        /// Error description.
        reason: String,
    },
    /// Failed to build the HTTP client.
    #[error("failed to build HTTP client: {reason}")]
    ClientBuild {
        /// Error description.
        reason: String,
    },
    /// Failed to sign the provider token.
    #[error("failed to sign provider token: {reason}")]
    JwtSign {
        /// Error description.
        reason: String,
    },
    /// The request never produced a response.
    #[error("APNs transport error: {0}")]
    Transport(String),
}
