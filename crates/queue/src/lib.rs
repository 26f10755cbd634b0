//! Work queue for pushlab.
//!
//! This crate moves notification jobs from submitters to workers:
//!
//! - **Queue**: [`MessageQueue`] with Redis and in-memory backends
//! - **Connection**: Supervised broker connection with unbounded reconnects
//! - **Dispatcher**: Prefetch-bounded consumption feeding the processor
//! - **Redelivery**: Requeue with a retry counter, then dead-letter

use std::time::Duration;

use async_trait::async_trait;

pub mod connection;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod message;
pub mod publisher;
pub mod redis;
pub mod retry;

pub use connection::{ConnectionManager, Connector};
pub use dispatcher::{DispatchStats, Dispatcher, DispatcherSettings, JobHandler};
pub use error::QueueError;
pub use memory::MemoryQueue;
pub use message::{DeadLetterReason, Disposition, Envelope, QueueMessage};
pub use publisher::QueuePublisher;
pub use redis::{QueueNames, QueueStats, RedisQueue};
pub use retry::RedeliveryPolicy;

/// A durable work queue with explicit settlement.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Append a message.
    async fn publish(&self, envelope: &Envelope) -> Result<(), QueueError>;

    /// Take the next message, waiting up to `wait`.
    ///
    /// The message stays in flight until settled.
    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError>;

    /// Settle a received message.
    async fn settle(&self, message: &QueueMessage, disposition: Disposition)
    -> Result<(), QueueError>;
}
