//! Redis-backed reliable work queue.
//!
//! Messages are pushed onto the head of the main list and consumed from its
//! tail with `BLMOVE` into a per-consumer processing list, where they stay
//! until settled. Anything left in the processing list by a crashed worker is
//! moved back onto the main list at startup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fred::clients::Client;
use fred::interfaces::{ClientLike, HashesInterface, ListInterface};
use fred::types::config::Config as RedisConfig;
use fred::types::lists::LMoveDirection;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ClosedSignal, ConnectionManager, Connector};
use crate::error::QueueError;
use crate::message::{Disposition, Envelope, QueueMessage};
use crate::MessageQueue;
use pushlab_common::QueueConfig;

const QUIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Redis keys used by one queue and consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    /// Main list.
    pub main: String,
    /// Dead-letter list.
    pub dead_letter: String,
    /// In-flight list owned by this consumer.
    pub processing: String,
    /// Hash describing the declared topology.
    pub topology: String,
}

impl QueueNames {
    /// Keys for `queue_name` as seen by `consumer_name`.
    #[must_use]
    pub fn new(queue_name: &str, consumer_name: &str) -> Self {
        Self {
            main: queue_name.to_string(),
            dead_letter: format!("{queue_name}.dlq"),
            processing: format!("{queue_name}.processing.{consumer_name}"),
            topology: format!("{queue_name}.topology"),
        }
    }
}

/// Lengths of the queue lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages waiting on the main list.
    pub ready: u64,
    /// Messages this consumer holds unsettled.
    pub in_flight: u64,
    /// Messages on the dead-letter list.
    pub dead_letter: u64,
}

/// Client pair for one connection.
///
/// Blocking receives get their own client so settlements never queue behind
/// a pending `BLMOVE`.
pub struct RedisConnection {
    commands: Client,
    blocking: Client,
}

/// Opens [`RedisConnection`]s and declares the queue topology on them.
pub struct RedisConnector {
    config: RedisConfig,
    names: QueueNames,
}

impl RedisConnector {
    /// Create a connector for a Redis URL.
    pub fn new(url: &str, names: QueueNames) -> Result<Self, QueueError> {
        let config = RedisConfig::from_url(url)?;
        Ok(Self { config, names })
    }

    async fn declare_topology(&self, client: &Client) -> Result<(), QueueError> {
        let topology: HashMap<&str, String> = HashMap::from([
            ("main", self.names.main.clone()),
            ("dead_letter", self.names.dead_letter.clone()),
            ("durable", "true".to_string()),
        ]);
        client
            .hset::<(), _, _>(self.names.topology.as_str(), topology)
            .await?;

        debug!(
            queue = %self.names.main,
            dead_letter = %self.names.dead_letter,
            "Queue topology declared"
        );
        Ok(())
    }
}

#[async_trait]
impl Connector for RedisConnector {
    type Connection = RedisConnection;

    async fn connect(&self) -> Result<(Arc<RedisConnection>, ClosedSignal), QueueError> {
        let commands = Client::new(self.config.clone(), None, None, None);
        let commands_handle = commands.init().await?;

        let blocking = Client::new(self.config.clone(), None, None, None);
        let blocking_handle = match blocking.init().await {
            Ok(handle) => handle,
            Err(e) => {
                let _ = commands.quit().await;
                return Err(e.into());
            }
        };

        let connection = RedisConnection { commands, blocking };
        if let Err(e) = self.declare_topology(&connection.commands).await {
            self.disconnect(&connection).await;
            return Err(e);
        }

        // Either client ending means the connection is gone
        let (closed_tx, closed_rx) = oneshot::channel();
        tokio::spawn(async move {
            let ended = tokio::select! {
                ended = commands_handle => ended,
                ended = blocking_handle => ended,
            };
            let reason = match ended {
                Ok(Ok(())) => "connection closed".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            let _ = closed_tx.send(reason);
        });

        Ok((Arc::new(connection), closed_rx))
    }

    async fn disconnect(&self, connection: &RedisConnection) {
        let _ = tokio::time::timeout(QUIT_TIMEOUT, connection.blocking.quit()).await;
        let _ = tokio::time::timeout(QUIT_TIMEOUT, connection.commands.quit()).await;
    }
}

/// Durable work queue with a dead-letter list.
pub struct RedisQueue {
    manager: ConnectionManager<RedisConnector>,
    names: QueueNames,
}

impl RedisQueue {
    /// Connect, declare the topology and recover messages left in flight.
    ///
    /// Fails if the broker is unreachable; later connection losses are
    /// retried every `reconnect_delay` until `cancel` fires.
    pub async fn connect(
        config: &QueueConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, QueueError> {
        let names = QueueNames::new(&config.queue_name, &config.consumer_name);
        let connector = RedisConnector::new(&config.url, names.clone())?;
        let manager =
            ConnectionManager::connect(connector, config.reconnect_delay(), cancel).await?;

        let queue = Self { manager, names };
        let recovered = queue.recover_in_flight().await?;
        if recovered > 0 {
            warn!(recovered, queue = %queue.names.main, "Requeued unacknowledged messages");
        }

        info!(
            queue = %queue.names.main,
            dead_letter = %queue.names.dead_letter,
            "Connected to work queue"
        );
        Ok(queue)
    }

    /// Keys in use.
    #[must_use]
    pub const fn names(&self) -> &QueueNames {
        &self.names
    }

    /// Move this consumer's in-flight messages back onto the main list.
    ///
    /// Oldest messages end up nearest the consuming end.
    pub async fn recover_in_flight(&self) -> Result<usize, QueueError> {
        let connection = self.manager.current().await?;
        let mut recovered = 0;

        loop {
            let moved: Option<String> = connection
                .commands
                .lmove(
                    self.names.processing.as_str(),
                    self.names.main.as_str(),
                    LMoveDirection::Left,
                    LMoveDirection::Right,
                )
                .await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        Ok(recovered)
    }

    /// Current list lengths.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let connection = self.manager.current().await?;
        let commands = &connection.commands;

        Ok(QueueStats {
            ready: commands.llen(self.names.main.as_str()).await?,
            in_flight: commands.llen(self.names.processing.as_str()).await?,
            dead_letter: commands.llen(self.names.dead_letter.as_str()).await?,
        })
    }

    /// Stop reconnecting and close the connection.
    pub async fn close(&self) {
        self.manager.close().await;
    }

    async fn push(&self, key: &str, envelope: &Envelope) -> Result<(), QueueError> {
        let raw = envelope.encode()?;
        let connection = self.manager.current().await?;
        connection.commands.lpush::<(), _, _>(key, raw).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for RedisQueue {
    async fn publish(&self, envelope: &Envelope) -> Result<(), QueueError> {
        self.push(&self.names.main, envelope).await
    }

    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let connection = self.manager.current().await?;
        let raw: Option<String> = connection
            .blocking
            .blmove(
                self.names.main.as_str(),
                self.names.processing.as_str(),
                LMoveDirection::Right,
                LMoveDirection::Left,
                wait.as_secs_f64(),
            )
            .await?;

        Ok(raw.map(QueueMessage::from_raw))
    }

    async fn settle(
        &self,
        message: &QueueMessage,
        disposition: Disposition,
    ) -> Result<(), QueueError> {
        // Forward before removing: a crash in between duplicates rather than
        // loses the message.
        match disposition {
            Disposition::Ack => {}
            Disposition::NackRequeue { retry_count } => {
                self.push(&self.names.main, &message.envelope.with_retry_count(retry_count))
                    .await?;
            }
            Disposition::NackDeadLetter { reason } => {
                self.push(&self.names.dead_letter, &message.envelope.dead_lettered(reason))
                    .await?;
            }
        }

        let connection = self.manager.current().await?;
        connection
            .commands
            .lrem::<(), _, _>(self.names.processing.as_str(), 1, message.raw.as_str())
            .await?;
        Ok(())
    }
}
