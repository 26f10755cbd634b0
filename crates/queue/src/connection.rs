//! Broker connection supervision.
//!
//! A [`ConnectionManager`] owns one live connection and replaces it when it
//! drops. Reconnection retries at a fixed delay with no attempt limit until
//! cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::QueueError;

/// Resolves with a description once the connection is lost.
pub type ClosedSignal = oneshot::Receiver<String>;

/// Opens broker connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Live connection type.
    type Connection: Send + Sync + 'static;

    /// Open a connection and declare the queue topology on it.
    async fn connect(&self) -> Result<(Arc<Self::Connection>, ClosedSignal), QueueError>;

    /// Close a connection. Errors are not reported.
    async fn disconnect(&self, connection: &Self::Connection);
}

type Slot<C> = Arc<RwLock<Option<Arc<C>>>>;

/// Keeps a connection open, reconnecting after failures.
pub struct ConnectionManager<K: Connector> {
    connector: Arc<K>,
    current: Slot<K::Connection>,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl<K: Connector> ConnectionManager<K> {
    /// Open the initial connection and start supervising it.
    ///
    /// The first connection attempt is not retried.
    pub async fn connect(
        connector: K,
        reconnect_delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self, QueueError> {
        let connector = Arc::new(connector);
        let (connection, closed) = connector.connect().await?;
        let current: Slot<K::Connection> = Arc::new(RwLock::new(Some(connection)));
        let cancel = cancel.child_token();

        let supervisor = tokio::spawn(supervise(
            connector.clone(),
            current.clone(),
            closed,
            reconnect_delay,
            cancel.clone(),
        ));

        Ok(Self {
            connector,
            current,
            cancel,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    /// The live connection.
    ///
    /// Fails with [`QueueError::Disconnected`] while a reconnect is pending.
    pub async fn current(&self) -> Result<Arc<K::Connection>, QueueError> {
        self.current
            .read()
            .await
            .clone()
            .ok_or(QueueError::Disconnected)
    }

    /// Whether a connection is currently available.
    pub async fn is_connected(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Stop reconnecting and close the live connection.
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.supervisor.lock().await.take() {
            let _ = handle.await;
        }

        let connection = self.current.write().await.take();
        if let Some(connection) = connection {
            self.connector.disconnect(&connection).await;
            info!("Queue connection closed");
        }
    }
}

async fn supervise<K: Connector>(
    connector: Arc<K>,
    current: Slot<K::Connection>,
    mut closed: ClosedSignal,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        let reason = tokio::select! {
            () = cancel.cancelled() => return,
            reason = &mut closed => reason.unwrap_or_else(|_| "connection dropped".to_string()),
        };

        warn!(reason = %reason, "Queue connection lost, reconnecting");
        let lost = current.write().await.take();
        if let Some(lost) = lost {
            connector.disconnect(&lost).await;
        }

        let mut attempt: u64 = 0;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(reconnect_delay) => {}
            }

            attempt += 1;
            match connector.connect().await {
                Ok((connection, signal)) => {
                    *current.write().await = Some(connection);
                    closed = signal;
                    info!(attempt, "Queue connection re-established");
                    break;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Queue reconnect failed");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeConnection {
        generation: usize,
    }

    #[derive(Default)]
    struct FakeConnector {
        attempts: AtomicUsize,
        failing: AtomicUsize,
        disconnects: AtomicUsize,
        killers: StdMutex<Vec<oneshot::Sender<String>>>,
    }

    impl FakeConnector {
        fn drop_connection(&self) {
            if let Some(killer) = self.killers.lock().unwrap().pop() {
                killer.send("broker restarted".to_string()).unwrap();
            }
        }
    }

    #[async_trait]
    impl Connector for Arc<FakeConnector> {
        type Connection = FakeConnection;

        async fn connect(&self) -> Result<(Arc<FakeConnection>, ClosedSignal), QueueError> {
            let generation = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) > 0 {
                self.failing.fetch_sub(1, Ordering::SeqCst);
                return Err(QueueError::Redis("connection refused".to_string()));
            }
            let (tx, rx) = oneshot::channel();
            self.killers.lock().unwrap().push(tx);
            Ok((Arc::new(FakeConnection { generation }), rx))
        }

        async fn disconnect(&self, _connection: &FakeConnection) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    const DELAY: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn test_initial_failure_is_returned() {
        let connector = Arc::new(FakeConnector::default());
        connector.failing.store(1, Ordering::SeqCst);

        let result =
            ConnectionManager::connect(connector.clone(), DELAY, &CancellationToken::new()).await;

        assert!(matches!(result, Err(QueueError::Redis(_))));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_loss() {
        let connector = Arc::new(FakeConnector::default());
        let manager = ConnectionManager::connect(connector.clone(), DELAY, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(manager.current().await.unwrap().generation, 0);

        // Two failed attempts before the broker comes back
        connector.failing.store(2, Ordering::SeqCst);
        connector.drop_connection();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(matches!(
            manager.current().await,
            Err(QueueError::Disconnected)
        ));

        tokio::time::sleep(DELAY * 3).await;
        let connection = manager.current().await.unwrap();
        assert_eq!(connection.generation, 3);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(connector.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_waits_for_delay() {
        let connector = Arc::new(FakeConnector::default());
        let manager = ConnectionManager::connect(connector.clone(), DELAY, &CancellationToken::new())
            .await
            .unwrap();

        connector.drop_connection();
        tokio::time::sleep(DELAY - Duration::from_secs(1)).await;
        assert!(!manager.is_connected().await);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(manager.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_reconnecting() {
        let connector = Arc::new(FakeConnector::default());
        let cancel = CancellationToken::new();
        let manager = ConnectionManager::connect(connector.clone(), DELAY, &cancel)
            .await
            .unwrap();

        connector.failing.store(usize::MAX, Ordering::SeqCst);
        connector.drop_connection();
        tokio::time::sleep(DELAY * 2 + Duration::from_secs(1)).await;
        let attempts = connector.attempts.load(Ordering::SeqCst);
        assert_eq!(attempts, 3);

        cancel.cancel();
        tokio::time::sleep(DELAY * 10).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), attempts);

        manager.close().await;
        assert!(!manager.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_disconnects() {
        let connector = Arc::new(FakeConnector::default());
        let manager = ConnectionManager::connect(connector.clone(), DELAY, &CancellationToken::new())
            .await
            .unwrap();

        manager.close().await;

        assert_eq!(connector.disconnects.load(Ordering::SeqCst), 1);
        assert!(matches!(
            manager.current().await,
            Err(QueueError::Disconnected)
        ));
    }
}
