//! Prefetch-bounded message stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::MessageQueue;
use crate::error::QueueError;
use crate::message::QueueMessage;

/// A received message and its prefetch slot.
///
/// The slot is released when this value is dropped, after settlement.
pub struct Received {
    pub message: QueueMessage,
    _permit: OwnedSemaphorePermit,
}

/// Pulls messages from a queue into a channel.
///
/// At most `prefetch` messages are held between receipt and settlement.
pub struct Consumer {
    queue: Arc<dyn MessageQueue>,
    prefetch: usize,
    poll_timeout: Duration,
    retry_delay: Duration,
}

impl Consumer {
    /// Create a consumer.
    #[must_use]
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        prefetch: usize,
        poll_timeout: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self {
            queue,
            prefetch: prefetch.max(1),
            poll_timeout,
            retry_delay,
        }
    }

    /// Start receiving.
    ///
    /// The channel closes when the queue closes or `cancel` fires.
    pub fn start(self, cancel: CancellationToken) -> (mpsc::Receiver<Received>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.prefetch);
        let handle = tokio::spawn(self.run(tx, cancel));
        (rx, handle)
    }

    async fn run(self, tx: mpsc::Sender<Received>, cancel: CancellationToken) {
        let slots = Arc::new(Semaphore::new(self.prefetch));

        loop {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // A message taken by a receive dropped here stays in flight and
            // is recovered on the next start.
            let received = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                received = self.queue.receive(self.poll_timeout) => received,
            };

            match received {
                Ok(Some(message)) => {
                    let received = Received {
                        message,
                        _permit: permit,
                    };
                    if tx.send(received).await.is_err() {
                        debug!("Dispatcher gone, stopping consumer");
                        break;
                    }
                }
                Ok(None) => {}
                Err(QueueError::Closed) => {
                    info!("Work queue closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to receive from work queue");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
    }
}
