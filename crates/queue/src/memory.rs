//! In-process queue with the same settlement semantics as the Redis queue.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::MessageQueue;
use crate::error::QueueError;
use crate::message::{Disposition, Envelope, QueueMessage};

#[derive(Default)]
struct MemoryState {
    ready: VecDeque<String>,
    in_flight: Vec<String>,
    dead_letter: Vec<Envelope>,
    closed: bool,
}

/// Work queue held in memory.
///
/// Receives block until a message arrives, the wait elapses or the queue is
/// closed. Once closed and drained, receives fail with
/// [`QueueError::Closed`].
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    notify: Notify,
}

impl MemoryQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an already-encoded message.
    pub fn push_raw(&self, raw: impl Into<String>) {
        self.state().ready.push_back(raw.into());
        self.notify.notify_waiters();
    }

    /// Stop delivering once the ready messages are drained.
    pub fn close(&self) {
        self.state().closed = true;
        self.notify.notify_waiters();
    }

    /// Messages waiting to be received.
    #[must_use]
    pub fn ready(&self) -> Vec<Envelope> {
        self.state().ready.iter().map(|raw| Envelope::decode(raw)).collect()
    }

    /// Messages received and not yet settled.
    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.state().in_flight.len()
    }

    /// Dead-lettered messages, oldest first.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<Envelope> {
        self.state().dead_letter.clone()
    }

    fn try_take(&self) -> Result<Option<QueueMessage>, QueueError> {
        let mut state = self.state();
        if let Some(raw) = state.ready.pop_front() {
            state.in_flight.push(raw.clone());
            return Ok(Some(QueueMessage::from_raw(raw)));
        }
        if state.closed {
            return Err(QueueError::Closed);
        }
        Ok(None)
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn publish(&self, envelope: &Envelope) -> Result<(), QueueError> {
        let raw = envelope.encode()?;
        {
            let state = self.state();
            if state.closed {
                return Err(QueueError::Closed);
            }
        }
        self.push_raw(raw);
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_take()? {
                return Ok(Some(message));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn settle(
        &self,
        message: &QueueMessage,
        disposition: Disposition,
    ) -> Result<(), QueueError> {
        let mut state = self.state();
        let Some(position) = state.in_flight.iter().position(|raw| *raw == message.raw) else {
            return Ok(());
        };
        state.in_flight.remove(position);

        match disposition {
            Disposition::Ack => {}
            Disposition::NackRequeue { retry_count } => {
                let raw = message.envelope.with_retry_count(retry_count).encode()?;
                state.ready.push_back(raw);
                drop(state);
                self.notify.notify_waiters();
            }
            Disposition::NackDeadLetter { reason } => {
                state.dead_letter.push(message.envelope.dead_lettered(reason));
            }
        }
        Ok(())
    }
}
