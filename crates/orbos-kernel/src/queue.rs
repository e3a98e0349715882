//! Bounded per-task command queues.
//!
//! Each task owns exactly one [`CommandInbox`]; any number of
//! [`QueueHandle`]s may point at it.  Sending never blocks: a full queue is
//! reported immediately so the caller can take the fatal path instead of
//! waiting forever.  Envelopes are delivered in submission order.

use std::time::Duration;

use orbos_types::{CommandEnvelope, TaskId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Why an envelope could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue already holds `capacity` envelopes.
    Full,
    /// The owning task's inbox no longer exists.
    Closed,
}

/// Cloneable sending side of a task's queue.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    owner: TaskId,
    tx: mpsc::Sender<CommandEnvelope>,
}

impl QueueHandle {
    pub fn owner(&self) -> TaskId {
        self.owner
    }

    /// Append `envelope` at the tail without waiting.
    ///
    /// # Errors
    ///
    /// [`QueueError::Full`] when the queue is at capacity,
    /// [`QueueError::Closed`] when its owner is gone.
    pub fn try_send(&self, envelope: CommandEnvelope) -> Result<(), QueueError> {
        self.tx.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Envelopes currently waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receiving side of a task's queue, owned by that task.
#[derive(Debug)]
pub struct CommandInbox {
    owner: TaskId,
    rx: mpsc::Receiver<CommandEnvelope>,
}

impl CommandInbox {
    pub fn owner(&self) -> TaskId {
        self.owner
    }

    /// Next envelope if one is already queued.
    pub fn try_next(&mut self) -> Option<CommandEnvelope> {
        match self.rx.try_recv() {
            Ok(envelope) => Some(envelope),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `wait` for the next envelope.
    pub async fn next_within(&mut self, wait: Duration) -> Option<CommandEnvelope> {
        tokio::time::timeout(wait, self.rx.recv()).await.ok().flatten()
    }

    /// Take everything currently queued, oldest first.
    pub fn drain(&mut self) -> Vec<CommandEnvelope> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}

/// Create the queue owned by `owner`.  A zero capacity is raised to one.
pub fn command_queue(owner: TaskId, capacity: usize) -> (QueueHandle, CommandInbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueHandle { owner, tx }, CommandInbox { owner, rx })
}
