//! [`TaskContext`] – what a leaf task sees of the kernel.
//!
//! Every method that can block is also a suspension point: it first waits
//! for the task's run gate to open, so a disabled task parks there until the
//! task manager resumes it.

use std::sync::Arc;
use std::time::Duration;

use orbos_kernel::{CommandInbox, DispatcherHandle, TaskRegistry};
use orbos_types::{CommandEnvelope, FatalCause, OrbError, TaskId};
use tokio::sync::watch;

pub struct TaskContext {
    id: TaskId,
    name: String,
    deadline: Duration,
    inbox: CommandInbox,
    gate: watch::Receiver<bool>,
    registry: Arc<TaskRegistry>,
    dispatcher: DispatcherHandle,
}

impl TaskContext {
    pub(crate) fn new(
        id: TaskId,
        inbox: CommandInbox,
        gate: watch::Receiver<bool>,
        registry: Arc<TaskRegistry>,
        dispatcher: DispatcherHandle,
    ) -> Self {
        let (name, deadline_ms) = registry
            .descriptor(id)
            .map_or((String::new(), 0), |d| (d.name.clone(), d.watchdog_timeout_ms));
        Self {
            id,
            name,
            deadline: Duration::from_millis(u64::from(deadline_ms)),
            inbox,
            gate,
            registry,
            dispatcher,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the task registered under `name`.
    pub fn lookup(&self, name: &str) -> Option<TaskId> {
        self.registry.id_by_name(name)
    }

    /// Half the task's watchdog deadline: the longest a task may block
    /// without risking a missed checkin.  Never shorter than 1 ms.
    pub fn block_time(&self) -> Duration {
        (self.deadline / 2).max(Duration::from_millis(1))
    }

    /// Wait up to [`TaskContext::block_time`] for the next command.
    pub async fn next_command(&mut self) -> Option<CommandEnvelope> {
        self.runnable().await;
        let envelope = self.inbox.next_within(self.block_time()).await;
        self.runnable().await;
        envelope
    }

    /// Next command if one is already queued.
    pub fn try_next_command(&mut self) -> Option<CommandEnvelope> {
        self.inbox.try_next()
    }

    /// Send a checkin through the dispatcher, but only while registered
    /// with the watchdog.
    ///
    /// # Errors
    ///
    /// Fatal if the registry lock or the dispatcher enqueue fails.
    pub async fn checkin(&mut self) -> Result<(), OrbError> {
        self.runnable().await;
        if self.registry.should_checkin(self.id).await? {
            self.dispatcher.enqueue(CommandEnvelope::checkin(self.id))?;
        }
        Ok(())
    }

    /// Hand `envelope` to the dispatcher.
    ///
    /// # Errors
    ///
    /// Fatal if the dispatcher queue is full.
    pub fn send(&self, envelope: CommandEnvelope) -> Result<(), OrbError> {
        self.dispatcher.enqueue(envelope)
    }

    pub async fn sleep(&mut self, duration: Duration) {
        self.runnable().await;
        tokio::time::sleep(duration).await;
        self.runnable().await;
    }

    /// Take the fatal path on behalf of this task.
    pub fn raise(&self, cause: FatalCause) -> OrbError {
        self.registry.raise(cause)
    }

    /// Wait until the task is allowed to run.
    pub(crate) async fn runnable(&mut self) {
        if self.gate.wait_for(|running| *running).await.is_err() {
            // The entity was torn down; park until the task is aborted.
            std::future::pending::<()>().await;
        }
    }
}
