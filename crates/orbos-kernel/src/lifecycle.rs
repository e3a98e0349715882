//! [`TaskManager`] – creates tasks from the registry and enables/disables
//! them.
//!
//! Boot happens in two steps.  [`TaskManager::init_supervisors`] creates the
//! watchdog, the dispatcher and the task manager itself (slots 0, 1, 2, in
//! that order) and registers each with the watchdog.  The task manager's own
//! loop then asks, through the dispatcher, for [`TaskManager::init_subtasks`],
//! which creates every remaining task exactly once: tasks enabled at boot are
//! scheduled and registered, the others stay suspended and unregistered.
//!
//! [`TaskManager::enable`] and [`TaskManager::disable`] change scheduling
//! and watchdog registration under one lock acquisition, so a task is never
//! runnable while unregistered nor registered while suspended.  The
//! supervisory triad can be neither enabled nor disabled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use orbos_types::{
    CommandEnvelope, FatalCause, LogLevel, OrbError, Operation, Payload, Status, TaskId,
};
use tracing::{debug, info, warn};

use crate::dispatcher::DispatcherHandle;
use crate::queue::{CommandInbox, command_queue};
use crate::registry::{RegistryGuard, TaskRegistry};
use crate::scheduler::{SchedHandle, Scheduler};
use crate::watchdog::WatchdogSupervisor;

/// Receiver of [`Operation::SetLogLevel`] commands.
pub trait LogLevelSink: Send + Sync {
    /// # Errors
    ///
    /// Returns [`OrbError::Config`] if the level cannot be applied.
    fn set_level(&self, level: LogLevel) -> Result<(), OrbError>;
}

pub struct TaskManager {
    registry: Arc<TaskRegistry>,
    watchdog: Arc<WatchdogSupervisor>,
    scheduler: Arc<dyn Scheduler>,
    queue_capacity: usize,
    log_sink: Option<Arc<dyn LogLevelSink>>,
    subtasks_initialized: AtomicBool,
}

impl TaskManager {
    pub fn new(
        registry: Arc<TaskRegistry>,
        watchdog: Arc<WatchdogSupervisor>,
        scheduler: Arc<dyn Scheduler>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            registry,
            watchdog,
            scheduler,
            queue_capacity,
            log_sink: None,
            subtasks_initialized: AtomicBool::new(false),
        }
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogLevelSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Create slots 0, 1 and 2 in order and register each with the
    /// watchdog.
    ///
    /// # Errors
    ///
    /// Fatal if a supervisor cannot be created or was created before.
    pub async fn init_supervisors(&self) -> Result<(), OrbError> {
        for id in [TaskId::WATCHDOG, TaskId::DISPATCHER, TaskId::TASK_MANAGER] {
            let mut guard = self.registry.lock(TaskId::TASK_MANAGER).await?;
            self.create(&mut guard, id, false)?;
            self.watchdog.register(&mut guard, id)?;
            info!(task = %self.registry.name(id), "task created");
        }
        Ok(())
    }

    /// Create every task past the supervisory slots.
    ///
    /// # Errors
    ///
    /// Fatal if called twice or if any task cannot be created.
    pub async fn init_subtasks(&self) -> Result<(), OrbError> {
        let mut guard = self.registry.lock(TaskId::TASK_MANAGER).await?;
        if self.subtasks_initialized.swap(true, Ordering::SeqCst) {
            return Err(self.registry.raise(FatalCause::InvalidTransition {
                task: self.registry.name(TaskId::TASK_MANAGER).to_string(),
                reason: "subtasks already initialized".to_string(),
            }));
        }

        let subtasks: Vec<TaskId> = self.registry.ids().skip(TaskId::RESERVED).collect();
        for id in subtasks {
            let enabled = self
                .registry
                .descriptor(id)
                .is_some_and(|d| d.enabled_at_boot);
            self.create(&mut guard, id, !enabled)?;
            if enabled {
                self.watchdog.register(&mut guard, id)?;
                info!(task = %self.registry.name(id), "task created");
            } else {
                info!(task = %self.registry.name(id), "task created suspended");
            }
        }
        Ok(())
    }

    /// Resume a created, disabled task and register it with the watchdog.
    ///
    /// # Errors
    ///
    /// Fatal if `id` is supervisory, was never created, or is already
    /// enabled.  The task's state is left untouched in that case.
    pub async fn enable(&self, id: TaskId) -> Result<(), OrbError> {
        let mut guard = self.registry.lock(TaskId::TASK_MANAGER).await?;
        let handle = self.check_transition(&guard, id, false)?;
        self.watchdog.register(&mut guard, id)?;
        self.scheduler.resume(handle);
        if let Some(slot) = guard.slot_mut(id) {
            slot.enabled = true;
        }
        info!(task = %self.registry.name(id), "task enabled");
        Ok(())
    }

    /// Suspend an enabled task and unregister it from the watchdog.
    ///
    /// # Errors
    ///
    /// Fatal if `id` is supervisory, was never created, or is already
    /// disabled.
    pub async fn disable(&self, id: TaskId) -> Result<(), OrbError> {
        let mut guard = self.registry.lock(TaskId::TASK_MANAGER).await?;
        let handle = self.check_transition(&guard, id, true)?;
        self.watchdog.unregister(&mut guard, id)?;
        self.scheduler.suspend(handle);
        if let Some(slot) = guard.slot_mut(id) {
            slot.enabled = false;
        }
        info!(task = %self.registry.name(id), "task disabled");
        Ok(())
    }

    /// Execute a command delivered to the task manager's queue.
    ///
    /// # Errors
    ///
    /// Fatal for a misrouted command, an unsupported operation, a malformed
    /// payload, or a failed transition.
    pub async fn exec_command(&self, envelope: &mut CommandEnvelope) -> Result<(), OrbError> {
        let task = self.registry.name(TaskId::TASK_MANAGER).to_string();
        if envelope.target != Some(TaskId::TASK_MANAGER) {
            return Err(self.registry.raise(FatalCause::Misrouted {
                task,
                target: format!("{:?}", envelope.target),
            }));
        }
        match (envelope.operation, envelope.payload, &self.log_sink) {
            (Operation::InitSubtasks, _, _) => self.init_subtasks().await?,
            (Operation::EnableTask, Payload::Task(id), _) => self.enable(id).await?,
            (Operation::DisableTask, Payload::Task(id), _) => self.disable(id).await?,
            (Operation::SetLogLevel, Payload::LogLevel(level), Some(sink)) => {
                if let Err(e) = sink.set_level(level) {
                    warn!(error = %e, %level, "log level rejected");
                    return Err(self.registry.raise(FatalCause::BadPayload {
                        task,
                        operation: Operation::SetLogLevel,
                    }));
                }
                info!(%level, "log level changed");
            }
            (operation @ (Operation::EnableTask | Operation::DisableTask), _, _) => {
                return Err(self.registry.raise(FatalCause::BadPayload { task, operation }));
            }
            (operation, _, _) => {
                return Err(self
                    .registry
                    .raise(FatalCause::UnsupportedOperation { task, operation }));
            }
        }
        envelope.complete(Status::Success);
        Ok(())
    }

    /// Main loop.  The first act is to request subtask creation through the
    /// dispatcher; after that every cycle blocks on the queue for half the
    /// task manager's deadline, executes what arrived, and checks in.
    pub async fn run(&self, mut inbox: CommandInbox, dispatcher: DispatcherHandle) -> OrbError {
        info!("task manager started");
        let init = CommandEnvelope::new(TaskId::TASK_MANAGER, Operation::InitSubtasks, Payload::None);
        if let Err(e) = dispatcher.enqueue(init) {
            return e;
        }
        let block = self.block_time();
        loop {
            if let Some(mut envelope) = inbox.next_within(block).await {
                if let Err(e) = self.exec_command(&mut envelope).await {
                    return e;
                }
                while let Some(mut envelope) = inbox.try_next() {
                    if let Err(e) = self.exec_command(&mut envelope).await {
                        return e;
                    }
                }
            }
            if let Err(e) = dispatcher.enqueue(CommandEnvelope::checkin(TaskId::TASK_MANAGER)) {
                return e;
            }
        }
    }

    fn block_time(&self) -> Duration {
        let deadline = self
            .registry
            .descriptor(TaskId::TASK_MANAGER)
            .map_or(0, |d| d.watchdog_timeout_ms);
        Duration::from_millis(u64::from((deadline / 2).max(1)))
    }

    /// Create queue then scheduler entity for `id`.  The slot's `enabled`
    /// flag follows `suspended`.
    fn create(
        &self,
        guard: &mut RegistryGuard<'_>,
        id: TaskId,
        suspended: bool,
    ) -> Result<(), OrbError> {
        let name = self.registry.name(id).to_string();
        let descriptor = self.registry.descriptor(id).cloned().ok_or_else(|| {
            self.registry.raise(FatalCause::TaskCreation {
                task: name.clone(),
                reason: "no registry entry".to_string(),
            })
        })?;

        let (queue, inbox) = command_queue(id, self.queue_capacity);
        self.registry.install_queue(id, queue)?;
        let handle = self
            .scheduler
            .create_task(id, &descriptor, inbox, suspended)
            .map_err(|e| {
                self.registry.raise(FatalCause::TaskCreation {
                    task: name.clone(),
                    reason: e.to_string(),
                })
            })?;
        self.registry.install_handle(id, handle)?;
        if let Some(slot) = guard.slot_mut(id) {
            slot.enabled = !suspended;
        }
        debug!(task = %name, handle = handle.raw(), suspended, "scheduler entity created");
        Ok(())
    }

    /// Preconditions shared by enable and disable: a created,
    /// non-supervisory task currently in the `currently_enabled` state.
    fn check_transition(
        &self,
        guard: &RegistryGuard<'_>,
        id: TaskId,
        currently_enabled: bool,
    ) -> Result<SchedHandle, OrbError> {
        let task = self.registry.name(id).to_string();
        let reject = |reason: &str| {
            Err(self.registry.raise(FatalCause::InvalidTransition {
                task: task.clone(),
                reason: reason.to_string(),
            }))
        };

        if id.is_supervisory() {
            return reject("supervisory tasks are never suspended");
        }
        let Some(handle) = self.registry.handle(id) else {
            return reject("task was never created");
        };
        match guard.slot(id) {
            Some(slot) if slot.enabled == currently_enabled => Ok(handle),
            Some(_) if currently_enabled => reject("task is already disabled"),
            Some(_) => reject("task is already enabled"),
            None => reject("no registry entry"),
        }
    }
}
