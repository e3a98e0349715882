//! [`WatchdogSupervisor`] – per-task liveness tracking.
//!
//! Every registered task must check in at least once per its own deadline.
//! Once per cycle the supervisor scans the whole registry; the first task
//! found past its deadline takes the fatal path and the scan stops there.
//!
//! Per-task states:
//!
//! ```text
//!               register                   scan: elapsed > deadline
//! Unregistered ──────────▶ Live ──────────────────────────────────▶ TimedOut (terminal)
//!      ▲                    │ ▲
//!      └────────────────────┘ └── checkin
//!            unregister
//! ```
//!
//! Registering twice, unregistering twice and checking in while
//! unregistered are all fatal.  The one exception is a checkin still queued
//! when its task was disabled: it is dropped.
//!
//! The supervisor is also the sole owner of the hardware watchdog: it feeds
//! it once per healthy cycle, which makes the hardware timer the last line of
//! defence should this loop itself stall.

use std::sync::Arc;
use std::time::Duration;

use orbos_hal::clock::{Clock, elapsed_ms};
use orbos_hal::{HardwareWatchdog, WatchdogConfig};
use orbos_types::{CommandEnvelope, FatalCause, OrbError, Operation, Payload, TaskId};
use tracing::{debug, info, warn};

use crate::dispatcher::DispatcherHandle;
use crate::queue::CommandInbox;
use crate::registry::{NOT_RUNNING, RegistryGuard, TaskRegistry};

pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_millis(1000);

/// Liveness of one task as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskHealth {
    Unregistered,
    Live,
    TimedOut,
}

pub struct WatchdogSupervisor {
    registry: Arc<TaskRegistry>,
    hardware: Arc<dyn HardwareWatchdog>,
    clock: Arc<dyn Clock>,
    config: WatchdogConfig,
    interval: Duration,
}

impl WatchdogSupervisor {
    pub fn new(
        registry: Arc<TaskRegistry>,
        hardware: Arc<dyn HardwareWatchdog>,
        clock: Arc<dyn Clock>,
        config: WatchdogConfig,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            hardware,
            clock,
            config,
            interval,
        }
    }

    /// Program and start the hardware watchdog.  Must run before any task
    /// is created.
    ///
    /// # Errors
    ///
    /// Returns [`OrbError::HardwareFault`] if the peripheral rejects the
    /// configuration.
    pub fn init_hardware(&self) -> Result<(), OrbError> {
        self.hardware.configure(self.config)?;
        info!(
            period_ms = self.config.period_ms,
            early_warning_ms = self.config.early_warning_ms,
            "Hardware watchdog initialized"
        );
        Ok(())
    }

    /// Start monitoring `id`.  Its deadline is measured from now.
    ///
    /// # Errors
    ///
    /// Fatal if `id` is already registered or unknown.
    pub fn register(&self, guard: &mut RegistryGuard<'_>, id: TaskId) -> Result<(), OrbError> {
        let now = self.clock.now_ms();
        let name = self.registry.name(id).to_string();
        let Some(slot) = guard.slot_mut(id) else {
            return Err(self.registry.raise(FatalCause::UnknownTask {
                caller: self.registry.name(TaskId::WATCHDOG).to_string(),
                task_id: id,
            }));
        };
        if slot.registered {
            return Err(self.registry.raise(FatalCause::AlreadyRegistered { task: name }));
        }
        slot.registered = true;
        slot.last_checkin = now;
        debug!(task = %name, "registered with watchdog");
        Ok(())
    }

    /// Stop monitoring `id`.
    ///
    /// # Errors
    ///
    /// Fatal if `id` is not currently registered.
    pub fn unregister(&self, guard: &mut RegistryGuard<'_>, id: TaskId) -> Result<(), OrbError> {
        let name = self.registry.name(id).to_string();
        match guard.slot_mut(id) {
            Some(slot) if slot.registered => {
                slot.registered = false;
                slot.last_checkin = NOT_RUNNING;
                debug!(task = %name, "unregistered from watchdog");
                Ok(())
            }
            _ => Err(self.registry.raise(FatalCause::NotRegistered { task: name })),
        }
    }

    /// Record that `id` is still running its loop.
    ///
    /// # Errors
    ///
    /// Fatal if `id` is not registered, or if the lock cannot be taken.  A
    /// checkin sent before the task was disabled is stale and dropped.
    pub async fn checkin(&self, id: TaskId) -> Result<(), OrbError> {
        let mut guard = self.registry.lock(TaskId::WATCHDOG).await?;
        let now = self.clock.now_ms();
        let stale = guard.is_disabled(id);
        match guard.slot_mut(id) {
            Some(slot) if slot.registered => slot.last_checkin = now,
            Some(_) if stale => {
                drop(guard);
                debug!(task = %self.registry.name(id), "dropped checkin of disabled task");
                return Ok(());
            }
            _ => {
                return Err(self.registry.raise(FatalCause::CheckinWithoutRegistration {
                    task: self.registry.name(id).to_string(),
                }));
            }
        }
        drop(guard);
        debug!(task = %self.registry.name(id), "checked in");
        Ok(())
    }

    pub fn health(&self, guard: &RegistryGuard<'_>, id: TaskId, now: u32) -> TaskHealth {
        let Some(slot) = guard.slot(id) else {
            return TaskHealth::Unregistered;
        };
        if !slot.registered {
            return TaskHealth::Unregistered;
        }
        let deadline = self.deadline_ms(id);
        if elapsed_ms(now, slot.last_checkin) > deadline {
            TaskHealth::TimedOut
        } else {
            TaskHealth::Live
        }
    }

    /// Compare every registered task against its deadline at `now`.
    ///
    /// # Errors
    ///
    /// Takes the fatal path for the first overrun task in registry order;
    /// later tasks are not examined.
    pub fn scan(&self, guard: &RegistryGuard<'_>, now: u32) -> Result<(), OrbError> {
        for id in self.registry.ids() {
            if self.health(guard, id, now) != TaskHealth::TimedOut {
                continue;
            }
            let elapsed = guard
                .slot(id)
                .map_or(0, |slot| elapsed_ms(now, slot.last_checkin));
            return Err(self.registry.raise(FatalCause::DeadlineOverrun {
                task: self.registry.name(id).to_string(),
                elapsed_ms: elapsed,
                deadline_ms: self.deadline_ms(id),
            }));
        }
        Ok(())
    }

    /// Execute a command delivered to the watchdog's queue.  Only
    /// [`Operation::Checkin`] carrying a task is accepted.
    ///
    /// # Errors
    ///
    /// Fatal for a misrouted command, any other operation, a malformed
    /// payload, or a checkin from an unregistered task.
    pub async fn exec_command(&self, envelope: &CommandEnvelope) -> Result<(), OrbError> {
        let task = self.registry.name(TaskId::WATCHDOG).to_string();
        if envelope.target != Some(TaskId::WATCHDOG) {
            return Err(self.registry.raise(FatalCause::Misrouted {
                task,
                target: format!("{:?}", envelope.target),
            }));
        }
        match (envelope.operation, envelope.payload) {
            (Operation::Checkin, Payload::Task(id)) => self.checkin(id).await,
            (Operation::Checkin, _) => Err(self.registry.raise(FatalCause::BadPayload {
                task,
                operation: Operation::Checkin,
            })),
            (operation, _) => Err(self
                .registry
                .raise(FatalCause::UnsupportedOperation { task, operation })),
        }
    }

    /// The hardware is about to reset the processor.
    pub fn early_warning(&self) {
        warn!("Early warning callback executed: hardware watchdog is about to expire");
    }

    /// One supervisor cycle: scan, drain the inbound queue, feed the
    /// hardware, check in.
    ///
    /// # Errors
    ///
    /// Any fatal condition found along the way.
    pub async fn run_once(
        &self,
        inbox: &mut CommandInbox,
        dispatcher: &DispatcherHandle,
    ) -> Result<(), OrbError> {
        let now = self.clock.now_ms();
        {
            let guard = self.registry.lock(TaskId::WATCHDOG).await?;
            self.scan(&guard, now)?;
        }
        while let Some(envelope) = inbox.try_next() {
            self.exec_command(&envelope).await?;
        }
        self.hardware.feed();
        dispatcher.enqueue(CommandEnvelope::checkin(TaskId::WATCHDOG))
    }

    /// Main loop.  Between cycles it blocks on its queue for at most the
    /// polling interval.  Only returns once the fatal path has been taken.
    pub async fn run(&self, mut inbox: CommandInbox, dispatcher: DispatcherHandle) -> OrbError {
        info!("watchdog started");
        loop {
            if let Err(e) = self.run_once(&mut inbox, &dispatcher).await {
                return e;
            }
            if let Some(envelope) = inbox.next_within(self.interval).await {
                if let Err(e) = self.exec_command(&envelope).await {
                    return e;
                }
            }
        }
    }

    fn deadline_ms(&self, id: TaskId) -> u32 {
        self.registry
            .descriptor(id)
            .map_or(u32::MAX, |d| d.watchdog_timeout_ms)
    }
}
