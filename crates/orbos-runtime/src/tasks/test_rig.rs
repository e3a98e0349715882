//! Kernel plumbing for driving one leaf task outside a [`FlightSystem`].
//!
//! The rig boots the triad plus a single subtask in slot 3 over a scheduler
//! that spawns nothing and only hands back inboxes. Routing happens when a
//! test calls [`LeafRig::pump`].
//!
//! [`FlightSystem`]: crate::system::FlightSystem

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use orbos_hal::WatchdogConfig;
use orbos_hal::backup::RUNNING;
use orbos_hal::sim::{ManualClock, SimBackupRegister, SimWatchdog};
use orbos_kernel::{
    CommandDispatcher, CommandInbox, DispatcherHandle, FatalPath, LockBudget, SchedHandle,
    Scheduler, TaskDescriptor, TaskManager, TaskRegistry, WatchdogSupervisor,
};
use orbos_types::{FatalCause, OrbError, TaskId, TaskKind};
use tokio::sync::watch;

use crate::context::TaskContext;

pub(crate) const LEAF: TaskId = TaskId::new(3);

#[derive(Default)]
struct InboxScheduler {
    next: AtomicU64,
    inboxes: Mutex<HashMap<TaskId, CommandInbox>>,
}

impl Scheduler for InboxScheduler {
    fn create_task(
        &self,
        id: TaskId,
        _descriptor: &TaskDescriptor,
        inbox: CommandInbox,
        _suspended: bool,
    ) -> Result<SchedHandle, OrbError> {
        self.inboxes.lock().unwrap().insert(id, inbox);
        Ok(SchedHandle::new(self.next.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn suspend(&self, _handle: SchedHandle) {}

    fn resume(&self, _handle: SchedHandle) {}

    fn current_task(&self) -> Option<SchedHandle> {
        None
    }
}

pub(crate) struct LeafRig {
    pub clock: Arc<ManualClock>,
    pub registry: Arc<TaskRegistry>,
    pub handle: DispatcherHandle,
    scheduler: Arc<InboxScheduler>,
    dispatcher: CommandDispatcher,
    watchdog: Arc<WatchdogSupervisor>,
    dispatcher_inbox: CommandInbox,
    watchdog_inbox: CommandInbox,
    gate: watch::Sender<bool>,
}

impl LeafRig {
    /// Triad plus `name` of `kind` in slot 3, created and registered.
    pub(crate) async fn boot(name: &str, kind: TaskKind, timeout_ms: u32) -> Self {
        let descriptors = vec![
            TaskDescriptor::new("Watchdog", TaskKind::Watchdog).with_timeout_ms(30_000),
            TaskDescriptor::new("CommandDispatcher", TaskKind::CommandDispatcher)
                .with_timeout_ms(30_000),
            TaskDescriptor::new("TaskManager", TaskKind::TaskManager).with_timeout_ms(30_000),
            TaskDescriptor::new(name, kind).with_timeout_ms(timeout_ms),
        ];
        // Only tests move the clock, and nothing here scans.
        let clock = Arc::new(ManualClock::new(1_000));
        let wdt = Arc::new(SimWatchdog::new(clock.clone()));
        let backup = Arc::new(SimBackupRegister::new(RUNNING));
        let fatal = Arc::new(FatalPath::new(wdt.clone(), backup, Duration::ZERO));
        let registry =
            Arc::new(TaskRegistry::new(descriptors, fatal, LockBudget::default()).unwrap());

        let scheduler = Arc::new(InboxScheduler::default());
        let watchdog = Arc::new(WatchdogSupervisor::new(
            registry.clone(),
            wdt,
            clock.clone(),
            WatchdogConfig::default(),
            Duration::from_millis(10),
        ));
        let manager = TaskManager::new(registry.clone(), watchdog.clone(), scheduler.clone(), 16);
        manager.init_supervisors().await.unwrap();
        manager.init_subtasks().await.unwrap();

        let take = |id| scheduler.inboxes.lock().unwrap().remove(&id).unwrap();
        let dispatcher_inbox = take(TaskId::DISPATCHER);
        let watchdog_inbox = take(TaskId::WATCHDOG);
        Self {
            clock,
            handle: DispatcherHandle::new(registry.clone(), scheduler.clone()),
            dispatcher: CommandDispatcher::new(registry.clone(), Duration::from_millis(10)),
            registry,
            scheduler,
            watchdog,
            dispatcher_inbox,
            watchdog_inbox,
            gate: watch::channel(true).0,
        }
    }

    /// The context the scheduler would hand the slot-3 task.
    pub(crate) fn context(&self) -> TaskContext {
        let inbox = self.scheduler.inboxes.lock().unwrap().remove(&LEAF).unwrap();
        TaskContext::new(
            LEAF,
            inbox,
            self.gate.subscribe(),
            self.registry.clone(),
            self.handle.clone(),
        )
    }

    /// Route everything queued at the dispatcher, then let the watchdog
    /// consume the checkins that reached it.
    pub(crate) async fn pump(&mut self) -> Result<(), OrbError> {
        while let Some(envelope) = self.dispatcher_inbox.try_next() {
            self.dispatcher.route(envelope).await?;
        }
        while let Some(envelope) = self.watchdog_inbox.try_next() {
            self.watchdog.exec_command(&envelope).await?;
        }
        Ok(())
    }

    pub(crate) fn tripped(&self) -> Option<FatalCause> {
        self.registry.fatal().tripped()
    }

    pub(crate) async fn last_checkin(&self) -> u32 {
        self.registry.snapshot(TaskId::WATCHDOG).await.unwrap()[LEAF.index()].last_checkin
    }
}
