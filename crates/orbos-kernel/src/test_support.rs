//! Shared fixtures for the kernel's unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use orbos_hal::WatchdogConfig;
use orbos_hal::backup::RUNNING;
use orbos_hal::sim::{ManualClock, SimBackupRegister, SimWatchdog};
use orbos_types::{OrbError, TaskId, TaskKind};

use crate::dispatcher::{CommandDispatcher, DispatcherHandle};
use crate::fatal::FatalPath;
use crate::lifecycle::{LogLevelSink, TaskManager};
use crate::lock::LockBudget;
use crate::queue::{CommandInbox, DEFAULT_QUEUE_CAPACITY};
use crate::registry::{TaskDescriptor, TaskRegistry};
use crate::scheduler::{SchedHandle, Scheduler};
use crate::watchdog::WatchdogSupervisor;

/// Scheduler double that records every call and keeps the inboxes it is
/// handed so tests can inspect queued envelopes.
#[derive(Default)]
pub(crate) struct RecordingScheduler {
    next: AtomicU64,
    created: Mutex<Vec<(TaskId, bool)>>,
    inboxes: Mutex<HashMap<TaskId, CommandInbox>>,
    suspended: Mutex<HashSet<SchedHandle>>,
    current: Mutex<Option<SchedHandle>>,
    fail_on: Mutex<Option<TaskId>>,
}

impl RecordingScheduler {
    pub(crate) fn created(&self) -> Vec<(TaskId, bool)> {
        self.created.lock().unwrap().clone()
    }

    pub(crate) fn is_suspended(&self, handle: SchedHandle) -> bool {
        self.suspended.lock().unwrap().contains(&handle)
    }

    pub(crate) fn set_current(&self, handle: Option<SchedHandle>) {
        *self.current.lock().unwrap() = handle;
    }

    pub(crate) fn fail_on(&self, id: TaskId) {
        *self.fail_on.lock().unwrap() = Some(id);
    }

    pub(crate) fn take_inbox(&self, id: TaskId) -> CommandInbox {
        self.inboxes
            .lock()
            .unwrap()
            .remove(&id)
            .expect("inbox not created or already taken")
    }
}

impl Scheduler for RecordingScheduler {
    fn create_task(
        &self,
        id: TaskId,
        _descriptor: &TaskDescriptor,
        inbox: CommandInbox,
        suspended: bool,
    ) -> Result<SchedHandle, OrbError> {
        if *self.fail_on.lock().unwrap() == Some(id) {
            return Err(OrbError::HardwareFault {
                component: "scheduler".into(),
                details: "out of task control blocks".into(),
            });
        }
        let handle = SchedHandle::new(self.next.fetch_add(1, Ordering::SeqCst) + 1);
        self.created.lock().unwrap().push((id, suspended));
        self.inboxes.lock().unwrap().insert(id, inbox);
        if suspended {
            self.suspended.lock().unwrap().insert(handle);
        }
        Ok(handle)
    }

    fn suspend(&self, handle: SchedHandle) {
        self.suspended.lock().unwrap().insert(handle);
    }

    fn resume(&self, handle: SchedHandle) {
        self.suspended.lock().unwrap().remove(&handle);
    }

    fn current_task(&self) -> Option<SchedHandle> {
        *self.current.lock().unwrap()
    }
}

/// Supervisory triad with deadlines long enough to stay out of the way of
/// the 10 s subtasks under test.
pub(crate) fn triad() -> Vec<TaskDescriptor> {
    vec![
        TaskDescriptor::new("Watchdog", TaskKind::Watchdog).with_timeout_ms(30_000),
        TaskDescriptor::new("CommandDispatcher", TaskKind::CommandDispatcher)
            .with_timeout_ms(30_000),
        TaskDescriptor::new("TaskManager", TaskKind::TaskManager).with_timeout_ms(30_000),
    ]
}

pub(crate) fn fatal_path() -> (Arc<SimWatchdog>, Arc<FatalPath>) {
    let wdt = Arc::new(SimWatchdog::new(Arc::new(ManualClock::new(0))));
    let backup = Arc::new(SimBackupRegister::new(RUNNING));
    let fatal = Arc::new(FatalPath::new(wdt.clone(), backup, Duration::ZERO));
    (wdt, fatal)
}

/// A complete kernel over simulated hardware: triad, `Pong` (slot 3,
/// enabled at boot) and `Ping` (slot 4, disabled at boot).
pub(crate) struct Fixture {
    pub clock: Arc<ManualClock>,
    pub wdt: Arc<SimWatchdog>,
    pub fatal: Arc<FatalPath>,
    pub registry: Arc<TaskRegistry>,
    pub scheduler: Arc<RecordingScheduler>,
    pub watchdog: Arc<WatchdogSupervisor>,
    pub manager: TaskManager,
}

impl Fixture {
    pub(crate) fn unbooted() -> Self {
        Self::build(None)
    }

    pub(crate) fn with_log_sink(sink: Arc<dyn LogLevelSink>) -> Self {
        Self::build(Some(sink))
    }

    /// Supervisors and subtasks created, clock at zero.
    pub(crate) async fn booted() -> Self {
        let fx = Self::unbooted();
        fx.watchdog.init_hardware().unwrap();
        fx.manager.init_supervisors().await.unwrap();
        fx.manager.init_subtasks().await.unwrap();
        fx
    }

    fn build(sink: Option<Arc<dyn LogLevelSink>>) -> Self {
        let clock = Arc::new(ManualClock::new(0));
        let wdt = Arc::new(SimWatchdog::new(clock.clone()));
        let backup = Arc::new(SimBackupRegister::new(RUNNING));
        let fatal = Arc::new(FatalPath::new(wdt.clone(), backup, Duration::ZERO));

        let mut tasks = triad();
        tasks.push(TaskDescriptor::new("Pong", TaskKind::Pong));
        tasks.push(TaskDescriptor::new("Ping", TaskKind::Ping).disabled_at_boot());
        let budget = LockBudget {
            poll_delay: Duration::from_millis(1),
            max_tries: 50,
        };
        let registry = Arc::new(TaskRegistry::new(tasks, fatal.clone(), budget).unwrap());

        let scheduler = Arc::new(RecordingScheduler::default());
        let watchdog = Arc::new(WatchdogSupervisor::new(
            registry.clone(),
            wdt.clone(),
            clock.clone(),
            WatchdogConfig::default(),
            Duration::from_millis(10),
        ));
        let mut manager = TaskManager::new(
            registry.clone(),
            watchdog.clone(),
            scheduler.clone(),
            DEFAULT_QUEUE_CAPACITY,
        );
        if let Some(sink) = sink {
            manager = manager.with_log_sink(sink);
        }

        Self {
            clock,
            wdt,
            fatal,
            registry,
            scheduler,
            watchdog,
            manager,
        }
    }

    pub(crate) fn handle(&self) -> DispatcherHandle {
        DispatcherHandle::new(self.registry.clone(), self.scheduler.clone())
    }

    pub(crate) fn dispatcher(&self) -> CommandDispatcher {
        CommandDispatcher::new(self.registry.clone(), Duration::from_millis(10))
    }

    pub(crate) fn take_inbox(&self, id: TaskId) -> CommandInbox {
        self.scheduler.take_inbox(id)
    }
}
