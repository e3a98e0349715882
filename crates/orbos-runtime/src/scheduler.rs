//! [`TokioScheduler`] – the kernel's [`Scheduler`] on top of tokio.
//!
//! Every task entity is a spawned tokio task plus a run gate.  Suspending a
//! task closes its gate; the task stops at its next suspension point (queue
//! receive, sleep, checkin) without running any cleanup.  The supervisory
//! triad never passes through a gate because it is never suspended.
//!
//! Nothing runs until `launch` is called: tasks created before that
//! wait on a shared latch, as tasks created before the scheduler is started.
//!
//! [`Scheduler::current_task`] is answered from a task-local set around each
//! spawned task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

use orbos_kernel::{CommandInbox, SchedHandle, Scheduler, TaskDescriptor};
use orbos_types::{OrbError, TaskId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::system::FlightSystem;

tokio::task_local! {
    static CURRENT: SchedHandle;
}

struct Entity {
    gate: watch::Sender<bool>,
    join: JoinHandle<()>,
}

pub struct TokioScheduler {
    system: Weak<FlightSystem>,
    launched: watch::Sender<bool>,
    next: AtomicU64,
    entities: Mutex<HashMap<SchedHandle, Entity>>,
}

impl TokioScheduler {
    pub(crate) fn new(system: Weak<FlightSystem>) -> Self {
        Self {
            system,
            launched: watch::channel(false).0,
            next: AtomicU64::new(1),
            entities: Mutex::new(HashMap::new()),
        }
    }

    fn entities(&self) -> MutexGuard<'_, HashMap<SchedHandle, Entity>> {
        self.entities.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_gate(&self, handle: SchedHandle, running: bool) {
        if let Some(entity) = self.entities().get(&handle) {
            entity.gate.send_replace(running);
        }
    }

    /// Whether the entity behind `handle` is currently allowed to run.
    pub fn is_running(&self, handle: SchedHandle) -> bool {
        self.entities()
            .get(&handle)
            .is_some_and(|entity| *entity.gate.borrow())
    }

    /// Let every created task, and every task created from now on, run.
    pub(crate) fn launch(&self) {
        self.launched.send_replace(true);
    }

    /// Abort every task.  Models the processor reset: nothing unwinds.
    pub(crate) fn halt_all(&self) {
        for (_, entity) in self.entities().drain() {
            entity.join.abort();
        }
    }
}

impl Scheduler for TokioScheduler {
    fn create_task(
        &self,
        id: TaskId,
        descriptor: &TaskDescriptor,
        inbox: CommandInbox,
        suspended: bool,
    ) -> Result<SchedHandle, OrbError> {
        let system = self.system.upgrade().ok_or_else(|| OrbError::HardwareFault {
            component: "scheduler".to_string(),
            details: "flight system is shutting down".to_string(),
        })?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| OrbError::HardwareFault {
            component: "scheduler".to_string(),
            details: e.to_string(),
        })?;

        let handle = SchedHandle::new(self.next.fetch_add(1, Ordering::SeqCst));
        let (gate, gate_rx) = watch::channel(!suspended);
        let kind = descriptor.kind;
        let mut launched = self.launched.subscribe();
        let join = runtime.spawn(CURRENT.scope(handle, async move {
            // The sender lives as long as the scheduler, which outlives the task.
            if launched.wait_for(|go| *go).await.is_ok() {
                system.task_main(id, kind, inbox, gate_rx).await;
            }
        }));
        debug!(task = %descriptor.name, handle = handle.raw(), suspended, "spawned");

        self.entities().insert(handle, Entity { gate, join });
        Ok(handle)
    }

    fn suspend(&self, handle: SchedHandle) {
        self.set_gate(handle, false);
    }

    fn resume(&self, handle: SchedHandle) {
        self.set_gate(handle, true);
    }

    fn current_task(&self) -> Option<SchedHandle> {
        CURRENT.try_with(|handle| *handle).ok()
    }
}
