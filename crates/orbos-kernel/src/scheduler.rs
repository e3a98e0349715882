//! The preemptive scheduler, as consumed by the kernel.
//!
//! The kernel never schedules anything itself.  It creates each task exactly
//! once, suspends and resumes it, and asks which task is running; how that
//! happens is the implementor's business (`orbos-runtime` maps it onto tokio).

use orbos_types::{OrbError, TaskId};

use crate::queue::CommandInbox;
use crate::registry::TaskDescriptor;

/// Opaque handle of a scheduled task entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedHandle(u64);

impl SchedHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

pub trait Scheduler: Send + Sync {
    /// Create the task entity for registry slot `id`, handing it the
    /// receiving end of its queue.  With `suspended` the entity exists but
    /// does not run until [`Scheduler::resume`].
    ///
    /// # Errors
    ///
    /// Returns an error if the entity cannot be created; the lifecycle
    /// manager escalates it to the fatal path.
    fn create_task(
        &self,
        id: TaskId,
        descriptor: &TaskDescriptor,
        inbox: CommandInbox,
        suspended: bool,
    ) -> Result<SchedHandle, OrbError>;

    /// Stop scheduling the task at its next suspension point.  No cleanup
    /// runs.
    fn suspend(&self, handle: SchedHandle);

    fn resume(&self, handle: SchedHandle);

    /// Handle of the task making the call, if it is a scheduled task.
    fn current_task(&self) -> Option<SchedHandle>;
}
