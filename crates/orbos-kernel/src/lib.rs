//! `orbos-kernel` – the supervisory triad.
//!
//! The part of the flight software that decides whether a stuck driver or a
//! firmware bug ends in a clean, observable reset or in an unrecoverable
//! hang.
//!
//! # Modules
//!
//! - [`registry`] – [`TaskRegistry`][registry::TaskRegistry]: the fixed task
//!   table and the single lock guarding its mutable fields.
//! - [`dispatcher`] – [`CommandDispatcher`][dispatcher::CommandDispatcher]:
//!   the hub every cross-task command passes through.
//! - [`watchdog`] – [`WatchdogSupervisor`][watchdog::WatchdogSupervisor]:
//!   per-task deadlines, escalation to the hardware watchdog.
//! - [`lifecycle`] – [`TaskManager`][lifecycle::TaskManager]: creates tasks
//!   and enables/disables them.
//! - [`fatal`] – [`FatalPath`][fatal::FatalPath]: log, flush, kick.
//! - [`queue`], [`lock`], [`scheduler`] – the primitives the above are built
//!   on.
//!
//! Any mutation of registry state goes through
//! [`TaskRegistry::lock`][registry::TaskRegistry::lock]; no other lock
//! exists in this crate.

pub mod dispatcher;
pub mod fatal;
pub mod lifecycle;
pub mod lock;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod watchdog;

#[cfg(test)]
mod test_support;

pub use dispatcher::{CommandDispatcher, DispatcherHandle};
pub use fatal::FatalPath;
pub use lifecycle::{LogLevelSink, TaskManager};
pub use lock::LockBudget;
pub use queue::{CommandInbox, QueueHandle, command_queue};
pub use registry::{
    MIN_WATCHDOG_TIMEOUT_MS, RegistryGuard, TaskDescriptor, TaskRegistry, TaskStatus,
};
pub use scheduler::{SchedHandle, Scheduler};
pub use watchdog::{TaskHealth, WatchdogSupervisor};
