//! [`TaskRegistry`] – the fixed table of every task and the single lock
//! guarding its mutable fields.
//!
//! The table is built once at boot from an ordered list of
//! [`TaskDescriptor`]s and never resized.  Each entry has three parts:
//!
//! | Part | Mutability | Guarded by |
//! |---|---|---|
//! | [`TaskDescriptor`] | immutable after boot | nothing |
//! | queue and scheduler handle | written exactly once at creation | write-once cell |
//! | [`TaskSlot`] (`enabled`, `registered`, `last_checkin`) | mutable | the registry lock |
//!
//! The lock is only reachable through [`TaskRegistry::lock`], which returns a
//! scoped [`RegistryGuard`]; no reference into the slots outlives it.
//! Waiting longer than the [`LockBudget`] takes the fatal path.
//!
//! Slots 0, 1 and 2 always hold the watchdog, the command dispatcher and the
//! task manager, in that order.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use orbos_types::{FatalCause, OrbError, TaskClass, TaskId, TaskKind};
use tokio::sync::MutexGuard;

use crate::fatal::FatalPath;
use crate::lock::{LockBudget, TimedLock};
use crate::queue::QueueHandle;
use crate::scheduler::SchedHandle;

/// Largest number of tasks a registry may hold.
pub const MAX_TASKS: usize = 32;

/// Shortest watchdog deadline a task may have.  Tasks block for half their
/// deadline, so anything shorter would never block at all.
pub const MIN_WATCHDOG_TIMEOUT_MS: u32 = 2;

/// `last_checkin` value of a task that has never checked in.
pub const NEVER_CHECKED_IN: u32 = 0;

/// `last_checkin` value written by unregistration.
pub const NOT_RUNNING: u32 = 0xDEAD_BEEF;

// ────────────────────────────────────────────────────────────────────────────
// Descriptor
// ────────────────────────────────────────────────────────────────────────────

/// Static description of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub name: String,
    pub kind: TaskKind,
    pub class: TaskClass,
    /// Whether the task is scheduled and registered with the watchdog as
    /// soon as it is created.
    pub enabled_at_boot: bool,
    pub priority: u8,
    pub stack_words: u32,
    /// Longest allowed gap between two checkins while registered.
    pub watchdog_timeout_ms: u32,
}

impl TaskDescriptor {
    /// Descriptor with the default class for `kind`, enabled at boot, a
    /// 10 s deadline and a 1024-word stack.
    pub fn new(name: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            name: name.into(),
            kind,
            class: kind.default_class(),
            enabled_at_boot: true,
            priority: 1,
            stack_words: 1024,
            watchdog_timeout_ms: 10_000,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.watchdog_timeout_ms = timeout_ms;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled_at_boot(mut self) -> Self {
        self.enabled_at_boot = false;
        self
    }
}

/// Mutable per-task state.  Only reachable through a [`RegistryGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSlot {
    pub enabled: bool,
    pub registered: bool,
    pub last_checkin: u32,
}

impl Default for TaskSlot {
    fn default() -> Self {
        Self {
            enabled: false,
            registered: false,
            last_checkin: NEVER_CHECKED_IN,
        }
    }
}

/// Point-in-time view of one task, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub id: TaskId,
    pub name: String,
    pub kind: TaskKind,
    pub created: bool,
    pub enabled: bool,
    pub registered: bool,
    pub last_checkin: u32,
}

struct TaskEntry {
    descriptor: TaskDescriptor,
    queue: OnceLock<QueueHandle>,
    handle: OnceLock<SchedHandle>,
}

// ────────────────────────────────────────────────────────────────────────────
// Registry
// ────────────────────────────────────────────────────────────────────────────

pub struct TaskRegistry {
    entries: Box<[TaskEntry]>,
    slots: TimedLock<Box<[TaskSlot]>>,
    fatal: Arc<FatalPath>,
}

impl TaskRegistry {
    /// Build the registry from `descriptors`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`OrbError::InvalidRegistry`] if the table cannot boot: too
    /// few or too many entries, the supervisory triad missing from slots
    /// 0/1/2 or appearing elsewhere, a disabled supervisory task, a
    /// duplicate or empty name, or a deadline below
    /// [`MIN_WATCHDOG_TIMEOUT_MS`].
    pub fn new(
        descriptors: Vec<TaskDescriptor>,
        fatal: Arc<FatalPath>,
        budget: LockBudget,
    ) -> Result<Self, OrbError> {
        validate(&descriptors)?;
        let slots = vec![TaskSlot::default(); descriptors.len()].into_boxed_slice();
        let entries = descriptors
            .into_iter()
            .map(|descriptor| TaskEntry {
                descriptor,
                queue: OnceLock::new(),
                handle: OnceLock::new(),
            })
            .collect();
        Ok(Self {
            entries,
            slots: TimedLock::new(slots, budget),
            fatal,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every task id, in registry order.
    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        (0..self.entries.len()).filter_map(TaskId::from_index)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        id.index() < self.entries.len()
    }

    pub fn descriptor(&self, id: TaskId) -> Option<&TaskDescriptor> {
        self.entries.get(id.index()).map(|e| &e.descriptor)
    }

    /// Task name for diagnostics; unknown ids render as `"<unknown>"`.
    pub fn name(&self, id: TaskId) -> &str {
        self.descriptor(id).map_or("<unknown>", |d| d.name.as_str())
    }

    pub fn id_by_name(&self, name: &str) -> Option<TaskId> {
        self.entries
            .iter()
            .position(|e| e.descriptor.name == name)
            .and_then(TaskId::from_index)
    }

    pub fn fatal(&self) -> &Arc<FatalPath> {
        &self.fatal
    }

    /// Take the fatal path for `cause`.
    pub fn raise(&self, cause: FatalCause) -> OrbError {
        self.fatal.raise(cause)
    }

    /// The task's queue, once it has been created.
    pub fn queue(&self, id: TaskId) -> Option<QueueHandle> {
        self.entries.get(id.index()).and_then(|e| e.queue.get().cloned())
    }

    /// The task's scheduler handle, once it has been created.
    pub fn handle(&self, id: TaskId) -> Option<SchedHandle> {
        self.entries.get(id.index()).and_then(|e| e.handle.get().copied())
    }

    /// Resolve a scheduler handle to its task by linear scan.
    pub fn get_task(&self, handle: SchedHandle) -> Option<TaskId> {
        self.entries
            .iter()
            .position(|e| e.handle.get() == Some(&handle))
            .and_then(TaskId::from_index)
    }

    pub(crate) fn install_queue(&self, id: TaskId, queue: QueueHandle) -> Result<(), OrbError> {
        let entry = self.entry(id)?;
        entry.queue.set(queue).map_err(|_| {
            self.raise(FatalCause::TaskCreation {
                task: entry.descriptor.name.clone(),
                reason: "command queue already created".to_string(),
            })
        })
    }

    pub(crate) fn install_handle(&self, id: TaskId, handle: SchedHandle) -> Result<(), OrbError> {
        let entry = self.entry(id)?;
        entry.handle.set(handle).map_err(|_| {
            self.raise(FatalCause::TaskCreation {
                task: entry.descriptor.name.clone(),
                reason: "task already created".to_string(),
            })
        })
    }

    fn entry(&self, id: TaskId) -> Result<&TaskEntry, OrbError> {
        self.entries.get(id.index()).ok_or(OrbError::BadTarget)
    }

    /// Acquire the registry lock on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// Takes the fatal path with [`FatalCause::LockTimeout`] once the lock
    /// budget is exhausted.
    pub async fn lock(&self, caller: TaskId) -> Result<RegistryGuard<'_>, OrbError> {
        match self.slots.acquire().await {
            Ok(slots) => Ok(RegistryGuard {
                registry: self,
                slots,
            }),
            Err(waited) => Err(self.raise(FatalCause::LockTimeout {
                task: self.name(caller).to_string(),
                waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            })),
        }
    }

    /// Whether `id` should currently send checkins.
    ///
    /// # Errors
    ///
    /// Fatal if the lock cannot be acquired.
    pub async fn should_checkin(&self, id: TaskId) -> Result<bool, OrbError> {
        let guard = self.lock(id).await?;
        Ok(guard.slot(id).is_some_and(|s| s.registered))
    }

    /// Status of every task, in registry order.
    ///
    /// # Errors
    ///
    /// Fatal if the lock cannot be acquired.
    pub async fn snapshot(&self, caller: TaskId) -> Result<Vec<TaskStatus>, OrbError> {
        let guard = self.lock(caller).await?;
        Ok(self
            .ids()
            .zip(guard.slots.iter())
            .map(|(id, slot)| TaskStatus {
                id,
                name: self.name(id).to_string(),
                kind: self.entries[id.index()].descriptor.kind,
                created: self.handle(id).is_some(),
                enabled: slot.enabled,
                registered: slot.registered,
                last_checkin: slot.last_checkin,
            })
            .collect())
    }
}

fn validate(descriptors: &[TaskDescriptor]) -> Result<(), OrbError> {
    let invalid = |msg: String| Err(OrbError::InvalidRegistry(msg));

    if descriptors.len() < TaskId::RESERVED {
        return invalid(format!(
            "{} tasks given, the supervisory triad needs {}",
            descriptors.len(),
            TaskId::RESERVED
        ));
    }
    if descriptors.len() > MAX_TASKS {
        return invalid(format!(
            "{} tasks given, at most {MAX_TASKS} supported",
            descriptors.len()
        ));
    }

    let mut names = HashSet::new();
    for (index, d) in descriptors.iter().enumerate() {
        let expected = TaskId::from_index(index).and_then(TaskKind::reserved_for);
        match expected {
            Some(kind) if d.kind != kind => {
                return invalid(format!("slot {index} must hold {kind:?}, found {:?}", d.kind));
            }
            Some(_) if !d.enabled_at_boot => {
                return invalid(format!("supervisory task '{}' must be enabled at boot", d.name));
            }
            None if d.kind.is_supervisory() => {
                return invalid(format!(
                    "{:?} may only appear in its reserved slot, found at {index}",
                    d.kind
                ));
            }
            _ => {}
        }
        if d.name.is_empty() {
            return invalid(format!("slot {index} has an empty name"));
        }
        if !names.insert(d.name.as_str()) {
            return invalid(format!("duplicate task name '{}'", d.name));
        }
        if d.watchdog_timeout_ms < MIN_WATCHDOG_TIMEOUT_MS {
            return invalid(format!(
                "task '{}' has a {} ms watchdog deadline, at least {MIN_WATCHDOG_TIMEOUT_MS} ms required",
                d.name, d.watchdog_timeout_ms
            ));
        }
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Guard
// ────────────────────────────────────────────────────────────────────────────

/// Scoped access to the mutable slots.  Dropping it releases the lock.
pub struct RegistryGuard<'a> {
    registry: &'a TaskRegistry,
    slots: MutexGuard<'a, Box<[TaskSlot]>>,
}

impl RegistryGuard<'_> {
    pub fn registry(&self) -> &TaskRegistry {
        self.registry
    }

    pub fn slot(&self, id: TaskId) -> Option<&TaskSlot> {
        self.slots.get(id.index())
    }

    pub fn slot_mut(&mut self, id: TaskId) -> Option<&mut TaskSlot> {
        self.slots.get_mut(id.index())
    }

    /// A created subtask the task manager has suspended.
    pub fn is_disabled(&self, id: TaskId) -> bool {
        !id.is_supervisory()
            && self.registry.handle(id).is_some()
            && self.slot(id).is_some_and(|s| !s.enabled)
    }
}
