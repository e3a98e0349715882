use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Index of a task inside the fixed task registry.
///
/// Tasks are always addressed through this index, never by address.  The
/// first three indices are permanently reserved for the supervisory triad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u8);

impl TaskId {
    /// Slot 0: the watchdog supervisor.
    pub const WATCHDOG: TaskId = TaskId(0);
    /// Slot 1: the command dispatcher.
    pub const DISPATCHER: TaskId = TaskId(1);
    /// Slot 2: the task lifecycle manager.
    pub const TASK_MANAGER: TaskId = TaskId(2);
    /// Number of reserved supervisory slots at the head of the registry.
    pub const RESERVED: usize = 3;

    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    /// Build an id from a registry index, rejecting indices that cannot be
    /// represented.
    pub fn from_index(index: usize) -> Option<Self> {
        u8::try_from(index).ok().map(Self)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// `true` for the watchdog, dispatcher and task manager slots.
    pub const fn is_supervisory(self) -> bool {
        (self.0 as usize) < Self::RESERVED
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Capability class of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    /// Part of the supervisory chain; never disabled.
    OsIntegrity,
    /// Polls a sensor.
    Sensor,
    /// Drives an output device.
    Actuator,
    /// Exercises the kernel itself.
    Test,
}

/// The closed set of task behaviours a registry entry can carry.
///
/// Each kind maps to one (init, run) pair in the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Watchdog,
    CommandDispatcher,
    TaskManager,
    Heartbeat,
    Magnetometer,
    Photodiode,
    Ping,
    Pong,
    FaultInjector,
}

impl TaskKind {
    /// The kind that must occupy a reserved slot, if any.
    pub fn reserved_for(id: TaskId) -> Option<TaskKind> {
        match id {
            TaskId::WATCHDOG => Some(TaskKind::Watchdog),
            TaskId::DISPATCHER => Some(TaskKind::CommandDispatcher),
            TaskId::TASK_MANAGER => Some(TaskKind::TaskManager),
            _ => None,
        }
    }

    pub fn is_supervisory(self) -> bool {
        matches!(
            self,
            TaskKind::Watchdog | TaskKind::CommandDispatcher | TaskKind::TaskManager
        )
    }

    /// Class a task of this kind gets when the configuration does not say.
    pub fn default_class(self) -> TaskClass {
        match self {
            TaskKind::Watchdog | TaskKind::CommandDispatcher | TaskKind::TaskManager => {
                TaskClass::OsIntegrity
            }
            TaskKind::Magnetometer | TaskKind::Photodiode => TaskClass::Sensor,
            TaskKind::Heartbeat => TaskClass::Actuator,
            TaskKind::Ping | TaskKind::Pong | TaskKind::FaultInjector => TaskClass::Test,
        }
    }
}

/// Operation code of a command.  Its meaning is defined by the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Operation {
    Checkin = 0,
    InitSubtasks = 1,
    EnableTask = 2,
    DisableTask = 3,
    SetLogLevel = 4,
    Ping = 5,
    ReadSensor = 6,
}

impl Operation {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Severity levels of the flight log sink.  FATAL is not a level: it always
/// prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Event,
    Warning,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Event => write!(f, "event"),
            LogLevel::Warning => write!(f, "warning"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = OrbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "event" => Ok(LogLevel::Event),
            "warning" | "warn" => Ok(LogLevel::Warning),
            other => Err(OrbError::Config(format!("unknown log level '{other}'"))),
        }
    }
}

/// Opaque command payload.
///
/// Delivery is asynchronous, so every borrowed payload must live for the
/// whole process.  The `'static` bound makes that a compile-time property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Payload {
    #[default]
    None,
    Task(TaskId),
    LogLevel(LogLevel),
    Bytes(&'static [u8]),
    Text(&'static str),
}

impl Payload {
    /// Length of the referenced payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            Payload::None => 0,
            Payload::Task(_) => std::mem::size_of::<TaskId>(),
            Payload::LogLevel(_) => std::mem::size_of::<LogLevel>(),
            Payload::Bytes(bytes) => bytes.len(),
            Payload::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result code carried in a command envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The command has not been settled yet.
    Processing,
    /// The sender does not expect a result (checkins).
    NoStatusReturn,
    Success,
    BadTarget,
    TaskDisabled,
}

/// Completion callback invoked once a command's result code is settled.
#[derive(Clone, Copy)]
pub struct Completion(pub fn(&CommandEnvelope));

impl Completion {
    pub fn call(&self, envelope: &CommandEnvelope) {
        (self.0)(envelope)
    }
}

impl PartialEq for Completion {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::fn_addr_eq(self.0, other.0)
    }
}

impl Eq for Completion {}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion(..)")
    }
}

/// Fixed-size value message routed by the command dispatcher.
///
/// Envelopes are copied by value into queues; the queue holding an envelope
/// is its only owner while it is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandEnvelope {
    /// Destination task; `None` is never routable.
    pub target: Option<TaskId>,
    pub operation: Operation,
    pub payload: Payload,
    pub result: Status,
    pub callback: Option<Completion>,
}

impl CommandEnvelope {
    pub fn new(target: TaskId, operation: Operation, payload: Payload) -> Self {
        Self {
            target: Some(target),
            operation,
            payload,
            result: Status::Processing,
            callback: None,
        }
    }

    /// The checkin command a task sends to the watchdog about itself.
    pub fn checkin(task: TaskId) -> Self {
        Self {
            target: Some(TaskId::WATCHDOG),
            operation: Operation::Checkin,
            payload: Payload::Task(task),
            result: Status::NoStatusReturn,
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: fn(&CommandEnvelope)) -> Self {
        self.callback = Some(Completion(callback));
        self
    }

    /// Record `status` and notify the sender's callback, if any.
    pub fn complete(&mut self, status: Status) {
        self.result = status;
        if let Some(callback) = self.callback {
            callback.call(self);
        }
    }
}

/// Why the system is about to be reset.
///
/// Every variant is a programming-invariant violation or a liveness failure;
/// none of them is retried.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FatalCause {
    #[error("{task} task has not checked in within the allowed time (time since last checkin: {elapsed_ms} ms, allowed time: {deadline_ms} ms)")]
    DeadlineOverrun {
        task: String,
        elapsed_ms: u32,
        deadline_ms: u32,
    },

    #[error("{task} task tried to register a second time with watchdog")]
    AlreadyRegistered { task: String },

    #[error("{task} task tried to unregister a second time with watchdog")]
    NotRegistered { task: String },

    #[error("{task} task tried to check in without registering")]
    CheckinWithoutRegistration { task: String },

    #[error("{caller} task referenced task {task_id}, which is not in the registry")]
    UnknownTask { caller: String, task_id: TaskId },

    #[error("{task} task failed to lock the task registry after {waited_ms} ms")]
    LockTimeout { task: String, waited_ms: u64 },

    #[error("{sender} task failed to enqueue command onto {queue} queue")]
    QueueFull { queue: String, sender: String },

    #[error("{sender} task sent to {queue} before its queue was created")]
    QueueMissing { queue: String, sender: String },

    #[error("invalid lifecycle transition for {task} task: {reason}")]
    InvalidTransition { task: String, reason: String },

    #[error("{task} task does not support operation {operation:?}")]
    UnsupportedOperation { task: String, operation: Operation },

    #[error("{task} task received a command addressed to {target}")]
    Misrouted { task: String, target: String },

    #[error("{task} task received a malformed payload for {operation:?}")]
    BadPayload { task: String, operation: Operation },

    #[error("{task} task creation failed: {reason}")]
    TaskCreation { task: String, reason: String },

    #[error("{task} task stopped running: {reason}")]
    TaskExited { task: String, reason: String },

    #[error("hardware watchdog expired without being fed")]
    HardwareWatchdogExpired,
}

/// Error type shared by every orbos crate.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrbError {
    /// The command had no target, or the target does not exist.
    #[error("bad target")]
    BadTarget,

    /// The target exists but is currently disabled.
    #[error("{task} task is disabled")]
    TaskDisabled { task: String },

    /// The task table cannot be booted.
    #[error("invalid task registry: {0}")]
    InvalidRegistry(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("hardware fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    /// The fatal path has been taken; the system is resetting.
    #[error("FATAL: {0}")]
    Fatal(#[from] FatalCause),
}

impl OrbError {
    /// Result code of a recoverable dispatch failure.
    pub fn status(&self) -> Option<Status> {
        match self {
            OrbError::BadTarget => Some(Status::BadTarget),
            OrbError::TaskDisabled { .. } => Some(Status::TaskDisabled),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, OrbError::Fatal(_))
    }
}
