//! Kernel configuration.
//!
//! Every field has a default, so an empty TOML document is a complete,
//! bootable configuration.  The task table is turned into registry
//! descriptors by [`KernelConfig::descriptors`]; validating it is the
//! registry's job.
//!
//! # Example
//!
//! ```toml
//! queue_capacity = 16
//! log_level = "event"
//!
//! [[tasks]]
//! name = "Watchdog"
//! kind = "watchdog"
//! watchdog_timeout_ms = 5000
//! ```

use std::time::Duration;

use orbos_hal::WatchdogConfig;
use orbos_kernel::{LockBudget, TaskDescriptor};
use orbos_types::{LogLevel, TaskClass, TaskKind};
use serde::{Deserialize, Serialize};

/// One `[[tasks]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    pub kind: TaskKind,
    /// Defaults to the kind's natural class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<TaskClass>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_stack_words")]
    pub stack_words: u32,
    #[serde(default = "default_timeout_ms")]
    pub watchdog_timeout_ms: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> u8 {
    1
}

fn default_stack_words() -> u32 {
    1024
}

fn default_timeout_ms() -> u32 {
    10_000
}

impl TaskConfig {
    pub fn new(name: &str, kind: TaskKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            class: None,
            enabled: default_enabled(),
            priority: default_priority(),
            stack_words: default_stack_words(),
            watchdog_timeout_ms: default_timeout_ms(),
        }
    }

    fn with(mut self, priority: u8, watchdog_timeout_ms: u32) -> Self {
        self.priority = priority;
        self.watchdog_timeout_ms = watchdog_timeout_ms;
        self
    }

    fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn descriptor(&self) -> TaskDescriptor {
        let mut descriptor = TaskDescriptor::new(self.name.clone(), self.kind)
            .with_priority(self.priority)
            .with_timeout_ms(self.watchdog_timeout_ms);
        descriptor.class = self.class.unwrap_or_else(|| self.kind.default_class());
        descriptor.stack_words = self.stack_words;
        descriptor.enabled_at_boot = self.enabled;
        descriptor
    }
}

/// Everything [`FlightSystem::boot`][crate::system::FlightSystem::boot]
/// needs besides the hardware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub tasks: Vec<TaskConfig>,
    pub queue_capacity: usize,
    pub lock_poll_delay_ms: u64,
    pub lock_max_tries: u32,
    pub hardware_watchdog_period_ms: u32,
    pub hardware_early_warning_ms: u32,
    pub hardware_poll_interval_ms: u64,
    pub watchdog_interval_ms: u64,
    pub dispatcher_interval_ms: u64,
    pub fatal_flush_delay_ms: u64,
    pub log_level: LogLevel,
    /// Checkins the fault injector sends before it stalls.
    pub fault_injector_stall_after: u32,
    pub heartbeat_blink_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tasks: vec![
                TaskConfig::new("Watchdog", TaskKind::Watchdog).with(3, 5_000),
                TaskConfig::new("CommandDispatcher", TaskKind::CommandDispatcher).with(3, 5_000),
                TaskConfig::new("TaskManager", TaskKind::TaskManager).with(2, 10_000),
                TaskConfig::new("Heartbeat", TaskKind::Heartbeat),
                TaskConfig::new("Magnetometer", TaskKind::Magnetometer),
                TaskConfig::new("Photodiode", TaskKind::Photodiode),
                TaskConfig::new("Ping", TaskKind::Ping),
                TaskConfig::new("Pong", TaskKind::Pong),
                TaskConfig::new("FaultInjector", TaskKind::FaultInjector).disabled(),
            ],
            queue_capacity: orbos_kernel::queue::DEFAULT_QUEUE_CAPACITY,
            lock_poll_delay_ms: 5,
            lock_max_tries: 1000,
            hardware_watchdog_period_ms: 16_384,
            hardware_early_warning_ms: 8_192,
            hardware_poll_interval_ms: 100,
            watchdog_interval_ms: 1_000,
            dispatcher_interval_ms: 1_000,
            fatal_flush_delay_ms: 100,
            log_level: LogLevel::Info,
            fault_injector_stall_after: 3,
            heartbeat_blink_ms: 250,
        }
    }
}

impl KernelConfig {
    /// Registry descriptors, in table order.
    pub fn descriptors(&self) -> Vec<TaskDescriptor> {
        self.tasks.iter().map(TaskConfig::descriptor).collect()
    }

    pub fn lock_budget(&self) -> LockBudget {
        LockBudget {
            poll_delay: Duration::from_millis(self.lock_poll_delay_ms),
            max_tries: self.lock_max_tries,
        }
    }

    pub fn hardware_watchdog(&self) -> WatchdogConfig {
        WatchdogConfig {
            period_ms: self.hardware_watchdog_period_ms,
            early_warning_ms: self.hardware_early_warning_ms,
        }
    }

    pub fn task_mut(&mut self, name: &str) -> Option<&mut TaskConfig> {
        self.tasks.iter_mut().find(|t| t.name == name)
    }

    pub(crate) fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub(crate) fn dispatcher_interval(&self) -> Duration {
        Duration::from_millis(self.dispatcher_interval_ms)
    }

    pub(crate) fn hardware_poll_interval(&self) -> Duration {
        Duration::from_millis(self.hardware_poll_interval_ms.max(1))
    }

    pub(crate) fn fatal_flush_delay(&self) -> Duration {
        Duration::from_millis(self.fatal_flush_delay_ms)
    }

    pub(crate) fn heartbeat_blink(&self) -> Duration {
        Duration::from_millis(self.heartbeat_blink_ms)
    }
}
