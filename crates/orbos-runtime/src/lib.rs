//! `orbos-runtime` – the kernel hosted on tokio.
//!
//! Wires [`orbos_kernel`] to a concrete scheduler, simulated peripherals and
//! the leaf tasks, and provides the ambient pieces a binary needs.
//!
//! # Modules
//!
//! - [`system`] – [`FlightSystem`][system::FlightSystem]: boot, supervise,
//!   shut down.
//! - [`scheduler`] – [`TokioScheduler`][scheduler::TokioScheduler]: one
//!   spawned task and run gate per kernel task.
//! - [`context`] – [`TaskContext`][context::TaskContext]: the kernel as seen
//!   from a leaf task.
//! - [`tasks`] – heartbeat, sensors, ping/pong, fault injector.
//! - [`config`] – [`KernelConfig`][config::KernelConfig], TOML-backed.
//! - [`telemetry`] – `tracing` subscriber with a run-time level handle.

pub mod config;
pub mod context;
pub mod scheduler;
pub mod system;
pub mod tasks;
pub mod telemetry;

pub use config::{KernelConfig, TaskConfig};
pub use system::{FlightSystem, Hardware, ResetReason, Shutdown};
pub use telemetry::{LogLevelHandle, TracerProviderGuard, init_tracing};
