//! Leaf task behaviours.
//!
//! Each [`TaskKind`] outside the supervisory triad maps to one [`Behavior`]
//! variant.  [`Behavior::init`] is the task's initializer (devices, state);
//! [`Behavior::run`] is its loop.  Every loop has the same shape: wait on
//! the task's queue for at most half its deadline, execute whatever
//! arrived, check in, repeat.
//!
//! | Kind | Behaviour |
//! |---|---|
//! | `Heartbeat` | blinks a status indicator |
//! | `Magnetometer`, `Photodiode` | polls a sensor, answers `ReadSensor` |
//! | `Ping` | sends `Ping` to `Pong` until it is acknowledged |
//! | `Pong` | logs and acknowledges `Ping` |
//! | `FaultInjector` | stops checking in after a few cycles |

mod fault;
mod heartbeat;
mod ping;
mod sensor;

#[cfg(test)]
mod test_rig;

use std::convert::Infallible;

use orbos_hal::sim::{SimIndicator, SimMagnetometer, SimPhotodiode};
use orbos_types::{CommandEnvelope, FatalCause, OrbError, TaskKind};

use crate::config::KernelConfig;
use crate::context::TaskContext;

pub use fault::FaultInjectorTask;
pub use heartbeat::HeartbeatTask;
pub use ping::{PingTask, PongTask, pong_acknowledgements};
pub use sensor::SensorTask;

pub enum Behavior {
    Heartbeat(HeartbeatTask),
    Sensor(SensorTask),
    Ping(PingTask),
    Pong(PongTask),
    FaultInjector(FaultInjectorTask),
}

impl Behavior {
    /// Build the behaviour for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`OrbError::InvalidRegistry`] for the supervisory kinds,
    /// which are driven by the kernel directly.
    pub fn init(kind: TaskKind, config: &KernelConfig) -> Result<Self, OrbError> {
        match kind {
            TaskKind::Heartbeat => Ok(Behavior::Heartbeat(HeartbeatTask::new(
                SimIndicator::new("status_led"),
                config.heartbeat_blink(),
            ))),
            TaskKind::Magnetometer => Ok(Behavior::Sensor(SensorTask::new(SimMagnetometer::new(
                "magnetometer",
            )))),
            TaskKind::Photodiode => Ok(Behavior::Sensor(SensorTask::new(SimPhotodiode::new(
                "photodiode",
            )))),
            TaskKind::Ping => Ok(Behavior::Ping(PingTask::default())),
            TaskKind::Pong => Ok(Behavior::Pong(PongTask)),
            TaskKind::FaultInjector => Ok(Behavior::FaultInjector(FaultInjectorTask::new(
                config.fault_injector_stall_after,
            ))),
            TaskKind::Watchdog | TaskKind::CommandDispatcher | TaskKind::TaskManager => Err(
                OrbError::InvalidRegistry(format!("{kind:?} has no leaf behaviour")),
            ),
        }
    }

    /// Run the task loop.  Only returns on error.
    pub async fn run(self, ctx: TaskContext) -> Result<Infallible, OrbError> {
        match self {
            Behavior::Heartbeat(task) => task.run(ctx).await,
            Behavior::Sensor(task) => task.run(ctx).await,
            Behavior::Ping(task) => task.run(ctx).await,
            Behavior::Pong(task) => task.run(ctx).await,
            Behavior::FaultInjector(task) => task.run(ctx).await,
        }
    }
}

/// The fatal error for a command a task has no handler for.
fn unsupported(ctx: &TaskContext, envelope: &CommandEnvelope) -> OrbError {
    ctx.raise(FatalCause::UnsupportedOperation {
        task: ctx.name().to_string(),
        operation: envelope.operation,
    })
}

/// The fatal error for a command addressed to another task.
fn check_target(ctx: &TaskContext, envelope: &CommandEnvelope) -> Result<(), OrbError> {
    if envelope.target == Some(ctx.id()) {
        return Ok(());
    }
    Err(ctx.raise(FatalCause::Misrouted {
        task: ctx.name().to_string(),
        target: format!("{:?}", envelope.target),
    }))
}
