use std::convert::Infallible;

use orbos_hal::Sensor;
use orbos_types::{OrbError, Operation, Status};
use tracing::{debug, info};

use super::{check_target, unsupported};
use crate::context::TaskContext;

/// Polls one sensor per cycle and answers [`Operation::ReadSensor`] with a
/// fresh sample.
pub struct SensorTask {
    sensor: Box<dyn Sensor>,
}

impl SensorTask {
    pub fn new(sensor: Box<dyn Sensor>) -> Self {
        Self { sensor }
    }

    pub async fn run(mut self, mut ctx: TaskContext) -> Result<Infallible, OrbError> {
        loop {
            if let Some(mut envelope) = ctx.next_command().await {
                check_target(&ctx, &envelope)?;
                match envelope.operation {
                    Operation::ReadSensor => {
                        let reading = self.sensor.sample()?;
                        info!(task = ctx.name(), sensor = self.sensor.id(), ?reading, "reading");
                        envelope.complete(Status::Success);
                    }
                    _ => return Err(unsupported(&ctx, &envelope)),
                }
            } else {
                let reading = self.sensor.sample()?;
                debug!(task = ctx.name(), sensor = self.sensor.id(), ?reading, "sample");
            }
            ctx.checkin().await?;
        }
    }
}
