use std::convert::Infallible;
use std::time::Duration;

use orbos_hal::Indicator;
use orbos_types::OrbError;
use tracing::{debug, warn};

use crate::context::TaskContext;

/// Toggles the status indicator once per blink period so an operator can
/// see the scheduler is alive.
pub struct HeartbeatTask {
    led: Box<dyn Indicator>,
    blink: Duration,
}

impl HeartbeatTask {
    pub fn new(led: Box<dyn Indicator>, blink: Duration) -> Self {
        Self { led, blink }
    }

    pub async fn run(mut self, mut ctx: TaskContext) -> Result<Infallible, OrbError> {
        debug!(task = ctx.name(), led = self.led.id(), "heartbeat started");
        // One on/off cycle must fit inside the checkin period.
        let blink = self.blink.min(ctx.block_time() / 2);
        loop {
            for on in [true, false] {
                self.led.set(on)?;
                ctx.sleep(blink).await;
            }
            while let Some(envelope) = ctx.try_next_command() {
                warn!(
                    task = ctx.name(),
                    operation = ?envelope.operation,
                    "heartbeat takes no commands, dropped"
                );
            }
            ctx.checkin().await?;
        }
    }
}
