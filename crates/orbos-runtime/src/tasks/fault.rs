use std::convert::Infallible;

use orbos_types::OrbError;
use tracing::{debug, warn};

use crate::context::TaskContext;

/// Checks in normally for a few cycles, then keeps running without ever
/// checking in again.  Enabling it exercises the whole overrun path: the
/// watchdog notices the missed deadline and takes the fatal path.
pub struct FaultInjectorTask {
    stall_after: u32,
}

impl FaultInjectorTask {
    pub fn new(stall_after: u32) -> Self {
        Self { stall_after }
    }

    pub async fn run(self, mut ctx: TaskContext) -> Result<Infallible, OrbError> {
        let mut cycles = 0u32;
        loop {
            let pending = ctx.next_command().await;
            if let Some(envelope) = pending {
                debug!(task = ctx.name(), operation = ?envelope.operation, "ignored");
            }
            if cycles < self.stall_after {
                ctx.checkin().await?;
                cycles += 1;
                if cycles == self.stall_after {
                    warn!(task = ctx.name(), cycles, "stalling: no further checkins");
                }
            }
        }
    }
}
