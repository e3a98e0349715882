use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};

use orbos_types::{CommandEnvelope, OrbError, Operation, Payload, Status};
use tracing::{info, warn};

use super::{check_target, unsupported};
use crate::context::TaskContext;

static PONG_ACKS: AtomicU32 = AtomicU32::new(0);

/// Number of `Ping` commands acknowledged with [`Status::Success`] since
/// process start.
pub fn pong_acknowledgements() -> u32 {
    PONG_ACKS.load(Ordering::SeqCst)
}

fn on_pong(envelope: &CommandEnvelope) {
    if envelope.result == Status::Success {
        PONG_ACKS.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sends `Ping` to the `Pong` task every cycle until one is acknowledged.
#[derive(Default)]
pub struct PingTask {
    sent: u32,
}

impl PingTask {
    pub async fn run(mut self, mut ctx: TaskContext) -> Result<Infallible, OrbError> {
        let baseline = pong_acknowledgements();
        let mut acked = false;
        loop {
            if let Some(envelope) = ctx.next_command().await {
                warn!(task = ctx.name(), operation = ?envelope.operation, "unexpected command, dropped");
            }
            if !acked {
                if pong_acknowledgements() > baseline {
                    acked = true;
                    info!(task = ctx.name(), sent = self.sent, "pong acknowledged");
                } else {
                    self.ping(&ctx)?;
                }
            }
            ctx.checkin().await?;
        }
    }

    fn ping(&mut self, ctx: &TaskContext) -> Result<(), OrbError> {
        let Some(pong) = ctx.lookup("Pong") else {
            warn!(task = ctx.name(), "no Pong task in the registry");
            return Ok(());
        };
        self.sent += 1;
        ctx.send(
            CommandEnvelope::new(pong, Operation::Ping, Payload::Text("ping"))
                .with_callback(on_pong),
        )
    }
}

/// Logs every `Ping` and acknowledges it.
pub struct PongTask;

impl PongTask {
    pub async fn run(self, mut ctx: TaskContext) -> Result<Infallible, OrbError> {
        loop {
            if let Some(mut envelope) = ctx.next_command().await {
                check_target(&ctx, &envelope)?;
                match (envelope.operation, envelope.payload) {
                    (Operation::Ping, Payload::Text(text)) => {
                        info!(task = ctx.name(), text, "pong");
                        envelope.complete(Status::Success);
                    }
                    (Operation::Ping, _) => {
                        info!(task = ctx.name(), "pong");
                        envelope.complete(Status::Success);
                    }
                    _ => return Err(unsupported(&ctx, &envelope)),
                }
            }
            ctx.checkin().await?;
        }
    }
}
