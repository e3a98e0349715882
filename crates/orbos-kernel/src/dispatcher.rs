//! Hub-and-spoke command routing.
//!
//! Every cross-task interaction goes through the dispatcher: a task hands an
//! envelope to [`DispatcherHandle::enqueue`], the dispatcher task drains its
//! inbound queue and forwards each envelope, unmodified, to the queue of the
//! task named in its `target` field.  That includes checkins, which are just
//! envelopes addressed to the watchdog.
//!
//! | Outcome of [`CommandDispatcher::dispatch`] | Handling |
//! |---|---|
//! | forwarded | the destination settles the result code |
//! | no target / unknown target | [`Status::BadTarget`][orbos_types::Status::BadTarget], WARNING, callback |
//! | target disabled | [`Status::TaskDisabled`][orbos_types::Status::TaskDisabled], WARNING, callback |
//! | checkin from a disabled task | same as target disabled |
//! | destination queue full | fatal |

use std::sync::Arc;
use std::time::Duration;

use orbos_types::{CommandEnvelope, FatalCause, OrbError, Operation, Payload, TaskId};
use tracing::{debug, warn};

use crate::queue::{CommandInbox, QueueError};
use crate::registry::TaskRegistry;
use crate::scheduler::Scheduler;

pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_millis(1000);

/// Enqueue endpoint handed to every task.
#[derive(Clone)]
pub struct DispatcherHandle {
    registry: Arc<TaskRegistry>,
    scheduler: Arc<dyn Scheduler>,
}

impl DispatcherHandle {
    pub fn new(registry: Arc<TaskRegistry>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            registry,
            scheduler,
        }
    }

    /// Append `envelope` to the dispatcher's inbound queue.
    ///
    /// # Errors
    ///
    /// Fatal when the dispatcher queue is full or has not been created.
    pub fn enqueue(&self, envelope: CommandEnvelope) -> Result<(), OrbError> {
        let queue_name = self.registry.name(TaskId::DISPATCHER).to_string();
        let Some(queue) = self.registry.queue(TaskId::DISPATCHER) else {
            return Err(self.registry.raise(FatalCause::QueueMissing {
                queue: queue_name,
                sender: self.sender_name(),
            }));
        };
        queue.try_send(envelope).map_err(|_| {
            self.registry.raise(FatalCause::QueueFull {
                queue: queue_name,
                sender: self.sender_name(),
            })
        })
    }

    fn sender_name(&self) -> String {
        self.scheduler
            .current_task()
            .and_then(|handle| self.registry.get_task(handle))
            .map_or_else(|| "<unknown>".to_string(), |id| self.registry.name(id).to_string())
    }
}

/// The router.  Owned by the dispatcher task.
pub struct CommandDispatcher {
    registry: Arc<TaskRegistry>,
    interval: Duration,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<TaskRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Forward `envelope` to its target's queue.
    ///
    /// # Errors
    ///
    /// - [`OrbError::BadTarget`] if the target is absent or unknown.
    /// - [`OrbError::TaskDisabled`] if the target is disabled, or if the
    ///   envelope is a checkin from a disabled task.
    /// - Fatal if the target's queue is full.
    pub async fn dispatch(&self, envelope: &CommandEnvelope) -> Result<(), OrbError> {
        let target = envelope
            .target
            .filter(|id| self.registry.contains(*id))
            .ok_or(OrbError::BadTarget)?;

        // A checkin on behalf of a disabled task is as undeliverable as a
        // command to one.
        let disabled = {
            let guard = self.registry.lock(TaskId::DISPATCHER).await?;
            if !guard.slot(target).is_some_and(|s| s.enabled) {
                Some(target)
            } else {
                match (envelope.operation, envelope.payload) {
                    (Operation::Checkin, Payload::Task(id)) if guard.is_disabled(id) => Some(id),
                    _ => None,
                }
            }
        };
        if let Some(task) = disabled {
            return Err(OrbError::TaskDisabled {
                task: self.registry.name(task).to_string(),
            });
        }

        let queue = self.registry.queue(target).ok_or(OrbError::BadTarget)?;
        match queue.try_send(*envelope) {
            Ok(()) => {
                debug!(
                    task = %self.registry.name(target),
                    operation = ?envelope.operation,
                    "forwarded command"
                );
                Ok(())
            }
            Err(QueueError::Full) => Err(self.registry.raise(FatalCause::QueueFull {
                queue: self.registry.name(target).to_string(),
                sender: self.registry.name(TaskId::DISPATCHER).to_string(),
            })),
            Err(QueueError::Closed) => Err(self.registry.raise(FatalCause::TaskExited {
                task: self.registry.name(target).to_string(),
                reason: "command queue closed".to_string(),
            })),
        }
    }

    /// Dispatch and settle recoverable failures: log a WARNING, record the
    /// result code and run the completion callback.
    ///
    /// # Errors
    ///
    /// Only fatal errors are returned.
    pub async fn route(&self, mut envelope: CommandEnvelope) -> Result<(), OrbError> {
        match self.dispatch(&envelope).await {
            Ok(()) => Ok(()),
            Err(e) => match e.status() {
                Some(status) => {
                    warn!(
                        target_task = ?envelope.target,
                        operation = ?envelope.operation,
                        "command not delivered: {e}"
                    );
                    envelope.complete(status);
                    Ok(())
                }
                None => Err(e),
            },
        }
    }

    /// One cycle: route everything queued, then check in.
    ///
    /// # Errors
    ///
    /// Fatal errors from routing or from the checkin enqueue.
    pub async fn run_once(
        &self,
        inbox: &mut CommandInbox,
        handle: &DispatcherHandle,
    ) -> Result<(), OrbError> {
        while let Some(envelope) = inbox.try_next() {
            self.route(envelope).await?;
        }
        handle.enqueue(CommandEnvelope::checkin(TaskId::DISPATCHER))
    }

    /// Main loop.  Only returns once the fatal path has been taken.
    pub async fn run(&self, mut inbox: CommandInbox, handle: DispatcherHandle) -> OrbError {
        debug!("command dispatcher started");
        loop {
            if let Err(e) = self.run_once(&mut inbox, &handle).await {
                return e;
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::DEFAULT_QUEUE_CAPACITY;
    use crate::test_support::Fixture;
    use orbos_types::Status;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PONG: TaskId = TaskId::new(3);

    fn ping(text: &'static str) -> CommandEnvelope {
        CommandEnvelope::new(PONG, Operation::Ping, Payload::Text(text))
    }

    #[tokio::test]
    async fn forwards_unmodified_in_submission_order() {
        let fx = Fixture::booted().await;
        let dispatcher = fx.dispatcher();

        for text in ["one", "two", "three"] {
            dispatcher.dispatch(&ping(text)).await.unwrap();
        }

        let mut inbox = fx.take_inbox(PONG);
        assert_eq!(inbox.drain(), vec![ping("one"), ping("two"), ping("three")]);
    }

    #[tokio::test]
    async fn missing_target_is_bad_target() {
        let fx = Fixture::booted().await;
        let mut env = ping("x");
        env.target = None;
        assert_eq!(fx.dispatcher().dispatch(&env).await, Err(OrbError::BadTarget));

        env.target = Some(TaskId::new(31));
        assert_eq!(fx.dispatcher().dispatch(&env).await, Err(OrbError::BadTarget));
        assert!(fx.fatal.tripped().is_none());
    }

    #[tokio::test]
    async fn disabled_target_is_task_disabled() {
        let fx = Fixture::booted().await;
        fx.manager.disable(PONG).await.unwrap();

        let err = fx.dispatcher().dispatch(&ping("x")).await.unwrap_err();
        assert_eq!(err, OrbError::TaskDisabled { task: "Pong".into() });
        assert!(fx.fatal.tripped().is_none());
        assert!(fx.take_inbox(PONG).try_next().is_none());
    }

    #[tokio::test]
    async fn checkin_queued_before_disable_is_not_delivered() {
        let fx = Fixture::booted().await;
        let handle = fx.handle();
        let mut inbox = fx.take_inbox(TaskId::DISPATCHER);
        let mut watchdog_inbox = fx.take_inbox(TaskId::WATCHDOG);
        inbox.drain();

        assert!(fx.registry.should_checkin(PONG).await.unwrap());
        handle.enqueue(CommandEnvelope::checkin(PONG)).unwrap();
        fx.manager.disable(PONG).await.unwrap();

        fx.dispatcher().run_once(&mut inbox, &handle).await.unwrap();
        assert!(watchdog_inbox.try_next().is_none());
        fx.watchdog.run_once(&mut watchdog_inbox, &handle).await.unwrap();
        assert!(fx.fatal.tripped().is_none());
        assert_eq!(fx.wdt.kicks(), 0);
    }

    static SETTLED: AtomicUsize = AtomicUsize::new(0);

    fn record_bad_target(env: &CommandEnvelope) {
        assert_eq!(env.result, Status::BadTarget);
        SETTLED.fetch_add(1, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn route_settles_recoverable_failures_through_callback() {
        let fx = Fixture::booted().await;
        let mut env = ping("x").with_callback(record_bad_target);
        env.target = None;

        fx.dispatcher().route(env).await.unwrap();
        assert_eq!(SETTLED.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn overflowing_target_queue_is_fatal_at_capacity_plus_one() {
        let fx = Fixture::booted().await;
        let dispatcher = fx.dispatcher();

        for _ in 0..DEFAULT_QUEUE_CAPACITY {
            dispatcher.dispatch(&ping("x")).await.unwrap();
        }
        let err = dispatcher.dispatch(&ping("x")).await.unwrap_err();

        assert!(matches!(
            err,
            OrbError::Fatal(FatalCause::QueueFull { ref queue, .. }) if queue == "Pong"
        ));
        assert_eq!(fx.wdt.kicks(), 1);
    }

    #[tokio::test]
    async fn enqueue_past_capacity_is_fatal_and_names_sender() {
        let fx = Fixture::booted().await;
        let handle = fx.handle();
        // The recording scheduler reports the task manager as running.
        fx.scheduler.set_current(fx.registry.handle(TaskId::TASK_MANAGER));

        let mut inbox = fx.take_inbox(TaskId::DISPATCHER);
        inbox.drain();
        for _ in 0..DEFAULT_QUEUE_CAPACITY {
            handle.enqueue(ping("x")).unwrap();
        }
        let err = handle.enqueue(ping("x")).unwrap_err();
        assert!(matches!(
            err,
            OrbError::Fatal(FatalCause::QueueFull { ref sender, .. }) if sender == "TaskManager"
        ));
    }

    #[tokio::test]
    async fn enqueue_before_dispatcher_exists_is_fatal() {
        let fx = Fixture::unbooted();
        let err = fx.handle().enqueue(ping("x")).unwrap_err();
        assert!(matches!(err, OrbError::Fatal(FatalCause::QueueMissing { .. })));
    }

    #[tokio::test]
    async fn run_once_routes_then_checks_in() {
        let fx = Fixture::booted().await;
        let handle = fx.handle();
        let mut inbox = fx.take_inbox(TaskId::DISPATCHER);
        inbox.drain();

        handle.enqueue(ping("hello")).unwrap();
        fx.dispatcher().run_once(&mut inbox, &handle).await.unwrap();

        assert_eq!(fx.take_inbox(PONG).drain(), vec![ping("hello")]);
        assert_eq!(
            inbox.drain(),
            vec![CommandEnvelope::checkin(TaskId::DISPATCHER)]
        );
    }
}
