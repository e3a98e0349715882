//! [`FlightSystem`] – the assembled kernel running on tokio.
//!
//! # Lifecycle
//!
//! 1. [`FlightSystem::boot`] reads and re-arms the backup register, builds
//!    the registry, programs the hardware watchdog and creates the
//!    supervisory triad.  The task manager then creates every other task
//!    from its own loop.
//! 2. [`FlightSystem::run_until`] supervises the running system until one of
//!    three things happens: a task takes the fatal path, the hardware
//!    watchdog resets the processor, or the caller asks for shutdown.
//! 3. Whatever the outcome, every task is aborted before `run_until`
//!    returns.  Only an orderly shutdown writes the clean marker.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use orbos_hal::backup::{CLEAN_SHUTDOWN, read_and_arm};
use orbos_hal::sim::SimWatchdog;
use orbos_hal::{
    BackupRegister, Clock, HardwareEvent, HardwareWatchdog, MonotonicClock, PriorShutdown,
    ResetCause,
};
use orbos_kernel::{
    CommandDispatcher, CommandInbox, DispatcherHandle, FatalPath, LogLevelSink, TaskManager,
    TaskRegistry, TaskStatus, WatchdogSupervisor,
};
use orbos_types::{CommandEnvelope, FatalCause, OrbError, TaskId, TaskKind};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::KernelConfig;
use crate::context::TaskContext;
use crate::scheduler::TokioScheduler;
use crate::tasks::Behavior;
use crate::telemetry::EVENT_TARGET;

/// The peripherals the kernel drives directly.
#[derive(Clone)]
pub struct Hardware {
    pub clock: Arc<dyn Clock>,
    pub watchdog: Arc<dyn HardwareWatchdog>,
    pub backup: Arc<dyn BackupRegister>,
}

impl Hardware {
    /// Monotonic clock and a simulated watchdog over `backup`.
    pub fn simulated(backup: Arc<dyn BackupRegister>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let watchdog = Arc::new(SimWatchdog::new(clock.clone()));
        Self {
            clock,
            watchdog,
            backup,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResetReason {
    #[error("{0}")]
    Fatal(FatalCause),

    #[error("hardware watchdog reset ({0:?})")]
    Hardware(ResetCause),
}

/// How [`FlightSystem::run_until`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shutdown {
    Clean,
    Reset(ResetReason),
}

pub struct FlightSystem {
    config: KernelConfig,
    hardware: Hardware,
    registry: Arc<TaskRegistry>,
    scheduler: Arc<TokioScheduler>,
    watchdog: Arc<WatchdogSupervisor>,
    dispatcher: CommandDispatcher,
    handle: DispatcherHandle,
    manager: TaskManager,
    prior: PriorShutdown,
}

impl FlightSystem {
    /// Boot the kernel.  Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`OrbError::HardwareFault`] if the backup register or the hardware
    ///   watchdog cannot be set up.
    /// - [`OrbError::InvalidRegistry`] if the task table is malformed.
    /// - [`OrbError::Fatal`] if a supervisor cannot be created.
    pub async fn boot(
        config: KernelConfig,
        hardware: Hardware,
        log_sink: Option<Arc<dyn LogLevelSink>>,
    ) -> Result<Arc<Self>, OrbError> {
        let prior = read_and_arm(hardware.backup.as_ref())?;
        if prior.is_abnormal() {
            warn!(target: EVENT_TARGET, ?prior, "booting after an abnormal reset");
        } else {
            info!(target: EVENT_TARGET, ?prior, "booting");
        }

        let fatal = Arc::new(FatalPath::new(
            hardware.watchdog.clone(),
            hardware.backup.clone(),
            config.fatal_flush_delay(),
        ));
        let registry = Arc::new(TaskRegistry::new(
            config.descriptors(),
            fatal,
            config.lock_budget(),
        )?);

        let system = Arc::new_cyclic(|weak| {
            let scheduler = Arc::new(TokioScheduler::new(weak.clone()));
            let watchdog = Arc::new(WatchdogSupervisor::new(
                registry.clone(),
                hardware.watchdog.clone(),
                hardware.clock.clone(),
                config.hardware_watchdog(),
                config.watchdog_interval(),
            ));
            let handle = DispatcherHandle::new(registry.clone(), scheduler.clone());
            let dispatcher = CommandDispatcher::new(registry.clone(), config.dispatcher_interval());
            let mut manager = TaskManager::new(
                registry.clone(),
                watchdog.clone(),
                scheduler.clone(),
                config.queue_capacity,
            );
            if let Some(sink) = log_sink {
                manager = manager.with_log_sink(sink);
            }
            Self {
                config,
                hardware,
                registry,
                scheduler,
                watchdog,
                dispatcher,
                handle,
                manager,
                prior,
            }
        });

        if let Err(e) = system.start().await {
            system.scheduler.halt_all();
            return Err(e);
        }
        info!(target: EVENT_TARGET, tasks = system.registry.len(), "kernel up");
        Ok(system)
    }

    async fn start(&self) -> Result<(), OrbError> {
        self.watchdog.init_hardware()?;
        self.manager.init_supervisors().await?;
        self.scheduler.launch();
        Ok(())
    }

    /// How the previous run ended, as read from the backup register at boot.
    pub fn prior_shutdown(&self) -> PriorShutdown {
        self.prior
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &TokioScheduler {
        &self.scheduler
    }

    /// Inject a command from outside any task (ground link, CLI).
    ///
    /// # Errors
    ///
    /// Fatal if the dispatcher queue is full.
    pub fn enqueue(&self, envelope: CommandEnvelope) -> Result<(), OrbError> {
        self.handle.enqueue(envelope)
    }

    /// Status of every task.
    ///
    /// # Errors
    ///
    /// Fatal if the registry lock cannot be acquired.
    pub async fn snapshot(&self) -> Result<Vec<TaskStatus>, OrbError> {
        self.registry.snapshot(TaskId::TASK_MANAGER).await
    }

    /// Supervise until the fatal path is taken, the hardware watchdog
    /// resets, or `shutdown` resolves.  Every task is aborted on return.
    pub async fn run_until<F>(&self, shutdown: F) -> Shutdown
    where
        F: Future<Output = ()>,
    {
        let fatal = self.registry.fatal().clone();
        let outcome = tokio::select! {
            biased;
            cause = fatal.halted() => Shutdown::Reset(ResetReason::Fatal(cause)),
            cause = self.monitor_hardware() => Shutdown::Reset(ResetReason::Hardware(cause)),
            () = shutdown => self.shut_down(),
        };
        self.scheduler.halt_all();
        outcome
    }

    fn shut_down(&self) -> Shutdown {
        self.scheduler.halt_all();
        if let Some(cause) = self.registry.fatal().tripped() {
            return Shutdown::Reset(ResetReason::Fatal(cause));
        }
        if let Err(e) = self.hardware.backup.write(CLEAN_SHUTDOWN) {
            error!(error = %e, "failed to record clean shutdown");
        }
        info!(target: EVENT_TARGET, "clean shutdown");
        Shutdown::Clean
    }

    async fn monitor_hardware(&self) -> ResetCause {
        let mut ticker = tokio::time::interval(self.config.hardware_poll_interval());
        loop {
            ticker.tick().await;
            match self.hardware.watchdog.poll() {
                HardwareEvent::Idle => {}
                HardwareEvent::EarlyWarning => self.watchdog.early_warning(),
                HardwareEvent::Reset(cause) => {
                    error!(target: "orbos::fatal", ?cause, "hardware watchdog reset");
                    return cause;
                }
            }
        }
    }

    /// Body of every spawned task.  A task that leaves its loop with a
    /// recoverable error takes the fatal path; tasks never return.
    pub(crate) async fn task_main(
        self: Arc<Self>,
        id: TaskId,
        kind: TaskKind,
        inbox: CommandInbox,
        gate: watch::Receiver<bool>,
    ) {
        let err = match kind {
            TaskKind::Watchdog => self.watchdog.run(inbox, self.handle.clone()).await,
            TaskKind::CommandDispatcher => self.dispatcher.run(inbox, self.handle.clone()).await,
            TaskKind::TaskManager => self.manager.run(inbox, self.handle.clone()).await,
            _ => match self.run_leaf(id, kind, inbox, gate).await {
                Err(e) => e,
                Ok(never) => match never {},
            },
        };
        if !err.is_fatal() {
            self.registry.raise(FatalCause::TaskExited {
                task: self.registry.name(id).to_string(),
                reason: err.to_string(),
            });
        }
    }

    async fn run_leaf(
        &self,
        id: TaskId,
        kind: TaskKind,
        inbox: CommandInbox,
        gate: watch::Receiver<bool>,
    ) -> Result<Infallible, OrbError> {
        let mut ctx = TaskContext::new(id, inbox, gate, self.registry.clone(), self.handle.clone());
        // A task created suspended does not initialize until first enabled.
        ctx.runnable().await;
        let behavior = Behavior::init(kind, &self.config)?;
        info!(task = ctx.name(), "started");
        behavior.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskConfig;
    use orbos_hal::backup::{FATAL_RESET, RUNNING};
    use orbos_hal::sim::SimBackupRegister;
    use orbos_types::{Operation, Payload};
    use std::time::Duration;

    /// Short deadlines and intervals so whole-system tests finish quickly.
    fn fast_config() -> KernelConfig {
        let mut cfg = KernelConfig {
            watchdog_interval_ms: 20,
            dispatcher_interval_ms: 10,
            hardware_poll_interval_ms: 10,
            fatal_flush_delay_ms: 0,
            heartbeat_blink_ms: 20,
            fault_injector_stall_after: 1,
            ..KernelConfig::default()
        };
        for task in &mut cfg.tasks {
            task.watchdog_timeout_ms = if task.kind.is_supervisory() { 2_000 } else { 400 };
        }
        cfg
    }

    struct Rig {
        wdt: Arc<SimWatchdog>,
        backup: Arc<SimBackupRegister>,
        hardware: Hardware,
    }

    fn rig(marker: u32) -> Rig {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let wdt = Arc::new(SimWatchdog::new(clock.clone()));
        let backup = Arc::new(SimBackupRegister::new(marker));
        let hardware = Hardware {
            clock,
            watchdog: wdt.clone(),
            backup: backup.clone(),
        };
        Rig {
            wdt,
            backup,
            hardware,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn boot_creates_every_task_and_shuts_down_cleanly() {
        let rig = rig(0);
        let system = FlightSystem::boot(fast_config(), rig.hardware, None)
            .await
            .unwrap();
        assert_eq!(system.prior_shutdown(), PriorShutdown::ColdStart);
        assert_eq!(rig.backup.read().unwrap(), RUNNING);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = system.snapshot().await.unwrap();
        assert!(status.iter().all(|s| s.created), "{status:?}");
        for s in &status {
            let expect_running = s.kind != TaskKind::FaultInjector;
            assert_eq!(s.enabled, expect_running, "{}", s.name);
            assert_eq!(s.registered, expect_running, "{}", s.name);
        }
        assert!(system.registry().fatal().tripped().is_none());
        assert!(rig.wdt.feeds() > 0);

        let outcome = system.run_until(std::future::ready(())).await;
        assert_eq!(outcome, Shutdown::Clean);
        assert_eq!(rig.backup.read().unwrap(), CLEAN_SHUTDOWN);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn enabling_the_fault_injector_ends_in_a_fatal_reset() {
        let rig = rig(CLEAN_SHUTDOWN);
        let system = FlightSystem::boot(fast_config(), rig.hardware, None)
            .await
            .unwrap();
        assert_eq!(system.prior_shutdown(), PriorShutdown::Clean);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let injector = system.registry().id_by_name("FaultInjector").unwrap();
        system
            .enqueue(CommandEnvelope::new(
                TaskId::TASK_MANAGER,
                Operation::EnableTask,
                Payload::Task(injector),
            ))
            .unwrap();

        let outcome = system
            .run_until(tokio::time::sleep(Duration::from_secs(10)))
            .await;
        match outcome {
            Shutdown::Reset(ResetReason::Fatal(FatalCause::DeadlineOverrun { task, .. })) => {
                assert_eq!(task, "FaultInjector");
            }
            other => panic!("expected a deadline overrun, got {other:?}"),
        }
        assert_eq!(rig.backup.read().unwrap(), FATAL_RESET);
        assert!(rig.wdt.kicks() >= 1);
        assert_eq!(rig.wdt.reset_cause(), Some(ResetCause::WrongKey));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disabled_task_is_parked_and_unregistered() {
        let rig = rig(FATAL_RESET);
        let mut cfg = fast_config();
        cfg.fault_injector_stall_after = 0;
        cfg.task_mut("FaultInjector").unwrap().watchdog_timeout_ms = 600;
        let system = FlightSystem::boot(cfg, rig.hardware, None).await.unwrap();
        assert_eq!(system.prior_shutdown(), PriorShutdown::Fatal);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let injector = system.registry().id_by_name("FaultInjector").unwrap();
        let handle = system.registry().handle(injector).unwrap();
        assert!(!system.scheduler().is_running(handle));
        let request = |operation| {
            system
                .enqueue(CommandEnvelope::new(
                    TaskId::TASK_MANAGER,
                    operation,
                    Payload::Task(injector),
                ))
                .unwrap();
        };

        request(Operation::EnableTask);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(system.scheduler().is_running(handle));
        assert!(system.snapshot().await.unwrap()[injector.index()].registered);

        request(Operation::DisableTask);
        // Parked well past its deadline without tripping the watchdog.
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(!system.scheduler().is_running(handle));
        let status = &system.snapshot().await.unwrap()[injector.index()];
        assert!(!status.enabled && !status.registered);
        assert!(system.registry().fatal().tripped().is_none());

        assert_eq!(system.run_until(async {}).await, Shutdown::Clean);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn toggling_a_task_that_checks_in_does_not_reset() {
        let rig = rig(0);
        let system = FlightSystem::boot(fast_config(), rig.hardware, None)
            .await
            .unwrap();
        let heartbeat = system.registry().id_by_name("Heartbeat").unwrap();
        let request = |operation| {
            system
                .enqueue(CommandEnvelope::new(
                    TaskId::TASK_MANAGER,
                    operation,
                    Payload::Task(heartbeat),
                ))
                .unwrap();
        };

        // Heartbeat checks in every 40 ms, so checkins are in flight at
        // most of these transitions.
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(70)).await;
            request(Operation::DisableTask);
            tokio::time::sleep(Duration::from_millis(70)).await;
            request(Operation::EnableTask);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(system.registry().fatal().tripped().is_none());
        assert!(system.snapshot().await.unwrap()[heartbeat.index()].registered);
        assert_eq!(system.run_until(async {}).await, Shutdown::Clean);
    }

    #[tokio::test]
    async fn malformed_task_table_fails_boot() {
        let rig = rig(0);
        let mut cfg = fast_config();
        cfg.tasks.swap(0, 1);
        let err = FlightSystem::boot(cfg, rig.hardware, None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OrbError::InvalidRegistry(_)), "{err}");
    }

    #[tokio::test]
    async fn invalid_hardware_watchdog_config_fails_boot() {
        let rig = rig(0);
        let mut cfg = fast_config();
        cfg.hardware_early_warning_ms = cfg.hardware_watchdog_period_ms;
        let err = FlightSystem::boot(cfg, rig.hardware, None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OrbError::HardwareFault { .. }), "{err}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ping_is_acknowledged_by_pong() {
        let rig = rig(0);
        let mut cfg = fast_config();
        cfg.tasks.retain(|t| t.kind.is_supervisory());
        cfg.tasks.push(TaskConfig::new("Ping", TaskKind::Ping));
        cfg.tasks.push(TaskConfig::new("Pong", TaskKind::Pong));
        for task in cfg.tasks.iter_mut().skip(3) {
            task.watchdog_timeout_ms = 200;
        }
        let before = crate::tasks::pong_acknowledgements();
        let system = FlightSystem::boot(cfg, rig.hardware, None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(crate::tasks::pong_acknowledgements() > before);
        assert_eq!(system.run_until(async {}).await, Shutdown::Clean);
    }
}
