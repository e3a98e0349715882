//! The fatal path.
//!
//! Every programming-invariant violation and every liveness failure ends
//! here.  The sequence is fixed:
//!
//! 1. log the cause at ERROR under target `orbos::fatal` (always printed),
//! 2. write [`FATAL_RESET`] into the backup register,
//! 3. wait the flush delay so the log line leaves the process,
//! 4. write the wrong key into the hardware watchdog.
//!
//! Step 4 hands the reset to the independent hardware timer, so it does not
//! depend on any software that may itself be broken.  Only the first cause
//! runs the sequence; later ones are logged at DEBUG and return immediately.

use std::sync::Arc;
use std::time::Duration;

use orbos_hal::HardwareWatchdog;
use orbos_hal::backup::{BackupRegister, FATAL_RESET};
use orbos_types::{FatalCause, OrbError};
use tokio::sync::watch;
use tracing::{debug, error};

pub struct FatalPath {
    watchdog: Arc<dyn HardwareWatchdog>,
    backup: Arc<dyn BackupRegister>,
    flush_delay: Duration,
    latch: watch::Sender<Option<FatalCause>>,
}

impl FatalPath {
    pub fn new(
        watchdog: Arc<dyn HardwareWatchdog>,
        backup: Arc<dyn BackupRegister>,
        flush_delay: Duration,
    ) -> Self {
        let (latch, _) = watch::channel(None);
        Self {
            watchdog,
            backup,
            flush_delay,
            latch,
        }
    }

    /// Take the fatal path for `cause` and return the error the caller
    /// propagates with `?`.
    ///
    /// The flush delay blocks the calling thread.
    pub fn raise(&self, cause: FatalCause) -> OrbError {
        let first = self.latch.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(cause.clone());
            true
        });

        if !first {
            debug!(target: "orbos::fatal", %cause, "fatal path already taken");
            return OrbError::Fatal(cause);
        }

        error!(target: "orbos::fatal", "FATAL: {cause}");
        if let Err(e) = self.backup.write(FATAL_RESET) {
            error!(target: "orbos::fatal", error = %e, "failed to record failure marker");
        }
        if !self.flush_delay.is_zero() {
            std::thread::sleep(self.flush_delay);
        }
        self.watchdog.kick();
        OrbError::Fatal(cause)
    }

    /// The first cause, once the path has been taken.
    pub fn tripped(&self) -> Option<FatalCause> {
        self.latch.borrow().clone()
    }

    /// Resolves with the first cause once the path has been taken.
    pub async fn halted(&self) -> FatalCause {
        let mut rx = self.latch.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let cause = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|cause| cause.clone());
        match cause {
            Some(cause) => cause,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbos_hal::backup::RUNNING;
    use orbos_hal::sim::{ManualClock, SimBackupRegister, SimWatchdog};
    use orbos_hal::{HardwareEvent, ResetCause, WatchdogConfig};

    fn fatal_path() -> (Arc<SimWatchdog>, Arc<SimBackupRegister>, FatalPath) {
        let clock = Arc::new(ManualClock::new(0));
        let wdt = Arc::new(SimWatchdog::new(clock));
        wdt.configure(WatchdogConfig::default()).unwrap();
        let backup = Arc::new(SimBackupRegister::new(RUNNING));
        let path = FatalPath::new(wdt.clone(), backup.clone(), Duration::ZERO);
        (wdt, backup, path)
    }

    #[test]
    fn first_raise_marks_backup_and_kicks() {
        let (wdt, backup, path) = fatal_path();
        let err = path.raise(FatalCause::HardwareWatchdogExpired);

        assert_eq!(err, OrbError::Fatal(FatalCause::HardwareWatchdogExpired));
        assert_eq!(backup.read().unwrap(), FATAL_RESET);
        assert_eq!(wdt.kicks(), 1);
        assert_eq!(wdt.poll(), HardwareEvent::Reset(ResetCause::WrongKey));
        assert_eq!(path.tripped(), Some(FatalCause::HardwareWatchdogExpired));
    }

    #[test]
    fn second_raise_does_not_double_fault() {
        let (wdt, _backup, path) = fatal_path();
        let first = FatalCause::AlreadyRegistered { task: "Pong".into() };
        path.raise(first.clone());
        let err = path.raise(FatalCause::NotRegistered { task: "Ping".into() });

        assert!(err.is_fatal());
        assert_eq!(wdt.kicks(), 1);
        assert_eq!(path.tripped(), Some(first));
    }

    #[tokio::test]
    async fn halted_resolves_after_raise() {
        let (_wdt, _backup, path) = fatal_path();
        let path = Arc::new(path);
        let waiter = {
            let path = path.clone();
            tokio::spawn(async move { path.halted().await })
        };
        tokio::task::yield_now().await;
        path.raise(FatalCause::HardwareWatchdogExpired);
        assert_eq!(waiter.await.unwrap(), FatalCause::HardwareWatchdogExpired);
    }

    #[tokio::test]
    async fn halted_resolves_immediately_when_already_tripped() {
        let (_wdt, _backup, path) = fatal_path();
        path.raise(FatalCause::HardwareWatchdogExpired);
        assert_eq!(path.halted().await, FatalCause::HardwareWatchdogExpired);
    }
}
