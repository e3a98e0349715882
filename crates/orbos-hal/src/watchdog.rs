//! Independent hardware watchdog timer.
//!
//! The timer resets the processor unless its clear register receives
//! [`CLEAR_KEY`] at least once per period.  Writing any other value, such as
//! [`WRONG_KEY`], resets the processor immediately.  That second property is
//! what the fatal path relies on: the reset does not depend on any software
//! that may itself be broken.

use orbos_types::OrbError;
use tracing::debug;

/// Value that refreshes the hardware deadline.
pub const CLEAR_KEY: u8 = 0xA5;

/// Deliberately incorrect clear value; forces an immediate reset.
pub const WRONG_KEY: u8 = 0x12;

/// Timer period and early-warning offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Time without a feed after which the processor is reset.
    pub period_ms: u32,
    /// Time without a feed after which the early-warning interrupt fires.
    pub early_warning_ms: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            period_ms: 16_384,
            early_warning_ms: 8_192,
        }
    }
}

impl WatchdogConfig {
    /// # Errors
    ///
    /// Returns [`OrbError::HardwareFault`] when the period is zero or the
    /// early warning would not fire before the reset.
    pub fn validate(&self) -> Result<(), OrbError> {
        if self.period_ms == 0 {
            return Err(fault("period must be non-zero"));
        }
        if self.early_warning_ms >= self.period_ms {
            return Err(fault(format!(
                "early warning at {} ms does not precede the {} ms period",
                self.early_warning_ms, self.period_ms
            )));
        }
        Ok(())
    }
}

fn fault(details: impl Into<String>) -> OrbError {
    OrbError::HardwareFault {
        component: "hardware watchdog".to_string(),
        details: details.into(),
    }
}

/// Why the hardware reset the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCause {
    /// A value other than [`CLEAR_KEY`] was written to the clear register.
    WrongKey,
    /// The period elapsed without a feed.
    Timeout,
}

/// Pending hardware interrupt reported by [`HardwareWatchdog::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareEvent {
    Idle,
    EarlyWarning,
    Reset(ResetCause),
}

/// The watchdog peripheral.  The watchdog supervisor is its sole owner; the
/// fatal path borrows it only to kick.
pub trait HardwareWatchdog: Send + Sync {
    /// Program the period and early-warning offset, then start the timer.
    ///
    /// # Errors
    ///
    /// Returns [`OrbError::HardwareFault`] if the configuration is rejected.
    fn configure(&self, config: WatchdogConfig) -> Result<(), OrbError>;

    /// Write `key` into the clear register.
    fn write_clear(&self, key: u8);

    /// Next pending interrupt, if any.  Reset is sticky.
    fn poll(&self) -> HardwareEvent;

    /// Refresh the deadline.
    fn feed(&self) {
        debug!(target: "orbos::hal", "hardware watchdog fed");
        self.write_clear(CLEAR_KEY);
    }

    /// Force an immediate reset.
    fn kick(&self) {
        debug!(target: "orbos::hal", "hardware watchdog kicked");
        self.write_clear(WRONG_KEY);
    }
}
