//! In-process simulated peripherals for headless runs and tests.
//!
//! [`SimWatchdog`] models the independent timer against any [`Clock`]: it
//! tracks the last correct feed, raises the early warning once per period
//! and latches a reset on expiry or on a wrong key.  Paired with
//! [`ManualClock`] every time-dependent property is deterministic.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use orbos_hal::sim::{ManualClock, SimWatchdog};
//! use orbos_hal::{HardwareEvent, HardwareWatchdog, ResetCause, WatchdogConfig};
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let wdt = SimWatchdog::new(clock.clone());
//! wdt.configure(WatchdogConfig { period_ms: 100, early_warning_ms: 50 }).unwrap();
//!
//! clock.advance(60);
//! assert_eq!(wdt.poll(), HardwareEvent::EarlyWarning);
//! clock.advance(40);
//! assert_eq!(wdt.poll(), HardwareEvent::Reset(ResetCause::Timeout));
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use orbos_types::OrbError;

use crate::backup::BackupRegister;
use crate::clock::{Clock, elapsed_ms};
use crate::sensor::{Indicator, Reading, Sensor};
use crate::watchdog::{CLEAR_KEY, HardwareEvent, HardwareWatchdog, ResetCause, WatchdogConfig};

// ────────────────────────────────────────────────────────────────────────────
// Clock
// ────────────────────────────────────────────────────────────────────────────

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        Self {
            now: AtomicU32::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: u32) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    /// Move forward by `ms`, wrapping like the real counter.
    pub fn advance(&self, ms: u32) {
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| Some(t.wrapping_add(ms)));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Hardware watchdog
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct WatchdogState {
    config: Option<WatchdogConfig>,
    last_feed_ms: u32,
    warned: bool,
    reset: Option<ResetCause>,
    feeds: u32,
    kicks: u32,
}

/// Simulated independent watchdog timer.
pub struct SimWatchdog {
    clock: Arc<dyn Clock>,
    state: Mutex<WatchdogState>,
}

impl SimWatchdog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(WatchdogState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, WatchdogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of correct-key writes so far.
    pub fn feeds(&self) -> u32 {
        self.state().feeds
    }

    /// Number of wrong-key writes so far.
    pub fn kicks(&self) -> u32 {
        self.state().kicks
    }

    pub fn config(&self) -> Option<WatchdogConfig> {
        self.state().config
    }

    /// The latched reset, if the timer has fired.
    pub fn reset_cause(&self) -> Option<ResetCause> {
        self.state().reset
    }
}

impl HardwareWatchdog for SimWatchdog {
    fn configure(&self, config: WatchdogConfig) -> Result<(), OrbError> {
        config.validate()?;
        let now = self.clock.now_ms();
        let mut state = self.state();
        state.config = Some(config);
        state.last_feed_ms = now;
        state.warned = false;
        Ok(())
    }

    fn write_clear(&self, key: u8) {
        let now = self.clock.now_ms();
        let mut state = self.state();
        if key == CLEAR_KEY {
            state.feeds += 1;
            if state.reset.is_none() {
                state.last_feed_ms = now;
                state.warned = false;
            }
        } else {
            state.kicks += 1;
            state.reset.get_or_insert(ResetCause::WrongKey);
        }
    }

    fn poll(&self) -> HardwareEvent {
        let now = self.clock.now_ms();
        let mut state = self.state();
        if let Some(cause) = state.reset {
            return HardwareEvent::Reset(cause);
        }
        let Some(config) = state.config else {
            return HardwareEvent::Idle;
        };
        let elapsed = elapsed_ms(now, state.last_feed_ms);
        if elapsed >= config.period_ms {
            state.reset = Some(ResetCause::Timeout);
            return HardwareEvent::Reset(ResetCause::Timeout);
        }
        if elapsed >= config.early_warning_ms && !state.warned {
            state.warned = true;
            return HardwareEvent::EarlyWarning;
        }
        HardwareEvent::Idle
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Backup register
// ────────────────────────────────────────────────────────────────────────────

/// Backup register held in memory; survives "resets" within one process.
#[derive(Debug, Default)]
pub struct SimBackupRegister {
    value: AtomicU32,
}

impl SimBackupRegister {
    pub fn new(initial: u32) -> Self {
        Self {
            value: AtomicU32::new(initial),
        }
    }
}

impl BackupRegister for SimBackupRegister {
    fn read(&self) -> Result<u32, OrbError> {
        Ok(self.value.load(Ordering::SeqCst))
    }

    fn write(&self, value: u32) -> Result<(), OrbError> {
        self.value.store(value, Ordering::SeqCst);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sensors
// ────────────────────────────────────────────────────────────────────────────

/// Simulated three-axis magnetometer: a constant-magnitude field slowly
/// rotating about the z axis, in microtesla.
#[derive(Debug)]
pub struct SimMagnetometer {
    id: String,
    step: u32,
}

impl SimMagnetometer {
    pub fn new(id: impl Into<String>) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            step: 0,
        })
    }
}

impl Sensor for SimMagnetometer {
    fn id(&self) -> &str {
        &self.id
    }

    fn sample(&mut self) -> Result<Reading, OrbError> {
        let angle = self.step as f32 * 0.1;
        self.step = self.step.wrapping_add(1);
        Ok([30.0 * angle.cos(), 30.0 * angle.sin(), -12.5])
    }
}

/// Simulated photodiode cycling between eclipse and sunlight, in lux.
#[derive(Debug)]
pub struct SimPhotodiode {
    id: String,
    step: u32,
}

impl SimPhotodiode {
    pub fn new(id: impl Into<String>) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            step: 0,
        })
    }
}

impl Sensor for SimPhotodiode {
    fn id(&self) -> &str {
        &self.id
    }

    fn sample(&mut self) -> Result<Reading, OrbError> {
        let lux = if (self.step / 8) % 2 == 0 { 1_200.0 } else { 0.5 };
        self.step = self.step.wrapping_add(1);
        Ok([lux, 0.0, 0.0])
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Indicator
// ────────────────────────────────────────────────────────────────────────────

/// Simulated LED that counts its transitions.
#[derive(Debug)]
pub struct SimIndicator {
    id: String,
    on: bool,
    toggles: Arc<AtomicU32>,
}

impl SimIndicator {
    pub fn new(id: impl Into<String>) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            on: false,
            toggles: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Shared counter of on/off transitions, readable after the indicator
    /// has been moved into a task.
    pub fn toggles(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.toggles)
    }
}

impl Indicator for SimIndicator {
    fn id(&self) -> &str {
        &self.id
    }

    fn set(&mut self, on: bool) -> Result<(), OrbError> {
        if self.on != on {
            self.toggles.fetch_add(1, Ordering::SeqCst);
        }
        self.on = on;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchdog::WRONG_KEY;

    fn wdt(period_ms: u32) -> (Arc<ManualClock>, SimWatchdog) {
        let clock = Arc::new(ManualClock::new(1_000));
        let wdt = SimWatchdog::new(clock.clone());
        wdt.configure(WatchdogConfig {
            period_ms,
            early_warning_ms: period_ms / 2,
        })
        .unwrap();
        (clock, wdt)
    }

    #[test]
    fn unconfigured_watchdog_is_idle() {
        let clock = Arc::new(ManualClock::new(0));
        let wdt = SimWatchdog::new(clock.clone());
        clock.advance(1_000_000);
        assert_eq!(wdt.poll(), HardwareEvent::Idle);
    }

    #[test]
    fn feeding_postpones_expiry() {
        let (clock, wdt) = wdt(100);
        for _ in 0..10 {
            clock.advance(40);
            wdt.feed();
            assert_eq!(wdt.poll(), HardwareEvent::Idle);
        }
        assert_eq!(wdt.feeds(), 10);
        assert_eq!(wdt.reset_cause(), None);
    }

    #[test]
    fn early_warning_fires_once_per_period() {
        let (clock, wdt) = wdt(100);
        clock.advance(50);
        assert_eq!(wdt.poll(), HardwareEvent::EarlyWarning);
        assert_eq!(wdt.poll(), HardwareEvent::Idle);
        wdt.feed();
        clock.advance(60);
        assert_eq!(wdt.poll(), HardwareEvent::EarlyWarning);
    }

    #[test]
    fn expiry_latches_timeout_reset() {
        let (clock, wdt) = wdt(100);
        clock.advance(100);
        assert_eq!(wdt.poll(), HardwareEvent::Reset(ResetCause::Timeout));
        wdt.feed();
        assert_eq!(wdt.poll(), HardwareEvent::Reset(ResetCause::Timeout));
    }

    #[test]
    fn wrong_key_resets_immediately() {
        let (_clock, wdt) = wdt(100);
        wdt.write_clear(WRONG_KEY);
        assert_eq!(wdt.poll(), HardwareEvent::Reset(ResetCause::WrongKey));
        assert_eq!(wdt.kicks(), 1);
    }

    #[test]
    fn expiry_is_detected_across_counter_wrap() {
        let clock = Arc::new(ManualClock::new(u32::MAX - 10));
        let wdt = SimWatchdog::new(clock.clone());
        wdt.configure(WatchdogConfig {
            period_ms: 100,
            early_warning_ms: 50,
        })
        .unwrap();
        clock.advance(60);
        assert_eq!(wdt.poll(), HardwareEvent::EarlyWarning);
        clock.advance(40);
        assert_eq!(wdt.poll(), HardwareEvent::Reset(ResetCause::Timeout));
    }

    #[test]
    fn backup_register_round_trip() {
        let reg = SimBackupRegister::new(7);
        assert_eq!(reg.read().unwrap(), 7);
        reg.write(9).unwrap();
        assert_eq!(reg.read().unwrap(), 9);
    }

    #[test]
    fn photodiode_alternates_between_light_and_eclipse() {
        let mut diode = SimPhotodiode::new("photodiode");
        let first = diode.sample().unwrap()[0];
        for _ in 0..7 {
            diode.sample().unwrap();
        }
        let ninth = diode.sample().unwrap()[0];
        assert!(first > 1_000.0);
        assert!(ninth < 1.0);
    }

    #[test]
    fn magnetometer_field_magnitude_is_stable() {
        let mut mag = SimMagnetometer::new("magnetometer");
        for _ in 0..5 {
            let [x, y, _] = mag.sample().unwrap();
            assert!(((x * x + y * y).sqrt() - 30.0).abs() < 1e-3);
        }
    }

    #[test]
    fn indicator_counts_transitions_only() {
        let mut led = SimIndicator::new("status_led");
        let toggles = led.toggles();
        led.set(true).unwrap();
        led.set(true).unwrap();
        led.set(false).unwrap();
        assert!(!led.is_on());
        assert_eq!(toggles.load(Ordering::SeqCst), 2);
    }
}
