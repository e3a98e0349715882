//! Hardware boundary of the orbos supervisory kernel.
//!
//! The kernel only ever talks to the traits in this crate, so the same
//! supervisory code runs against real peripherals or against the in-process
//! simulations in [`sim`].
//!
//! | Module | Peripheral |
//! |---|---|
//! | [`clock`] | free-running millisecond tick counter |
//! | [`watchdog`] | independent hardware watchdog timer |
//! | [`backup`] | reset-surviving backup register holding the boot marker |
//! | [`sensor`] | leaf sensor and status-indicator drivers |
//! | [`sim`] | simulated implementations of all of the above |

pub mod backup;
pub mod clock;
pub mod sensor;
pub mod sim;
pub mod watchdog;

pub use backup::{BackupRegister, FileBackupRegister, PriorShutdown};
pub use clock::{Clock, MonotonicClock};
pub use sensor::{Indicator, Reading, Sensor};
pub use watchdog::{HardwareEvent, HardwareWatchdog, ResetCause, WatchdogConfig};
