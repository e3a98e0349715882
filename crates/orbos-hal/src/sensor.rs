//! Leaf drivers polled by the sensor and actuator tasks.
//!
//! Each driver registers into a task at boot and is only ever driven by that
//! task's loop; the kernel itself never touches them.

use orbos_types::OrbError;

/// One three-axis sample.  Single-channel sensors fill the first axis.
pub type Reading = [f32; 3];

/// A polled sensor (magnetometer, photodiode, ...).
pub trait Sensor: Send {
    /// Stable identifier, e.g. `"magnetometer"`.
    fn id(&self) -> &str;

    /// Take one sample.
    ///
    /// # Errors
    ///
    /// Returns [`OrbError::HardwareFault`] if the device does not answer.
    fn sample(&mut self) -> Result<Reading, OrbError>;
}

/// A discrete status output (LED).
pub trait Indicator: Send {
    fn id(&self) -> &str;

    /// # Errors
    ///
    /// Returns [`OrbError::HardwareFault`] if the output cannot be driven.
    fn set(&mut self, on: bool) -> Result<(), OrbError>;

    fn is_on(&self) -> bool;
}
