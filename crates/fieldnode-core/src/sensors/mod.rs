//! I2C sensor drivers and the sampling seam consumed by the demo nodes.
//!
//! Each driver owns its bus handle and delay, exposes the fixed register
//! sequences the part needs (init / configure / measure / release), and keeps
//! its decode formulas as plain integer functions so they stay testable
//! without hardware.

#[cfg(feature = "sensor-bmp280")]
pub mod bmp280;
#[cfg(feature = "sensor-ccs811")]
pub mod ccs811;
#[cfg(feature = "sensor-si1133")]
pub mod si1133;
#[cfg(feature = "sensor-si70xx")]
pub mod si70xx;
#[cfg(feature = "sensor-si7210")]
pub mod si7210;
#[cfg(feature = "sensor-si72xx")]
pub mod si72xx;
#[cfg(feature = "sensor-veml6035")]
pub mod veml6035;

#[cfg(feature = "sensor-bmp280")]
pub use bmp280::Bmp280;
#[cfg(feature = "sensor-ccs811")]
pub use ccs811::Ccs811;
#[cfg(feature = "sensor-si1133")]
pub use si1133::Si1133;
#[cfg(feature = "sensor-si70xx")]
pub use si70xx::Si70xx;
#[cfg(feature = "sensor-si7210")]
pub use si7210::Si7210;
#[cfg(feature = "sensor-si72xx")]
pub use si72xx::Si72xx;
#[cfg(feature = "sensor-veml6035")]
pub use veml6035::Veml6035;

use thiserror_no_std::Error;

/// Errors surfaced by sensor sampling.
///
/// Carries static names instead of the underlying bus error so it stays the
/// same type for every driver; the failure site logs the bus detail before
/// mapping into this.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor} initialization failed: {details}")]
    InitializationFailed {
        sensor: &'static str,
        details: &'static str,
    },
    #[error("{sensor} failed to {operation}: {details}")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
    #[error("{sensor} timed out waiting to {operation}")]
    Timeout {
        sensor: &'static str,
        operation: &'static str,
    },
}

/// One temperature/humidity sample in fixed-point milli-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentSample {
    pub temperature_milli_celsius: i32,
    pub humidity_milli_percent: i32,
}

/// Trait for sensors that can feed the periodic reporting demo.
///
/// The sensor node is generic over this seam, so the simulator can substitute
/// a synthetic sensor for a real part.
pub trait EnvironmentSensor {
    /// Take one blocking measurement.
    fn sample(&mut self) -> Result<EnvironmentSample, SensorError>;
}
