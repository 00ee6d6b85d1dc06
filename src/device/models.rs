use serde::{Deserialize, Serialize};

use super::{DeviceError, Result};
use crate::serial::SerialSettings;

pub const DEFAULT_SAMPLE_INTERVAL_SECS: u64 = 1;

/// Snapshot of the supply, queried fresh every time and never cached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub powered: bool,
    pub voltage: f64,
    pub current: f64,
}

/// Settings the front end hands to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub port: Option<String>,
    pub sample_interval_secs: u64,
    pub serial: SerialSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            port: None,
            sample_interval_secs: DEFAULT_SAMPLE_INTERVAL_SECS,
            serial: SerialSettings::default(),
        }
    }
}

/// Caller-side check for a voltage setpoint. The controller itself sends
/// whatever it is given.
pub fn validate_voltage(volts: f64) -> Result<f64> {
    if volts.is_finite() && volts >= 0.0 {
        Ok(volts)
    } else {
        Err(DeviceError::InvalidVoltage(volts))
    }
}

/// Caller-side check for a current setpoint or limit.
pub fn validate_current(amps: f64) -> Result<f64> {
    if amps.is_finite() && amps >= 0.0 {
        Ok(amps)
    } else {
        Err(DeviceError::InvalidCurrent(amps))
    }
}
