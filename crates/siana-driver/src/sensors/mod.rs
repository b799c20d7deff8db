//! Periodic sensing: obstacle ranging and battery monitoring

mod battery;
mod obstacle;

pub use battery::{BatteryMonitor, BatteryTelemetry};
pub use obstacle::{CLEAR_PATH_CM, ObstacleManager, ObstacleThresholds, Ranger, SensorReadings};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Mounting position of an ultrasonic ranger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorId {
    Front,
    Rear,
    Left,
}

impl SensorId {
    /// Scan order.
    pub const ALL: [SensorId; 3] = [SensorId::Front, SensorId::Rear, SensorId::Left];

    pub fn as_str(self) -> &'static str {
        match self {
            SensorId::Front => "front",
            SensorId::Rear => "rear",
            SensorId::Left => "left",
        }
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorId {
    type Err = crate::DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "front" => Ok(SensorId::Front),
            "rear" => Ok(SensorId::Rear),
            "left" => Ok(SensorId::Left),
            other => Err(crate::DriverError::UnknownSensor(other.to_string())),
        }
    }
}
