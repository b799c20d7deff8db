//! Driver error types

use siana_hal::HalError;
use thiserror::Error;

/// Driver layer error
#[derive(Error, Debug)]
pub enum DriverError {
    /// Hardware capability error
    #[error("HAL error: {0}")]
    Hal(#[from] HalError),

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Sensor name not known to the obstacle manager
    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    /// Operation on a drive that was already shut down
    #[error("Motor drive is shut down")]
    ShutDown,
}
