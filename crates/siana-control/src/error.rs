//! Control layer errors

use siana_driver::DriverError;
use siana_hal::HalError;
use siana_tools::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    /// Action name outside the command vocabulary
    #[error("Unknown command: '{0}'")]
    UnknownAction(String),

    /// Command that needs a numeric `value` received none
    #[error("Command '{0}' requires a numeric value")]
    MissingValue(&'static str),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("HAL error: {0}")]
    Hal(#[from] HalError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Camera not capturing
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),
}
