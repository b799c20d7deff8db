//! # SIANA Driver
//!
//! Hardware-facing layer of the inspection robot: differential drive with an
//! acceleration ramp and odometry, ultrasonic obstacle scanning and battery
//! monitoring. Every periodic activity runs on its own [`PeriodicWorker`]
//! thread; interrupt-context work is limited to atomic updates.
//!
//! ## Modules
//!
//! - `motor` - H-bridge channels, ramp, encoder counters, odometry, [`MotorDrive`]
//! - `sensors` - [`ObstacleManager`] and [`BatteryMonitor`]
//! - `hooks` - listener traits for sensor threshold events
//! - `watchdog` - [`WatchdogClock`]
//! - `debounce` - lock-free edge debouncer
//! - `worker` - periodic worker threads

pub mod debounce;
pub mod error;
pub mod hooks;
pub mod motor;
pub mod sensors;
pub mod watchdog;
pub mod worker;

pub use debounce::Debouncer;
pub use error::DriverError;
pub use hooks::{BatteryListener, ListenerSet, ObstacleListener};
pub use motor::{DriveConfig, MotorDrive, MotorTelemetry, OdometrySnapshot, WheelPair};
pub use sensors::{
    BatteryMonitor, BatteryTelemetry, CLEAR_PATH_CM, ObstacleManager, SensorId, SensorReadings,
};
pub use watchdog::WatchdogClock;
pub use worker::{JoinTimeout, PeriodicWorker, WorkerOptions};
