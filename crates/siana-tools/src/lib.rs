//! # SIANA Tools - shared configuration
//!
//! **Dependency rule**: no dependency on the driver or control crates.
//!
//! ## Modules
//!
//! - `config` - robot configuration (TOML, serde)

pub mod config;

pub use config::{
    BatteryConfig, ConfigError, EncoderConfig, EncoderPins, EvidenceConfig, LightingConfig,
    MotionConfig, MotorConfig, MotorPins, ObstacleConfig, RangerPins, RobotConfig, SafetyConfig,
};
