//! # Robot configuration
//!
//! Hardware wiring, geometry, thresholds and timing of the inspection robot.
//! Every section falls back to the reference robot's values, so an empty
//! TOML file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Full robot configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RobotConfig {
    /// Default tracing filter directive (`RUST_LOG` overrides it)
    pub log_level: String,
    /// Telemetry broadcast period (ms), 5 Hz by default
    pub telemetry_interval_ms: u64,
    pub motors: MotorConfig,
    pub encoders: EncoderConfig,
    pub obstacles: ObstacleConfig,
    pub battery: BatteryConfig,
    pub motion: MotionConfig,
    pub safety: SafetyConfig,
    pub lighting: LightingConfig,
    pub evidence: EvidenceConfig,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            telemetry_interval_ms: 200,
            motors: MotorConfig::default(),
            encoders: EncoderConfig::default(),
            obstacles: ObstacleConfig::default(),
            battery: BatteryConfig::default(),
            motion: MotionConfig::default(),
            safety: SafetyConfig::default(),
            lighting: LightingConfig::default(),
            evidence: EvidenceConfig::default(),
        }
    }
}

impl RobotConfig {
    /// Load and validate a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RobotConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }

    /// Reject values the control core cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.telemetry_interval_ms == 0 {
            return invalid("telemetry_interval_ms must be > 0".into());
        }
        if !(self.motors.ramp_step_pct > 0.0 && self.motors.ramp_step_pct <= 100.0) {
            return invalid(format!(
                "motors.ramp_step_pct must be in (0, 100], got {}",
                self.motors.ramp_step_pct
            ));
        }
        if self.motors.ramp_interval_ms == 0 {
            return invalid("motors.ramp_interval_ms must be > 0".into());
        }
        if self.encoders.ticks_per_rev == 0 {
            return invalid("encoders.ticks_per_rev must be > 0".into());
        }
        if self.encoders.wheel_diameter_mm <= 0.0 || self.encoders.wheel_base_mm <= 0.0 {
            return invalid("wheel diameter and wheel base must be positive".into());
        }
        if self.encoders.odometry_interval_ms == 0 {
            return invalid("encoders.odometry_interval_ms must be > 0".into());
        }
        if self.obstacles.warning_cm <= self.obstacles.critical_cm {
            return invalid(format!(
                "obstacles.warning_cm ({}) must exceed critical_cm ({})",
                self.obstacles.warning_cm, self.obstacles.critical_cm
            ));
        }
        if self.obstacles.scan_interval_ms == 0 || self.obstacles.echo_timeout_ms == 0 {
            return invalid("obstacles scan interval and echo timeout must be > 0".into());
        }
        if self.battery.min_v >= self.battery.max_v {
            return invalid(format!(
                "battery.min_v ({}) must be below max_v ({})",
                self.battery.min_v, self.battery.max_v
            ));
        }
        if self.battery.critical_soc_pct > self.battery.low_soc_pct {
            return invalid("battery.critical_soc_pct must not exceed low_soc_pct".into());
        }
        if self.battery.sample_interval_ms == 0 {
            return invalid("battery.sample_interval_ms must be > 0".into());
        }
        let m = &self.motion;
        if !(0.0 <= m.speed_min_pct
            && m.speed_min_pct <= m.speed_default_pct
            && m.speed_default_pct <= m.speed_max_pct
            && m.speed_max_pct <= 100.0)
        {
            return invalid(format!(
                "motion speeds must satisfy 0 <= min ({}) <= default ({}) <= max ({}) <= 100",
                m.speed_min_pct, m.speed_default_pct, m.speed_max_pct
            ));
        }
        for (name, factor) in [
            ("turn_factor", m.turn_factor),
            ("pivot_factor", m.pivot_factor),
            ("warning_slowdown", m.warning_slowdown),
        ] {
            if !(factor > 0.0 && factor <= 1.0) {
                return invalid(format!("motion.{} must be in (0, 1], got {}", name, factor));
            }
        }
        if self.safety.watchdog_timeout_ms == 0 || self.safety.watchdog_check_ms == 0 {
            return invalid("safety watchdog timings must be > 0".into());
        }
        if self.safety.track_length_m <= 0.0 || self.safety.track_margin_m < 0.0 {
            return invalid("safety track length must be positive and margin non-negative".into());
        }
        if !(0.0..=100.0).contains(&self.lighting.default_pct) {
            return invalid("lighting.default_pct must be in [0, 100]".into());
        }
        Ok(())
    }
}

// ==================== Motors ====================

/// H-bridge wiring of one motor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotorPins {
    pub pwm: u8,
    pub in1: u8,
    pub in2: u8,
    /// Motor wired reversed: direction lines are swapped
    #[serde(default)]
    pub inverted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MotorConfig {
    pub left: MotorPins,
    pub right: MotorPins,
    pub pwm_frequency_hz: u32,
    /// Ramp increment per tick (%)
    pub ramp_step_pct: f64,
    pub ramp_interval_ms: u64,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            left: MotorPins {
                pwm: 12,
                in1: 23,
                in2: 24,
                inverted: false,
            },
            right: MotorPins {
                pwm: 13,
                in1: 27,
                in2: 22,
                inverted: true,
            },
            pwm_frequency_hz: 20_000,
            ramp_step_pct: 5.0,
            ramp_interval_ms: 30,
        }
    }
}

impl MotorConfig {
    pub fn ramp_interval(&self) -> Duration {
        Duration::from_millis(self.ramp_interval_ms)
    }
}

// ==================== Encoders ====================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncoderPins {
    pub a: u8,
    /// Wired but not used for direction sensing
    pub b: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncoderConfig {
    pub left: EncoderPins,
    pub right: EncoderPins,
    pub ticks_per_rev: u32,
    pub wheel_diameter_mm: f64,
    pub wheel_base_mm: f64,
    pub odometry_interval_ms: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            left: EncoderPins { a: 5, b: 6 },
            right: EncoderPins { a: 16, b: 20 },
            ticks_per_rev: 360,
            wheel_diameter_mm: 120.0,
            wheel_base_mm: 450.0,
            odometry_interval_ms: 100,
        }
    }
}

impl EncoderConfig {
    pub fn wheel_circumference_m(&self) -> f64 {
        std::f64::consts::PI * self.wheel_diameter_mm / 1000.0
    }

    pub fn wheel_base_m(&self) -> f64 {
        self.wheel_base_mm / 1000.0
    }

    pub fn odometry_interval(&self) -> Duration {
        Duration::from_millis(self.odometry_interval_ms)
    }
}

// ==================== Obstacles ====================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangerPins {
    pub trig: u8,
    pub echo: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObstacleConfig {
    pub front: RangerPins,
    pub rear: RangerPins,
    pub left: RangerPins,
    /// Below this distance the path is blocked
    pub critical_cm: f64,
    /// Below this distance the robot slows down
    pub warning_cm: f64,
    pub scan_interval_ms: u64,
    pub echo_timeout_ms: u64,
}

impl Default for ObstacleConfig {
    fn default() -> Self {
        Self {
            front: RangerPins { trig: 17, echo: 4 },
            rear: RangerPins { trig: 18, echo: 25 },
            left: RangerPins { trig: 19, echo: 26 },
            critical_cm: 15.0,
            warning_cm: 40.0,
            scan_interval_ms: 50,
            echo_timeout_ms: 30,
        }
    }
}

impl ObstacleConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }
}

// ==================== Battery ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatteryConfig {
    pub i2c_address: u8,
    pub shunt_ohm: f64,
    pub max_expected_a: f64,
    pub nominal_v: f64,
    /// Cut-off voltage (0 % SOC)
    pub min_v: f64,
    /// Full-charge voltage (100 % SOC)
    pub max_v: f64,
    pub low_soc_pct: f64,
    /// Below this SOC the safety layer latches the emergency stop
    pub critical_soc_pct: f64,
    pub sample_interval_ms: u64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            i2c_address: 0x40,
            shunt_ohm: 0.1,
            max_expected_a: 5.0,
            nominal_v: 24.0,
            min_v: 20.0,
            max_v: 29.4,
            low_soc_pct: 15.0,
            critical_soc_pct: 5.0,
            sample_interval_ms: 2000,
        }
    }
}

impl BatteryConfig {
    /// Linear interpolation of `min_v..max_v` onto `0..100` %, clamped and
    /// rounded to 0.1 %.
    pub fn soc_from_voltage(&self, voltage_v: f64) -> f64 {
        let soc = (voltage_v - self.min_v) / (self.max_v - self.min_v) * 100.0;
        ((soc * 10.0).round() / 10.0).clamp(0.0, 100.0)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

// ==================== Motion ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MotionConfig {
    /// Anti-stall PWM floor (%)
    pub speed_min_pct: f64,
    pub speed_max_pct: f64,
    /// About 4 km/h on the reference robot
    pub speed_default_pct: f64,
    pub speed_step_pct: f64,
    /// Inner-wheel factor while turning
    pub turn_factor: f64,
    /// Share of the cruise speed used for in-place rotation
    pub pivot_factor: f64,
    /// Multiplier applied to the cruise speed on an obstacle warning
    pub warning_slowdown: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            speed_min_pct: 20.0,
            speed_max_pct: 100.0,
            speed_default_pct: 60.0,
            speed_step_pct: 10.0,
            turn_factor: 0.7,
            pivot_factor: 0.6,
            warning_slowdown: 0.5,
        }
    }
}

impl MotionConfig {
    pub fn clamp_speed(&self, speed_pct: f64) -> f64 {
        speed_pct.clamp(self.speed_min_pct, self.speed_max_pct)
    }
}

// ==================== Safety ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SafetyConfig {
    /// Physical E-STOP button, active low with pull-up
    pub estop_pin: u8,
    pub estop_debounce_ms: u64,
    /// No command for this long → soft stop
    pub watchdog_timeout_ms: u64,
    pub watchdog_check_ms: u64,
    /// Length of the inspection pit
    pub track_length_m: f64,
    /// Soft-stop zone before the end of the pit
    pub track_margin_m: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            estop_pin: 21,
            estop_debounce_ms: 200,
            watchdog_timeout_ms: 15_000,
            watchdog_check_ms: 2_000,
            track_length_m: 200.0,
            track_margin_m: 2.0,
        }
    }
}

impl SafetyConfig {
    pub fn estop_debounce(&self) -> Duration {
        Duration::from_millis(self.estop_debounce_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn watchdog_check(&self) -> Duration {
        Duration::from_millis(self.watchdog_check_ms)
    }
}

// ==================== Lighting / evidence ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LightingConfig {
    pub pwm_pin: u8,
    pub frequency_hz: u32,
    pub default_pct: f64,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            pwm_pin: 9,
            frequency_hz: 1000,
            default_pct: 80.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvidenceConfig {
    pub dir: PathBuf,
    pub max_images: u32,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/home/siana/siana_inspections"),
            max_images: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RobotConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.motors.right.inverted);
        assert!(!config.motors.left.inverted);
        assert_eq!(config.encoders.ticks_per_rev, 360);
        assert_eq!(config.safety.watchdog_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = RobotConfig::from_toml_str("").unwrap();
        assert_eq!(config, RobotConfig::default());
    }

    #[test]
    fn test_partial_section_override() {
        let config = RobotConfig::from_toml_str(
            r#"
            [safety]
            track_length_m = 120.0

            [motion]
            speed_default_pct = 50.0
            "#,
        )
        .unwrap();
        assert_eq!(config.safety.track_length_m, 120.0);
        assert_eq!(config.safety.track_margin_m, 2.0);
        assert_eq!(config.motion.speed_default_pct, 50.0);
        assert_eq!(config.motion.turn_factor, 0.7);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = RobotConfig::from_toml_str("[safety]\nwatchdog_timeout = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut config = RobotConfig::default();
        config.obstacles.warning_cm = 10.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = RobotConfig::default();
        config.battery.min_v = 30.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = RobotConfig::default();
        config.motion.speed_min_pct = 70.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = RobotConfig::default();
        config.motion.turn_factor = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = RobotConfig::default();
        config.obstacles.echo_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_soc_from_voltage() {
        let battery = BatteryConfig::default();
        assert_eq!(battery.soc_from_voltage(20.0), 0.0);
        assert_eq!(battery.soc_from_voltage(29.4), 100.0);
        assert_eq!(battery.soc_from_voltage(35.0), 100.0);
        assert_eq!(battery.soc_from_voltage(10.0), 0.0);
        // (24.7 - 20) / 9.4 = 50 %
        assert_eq!(battery.soc_from_voltage(24.7), 50.0);
    }

    #[test]
    fn test_geometry_helpers() {
        let encoders = EncoderConfig::default();
        assert!((encoders.wheel_circumference_m() - std::f64::consts::PI * 0.12).abs() < 1e-12);
        assert_eq!(encoders.wheel_base_m(), 0.45);
    }

    #[test]
    fn test_clamp_speed() {
        let motion = MotionConfig::default();
        assert_eq!(motion.clamp_speed(5.0), 20.0);
        assert_eq!(motion.clamp_speed(55.0), 55.0);
        assert_eq!(motion.clamp_speed(150.0), 100.0);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("robot.toml");

        let mut config = RobotConfig::default();
        config.safety.watchdog_timeout_ms = 5_000;
        config.evidence.dir = PathBuf::from("/tmp/evidence");
        config.save_to_file(&path).unwrap();

        let loaded = RobotConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = RobotConfig::load_from_file("/nonexistent/siana/robot.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
