//! # SIANA hardware capability layer
//!
//! Narrow traits for the hardware the control core consumes: digital outputs,
//! PWM channels, edge-triggered interrupts, ultrasonic ranging and a battery
//! power monitor. Real board backends implement these traits outside this
//! workspace; the [`sim`] module provides the simulated backends the core
//! falls back to when no hardware is present.

use std::time::Duration;
use thiserror::Error;

pub mod sim;

pub use sim::{SimGpio, SimInterrupts, SimPowerMonitor, SimRanging};

/// Unified error type of the capability layer.
#[derive(Error, Debug)]
pub enum HalError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Read timeout")]
    Timeout,
    #[error("Capability unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid pin: {0}")]
    InvalidPin(u8),
    #[error("Device error: {0}")]
    Device(String),
}

impl HalError {
    /// Timeouts are expected during normal operation and map to sentinels upstream.
    pub fn is_timeout(&self) -> bool {
        matches!(self, HalError::Timeout)
    }
}

/// Logic level of a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

/// Edge selection for interrupt registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

/// Interrupt-context handler.
///
/// Runs on the backend's event thread. Implementations must stay
/// non-blocking: atomic updates or `try_send` only, no I/O and no logging.
pub type EdgeHandler = Box<dyn Fn() + Send + Sync + 'static>;

pub trait DigitalOutput: Send {
    fn set_level(&mut self, level: Level) -> Result<(), HalError>;
}

pub trait PwmOutput: Send {
    /// Duty cycle in percent, clamped by the implementation to `0.0..=100.0`.
    fn set_duty(&mut self, duty_pct: f64) -> Result<(), HalError>;
    fn duty(&self) -> f64;
}

/// Factory for output lines of one GPIO controller.
pub trait GpioBackend: Send + Sync {
    fn output(&self, pin: u8) -> Result<Box<dyn DigitalOutput>, HalError>;
    fn pwm(&self, pin: u8, frequency_hz: u32) -> Result<Box<dyn PwmOutput>, HalError>;
    fn name(&self) -> &'static str;
}

pub trait InterruptController: Send + Sync {
    fn register(&self, pin: u8, edge: Edge, handler: EdgeHandler) -> Result<(), HalError>;
}

/// One distance sensor (HC-SR04 class ultrasonic ranger).
pub trait RangingSensor: Send {
    /// Distance to the nearest echo in centimetres.
    ///
    /// Returns [`HalError::Timeout`] when no echo arrives in time.
    fn measure_cm(&mut self) -> Result<f64, HalError>;

    /// Longest wait for the echo pulse before giving up.
    fn set_echo_timeout(&mut self, timeout: Duration);
}

/// Bus voltage, current and power measured at the battery shunt.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PowerSample {
    pub voltage_v: f64,
    pub current_a: f64,
    pub power_w: f64,
}

pub trait PowerMonitor: Send {
    fn sample(&mut self) -> Result<PowerSample, HalError>;
}
