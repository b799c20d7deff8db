//! Peripheral collaborators: status indicator, inspection lighting, camera
//!
//! The control core only needs narrow contracts from these devices. The
//! implementations here are the ones the robot runs with when no richer
//! device driver is supplied: an in-memory indicator, PWM lighting on the
//! GPIO backend, and a synthetic camera that writes placeholder evidence.

use crate::ControlError;
use parking_lot::Mutex;
use serde::Serialize;
use siana_hal::{GpioBackend, HalError, PwmOutput};
use siana_tools::LightingConfig;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Visual status shown on the indicator tower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorState {
    #[default]
    Idle,
    Ready,
    Moving,
    Warning,
    BatteryLow,
    Emergency,
    Fault,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedColor {
    Green,
    Orange,
    Red,
}

pub trait StatusIndicator: Send + Sync {
    fn set_state(&self, state: IndicatorState);
    fn state(&self) -> IndicatorState;
    /// Short burst of one colour without changing the state.
    fn flash(&self, color: LedColor, times: u32);
    fn off(&self) {
        self.set_state(IndicatorState::Idle);
    }
}

pub trait Lighting: Send + Sync {
    /// Duty in percent, clamped to `0..=100`.
    fn set_duty(&self, duty_pct: f64);
    fn duty(&self) -> f64;
    /// Switch on at the configured default level.
    fn on(&self);
    fn off(&self) {
        self.set_duty(0.0);
    }
}

pub trait Camera: Send + Sync {
    /// Text burnt into the video feed.
    fn update_overlay(&self, distance_m: f64, status: &str);
    fn save_snapshot(&self, path: &Path) -> Result<(), ControlError>;
}

// ==================== Indicator ====================

/// Indicator that only records what it was asked to show.
#[derive(Debug, Default)]
pub struct MemoryIndicator {
    state: Mutex<IndicatorState>,
    flashes: Mutex<Vec<(LedColor, u32)>>,
}

impl MemoryIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flashes(&self) -> Vec<(LedColor, u32)> {
        self.flashes.lock().clone()
    }
}

impl StatusIndicator for MemoryIndicator {
    fn set_state(&self, state: IndicatorState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("Indicator: {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    fn state(&self) -> IndicatorState {
        *self.state.lock()
    }

    fn flash(&self, color: LedColor, times: u32) {
        debug!("Indicator flash {:?} x{}", color, times);
        self.flashes.lock().push((color, times));
    }
}

// ==================== Lighting ====================

/// Inspection lamp on one PWM line.
pub struct PwmLighting {
    pwm: Mutex<Box<dyn PwmOutput>>,
    default_pct: f64,
}

impl PwmLighting {
    pub fn open(gpio: &dyn GpioBackend, config: &LightingConfig) -> Result<Self, HalError> {
        let pwm = gpio.pwm(config.pwm_pin, config.frequency_hz)?;
        info!("Lighting on PWM pin {} ({} Hz)", config.pwm_pin, config.frequency_hz);
        Ok(Self {
            pwm: Mutex::new(pwm),
            default_pct: config.default_pct,
        })
    }
}

impl Lighting for PwmLighting {
    fn set_duty(&self, duty_pct: f64) {
        let duty = duty_pct.clamp(0.0, 100.0);
        if let Err(e) = self.pwm.lock().set_duty(duty) {
            warn!("Failed to set lighting duty: {}", e);
        }
    }

    fn duty(&self) -> f64 {
        self.pwm.lock().duty()
    }

    fn on(&self) {
        self.set_duty(self.default_pct);
    }
}

// ==================== Camera ====================

/// Minimal JPEG (SOI + EOI markers).
const PLACEHOLDER_JPEG: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xD9];

/// Camera stand-in that keeps the overlay text and writes placeholder frames.
#[derive(Debug, Default)]
pub struct SyntheticCamera {
    overlay: Mutex<(f64, String)>,
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overlay(&self) -> (f64, String) {
        self.overlay.lock().clone()
    }
}

impl Camera for SyntheticCamera {
    fn update_overlay(&self, distance_m: f64, status: &str) {
        *self.overlay.lock() = (distance_m, status.to_string());
    }

    fn save_snapshot(&self, path: &Path) -> Result<(), ControlError> {
        fs::write(path, PLACEHOLDER_JPEG)?;
        info!("Snapshot saved: {}", path.display());
        Ok(())
    }
}
