//! Differential drive
//!
//! [`MotorDrive`] owns both H-bridge channels, the acceleration ramp, the
//! encoder counters and the odometry integrator.
//!
//! # Locking
//!
//! - Targets, applied speeds and the channels sit behind one short-held
//!   mutex (`motion`). The ramp tick, target updates, brake and emergency
//!   stop all take it, so an emergency stop can never be followed by a ramp
//!   write that re-energises a motor.
//! - The emergency latch is an `AtomicBool` that is only written under the
//!   `motion` lock but can be read lock-free.
//! - Encoder counters are atomics; edge handlers never take a lock.

mod channel;
mod odometry;
mod ramp;

pub use channel::{BridgeState, MotorChannel};
pub use odometry::{EncoderCounters, Odometry, OdometrySnapshot, WheelCounter};
pub use ramp::{RampState, WheelPair, step_toward};

use crate::DriverError;
use crate::worker::{PeriodicWorker, WorkerOptions};
use parking_lot::Mutex;
use serde::Serialize;
use siana_hal::{Edge, GpioBackend, InterruptController};
use siana_tools::{EncoderConfig, MotionConfig, MotorConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Motion parameters of the drive.
#[derive(Debug, Clone)]
pub struct DriveConfig {
    pub ramp_step_pct: f64,
    pub ramp_interval: Duration,
    pub speed_min_pct: f64,
    pub speed_max_pct: f64,
    pub turn_factor: f64,
}

impl DriveConfig {
    pub fn new(motors: &MotorConfig, motion: &MotionConfig) -> Self {
        Self {
            ramp_step_pct: motors.ramp_step_pct,
            ramp_interval: motors.ramp_interval(),
            speed_min_pct: motion.speed_min_pct,
            speed_max_pct: motion.speed_max_pct,
            turn_factor: motion.turn_factor,
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self::new(&MotorConfig::default(), &MotionConfig::default())
    }
}

/// Drive telemetry, rounded for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotorTelemetry {
    pub speed_left: f64,
    pub speed_right: f64,
    pub distance_m: f64,
    pub heading_deg: f64,
    pub emergency: bool,
}

struct Motion {
    ramp: RampState,
    left: MotorChannel,
    right: MotorChannel,
}

struct DriveShared {
    config: DriveConfig,
    motion: Mutex<Motion>,
    latch: AtomicBool,
    counters: Arc<EncoderCounters>,
    odometry: Mutex<Odometry>,
}

pub struct MotorDrive {
    shared: Arc<DriveShared>,
    ramp_worker: Mutex<Option<PeriodicWorker>>,
    shut_down: AtomicBool,
}

impl MotorDrive {
    pub fn new(
        gpio: &dyn GpioBackend,
        motors: &MotorConfig,
        encoders: &EncoderConfig,
        config: DriveConfig,
    ) -> Result<Self, DriverError> {
        let left = MotorChannel::open("left", gpio, &motors.left, motors.pwm_frequency_hz)?;
        let right = MotorChannel::open("right", gpio, &motors.right, motors.pwm_frequency_hz)?;

        info!(
            "MotorDrive initialised on {} backend (right inverted: {})",
            gpio.name(),
            motors.right.inverted
        );

        Ok(Self {
            shared: Arc::new(DriveShared {
                motion: Mutex::new(Motion {
                    ramp: RampState::new(config.ramp_step_pct),
                    left,
                    right,
                }),
                config,
                latch: AtomicBool::new(false),
                counters: Arc::new(EncoderCounters::default()),
                odometry: Mutex::new(Odometry::new(encoders)),
            }),
            ramp_worker: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Register rising-edge handlers on both encoder A channels.
    pub fn attach_encoders(
        &self,
        irq: &dyn InterruptController,
        encoders: &EncoderConfig,
    ) -> Result<(), DriverError> {
        let counters = self.shared.counters.clone();
        irq.register(encoders.left.a, Edge::Rising, Box::new(move || counters.left.pulse()))?;
        let counters = self.shared.counters.clone();
        irq.register(encoders.right.a, Edge::Rising, Box::new(move || counters.right.pulse()))?;
        info!(
            "Encoders attached on pins {} and {}",
            encoders.left.a, encoders.right.a
        );
        Ok(())
    }

    /// Start the background ramp loop. No-op if already running.
    pub fn start(&self) -> Result<(), DriverError> {
        let mut slot = self.ramp_worker.lock();
        if self.shut_down.load(Ordering::Acquire) {
            return Err(DriverError::ShutDown);
        }
        if slot.is_some() {
            return Ok(());
        }
        let shared = self.shared.clone();
        let worker = PeriodicWorker::spawn_with(
            "ramp",
            self.shared.config.ramp_interval,
            WorkerOptions {
                high_priority: true,
            },
            move || shared.ramp_tick(),
        )?;
        *slot = Some(worker);
        Ok(())
    }

    /// One ramp step; the background loop calls this every interval.
    pub fn ramp_tick(&self) {
        self.shared.ramp_tick();
    }

    // ==================== Targets ====================

    /// Set both wheel targets, clamped to the speed limit.
    ///
    /// Ignored while the emergency latch is set; returns whether the targets
    /// were taken.
    pub fn set_targets(&self, left: f64, right: f64) -> bool {
        let mut motion = self.shared.motion.lock();
        if self.shared.latch.load(Ordering::Acquire) {
            debug!("Targets ({:.1}, {:.1}) ignored: emergency latched", left, right);
            return false;
        }
        let limit = self.shared.config.speed_max_pct;
        motion.ramp.target = WheelPair::new(left, right).clamped(limit);
        debug!(
            "Targets set: left {:.1}%, right {:.1}%",
            motion.ramp.target.left, motion.ramp.target.right
        );
        true
    }

    pub fn forward(&self, speed_pct: f64) -> bool {
        self.set_targets(speed_pct, speed_pct)
    }

    pub fn backward(&self, speed_pct: f64) -> bool {
        self.set_targets(-speed_pct, -speed_pct)
    }

    /// Curve left: the left (inner) wheel runs at the turn factor.
    pub fn turn_left(&self, speed_pct: f64) -> bool {
        self.set_targets(speed_pct * self.shared.config.turn_factor, speed_pct)
    }

    pub fn turn_right(&self, speed_pct: f64) -> bool {
        self.set_targets(speed_pct, speed_pct * self.shared.config.turn_factor)
    }

    /// Rotate in place counter-clockwise.
    pub fn pivot_left(&self, speed_pct: f64) -> bool {
        self.set_targets(-speed_pct, speed_pct)
    }

    pub fn pivot_right(&self, speed_pct: f64) -> bool {
        self.set_targets(speed_pct, -speed_pct)
    }

    /// Rescale the current motion to `speed_pct`.
    ///
    /// The faster wheel gets `speed_pct` (floored at the minimum speed); the
    /// other keeps its ratio and sign. A stationary drive stays stationary.
    pub fn set_speed_pct(&self, speed_pct: f64) -> bool {
        let mut motion = self.shared.motion.lock();
        if self.shared.latch.load(Ordering::Acquire) {
            return false;
        }
        let config = &self.shared.config;
        let target = motion.ramp.target;
        let peak = target.left.abs().max(target.right.abs());
        if peak == 0.0 {
            return true;
        }
        let speed = speed_pct.abs().clamp(config.speed_min_pct, config.speed_max_pct);
        let scale = speed / peak;
        motion.ramp.target =
            WheelPair::new(target.left * scale, target.right * scale).clamped(config.speed_max_pct);
        debug!(
            "Speed rescaled to {:.1}%: left {:.1}%, right {:.1}%",
            speed, motion.ramp.target.left, motion.ramp.target.right
        );
        true
    }

    /// Smooth stop through the ramp.
    pub fn stop(&self) -> bool {
        info!("Smooth stop");
        self.set_targets(0.0, 0.0)
    }

    /// Immediate active brake, bypassing the ramp.
    pub fn brake(&self) {
        let mut motion = self.shared.motion.lock();
        if self.shared.latch.load(Ordering::Acquire) {
            // Latched drives stay in coast
            return;
        }
        info!("Immediate brake");
        motion.ramp.zero();
        self.shared.update_direction(WheelPair::ZERO);
        let Motion { left, right, .. } = &mut *motion;
        for channel in [left, right] {
            if let Err(e) = channel.brake() {
                error!("Failed to brake {} motor: {}", channel.name(), e);
            }
        }
    }

    // ==================== Emergency latch ====================

    /// Latch and cut motor power immediately (coast, no ramp).
    pub fn emergency_stop(&self) {
        let mut motion = self.shared.motion.lock();
        self.shared.latch.store(true, Ordering::Release);
        motion.ramp.zero();
        self.shared.update_direction(WheelPair::ZERO);
        let Motion { left, right, .. } = &mut *motion;
        for channel in [left, right] {
            if let Err(e) = channel.coast() {
                error!("Failed to cut power to {} motor: {}", channel.name(), e);
            }
        }
        error!("MOTOR EMERGENCY STOP");
    }

    /// Clear the latch; ramping resumes from zero.
    pub fn release_emergency(&self) {
        let mut motion = self.shared.motion.lock();
        motion.ramp.zero();
        self.shared.latch.store(false, Ordering::Release);
        warn!("Motor emergency latch released, check surroundings");
    }

    pub fn is_emergency(&self) -> bool {
        self.shared.latch.load(Ordering::Acquire)
    }

    // ==================== Odometry ====================

    /// Drain the encoder counters into the pose.
    pub fn update_odometry(&self) -> OdometrySnapshot {
        let mut odometry = self.shared.odometry.lock();
        let left = self.shared.counters.left.drain();
        let right = self.shared.counters.right.drain();
        odometry.integrate(left, right)
    }

    pub fn reset_odometry(&self) {
        let mut odometry = self.shared.odometry.lock();
        self.shared.counters.left.drain();
        self.shared.counters.right.drain();
        odometry.reset();
        info!("Odometry reset");
    }

    pub fn odometry(&self) -> OdometrySnapshot {
        self.shared.odometry.lock().snapshot()
    }

    pub fn distance_m(&self) -> f64 {
        self.odometry().distance_m
    }

    pub fn heading_deg(&self) -> f64 {
        self.odometry().heading_deg
    }

    /// Encoder counters, for wiring edge handlers of a custom backend.
    pub fn counters(&self) -> Arc<EncoderCounters> {
        self.shared.counters.clone()
    }

    // ==================== Inspection ====================

    pub fn targets(&self) -> WheelPair {
        self.shared.motion.lock().ramp.target
    }

    pub fn currents(&self) -> WheelPair {
        self.shared.motion.lock().ramp.current
    }

    pub fn telemetry(&self) -> MotorTelemetry {
        let current = self.currents();
        let pose = self.odometry();
        MotorTelemetry {
            speed_left: round_to(current.left, 1),
            speed_right: round_to(current.right, 1),
            distance_m: round_to(pose.distance_m, 3),
            heading_deg: round_to(pose.heading_deg, 1),
            emergency: self.is_emergency(),
        }
    }

    /// Stop the ramp loop and leave both channels in coast.
    pub fn shutdown(&self) {
        {
            let mut slot = self.ramp_worker.lock();
            self.shut_down.store(true, Ordering::Release);
            if let Some(mut worker) = slot.take() {
                worker.stop();
            }
        }
        let mut motion = self.shared.motion.lock();
        motion.ramp.zero();
        self.shared.update_direction(WheelPair::ZERO);
        let Motion { left, right, .. } = &mut *motion;
        for channel in [left, right] {
            if let Err(e) = channel.coast() {
                warn!("Failed to coast {} motor during shutdown: {}", channel.name(), e);
            }
        }
        info!("MotorDrive shut down");
    }
}

impl Drop for MotorDrive {
    fn drop(&mut self) {
        if let Some(mut worker) = self.ramp_worker.get_mut().take() {
            worker.stop();
        }
    }
}

impl DriveShared {
    fn ramp_tick(&self) {
        let mut motion = self.motion.lock();
        if self.latch.load(Ordering::Acquire) {
            return;
        }
        if !motion.ramp.tick() {
            return;
        }
        let current = motion.ramp.current;
        self.update_direction(current);
        if let Err(e) = motion.left.apply(current.left) {
            warn!("Failed to drive left motor: {}", e);
        }
        if let Err(e) = motion.right.apply(current.right) {
            warn!("Failed to drive right motor: {}", e);
        }
    }

    fn update_direction(&self, applied: WheelPair) {
        self.counters.left.set_reverse(applied.left < 0.0);
        self.counters.right.set_reverse(applied.right < 0.0);
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
