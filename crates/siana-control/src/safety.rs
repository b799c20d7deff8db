//! Safety arbitration
//!
//! [`SafetyArbiter`] is the only owner of the emergency latch and of the
//! watchdog clock. It bridges the physical E-STOP button, obstacle and
//! battery events, the operator-link watchdog and the track-length check
//! into motor actions.
//!
//! | source                        | response                                  |
//! |-------------------------------|-------------------------------------------|
//! | E-STOP button                 | latch                                     |
//! | critical obstacle in path     | latch                                     |
//! | critical obstacle while turning | brake, no latch                         |
//! | obstacle warning              | slow down while translating, no latch     |
//! | battery low / critical        | indicator / latch                         |
//! | watchdog expired              | soft stop, no latch                       |
//! | track end near / reached      | soft stop + flash / latch                 |

use crate::collaborators::{IndicatorState, LedColor, StatusIndicator};
use crate::state::{RobotState, RobotStatus};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use parking_lot::Mutex;
use serde::Serialize;
use siana_driver::{
    BatteryListener, Debouncer, MotorDrive, ObstacleListener, ObstacleManager, SensorId,
    SensorReadings, WatchdogClock,
};
use siana_driver::worker::{JoinTimeout, panic_message};
use siana_hal::{Edge, HalError, InterruptController};
use siana_tools::RobotConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Reaction to a critical obstacle reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriticalResponse {
    /// The obstacle is in the direction of travel.
    Latch,
    /// Rotating near an obstacle: stop, but no latch.
    Brake,
    /// Not in the way of the current motion.
    Ignore,
}

/// Which response a critical reading of `sensor` deserves in `state`.
///
/// The lateral sensor never halts the robot.
pub fn classify_critical(state: RobotState, sensor: SensorId) -> CriticalResponse {
    match (state, sensor) {
        (RobotState::MovingForward, SensorId::Front)
        | (RobotState::MovingBackward, SensorId::Rear) => CriticalResponse::Latch,
        (s, SensorId::Front | SensorId::Rear) if s.is_rotating() => CriticalResponse::Brake,
        _ => CriticalResponse::Ignore,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackLimitStatus {
    Clear,
    /// Inside the margin before the end of the track
    Approaching,
    /// At or past the end of the track
    Reached,
}

/// Thresholds the arbiter applies.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    pub critical_soc_pct: f64,
    pub speed_min_pct: f64,
    pub warning_slowdown: f64,
    pub track_length_m: f64,
    pub track_margin_m: f64,
    pub watchdog_timeout: Duration,
}

impl From<&RobotConfig> for SafetyPolicy {
    fn from(config: &RobotConfig) -> Self {
        Self {
            critical_soc_pct: config.battery.critical_soc_pct,
            speed_min_pct: config.motion.speed_min_pct,
            warning_slowdown: config.motion.warning_slowdown,
            track_length_m: config.safety.track_length_m,
            track_margin_m: config.safety.track_margin_m,
            watchdog_timeout: config.safety.watchdog_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyTelemetry {
    pub estop: bool,
    pub watchdog_ok: bool,
    pub last_cmd_ago_s: f64,
    pub obstacles: SensorReadings,
}

pub struct SafetyArbiter {
    policy: SafetyPolicy,
    motors: Arc<MotorDrive>,
    obstacles: Arc<ObstacleManager>,
    indicator: Arc<dyn StatusIndicator>,
    status: Arc<RobotStatus>,
    latched: AtomicBool,
    /// Serialises trigger and release
    latch_guard: Mutex<()>,
    watchdog: WatchdogClock,
    watchdog_tripped: AtomicBool,
    track_warned: AtomicBool,
    track_latched: AtomicBool,
}

impl SafetyArbiter {
    pub fn new(
        policy: SafetyPolicy,
        motors: Arc<MotorDrive>,
        obstacles: Arc<ObstacleManager>,
        indicator: Arc<dyn StatusIndicator>,
        status: Arc<RobotStatus>,
    ) -> Self {
        let watchdog = WatchdogClock::new(policy.watchdog_timeout);
        info!(
            "SafetyArbiter ready (watchdog {:?}, track {} m)",
            policy.watchdog_timeout, policy.track_length_m
        );
        Self {
            policy,
            motors,
            obstacles,
            indicator,
            status,
            latched: AtomicBool::new(false),
            latch_guard: Mutex::new(()),
            watchdog,
            watchdog_tripped: AtomicBool::new(false),
            track_warned: AtomicBool::new(false),
            track_latched: AtomicBool::new(false),
        }
    }

    // ==================== Emergency latch ====================

    /// Latch, cut motor power and enter `EmergencyStop`.
    ///
    /// Idempotent: returns false and changes nothing if already latched.
    pub fn trigger_emergency(&self, reason: &str) -> bool {
        let _guard = self.latch_guard.lock();
        if self.latched.load(Ordering::Acquire) {
            trace!("Emergency already latched, ignoring: {}", reason);
            return false;
        }
        self.latched.store(true, Ordering::Release);
        error!("EMERGENCY STOP: {}", reason);

        self.motors.emergency_stop();
        self.indicator.set_state(IndicatorState::Emergency);
        self.status.enter_emergency();
        true
    }

    /// Clear the latch after an explicit operator action.
    ///
    /// Returns false if nothing was latched.
    pub fn release_emergency(&self, reason: &str) -> bool {
        let _guard = self.latch_guard.lock();
        if !self.latched.load(Ordering::Acquire) {
            return false;
        }
        warn!("Emergency stop released: {}", reason);

        self.motors.release_emergency();
        self.latched.store(false, Ordering::Release);
        self.heartbeat();
        self.status.release_to_idle();
        self.indicator.set_state(IndicatorState::Ready);
        true
    }

    pub fn is_emergency(&self) -> bool {
        self.latched.load(Ordering::Acquire)
    }

    // ==================== Watchdog ====================

    /// Reset the watchdog clock.
    pub fn heartbeat(&self) {
        self.watchdog.feed();
        self.watchdog_tripped.store(false, Ordering::Release);
    }

    /// Soft stop once per silence episode when the watchdog has expired.
    ///
    /// Returns true if this call issued the stop.
    pub fn check_watchdog(&self) -> bool {
        if self.is_emergency() || self.watchdog.is_alive() {
            return false;
        }
        if self.watchdog_tripped.swap(true, Ordering::AcqRel) {
            return false;
        }
        warn!(
            "Watchdog: no command for {:.0} s, safety stop",
            self.watchdog.elapsed().as_secs_f64()
        );
        self.motors.stop();
        self.status.transition(RobotState::Idle);
        self.indicator.set_state(IndicatorState::Warning);
        true
    }

    pub fn last_command_ago(&self) -> Duration {
        self.watchdog.elapsed()
    }

    // ==================== Paths and track ====================

    /// True iff the latest reading for `sensor` exceeds the critical distance.
    pub fn is_path_clear(&self, sensor: SensorId) -> bool {
        self.obstacles.is_path_clear(sensor)
    }

    /// Compare the travelled distance with the track length.
    ///
    /// Entering the margin stops the robot smoothly and flashes orange once.
    /// At or past the end every check latches again, until odometry is reset.
    pub fn check_track_limit(&self, distance_m: f64) -> TrackLimitStatus {
        let length = self.policy.track_length_m;

        if distance_m >= length {
            if !self.track_latched.swap(true, Ordering::AcqRel) {
                error!("Track limit reached: {:.1} m / {} m", distance_m, length);
            }
            self.trigger_emergency(&format!("track limit of {} m reached", length));
            return TrackLimitStatus::Reached;
        }
        self.track_latched.store(false, Ordering::Release);

        if distance_m >= length - self.policy.track_margin_m {
            if !self.track_warned.swap(true, Ordering::AcqRel) {
                warn!("Track limit near: {:.1} m / {} m", distance_m, length);
                self.motors.stop();
                self.status.transition(RobotState::Idle);
                self.indicator.flash(LedColor::Orange, 5);
            }
            return TrackLimitStatus::Approaching;
        }
        self.track_warned.store(false, Ordering::Release);
        TrackLimitStatus::Clear
    }

    pub fn telemetry(&self) -> SafetyTelemetry {
        let elapsed = self.watchdog.elapsed();
        SafetyTelemetry {
            estop: self.is_emergency(),
            watchdog_ok: elapsed < self.watchdog.timeout(),
            last_cmd_ago_s: (elapsed.as_secs_f64() * 10.0).round() / 10.0,
            obstacles: (*self.obstacles.readings()).clone(),
        }
    }
}

impl ObstacleListener for SafetyArbiter {
    fn on_critical(&self, sensor: SensorId, distance_cm: f64) {
        match classify_critical(self.status.state(), sensor) {
            CriticalResponse::Latch => {
                self.trigger_emergency(&format!(
                    "critical obstacle [{}]: {:.0} cm",
                    sensor, distance_cm
                ));
            },
            CriticalResponse::Brake => {
                warn!(
                    "Critical obstacle [{}] at {:.1} cm while rotating, braking",
                    sensor, distance_cm
                );
                self.motors.brake();
                self.status.transition(RobotState::Idle);
            },
            CriticalResponse::Ignore => {
                trace!("Critical obstacle [{}] not in path, ignored", sensor);
            },
        }
    }

    fn on_warning(&self, sensor: SensorId, distance_cm: f64) {
        if self.is_emergency() {
            return;
        }
        if self.indicator.state() != IndicatorState::Warning {
            warn!("Obstacle near [{}]: {:.1} cm", sensor, distance_cm);
            self.indicator.set_state(IndicatorState::Warning);
        }

        if !self.status.state().is_translating() {
            return;
        }
        let slowed = (self.status.speed_pct() * self.policy.warning_slowdown)
            .max(self.policy.speed_min_pct);
        if self.motors.set_speed_pct(slowed) {
            debug!("Slowing to {:.0}% near [{}]", slowed, sensor);
        }
    }
}

impl BatteryListener for SafetyArbiter {
    fn on_low_battery(&self, soc_pct: f64) {
        if soc_pct < self.policy.critical_soc_pct {
            self.trigger_emergency(&format!("critical battery: {:.1}%", soc_pct));
            return;
        }
        warn!("Battery low: {:.1}%", soc_pct);
        if !self.is_emergency() {
            self.indicator.set_state(IndicatorState::BatteryLow);
        }
    }
}

// ==================== E-STOP button ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SafetyEvent {
    EstopButton,
}

/// Thread turning debounced E-STOP button edges into latch requests.
///
/// The edge handler only debounces and `try_send`s; the latch itself is
/// taken on this thread.
pub struct EstopButton {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl EstopButton {
    /// Room for a few presses while the event thread is busy
    const QUEUE_DEPTH: usize = 4;

    pub fn attach(
        arbiter: Arc<SafetyArbiter>,
        irq: &dyn InterruptController,
        pin: u8,
        debounce: Duration,
    ) -> Result<Self, HalError> {
        let (event_tx, event_rx) = bounded::<SafetyEvent>(Self::QUEUE_DEPTH);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let debouncer = Debouncer::new(debounce);
        irq.register(
            pin,
            Edge::Falling,
            Box::new(move || {
                if debouncer.accept() {
                    match event_tx.try_send(SafetyEvent::EstopButton) {
                        Ok(()) | Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {},
                    }
                }
            }),
        )?;

        let handle = thread::Builder::new()
            .name("siana-estop".to_string())
            .spawn(move || Self::event_loop(arbiter, event_rx, stop_rx))?;

        info!("E-STOP button attached on pin {} ({:?} debounce)", pin, debounce);
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    fn event_loop(arbiter: Arc<SafetyArbiter>, events: Receiver<SafetyEvent>, stop: Receiver<()>) {
        loop {
            select! {
                recv(events) -> event => match event {
                    Ok(SafetyEvent::EstopButton) => {
                        debug!("E-STOP button edge");
                        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                            arbiter.trigger_emergency("physical E-STOP button")
                        }));
                        if let Err(payload) = result {
                            error!("E-STOP handling panicked: {}", panic_message(payload.as_ref()));
                        }
                    },
                    Err(_) => break,
                },
                recv(stop) -> _ => break,
            }
        }
        trace!("E-STOP event thread exited");
    }

    pub fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.handle.take()
            && handle.join_timeout(Duration::from_secs(2)).is_err()
        {
            error!("E-STOP event thread failed to shut down");
        }
    }
}

impl Drop for EstopButton {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_critical_in_path_latches() {
        assert_eq!(
            classify_critical(RobotState::MovingForward, SensorId::Front),
            CriticalResponse::Latch
        );
        assert_eq!(
            classify_critical(RobotState::MovingBackward, SensorId::Rear),
            CriticalResponse::Latch
        );
    }

    #[test]
    fn test_classify_critical_opposite_direction_ignored() {
        assert_eq!(
            classify_critical(RobotState::MovingForward, SensorId::Rear),
            CriticalResponse::Ignore
        );
        assert_eq!(
            classify_critical(RobotState::MovingBackward, SensorId::Front),
            CriticalResponse::Ignore
        );
    }

    #[test]
    fn test_classify_critical_rotation_brakes() {
        for state in [
            RobotState::TurningLeft,
            RobotState::TurningRight,
            RobotState::PivotLeft,
            RobotState::PivotRight,
        ] {
            assert_eq!(classify_critical(state, SensorId::Front), CriticalResponse::Brake);
            assert_eq!(classify_critical(state, SensorId::Rear), CriticalResponse::Brake);
        }
    }

    #[test]
    fn test_classify_critical_lateral_never_halts() {
        for state in [
            RobotState::MovingForward,
            RobotState::MovingBackward,
            RobotState::TurningLeft,
            RobotState::PivotRight,
            RobotState::Idle,
        ] {
            assert_eq!(classify_critical(state, SensorId::Left), CriticalResponse::Ignore);
        }
    }

    #[test]
    fn test_classify_critical_stationary_ignored() {
        for state in [
            RobotState::Idle,
            RobotState::Paused,
            RobotState::EmergencyStop,
            RobotState::Fault,
        ] {
            assert_eq!(classify_critical(state, SensorId::Front), CriticalResponse::Ignore);
        }
    }
}
