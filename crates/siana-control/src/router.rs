//! Operator command routing
//!
//! Inbound requests are parsed into the closed [`Command`] set and dispatched
//! by one exhaustive match. While the emergency latch is set only
//! [`Command::Ping`] and [`Command::EstopRelease`] get through; every other
//! command is rejected with an explicit result.

use crate::ControlError;
use crate::collaborators::{Camera, IndicatorState, Lighting, StatusIndicator};
use crate::safety::SafetyArbiter;
use crate::state::{RobotState, RobotStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use siana_driver::{MotorDrive, SensorId};
use siana_tools::{EvidenceConfig, MotionConfig};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Raw operator request: `{"action": "...", "value": 42}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CommandRequest {
    pub action: String,
    #[serde(default)]
    pub value: Option<f64>,
}

impl CommandRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            value: None,
        }
    }

    pub fn with_value(action: impl Into<String>, value: f64) -> Self {
        Self {
            action: action.into(),
            value: Some(value),
        }
    }
}

/// Operator command vocabulary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Forward,
    Backward,
    TurnLeft,
    TurnRight,
    PivotLeft,
    PivotRight,
    Stop,
    Brake,
    SpeedUp,
    SpeedDown,
    SetSpeed(f64),
    InspectStart,
    InspectStop,
    InspectPause,
    InspectResume,
    Estop,
    EstopRelease,
    LightOn,
    LightOff,
    LightSet(f64),
    Snapshot,
    Ping,
    ResetOdometry,
}

impl Command {
    /// Parse a request. Action names are case-insensitive.
    pub fn parse(request: &CommandRequest) -> Result<Self, ControlError> {
        let action = request.action.trim().to_ascii_lowercase();
        let value = |name| request.value.ok_or(ControlError::MissingValue(name));
        let command = match action.as_str() {
            "forward" => Self::Forward,
            "backward" => Self::Backward,
            "turn_left" => Self::TurnLeft,
            "turn_right" => Self::TurnRight,
            "pivot_left" => Self::PivotLeft,
            "pivot_right" => Self::PivotRight,
            "stop" => Self::Stop,
            "brake" => Self::Brake,
            "speed_up" => Self::SpeedUp,
            "speed_down" => Self::SpeedDown,
            "set_speed" => Self::SetSpeed(value("set_speed")?),
            "inspect_start" => Self::InspectStart,
            "inspect_stop" => Self::InspectStop,
            "inspect_pause" => Self::InspectPause,
            "inspect_resume" => Self::InspectResume,
            "estop" => Self::Estop,
            "estop_release" => Self::EstopRelease,
            "light_on" => Self::LightOn,
            "light_off" => Self::LightOff,
            "light_set" => Self::LightSet(value("light_set")?),
            "snapshot" => Self::Snapshot,
            "ping" => Self::Ping,
            "reset_odometry" => Self::ResetOdometry,
            _ => return Err(ControlError::UnknownAction(request.action.clone())),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::TurnLeft => "turn_left",
            Self::TurnRight => "turn_right",
            Self::PivotLeft => "pivot_left",
            Self::PivotRight => "pivot_right",
            Self::Stop => "stop",
            Self::Brake => "brake",
            Self::SpeedUp => "speed_up",
            Self::SpeedDown => "speed_down",
            Self::SetSpeed(_) => "set_speed",
            Self::InspectStart => "inspect_start",
            Self::InspectStop => "inspect_stop",
            Self::InspectPause => "inspect_pause",
            Self::InspectResume => "inspect_resume",
            Self::Estop => "estop",
            Self::EstopRelease => "estop_release",
            Self::LightOn => "light_on",
            Self::LightOff => "light_off",
            Self::LightSet(_) => "light_set",
            Self::Snapshot => "snapshot",
            Self::Ping => "ping",
            Self::ResetOdometry => "reset_odometry",
        }
    }

    /// Commands still served while the emergency latch is set.
    pub fn allowed_in_emergency(&self) -> bool {
        matches!(self, Self::Ping | Self::EstopRelease)
    }
}

/// Uniform reply to every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub accepted: bool,
    pub message: String,
    pub state: RobotState,
    pub speed: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CommandResult {
    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Collaborators the router drives.
pub struct RouterParts {
    pub motors: Arc<MotorDrive>,
    pub safety: Arc<SafetyArbiter>,
    pub status: Arc<RobotStatus>,
    pub indicator: Arc<dyn StatusIndicator>,
    pub lighting: Arc<dyn Lighting>,
    pub camera: Arc<dyn Camera>,
}

pub struct CommandRouter {
    motors: Arc<MotorDrive>,
    safety: Arc<SafetyArbiter>,
    status: Arc<RobotStatus>,
    indicator: Arc<dyn StatusIndicator>,
    lighting: Arc<dyn Lighting>,
    camera: Arc<dyn Camera>,
    motion: MotionConfig,
    evidence: EvidenceConfig,
    /// Snapshots taken since the last `inspect_start`
    snapshots: AtomicU32,
}

impl CommandRouter {
    pub fn new(parts: RouterParts, motion: MotionConfig, evidence: EvidenceConfig) -> Self {
        parts.status.set_speed_pct(motion.clamp_speed(motion.speed_default_pct));
        Self {
            motors: parts.motors,
            safety: parts.safety,
            status: parts.status,
            indicator: parts.indicator,
            lighting: parts.lighting,
            camera: parts.camera,
            motion,
            evidence,
            snapshots: AtomicU32::new(0),
        }
    }

    /// Handle one inbound request. Every request counts as a heartbeat.
    pub fn handle(&self, request: &CommandRequest) -> CommandResult {
        self.safety.heartbeat();

        let command = match Command::parse(request) {
            Ok(command) => command,
            Err(e) => {
                warn!("Rejected request {:?}: {}", request.action, e);
                return self.reject(e.to_string());
            },
        };
        self.dispatch(command)
    }

    /// Run a parsed command.
    pub fn dispatch(&self, command: Command) -> CommandResult {
        if self.safety.is_emergency() && !command.allowed_in_emergency() {
            debug!("{} rejected: emergency latched", command.name());
            return self.reject("Command rejected: emergency active, send estop_release first");
        }

        match command {
            Command::Forward => self.translate(RobotState::MovingForward, SensorId::Front),
            Command::Backward => self.translate(RobotState::MovingBackward, SensorId::Rear),
            Command::TurnLeft => self.turn(RobotState::TurningLeft),
            Command::TurnRight => self.turn(RobotState::TurningRight),
            Command::PivotLeft => self.pivot(RobotState::PivotLeft),
            Command::PivotRight => self.pivot(RobotState::PivotRight),
            Command::Stop => {
                self.motors.stop();
                self.settle(IndicatorState::Ready);
                self.accept("Smooth stop")
            },
            Command::Brake => {
                self.motors.brake();
                self.settle(IndicatorState::Ready);
                self.accept("Immediate brake")
            },
            Command::SpeedUp => {
                let speed = self.apply_speed(self.status.speed_pct() + self.motion.speed_step_pct);
                self.accept(format!("Speed: {:.0}%", speed))
            },
            Command::SpeedDown => {
                let speed = self.apply_speed(self.status.speed_pct() - self.motion.speed_step_pct);
                self.accept(format!("Speed: {:.0}%", speed))
            },
            Command::SetSpeed(value) => {
                let speed = self.apply_speed(value);
                self.accept(format!("Speed set: {:.0}%", speed))
            },
            Command::InspectStart => self.inspect_start(),
            Command::InspectStop => self.inspect_stop(),
            Command::InspectPause => {
                self.motors.stop();
                self.status.transition(RobotState::Paused);
                self.indicator.set_state(IndicatorState::Paused);
                self.accept("Inspection paused")
            },
            Command::InspectResume => {
                self.status.transition(RobotState::Idle);
                self.indicator.set_state(IndicatorState::Ready);
                self.accept("Inspection resumed")
            },
            Command::Estop => {
                self.safety.trigger_emergency("operator command");
                self.accept("EMERGENCY STOP engaged")
            },
            Command::EstopRelease => {
                if self.safety.release_emergency("operator command") {
                    self.accept("Emergency stop released")
                } else {
                    self.accept("No emergency stop to release")
                }
            },
            Command::LightOn => {
                self.lighting.on();
                self.accept(format!("Lighting on ({:.0}%)", self.lighting.duty()))
            },
            Command::LightOff => {
                self.lighting.off();
                self.accept("Lighting off")
            },
            Command::LightSet(value) => {
                self.lighting.set_duty(value);
                self.accept(format!("Lighting: {:.0}%", self.lighting.duty()))
            },
            Command::Snapshot => self.snapshot(),
            Command::Ping => self.accept("pong").with_extra("timestamp", unix_now()),
            Command::ResetOdometry => {
                self.motors.reset_odometry();
                self.accept("Odometry reset")
            },
        }
    }

    // ==================== Motion ====================

    fn translate(&self, state: RobotState, sensor: SensorId) -> CommandResult {
        if !self.safety.is_path_clear(sensor) {
            return self.reject(format!("Obstacle detected [{}], motion blocked", sensor));
        }
        let speed = self.status.speed_pct();
        let taken = match state {
            RobotState::MovingBackward => self.motors.backward(speed),
            _ => self.motors.forward(speed),
        };
        self.enter_motion(taken, state)
    }

    /// Curves still advance, so they need the front path.
    fn turn(&self, state: RobotState) -> CommandResult {
        if !self.safety.is_path_clear(SensorId::Front) {
            return self.reject(format!("Obstacle detected [{}], motion blocked", SensorId::Front));
        }
        let speed = self.status.speed_pct();
        let taken = match state {
            RobotState::TurningLeft => self.motors.turn_left(speed),
            _ => self.motors.turn_right(speed),
        };
        self.enter_motion(taken, state)
    }

    fn pivot(&self, state: RobotState) -> CommandResult {
        let speed = self.status.speed_pct() * self.motion.pivot_factor;
        let taken = match state {
            RobotState::PivotLeft => self.motors.pivot_left(speed),
            _ => self.motors.pivot_right(speed),
        };
        self.enter_motion(taken, state)
    }

    fn enter_motion(&self, taken: bool, state: RobotState) -> CommandResult {
        // The latch can land between the gate and the motor write
        if !taken || !self.status.transition(state) {
            return self.reject("Command rejected: emergency active");
        }
        self.indicator.set_state(IndicatorState::Moving);
        let message = match state {
            RobotState::MovingForward => "Moving forward",
            RobotState::MovingBackward => "Moving backward",
            RobotState::TurningLeft => "Turning left",
            RobotState::TurningRight => "Turning right",
            RobotState::PivotLeft => "Pivoting left",
            _ => "Pivoting right",
        };
        self.accept(message)
    }

    fn settle(&self, indicator: IndicatorState) {
        self.status.transition(RobotState::Idle);
        self.indicator.set_state(indicator);
    }

    /// Store the clamped cruise speed and rescale any motion in progress.
    fn apply_speed(&self, requested: f64) -> f64 {
        let speed = self.motion.clamp_speed(requested);
        self.status.set_speed_pct(speed);
        self.motors.set_speed_pct(speed);
        debug!("Cruise speed {:.0}%", speed);
        speed
    }

    // ==================== Inspection ====================

    fn inspect_start(&self) -> CommandResult {
        self.status.set_inspecting(true);
        self.snapshots.store(0, Ordering::Release);
        self.motors.reset_odometry();
        self.lighting.on();
        self.camera.update_overlay(0.0, "INSPECTION RUNNING");
        self.indicator.set_state(IndicatorState::Ready);
        info!("Inspection started");
        self.accept("Inspection started")
    }

    fn inspect_stop(&self) -> CommandResult {
        self.status.set_inspecting(false);
        self.motors.stop();
        self.status.transition(RobotState::Idle);
        self.lighting.off();
        let distance = self.motors.distance_m();
        self.camera.update_overlay(distance, "INSPECTION COMPLETE");
        self.indicator.set_state(IndicatorState::Ready);
        info!("Inspection complete: {:.1} m travelled", distance);
        self.accept(format!("Inspection complete: {:.1} m", distance))
            .with_extra("distance_m", distance)
    }

    fn snapshot(&self) -> CommandResult {
        if self.snapshots.load(Ordering::Acquire) >= self.evidence.max_images {
            return self.reject(format!(
                "Snapshot refused: {} images already taken this inspection",
                self.evidence.max_images
            ));
        }
        if let Err(e) = fs::create_dir_all(&self.evidence.dir) {
            error!("Cannot create evidence directory {}: {}", self.evidence.dir.display(), e);
            return self.reject(format!("Snapshot failed: {}", e));
        }
        let path = evidence_path(&self.evidence, self.motors.distance_m());
        match self.camera.save_snapshot(&path) {
            Ok(()) => {
                self.snapshots.fetch_add(1, Ordering::AcqRel);
                let path = path.display().to_string();
                self.accept(format!("Snapshot saved: {}", path))
                    .with_extra("filepath", path)
            },
            Err(e) => {
                warn!("Snapshot failed: {}", e);
                self.reject(format!("Snapshot failed: camera unavailable ({})", e))
            },
        }
    }

    // ==================== Results ====================

    fn accept(&self, message: impl Into<String>) -> CommandResult {
        self.result(true, message.into())
    }

    fn reject(&self, message: impl Into<String>) -> CommandResult {
        self.result(false, message.into())
    }

    fn result(&self, accepted: bool, message: String) -> CommandResult {
        CommandResult {
            accepted,
            message,
            state: self.status.state(),
            speed: self.status.speed_pct(),
            extra: Map::new(),
        }
    }
}

/// `<dir>/evidence_<unix_ts>_<distance with '.' as 'p'>m.jpg`
fn evidence_path(evidence: &EvidenceConfig, distance_m: f64) -> PathBuf {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let tag = format!("{:.2}", distance_m).replace('.', "p");
    evidence.dir.join(format!("evidence_{}_{}m.jpg", seconds, tag))
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
