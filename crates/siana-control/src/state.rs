//! Robot state machine and the shared status cell
//!
//! [`RobotStatus`] is the one place the robot-level state, cruise speed and
//! inspection flag live. The command router and the safety arbiter both hold
//! it by `Arc`, so neither needs a reference to the other.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use tracing::info;

/// Robot-level state.
///
/// `EmergencyStop` is absorbing: ordinary transitions cannot leave it, only
/// [`RobotStatus::release_to_idle`] can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum RobotState {
    #[default]
    Idle = 0,
    MovingForward = 1,
    MovingBackward = 2,
    TurningLeft = 3,
    TurningRight = 4,
    PivotLeft = 5,
    PivotRight = 6,
    Paused = 7,
    EmergencyStop = 8,
    Fault = 9,
}

impl RobotState {
    /// Invalid values map to `Fault`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::MovingForward,
            2 => Self::MovingBackward,
            3 => Self::TurningLeft,
            4 => Self::TurningRight,
            5 => Self::PivotLeft,
            6 => Self::PivotRight,
            7 => Self::Paused,
            8 => Self::EmergencyStop,
            _ => Self::Fault,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::MovingForward => "MOVING_FORWARD",
            Self::MovingBackward => "MOVING_BACKWARD",
            Self::TurningLeft => "TURNING_LEFT",
            Self::TurningRight => "TURNING_RIGHT",
            Self::PivotLeft => "PIVOT_LEFT",
            Self::PivotRight => "PIVOT_RIGHT",
            Self::Paused => "PAUSED",
            Self::EmergencyStop => "EMERGENCY_STOP",
            Self::Fault => "FAULT",
        }
    }

    /// Straight-line motion.
    pub fn is_translating(self) -> bool {
        matches!(self, Self::MovingForward | Self::MovingBackward)
    }

    /// Curves and in-place rotation.
    pub fn is_rotating(self) -> bool {
        matches!(
            self,
            Self::TurningLeft | Self::TurningRight | Self::PivotLeft | Self::PivotRight
        )
    }

    pub fn is_moving(self) -> bool {
        self.is_translating() || self.is_rotating()
    }
}

impl fmt::Display for RobotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free cell holding a [`RobotState`].
#[derive(Debug)]
pub struct AtomicRobotState {
    inner: AtomicU8,
}

impl AtomicRobotState {
    pub fn new(state: RobotState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> RobotState {
        RobotState::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, state: RobotState, ordering: Ordering) {
        self.inner.store(state.as_u8(), ordering);
    }

    /// Returns true if the state was `current` and is now `new`.
    pub fn compare_exchange(
        &self,
        current: RobotState,
        new: RobotState,
        success: Ordering,
        failure: Ordering,
    ) -> bool {
        self.inner
            .compare_exchange(current.as_u8(), new.as_u8(), success, failure)
            .is_ok()
    }
}

/// State, cruise speed and inspection flag shared between router and safety.
#[derive(Debug)]
pub struct RobotStatus {
    state: AtomicRobotState,
    /// f64 bits of the cruise speed (%)
    speed_bits: AtomicU64,
    inspecting: AtomicBool,
}

impl RobotStatus {
    pub fn new(speed_pct: f64) -> Self {
        Self {
            state: AtomicRobotState::new(RobotState::Idle),
            speed_bits: AtomicU64::new(speed_pct.to_bits()),
            inspecting: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> RobotState {
        self.state.get(Ordering::Acquire)
    }

    /// Move to `to` unless the robot is latched in `EmergencyStop`.
    ///
    /// Returns false, leaving the state untouched, when latched.
    pub fn transition(&self, to: RobotState) -> bool {
        loop {
            let from = self.state();
            if from == RobotState::EmergencyStop && to != RobotState::EmergencyStop {
                return false;
            }
            if from == to {
                return true;
            }
            if self
                .state
                .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            {
                info!("Robot state: {} -> {}", from, to);
                return true;
            }
        }
    }

    /// Enter `EmergencyStop` unconditionally; returns the previous state.
    pub fn enter_emergency(&self) -> RobotState {
        let previous = RobotState::from_u8(
            self.state
                .inner
                .swap(RobotState::EmergencyStop.as_u8(), Ordering::AcqRel),
        );
        if previous != RobotState::EmergencyStop {
            info!("Robot state: {} -> {}", previous, RobotState::EmergencyStop);
        }
        previous
    }

    /// Leave `EmergencyStop` for `Idle`; false if not in `EmergencyStop`.
    pub fn release_to_idle(&self) -> bool {
        let released = self.state.compare_exchange(
            RobotState::EmergencyStop,
            RobotState::Idle,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if released {
            info!("Robot state: {} -> {}", RobotState::EmergencyStop, RobotState::Idle);
        }
        released
    }

    pub fn speed_pct(&self) -> f64 {
        f64::from_bits(self.speed_bits.load(Ordering::Acquire))
    }

    pub fn set_speed_pct(&self, speed_pct: f64) {
        self.speed_bits.store(speed_pct.to_bits(), Ordering::Release);
    }

    pub fn inspecting(&self) -> bool {
        self.inspecting.load(Ordering::Acquire)
    }

    pub fn set_inspecting(&self, inspecting: bool) {
        self.inspecting.store(inspecting, Ordering::Release);
    }
}
