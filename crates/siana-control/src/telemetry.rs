//! Periodic telemetry snapshot

use crate::collaborators::IndicatorState;
use crate::safety::SafetyTelemetry;
use crate::state::RobotState;
use serde::Serialize;
use siana_driver::{BatteryTelemetry, MotorTelemetry};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobotSummary {
    pub state: RobotState,
    pub speed_pct: f64,
    pub inspecting: bool,
    pub distance_m: f64,
    pub heading_deg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndicatorTelemetry {
    pub led_state: IndicatorState,
    pub lighting_pct: f64,
}

/// Everything the operator link broadcasts at the telemetry cadence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobotTelemetry {
    pub robot: RobotSummary,
    pub motors: MotorTelemetry,
    pub battery: BatteryTelemetry,
    pub safety: SafetyTelemetry,
    pub indicators: IndicatorTelemetry,
}
