//! # SIANA Control
//!
//! Robot-level logic on top of `siana-driver`:
//!
//! - [`SafetyArbiter`]: sole owner of the emergency latch and the operator
//!   watchdog, subscribed to obstacle, battery and E-STOP events
//! - [`CommandRouter`]: operator command vocabulary and the robot state machine
//! - [`Robot`]: component wiring, start-up and emergency-first shutdown
//!
//! ## Example
//!
//! ```no_run
//! use siana_control::{CommandRequest, Hardware, Robot};
//! use siana_tools::RobotConfig;
//!
//! let robot = Robot::build(RobotConfig::default(), Hardware::simulated())?;
//! robot.start()?;
//! let result = robot.handle_command(&CommandRequest::new("forward"));
//! println!("{}: {}", result.state, result.message);
//! robot.shutdown();
//! # Ok::<(), siana_control::ControlError>(())
//! ```

pub mod collaborators;
pub mod error;
pub mod robot;
pub mod router;
pub mod safety;
pub mod state;
pub mod telemetry;

pub use collaborators::{
    Camera, IndicatorState, LedColor, Lighting, MemoryIndicator, PwmLighting, StatusIndicator,
    SyntheticCamera,
};
pub use error::ControlError;
pub use robot::{Hardware, Robot};
pub use router::{Command, CommandRequest, CommandResult, CommandRouter, RouterParts};
pub use safety::{
    CriticalResponse, EstopButton, SafetyArbiter, SafetyPolicy, SafetyTelemetry,
    TrackLimitStatus, classify_critical,
};
pub use state::{AtomicRobotState, RobotState, RobotStatus};
pub use telemetry::{IndicatorTelemetry, RobotSummary, RobotTelemetry};
