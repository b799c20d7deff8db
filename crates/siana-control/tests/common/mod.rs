//! Simulated robot rig shared by the integration tests

#![allow(dead_code)]

use siana_control::{
    Camera, Hardware, MemoryIndicator, Robot, StatusIndicator, SyntheticCamera,
};
use siana_driver::SensorId;
use siana_driver::sensors::Ranger;
use siana_hal::{RangingSensor, SimGpio, SimInterrupts, SimPowerMonitor, SimRanging};
use siana_tools::RobotConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub struct Rig {
    pub robot: Robot,
    pub gpio: SimGpio,
    pub irq: SimInterrupts,
    pub front: SimRanging,
    pub rear: SimRanging,
    pub left: SimRanging,
    pub power: SimPowerMonitor,
    pub indicator: Arc<MemoryIndicator>,
    pub camera: Arc<SyntheticCamera>,
    pub evidence: TempDir,
}

impl Rig {
    /// Poll the rangers once, as the scan loop would.
    pub fn scan(&self) {
        self.robot.obstacles().scan_once();
    }

    /// Wire the encoder edges without starting the robot.
    pub fn attach_encoders(&self) {
        self.robot
            .motors()
            .attach_encoders(&self.irq, &self.robot.config().encoders)
            .unwrap();
    }
}

/// Short periods so background loops settle within a test.
pub fn fast_config() -> RobotConfig {
    let mut config = RobotConfig::default();
    config.motors.ramp_interval_ms = 5;
    config.encoders.odometry_interval_ms = 10;
    config.obstacles.scan_interval_ms = 10;
    config.battery.sample_interval_ms = 50;
    config.safety.watchdog_timeout_ms = 100;
    config.safety.watchdog_check_ms = 20;
    config.safety.estop_debounce_ms = 100;
    config
}

pub fn rig() -> Rig {
    rig_with(|_| {})
}

pub fn rig_with(tweak: impl FnOnce(&mut RobotConfig)) -> Rig {
    let evidence = tempfile::tempdir().unwrap();
    let mut config = fast_config();
    config.evidence.dir = evidence.path().join("evidence");
    tweak(&mut config);

    let gpio = SimGpio::new();
    let irq = SimInterrupts::new();
    let front = SimRanging::fixed(120.0);
    let rear = SimRanging::fixed(120.0);
    let left = SimRanging::fixed(120.0);
    let power = SimPowerMonitor::constant(27.0, 1.0);
    let indicator = Arc::new(MemoryIndicator::new());
    let camera = Arc::new(SyntheticCamera::new());

    let rangers: Vec<Ranger> = vec![
        (SensorId::Front, Box::new(front.clone()) as Box<dyn RangingSensor>),
        (SensorId::Rear, Box::new(rear.clone())),
        (SensorId::Left, Box::new(left.clone())),
    ];
    let hardware = Hardware {
        rangers: Some(rangers),
        power: Some(Box::new(power.clone())),
        indicator: Some(indicator.clone() as Arc<dyn StatusIndicator>),
        camera: Some(camera.clone() as Arc<dyn Camera>),
        ..Hardware::with_backends(Arc::new(gpio.clone()), Arc::new(irq.clone()))
    };
    let robot = Robot::build(config, hardware).unwrap();

    Rig {
        robot,
        gpio,
        irq,
        front,
        rear,
        left,
        power,
        indicator,
        camera,
        evidence,
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
