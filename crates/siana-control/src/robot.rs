//! Robot assembly
//!
//! [`Robot::build`] wires the components in dependency order without starting
//! any thread. [`Robot::start`] attaches interrupt handlers and spawns the
//! background loops; [`Robot::shutdown`] cuts motor power before anything else
//! is torn down.

use crate::ControlError;
use crate::collaborators::{
    Camera, IndicatorState, Lighting, MemoryIndicator, PwmLighting, StatusIndicator,
    SyntheticCamera,
};
use crate::router::{CommandRequest, CommandResult, CommandRouter, RouterParts};
use crate::safety::{EstopButton, SafetyArbiter, SafetyPolicy};
use crate::state::RobotStatus;
use crate::telemetry::{IndicatorTelemetry, RobotSummary, RobotTelemetry};
use parking_lot::Mutex;
use siana_driver::sensors::Ranger;
use siana_driver::{
    BatteryMonitor, DriveConfig, DriverError, MotorDrive, ObstacleManager, PeriodicWorker,
};
use siana_hal::{GpioBackend, InterruptController, PowerMonitor, SimGpio, SimInterrupts};
use siana_tools::RobotConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Hardware handed to [`Robot::build`].
///
/// Missing devices fall back to simulated ones.
pub struct Hardware {
    pub gpio: Arc<dyn GpioBackend>,
    pub interrupts: Arc<dyn InterruptController>,
    pub rangers: Option<Vec<Ranger>>,
    pub power: Option<Box<dyn PowerMonitor>>,
    pub indicator: Option<Arc<dyn StatusIndicator>>,
    pub camera: Option<Arc<dyn Camera>>,
}

impl Hardware {
    /// Fully simulated robot.
    pub fn simulated() -> Self {
        Self::with_backends(Arc::new(SimGpio::new()), Arc::new(SimInterrupts::new()))
    }

    pub fn with_backends(
        gpio: Arc<dyn GpioBackend>,
        interrupts: Arc<dyn InterruptController>,
    ) -> Self {
        Self {
            gpio,
            interrupts,
            rangers: None,
            power: None,
            indicator: None,
            camera: None,
        }
    }
}

pub struct Robot {
    config: RobotConfig,
    interrupts: Arc<dyn InterruptController>,
    motors: Arc<MotorDrive>,
    obstacles: Arc<ObstacleManager>,
    battery: Arc<BatteryMonitor>,
    safety: Arc<SafetyArbiter>,
    status: Arc<RobotStatus>,
    router: CommandRouter,
    indicator: Arc<dyn StatusIndicator>,
    lighting: Arc<dyn Lighting>,
    camera: Arc<dyn Camera>,
    workers: Mutex<Vec<PeriodicWorker>>,
    estop: Mutex<Option<EstopButton>>,
    started: AtomicBool,
    shut_down: AtomicBool,
}

impl Robot {
    pub fn build(config: RobotConfig, hardware: Hardware) -> Result<Self, ControlError> {
        config.validate()?;
        let Hardware {
            gpio,
            interrupts,
            rangers,
            power,
            indicator,
            camera,
        } = hardware;
        info!("Building robot on {} backend", gpio.name());

        let motors = Arc::new(MotorDrive::new(
            gpio.as_ref(),
            &config.motors,
            &config.encoders,
            DriveConfig::new(&config.motors, &config.motion),
        )?);
        let obstacles = Arc::new(match rangers {
            Some(rangers) => ObstacleManager::new(&config.obstacles, rangers),
            None => ObstacleManager::simulated(&config.obstacles),
        });
        let battery = Arc::new(match power {
            Some(power) => BatteryMonitor::new(&config.battery, power),
            None => BatteryMonitor::simulated(&config.battery),
        });

        let indicator = indicator
            .unwrap_or_else(|| Arc::new(MemoryIndicator::new()) as Arc<dyn StatusIndicator>);
        let camera = camera.unwrap_or_else(|| {
            warn!("No camera, snapshots write placeholder frames");
            Arc::new(SyntheticCamera::new()) as Arc<dyn Camera>
        });
        let lighting: Arc<dyn Lighting> =
            Arc::new(PwmLighting::open(gpio.as_ref(), &config.lighting)?);

        let status = Arc::new(RobotStatus::new(config.motion.speed_default_pct));
        let safety = Arc::new(SafetyArbiter::new(
            SafetyPolicy::from(&config),
            motors.clone(),
            obstacles.clone(),
            indicator.clone(),
            status.clone(),
        ));
        obstacles.add_listener(safety.clone());
        battery.add_listener(safety.clone());

        let router = CommandRouter::new(
            RouterParts {
                motors: motors.clone(),
                safety: safety.clone(),
                status: status.clone(),
                indicator: indicator.clone(),
                lighting: lighting.clone(),
                camera: camera.clone(),
            },
            config.motion.clone(),
            config.evidence.clone(),
        );

        Ok(Self {
            config,
            interrupts,
            motors,
            obstacles,
            battery,
            safety,
            status,
            router,
            indicator,
            lighting,
            camera,
            workers: Mutex::new(Vec::new()),
            estop: Mutex::new(None),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Attach interrupt handlers and spawn every background loop.
    ///
    /// No-op if already started; fails after shutdown.
    pub fn start(&self) -> Result<(), ControlError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(DriverError::ShutDown.into());
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.motors.attach_encoders(self.interrupts.as_ref(), &self.config.encoders)?;
        *self.estop.lock() = Some(EstopButton::attach(
            self.safety.clone(),
            self.interrupts.as_ref(),
            self.config.safety.estop_pin,
            self.config.safety.estop_debounce(),
        )?);

        self.motors.start()?;

        let mut workers = self.workers.lock();
        let motors = self.motors.clone();
        let safety = self.safety.clone();
        workers.push(PeriodicWorker::spawn(
            "odometry",
            self.config.encoders.odometry_interval(),
            move || {
                let pose = motors.update_odometry();
                safety.check_track_limit(pose.distance_m);
            },
        )?);

        self.obstacles.start()?;
        self.battery.start()?;

        self.safety.heartbeat();
        let safety = self.safety.clone();
        workers.push(PeriodicWorker::spawn(
            "watchdog",
            self.config.safety.watchdog_check(),
            move || {
                safety.check_watchdog();
            },
        )?);
        drop(workers);

        if !self.safety.is_emergency() {
            self.indicator.set_state(IndicatorState::Ready);
        }
        info!("Robot started");
        Ok(())
    }

    /// Route one operator request.
    pub fn handle_command(&self, request: &CommandRequest) -> CommandResult {
        self.router.handle(request)
    }

    pub fn telemetry(&self) -> RobotTelemetry {
        let motors = self.motors.telemetry();
        RobotTelemetry {
            robot: RobotSummary {
                state: self.status.state(),
                speed_pct: self.status.speed_pct(),
                inspecting: self.status.inspecting(),
                distance_m: motors.distance_m,
                heading_deg: motors.heading_deg,
            },
            motors,
            battery: self.battery.telemetry(),
            safety: self.safety.telemetry(),
            indicators: IndicatorTelemetry {
                led_state: self.indicator.state(),
                lighting_pct: self.lighting.duty(),
            },
        }
    }

    /// Telemetry for the broadcast cadence; also refreshes the camera overlay.
    pub fn telemetry_tick(&self) -> RobotTelemetry {
        let telemetry = self.telemetry();
        let label = if telemetry.robot.inspecting { "INSP" } else { "IDLE" };
        self.camera.update_overlay(telemetry.robot.distance_m, label);
        telemetry
    }

    /// Cut motor power, then stop every loop and release the devices.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Robot shutting down");
        self.motors.emergency_stop();

        for mut worker in self.workers.lock().drain(..) {
            worker.stop();
        }
        if let Some(mut estop) = self.estop.lock().take() {
            estop.stop();
        }
        self.obstacles.stop();
        self.battery.stop();
        self.obstacles.clear_listeners();
        self.battery.clear_listeners();

        self.motors.shutdown();
        self.lighting.off();
        self.indicator.off();
        info!("Robot shut down");
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.shut_down.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &RobotConfig {
        &self.config
    }

    pub fn status(&self) -> &Arc<RobotStatus> {
        &self.status
    }

    pub fn safety(&self) -> &Arc<SafetyArbiter> {
        &self.safety
    }

    pub fn motors(&self) -> &Arc<MotorDrive> {
        &self.motors
    }

    pub fn obstacles(&self) -> &Arc<ObstacleManager> {
        &self.obstacles
    }

    pub fn battery(&self) -> &Arc<BatteryMonitor> {
        &self.battery
    }

    pub fn indicator(&self) -> &Arc<dyn StatusIndicator> {
        &self.indicator
    }

    pub fn lighting(&self) -> &Arc<dyn Lighting> {
        &self.lighting
    }
}

impl Drop for Robot {
    fn drop(&mut self) {
        self.shutdown();
    }
}
