//! Obstacle detection
//!
//! A scan worker polls every ranger in [`SensorId::ALL`] order, publishes the
//! readings as one lock-free snapshot and classifies each distance against the
//! warning and critical thresholds. Listeners are notified on every scan while
//! an obstacle stays in range.

use super::SensorId;
use crate::DriverError;
use crate::hooks::{ListenerSet, ObstacleListener};
use crate::worker::PeriodicWorker;
use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use siana_hal::{RangingSensor, SimRanging};
use siana_tools::ObstacleConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reported when a ranger gives no echo: nothing within range.
pub const CLEAR_PATH_CM: f64 = 999.0;

/// Latest distance per sensor (cm). Unknown sensors read as clear.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SensorReadings(BTreeMap<SensorId, f64>);

impl SensorReadings {
    pub fn all_clear() -> Self {
        Self(SensorId::ALL.iter().map(|id| (*id, CLEAR_PATH_CM)).collect())
    }

    pub fn get(&self, sensor: SensorId) -> f64 {
        self.0.get(&sensor).copied().unwrap_or(CLEAR_PATH_CM)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SensorId, f64)> + '_ {
        self.0.iter().map(|(id, d)| (*id, *d))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObstacleThresholds {
    pub critical_cm: f64,
    pub warning_cm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Zone {
    Clear,
    Warning,
    Critical,
}

impl ObstacleThresholds {
    fn classify(&self, distance_cm: f64) -> Zone {
        if distance_cm < self.critical_cm {
            Zone::Critical
        } else if distance_cm < self.warning_cm {
            Zone::Warning
        } else {
            Zone::Clear
        }
    }
}

impl From<&ObstacleConfig> for ObstacleThresholds {
    fn from(config: &ObstacleConfig) -> Self {
        Self {
            critical_cm: config.critical_cm,
            warning_cm: config.warning_cm,
        }
    }
}

/// A ranger and where it is mounted.
pub type Ranger = (SensorId, Box<dyn RangingSensor>);

struct ObstacleInner {
    sensors: Mutex<Vec<Ranger>>,
    readings: ArcSwap<SensorReadings>,
    listeners: RwLock<ListenerSet<dyn ObstacleListener>>,
    thresholds: ObstacleThresholds,
}

pub struct ObstacleManager {
    inner: Arc<ObstacleInner>,
    scan_interval: Duration,
    worker: Mutex<Option<PeriodicWorker>>,
}

impl ObstacleManager {
    /// Takes ownership of the rangers and applies the configured echo timeout.
    pub fn new(config: &ObstacleConfig, mut sensors: Vec<Ranger>) -> Self {
        for (_, ranger) in sensors.iter_mut() {
            ranger.set_echo_timeout(config.echo_timeout());
        }
        Self {
            inner: Arc::new(ObstacleInner {
                sensors: Mutex::new(sensors),
                readings: ArcSwap::from_pointee(SensorReadings::all_clear()),
                listeners: RwLock::new(ListenerSet::new()),
                thresholds: ObstacleThresholds::from(config),
            }),
            scan_interval: config.scan_interval(),
            worker: Mutex::new(None),
        }
    }

    /// Rangers reporting plausible open-floor distances (60 ± 10 cm).
    pub fn simulated(config: &ObstacleConfig) -> Self {
        warn!("No ranging hardware, obstacle sensors simulated");
        let sensors = SensorId::ALL
            .iter()
            .map(|id| (*id, Box::new(SimRanging::jittered(60.0, 10.0)) as Box<dyn RangingSensor>))
            .collect();
        Self::new(config, sensors)
    }

    pub fn add_listener(&self, listener: Arc<dyn ObstacleListener>) {
        self.inner.listeners.write().add(listener);
    }

    /// Detach every listener.
    pub fn clear_listeners(&self) {
        self.inner.listeners.write().clear();
    }

    /// Start the scan worker. No-op if already running.
    pub fn start(&self) -> Result<(), DriverError> {
        let mut slot = self.worker.lock();
        if slot.is_some() {
            return Ok(());
        }
        let inner = self.inner.clone();
        *slot = Some(PeriodicWorker::spawn("obstacle-scan", self.scan_interval, move || {
            inner.scan_once();
        })?);
        info!("ObstacleManager started ({:?} scan period)", self.scan_interval);
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
        }
    }

    /// Poll every sensor once, publish and classify.
    pub fn scan_once(&self) -> Arc<SensorReadings> {
        self.inner.scan_once()
    }

    pub fn readings(&self) -> Arc<SensorReadings> {
        self.inner.readings.load_full()
    }

    pub fn reading(&self, sensor: SensorId) -> f64 {
        self.inner.readings.load().get(sensor)
    }

    /// True iff the latest reading for `sensor` exceeds the critical distance.
    pub fn is_path_clear(&self, sensor: SensorId) -> bool {
        self.reading(sensor) > self.inner.thresholds.critical_cm
    }

    pub fn thresholds(&self) -> ObstacleThresholds {
        self.inner.thresholds
    }
}

impl Drop for ObstacleManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ObstacleInner {
    fn scan_once(&self) -> Arc<SensorReadings> {
        let mut map = BTreeMap::new();
        {
            let mut sensors = self.sensors.lock();
            for (id, sensor) in sensors.iter_mut() {
                let distance = match sensor.measure_cm() {
                    Ok(d) => d,
                    Err(e) if e.is_timeout() => CLEAR_PATH_CM,
                    Err(e) => {
                        warn!("{} ranger read failed: {}", id, e);
                        CLEAR_PATH_CM
                    },
                };
                map.insert(*id, distance);
            }
        }

        let readings = Arc::new(SensorReadings(map));
        self.readings.store(readings.clone());

        let listeners = self.listeners.read();
        for (id, distance) in readings.iter() {
            match self.thresholds.classify(distance) {
                Zone::Critical => {
                    debug!("Critical obstacle on {}: {:.1} cm", id, distance);
                    listeners.notify("obstacle critical", |l| l.on_critical(id, distance));
                },
                Zone::Warning => {
                    listeners.notify("obstacle warning", |l| l.on_warning(id, distance));
                },
                Zone::Clear => {},
            }
        }
        readings
    }
}
