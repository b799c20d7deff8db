//! Battery monitoring
//!
//! Samples the shunt monitor periodically, derives the state of charge from
//! the bus voltage and alerts listeners when the pack runs low.
//!
//! Alert policy:
//! - entering the low band (`soc < low_soc_pct`) alerts once, and re-arms
//!   when the SOC recovers to the threshold;
//! - first crossing below `critical_soc_pct` alerts again.

use crate::DriverError;
use crate::hooks::{BatteryListener, ListenerSet};
use crate::motor::round_to;
use crate::worker::PeriodicWorker;
use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use siana_hal::{PowerMonitor, SimPowerMonitor};
use siana_tools::BatteryConfig;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatteryTelemetry {
    pub soc_pct: f64,
    pub voltage_v: f64,
    pub current_a: f64,
    pub power_w: f64,
}

#[derive(Debug, Default)]
struct AlertState {
    low: bool,
    critical: bool,
}

struct BatteryInner {
    config: BatteryConfig,
    monitor: Mutex<Box<dyn PowerMonitor>>,
    telemetry: ArcSwap<BatteryTelemetry>,
    alerts: Mutex<AlertState>,
    listeners: RwLock<ListenerSet<dyn BatteryListener>>,
}

pub struct BatteryMonitor {
    inner: Arc<BatteryInner>,
    worker: Mutex<Option<PeriodicWorker>>,
}

impl BatteryMonitor {
    pub fn new(config: &BatteryConfig, monitor: Box<dyn PowerMonitor>) -> Self {
        let initial = BatteryTelemetry {
            soc_pct: config.soc_from_voltage(config.nominal_v),
            voltage_v: config.nominal_v,
            current_a: 0.0,
            power_w: 0.0,
        };
        Self {
            inner: Arc::new(BatteryInner {
                config: config.clone(),
                monitor: Mutex::new(monitor),
                telemetry: ArcSwap::from_pointee(initial),
                alerts: Mutex::new(AlertState::default()),
                listeners: RwLock::new(ListenerSet::new()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Slowly discharging pack starting at the nominal voltage.
    pub fn simulated(config: &BatteryConfig) -> Self {
        warn!("No power monitor, battery simulated");
        Self::new(
            config,
            Box::new(SimPowerMonitor::discharging(config.nominal_v, 0.0005)),
        )
    }

    pub fn add_listener(&self, listener: Arc<dyn BatteryListener>) {
        self.inner.listeners.write().add(listener);
    }

    /// Detach every listener.
    pub fn clear_listeners(&self) {
        self.inner.listeners.write().clear();
    }

    /// Take a first sample and start the sampling worker. No-op if running.
    pub fn start(&self) -> Result<(), DriverError> {
        let mut slot = self.worker.lock();
        if slot.is_some() {
            return Ok(());
        }
        self.inner.sample_once();
        let inner = self.inner.clone();
        let period = self.inner.config.sample_interval();
        *slot = Some(PeriodicWorker::spawn("battery", period, move || {
            inner.sample_once();
        })?);
        info!("BatteryMonitor started ({:?} sample period)", period);
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
        }
    }

    /// Read the monitor once; on a failed read the last sample is kept.
    pub fn sample_once(&self) -> BatteryTelemetry {
        self.inner.sample_once()
    }

    pub fn telemetry(&self) -> BatteryTelemetry {
        **self.inner.telemetry.load()
    }

    pub fn soc_pct(&self) -> f64 {
        self.telemetry().soc_pct
    }
}

impl Drop for BatteryMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl BatteryInner {
    fn sample_once(&self) -> BatteryTelemetry {
        let sample = match self.monitor.lock().sample() {
            Ok(sample) => sample,
            Err(e) => {
                error!("Battery read failed: {}", e);
                return **self.telemetry.load();
            },
        };

        let soc = self.config.soc_from_voltage(sample.voltage_v);
        let telemetry = BatteryTelemetry {
            soc_pct: soc,
            voltage_v: round_to(sample.voltage_v, 2),
            current_a: round_to(sample.current_a, 3),
            power_w: round_to(sample.power_w, 1),
        };
        self.telemetry.store(Arc::new(telemetry));

        if self.update_alerts(soc) {
            self.listeners.read().notify("low battery", |l| l.on_low_battery(soc));
        }
        telemetry
    }

    /// True if listeners should hear about this SOC.
    fn update_alerts(&self, soc: f64) -> bool {
        let mut alerts = self.alerts.lock();
        if soc >= self.config.low_soc_pct {
            alerts.low = false;
            alerts.critical = false;
            return false;
        }

        let mut fire = false;
        if !alerts.low {
            alerts.low = true;
            warn!("LOW BATTERY: {:.1}%", soc);
            fire = true;
        }
        if soc < self.config.critical_soc_pct && !alerts.critical {
            alerts.critical = true;
            error!("CRITICAL BATTERY: {:.1}%", soc);
            fire = true;
        }
        fire
    }
}
