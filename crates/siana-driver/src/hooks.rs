//! Sensor listener hooks
//!
//! The obstacle and battery monitors publish threshold events to registered
//! listeners. Listeners run on the monitor's worker thread, so a listener must
//! return quickly; heavy work belongs on a channel.
//!
//! Each listener call is isolated with `catch_unwind`: a panicking listener is
//! logged and skipped, and neither the remaining listeners nor the scanning
//! loop are affected.

use crate::sensors::SensorId;
use crate::worker::panic_message;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// Obstacle threshold events.
pub trait ObstacleListener: Send + Sync {
    /// Reading below the warning distance but above the critical one.
    fn on_warning(&self, sensor: SensorId, distance_cm: f64);

    /// Reading below the critical distance.
    fn on_critical(&self, sensor: SensorId, distance_cm: f64);
}

/// Battery threshold events.
pub trait BatteryListener: Send + Sync {
    fn on_low_battery(&self, soc_pct: f64);
}

/// Registered listeners of one event source.
pub struct ListenerSet<L: ?Sized> {
    listeners: Vec<Arc<L>>,
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Arc<L>) {
        self.listeners.push(listener);
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Call `f` on every listener, isolating panics per listener.
    pub fn notify(&self, event: &str, f: impl Fn(&L)) {
        for listener in &self.listeners {
            let result = panic::catch_unwind(AssertUnwindSafe(|| f(listener.as_ref())));
            if let Err(payload) = result {
                error!("{} listener panicked: {}", event, panic_message(payload.as_ref()));
            }
        }
    }
}
