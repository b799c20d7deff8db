//! Differential-drive odometry
//!
//! Encoder pulses are counted in interrupt context by [`WheelCounter`] and
//! drained periodically into [`Odometry`].

use serde::Serialize;
use siana_tools::EncoderConfig;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Pulse counter of one wheel.
///
/// The sign of each pulse follows the direction the wheel is currently
/// driven in, not the sensed rotation: channel B is not decoded.
#[derive(Debug, Default)]
pub struct WheelCounter {
    ticks: AtomicI64,
    reverse: AtomicBool,
}

impl WheelCounter {
    /// Edge handler body. Lock-free.
    #[inline]
    pub fn pulse(&self) {
        let delta = if self.reverse.load(Ordering::Relaxed) { -1 } else { 1 };
        self.ticks.fetch_add(delta, Ordering::Relaxed);
    }

    /// Set from the applied speed whenever it changes.
    pub fn set_reverse(&self, reverse: bool) {
        self.reverse.store(reverse, Ordering::Relaxed);
    }

    /// Take the count accumulated since the previous drain.
    pub fn drain(&self) -> i64 {
        self.ticks.swap(0, Ordering::AcqRel)
    }

    pub fn pending(&self) -> i64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

/// Counters of both wheels, shared with the encoder edge handlers.
#[derive(Debug, Default)]
pub struct EncoderCounters {
    pub left: WheelCounter,
    pub right: WheelCounter,
}

/// Accumulated pose along the track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OdometrySnapshot {
    /// Total path length, reversing included (m)
    pub distance_m: f64,
    /// Heading in `[0, 360)` degrees, 0 = initial direction
    pub heading_deg: f64,
}

#[derive(Debug, Clone)]
pub struct Odometry {
    meters_per_tick: f64,
    wheel_base_m: f64,
    pose: OdometrySnapshot,
}

impl Odometry {
    pub fn new(config: &EncoderConfig) -> Self {
        Self {
            meters_per_tick: config.wheel_circumference_m() / f64::from(config.ticks_per_rev),
            wheel_base_m: config.wheel_base_m(),
            pose: OdometrySnapshot::default(),
        }
    }

    /// Fold one interval of signed wheel ticks into the pose.
    pub fn integrate(&mut self, left_ticks: i64, right_ticks: i64) -> OdometrySnapshot {
        let arc_left = left_ticks as f64 * self.meters_per_tick;
        let arc_right = right_ticks as f64 * self.meters_per_tick;

        let center = (arc_left + arc_right) / 2.0;
        let delta_heading = ((arc_right - arc_left) / self.wheel_base_m).to_degrees();

        self.pose.distance_m += center.abs();
        self.pose.heading_deg = normalize_heading(self.pose.heading_deg + delta_heading);
        self.pose
    }

    pub fn reset(&mut self) {
        self.pose = OdometrySnapshot::default();
    }

    pub fn snapshot(&self) -> OdometrySnapshot {
        self.pose
    }
}

fn normalize_heading(deg: f64) -> f64 {
    let h = deg.rem_euclid(360.0);
    // rem_euclid of a tiny negative value rounds up to 360.0
    if h >= 360.0 { 0.0 } else { h }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn odometry() -> Odometry {
        Odometry::new(&EncoderConfig::default())
    }

    #[test]
    fn test_straight_line_one_revolution() {
        let mut odo = odometry();
        let pose = odo.integrate(360, 360);
        assert!((pose.distance_m - PI * 0.12).abs() < 1e-9);
        assert!((pose.distance_m - 0.377).abs() < 1e-3);
        assert_eq!(pose.heading_deg, 0.0);
    }

    #[test]
    fn test_pivot_on_left_wheel() {
        let mut odo = odometry();
        let pose = odo.integrate(0, 360);
        let arc_right = PI * 0.12;
        assert!((pose.heading_deg - (arc_right / 0.45).to_degrees()).abs() < 1e-9);
        assert!((pose.distance_m - arc_right / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_reversing_still_adds_distance() {
        let mut odo = odometry();
        odo.integrate(360, 360);
        let pose = odo.integrate(-360, -360);
        assert!((pose.distance_m - 2.0 * PI * 0.12).abs() < 1e-9);
    }

    #[test]
    fn test_heading_wraps_into_range() {
        let mut odo = odometry();
        // Right wheel backwards: heading decreases below zero
        let pose = odo.integrate(0, -36);
        assert!(pose.heading_deg > 300.0 && pose.heading_deg < 360.0);
        assert_eq!(normalize_heading(-1e-18), 0.0);
        assert_eq!(normalize_heading(720.0), 0.0);
    }

    #[test]
    fn test_reset() {
        let mut odo = odometry();
        odo.integrate(100, 50);
        odo.reset();
        assert_eq!(odo.snapshot(), OdometrySnapshot::default());
    }

    #[test]
    fn test_counter_sign_follows_direction() {
        let counter = WheelCounter::default();
        counter.pulse();
        counter.pulse();
        counter.set_reverse(true);
        counter.pulse();
        assert_eq!(counter.pending(), 1);
        assert_eq!(counter.drain(), 1);
        assert_eq!(counter.drain(), 0);
    }
}
