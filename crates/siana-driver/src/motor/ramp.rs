//! Acceleration ramp
//!
//! Pure state: the ramp worker owns the timing, this module only decides
//! the next applied speed of each wheel.

use serde::Serialize;

/// Signed speed percentages of the left and right wheel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WheelPair {
    pub left: f64,
    pub right: f64,
}

impl WheelPair {
    pub const ZERO: WheelPair = WheelPair {
        left: 0.0,
        right: 0.0,
    };

    pub const fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }

    /// Both components clamped to `[-limit, limit]`.
    pub fn clamped(self, limit: f64) -> Self {
        Self {
            left: self.left.clamp(-limit, limit),
            right: self.right.clamp(-limit, limit),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.left == 0.0 && self.right == 0.0
    }
}

/// One ramp step from `current` toward `target`.
///
/// Snaps to the target when the gap is below `step`, otherwise moves by
/// exactly `step`. Never overshoots.
pub fn step_toward(current: f64, target: f64, step: f64) -> f64 {
    if (current - target).abs() < step {
        target
    } else if current < target {
        current + step
    } else {
        current - step
    }
}

/// Commanded targets and currently applied speeds.
#[derive(Debug, Clone, PartialEq)]
pub struct RampState {
    pub target: WheelPair,
    pub current: WheelPair,
    step: f64,
}

impl RampState {
    pub fn new(step: f64) -> Self {
        Self {
            target: WheelPair::ZERO,
            current: WheelPair::ZERO,
            step,
        }
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Advance both wheels by one tick; true if the applied speed changed.
    pub fn tick(&mut self) -> bool {
        let next = WheelPair {
            left: step_toward(self.current.left, self.target.left, self.step),
            right: step_toward(self.current.right, self.target.right, self.step),
        };
        let changed = next != self.current;
        self.current = next;
        changed
    }

    /// Drop both target and current to zero without ramping.
    pub fn zero(&mut self) {
        self.target = WheelPair::ZERO;
        self.current = WheelPair::ZERO;
    }

    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_step_toward_snaps_inside_step() {
        assert_eq!(step_toward(58.0, 60.0, 5.0), 60.0);
        assert_eq!(step_toward(-3.0, 0.0, 5.0), 0.0);
        assert_eq!(step_toward(0.0, 60.0, 5.0), 5.0);
        assert_eq!(step_toward(0.0, -60.0, 5.0), -5.0);
    }

    #[test]
    fn test_exact_step_gap_moves_one_step() {
        assert_eq!(step_toward(55.0, 60.0, 5.0), 60.0);
    }

    #[test]
    fn test_ramp_from_rest_to_cruise() {
        let mut ramp = RampState::new(5.0);
        ramp.target = WheelPair::new(60.0, 42.0);

        let mut ticks = 0;
        while !ramp.is_settled() {
            assert!(ramp.tick());
            ticks += 1;
        }
        // ceil(60 / 5)
        assert_eq!(ticks, 12);
        assert_eq!(ramp.current, WheelPair::new(60.0, 42.0));
        assert!(!ramp.tick());
    }

    #[test]
    fn test_zero_bypasses_ramp() {
        let mut ramp = RampState::new(5.0);
        ramp.target = WheelPair::new(80.0, 80.0);
        ramp.tick();
        ramp.zero();
        assert_eq!(ramp.current, WheelPair::ZERO);
        assert_eq!(ramp.target, WheelPair::ZERO);
    }

    #[test]
    fn test_clamped() {
        let pair = WheelPair::new(150.0, -130.0).clamped(100.0);
        assert_eq!(pair, WheelPair::new(100.0, -100.0));
    }

    proptest! {
        #[test]
        fn prop_converges_within_bound_without_overshoot(
            start_l in -100i32..=100,
            start_r in -100i32..=100,
            target_l in -100i32..=100,
            target_r in -100i32..=100,
            step in 1i32..=20,
        ) {
            let step = step as f64;
            let mut ramp = RampState::new(step);
            ramp.current = WheelPair::new(start_l as f64, start_r as f64);
            ramp.target = WheelPair::new(target_l as f64, target_r as f64);

            let bound = |a: f64, b: f64| ((a - b).abs() / step).ceil() as usize;
            let max_ticks = bound(ramp.current.left, ramp.target.left)
                .max(bound(ramp.current.right, ramp.target.right));

            for _ in 0..max_ticks {
                let before = ramp.current;
                ramp.tick();
                for (prev, now, target) in [
                    (before.left, ramp.current.left, ramp.target.left),
                    (before.right, ramp.current.right, ramp.target.right),
                ] {
                    // Never crosses the target
                    prop_assert!((prev - target) * (now - target) >= 0.0);
                    // Either settled or exactly one step closer
                    let gap_before = (prev - target).abs();
                    let gap_after = (now - target).abs();
                    prop_assert!(
                        gap_after == 0.0 || (gap_before - gap_after - step).abs() < 1e-9
                    );
                }
            }
            prop_assert!(ramp.is_settled());
        }
    }
}
