//! Safety interlock tests
//!
//! The emergency latch must win over every other command path, while soft
//! stops (watchdog, track margin, rotation near an obstacle) must not latch.

mod common;

use common::{rig, rig_with, wait_for};
use siana_control::{
    CommandRequest, IndicatorState, LedColor, RobotState, StatusIndicator, TrackLimitStatus,
};
use siana_driver::WheelPair;
use siana_hal::Edge;
use std::thread;
use std::time::Duration;

fn send(rig: &common::Rig, action: &str) -> siana_control::CommandResult {
    rig.robot.handle_command(&CommandRequest::new(action))
}

#[test]
fn test_trigger_emergency_is_idempotent() {
    let rig = rig();
    send(&rig, "forward");
    let safety = rig.robot.safety();

    assert!(safety.trigger_emergency("first"));
    assert_eq!(rig.robot.status().state(), RobotState::EmergencyStop);
    assert!(rig.robot.motors().is_emergency());
    assert_eq!(rig.indicator.state(), IndicatorState::Emergency);

    // A later indicator change must survive repeated triggers untouched
    rig.indicator.set_state(IndicatorState::Fault);
    for _ in 0..5 {
        assert!(!safety.trigger_emergency("again"));
    }
    assert_eq!(rig.indicator.state(), IndicatorState::Fault);
    assert_eq!(rig.robot.status().state(), RobotState::EmergencyStop);
}

#[test]
fn test_release_is_noop_when_not_latched() {
    let rig = rig();
    let safety = rig.robot.safety();

    assert!(!safety.release_emergency("nothing latched"));
    assert_eq!(rig.robot.status().state(), RobotState::Idle);

    safety.trigger_emergency("test");
    assert!(!rig.robot.motors().set_targets(50.0, 50.0));

    assert!(safety.release_emergency("operator"));
    assert!(!safety.is_emergency());
    assert!(rig.robot.motors().set_targets(50.0, 50.0));
    assert_eq!(rig.robot.motors().targets(), WheelPair::new(50.0, 50.0));
}

#[test]
fn test_critical_obstacle_in_path_latches() {
    let rig = rig();
    assert!(send(&rig, "forward").accepted);

    rig.front.set_distance(10.0);
    rig.scan();

    assert!(rig.robot.safety().is_emergency());
    assert_eq!(rig.robot.status().state(), RobotState::EmergencyStop);
    assert_eq!(rig.robot.motors().targets(), WheelPair::ZERO);
}

#[test]
fn test_critical_obstacle_behind_while_reversing_latches() {
    let rig = rig();
    assert!(send(&rig, "backward").accepted);

    rig.rear.set_distance(8.0);
    rig.scan();
    assert_eq!(rig.robot.status().state(), RobotState::EmergencyStop);
}

#[test]
fn test_critical_obstacle_out_of_path_ignored() {
    let rig = rig();
    send(&rig, "forward");

    rig.rear.set_distance(5.0);
    rig.left.set_distance(5.0);
    rig.scan();

    assert!(!rig.robot.safety().is_emergency());
    assert_eq!(rig.robot.status().state(), RobotState::MovingForward);
    assert_eq!(rig.robot.motors().targets(), WheelPair::new(60.0, 60.0));
}

#[test]
fn test_critical_obstacle_while_pivoting_brakes_without_latch() {
    let rig = rig();
    send(&rig, "pivot_left");

    rig.front.set_distance(10.0);
    rig.scan();

    assert!(!rig.robot.safety().is_emergency());
    assert_eq!(rig.robot.status().state(), RobotState::Idle);
    assert_eq!(rig.robot.motors().targets(), WheelPair::ZERO);
    assert_eq!(rig.robot.motors().currents(), WheelPair::ZERO);

    // No release needed; rear motion is still possible
    assert!(send(&rig, "backward").accepted);
}

#[test]
fn test_warning_slows_translation_only() {
    let rig = rig();
    send(&rig, "forward");

    rig.front.set_distance(30.0);
    rig.scan();

    assert_eq!(rig.robot.motors().targets(), WheelPair::new(30.0, 30.0));
    assert_eq!(rig.indicator.state(), IndicatorState::Warning);
    assert_eq!(rig.robot.status().speed_pct(), 60.0);
    assert_eq!(rig.robot.status().state(), RobotState::MovingForward);
    assert!(!rig.robot.safety().is_emergency());
}

#[test]
fn test_warning_floor_at_minimum_speed() {
    let rig = rig();
    rig.robot.handle_command(&CommandRequest::with_value("set_speed", 30.0));
    send(&rig, "forward");

    rig.front.set_distance(25.0);
    rig.scan();
    assert_eq!(rig.robot.motors().targets(), WheelPair::new(20.0, 20.0));
}

#[test]
fn test_warning_ignored_while_pivoting() {
    let rig = rig();
    send(&rig, "pivot_right");
    let before = rig.robot.motors().targets();

    rig.front.set_distance(30.0);
    rig.scan();
    assert_eq!(rig.robot.motors().targets(), before);
    assert_eq!(rig.indicator.state(), IndicatorState::Warning);
}

#[test]
fn test_warning_shown_while_idle() {
    let rig = rig();
    rig.rear.set_distance(30.0);
    rig.scan();

    assert_eq!(rig.indicator.state(), IndicatorState::Warning);
    assert_eq!(rig.robot.status().state(), RobotState::Idle);
    assert_eq!(rig.robot.motors().targets(), WheelPair::ZERO);
}

#[test]
fn test_warning_does_not_mask_emergency() {
    let rig = rig();
    assert!(send(&rig, "estop").accepted);

    rig.front.set_distance(30.0);
    rig.scan();
    assert_eq!(rig.indicator.state(), IndicatorState::Emergency);
}

#[test]
fn test_watchdog_soft_stop_differs_from_latch() {
    let rig = rig_with(|config| config.safety.watchdog_timeout_ms = 50);
    let safety = rig.robot.safety();
    send(&rig, "forward");
    assert!(!safety.check_watchdog());

    thread::sleep(Duration::from_millis(80));
    assert!(!safety.telemetry().watchdog_ok);
    assert!(safety.check_watchdog());
    assert!(!safety.check_watchdog(), "one stop per silence episode");

    assert!(!safety.is_emergency());
    assert_eq!(rig.robot.status().state(), RobotState::Idle);
    assert_eq!(rig.robot.motors().targets(), WheelPair::ZERO);
    assert_eq!(rig.indicator.state(), IndicatorState::Warning);

    // The next command is accepted without a release
    let result = send(&rig, "forward");
    assert!(result.accepted);
    assert!(safety.telemetry().watchdog_ok);

    // Whereas a critical obstacle forces EmergencyStop
    rig.front.set_distance(10.0);
    rig.scan();
    assert_eq!(rig.robot.status().state(), RobotState::EmergencyStop);
}

#[test]
fn test_watchdog_does_not_act_while_latched() {
    let rig = rig_with(|config| config.safety.watchdog_timeout_ms = 20);
    let safety = rig.robot.safety();
    safety.trigger_emergency("test");
    thread::sleep(Duration::from_millis(40));

    assert!(!safety.check_watchdog());
    assert_eq!(rig.indicator.state(), IndicatorState::Emergency);
}

#[test]
fn test_track_limit_margin_then_latch() {
    let rig = rig();
    let safety = rig.robot.safety();

    assert_eq!(safety.check_track_limit(150.0), TrackLimitStatus::Clear);

    send(&rig, "forward");
    assert_eq!(safety.check_track_limit(199.0), TrackLimitStatus::Approaching);
    assert!(!safety.is_emergency());
    assert_eq!(rig.robot.status().state(), RobotState::Idle);
    assert_eq!(rig.robot.motors().targets(), WheelPair::ZERO);
    assert_eq!(rig.indicator.flashes(), vec![(LedColor::Orange, 5)]);

    // Still inside the margin: no repeated stop or flash
    send(&rig, "forward");
    assert_eq!(safety.check_track_limit(199.5), TrackLimitStatus::Approaching);
    assert_eq!(rig.indicator.flashes().len(), 1);
    assert_eq!(rig.robot.status().state(), RobotState::MovingForward);

    assert_eq!(safety.check_track_limit(200.0), TrackLimitStatus::Reached);
    assert!(safety.is_emergency());
    assert_eq!(rig.robot.status().state(), RobotState::EmergencyStop);
}

#[test]
fn test_track_limit_relatches_after_release_until_reset() {
    let rig = rig();
    let safety = rig.robot.safety();

    assert_eq!(safety.check_track_limit(200.0), TrackLimitStatus::Reached);
    assert!(safety.is_emergency());
    assert!(send(&rig, "estop_release").accepted);
    assert!(send(&rig, "forward").accepted);

    for distance in [201.0, 210.0, 250.0] {
        assert_eq!(safety.check_track_limit(distance), TrackLimitStatus::Reached);
        assert!(safety.is_emergency(), "no latch at {} m", distance);
        assert_eq!(rig.robot.status().state(), RobotState::EmergencyStop);
        assert_eq!(rig.robot.motors().targets(), WheelPair::ZERO);
        assert!(send(&rig, "estop_release").accepted);
    }

    assert!(send(&rig, "reset_odometry").accepted);
    let distance = rig.robot.motors().distance_m();
    assert_eq!(safety.check_track_limit(distance), TrackLimitStatus::Clear);
    assert!(!safety.is_emergency());
    assert!(send(&rig, "forward").accepted);
}

#[test]
fn test_battery_low_then_critical() {
    let rig = rig();
    let battery = rig.robot.battery();

    battery.sample_once();
    assert_eq!(rig.indicator.state(), IndicatorState::Idle);

    rig.power.set_voltage(21.0);
    battery.sample_once();
    assert_eq!(rig.indicator.state(), IndicatorState::BatteryLow);
    assert!(!rig.robot.safety().is_emergency());

    rig.power.set_voltage(20.2);
    battery.sample_once();
    assert!(rig.robot.safety().is_emergency());
    assert_eq!(rig.robot.status().state(), RobotState::EmergencyStop);
}

#[test]
fn test_battery_read_failure_keeps_last_sample() {
    let rig = rig();
    let before = rig.robot.battery().sample_once();
    rig.power.set_fail(true);
    assert_eq!(rig.robot.battery().sample_once(), before);
    assert!(!rig.robot.safety().is_emergency());
}

#[test]
fn test_estop_button_latches_through_event_thread() {
    let rig = rig();
    rig.robot.start().unwrap();
    let pin = rig.robot.config().safety.estop_pin;
    assert_eq!(rig.irq.handler_count(pin), 1);
    assert_eq!(rig.irq.edge_of(pin), Some(Edge::Falling));

    send(&rig, "forward");
    rig.irq.fire_n(pin, 3);

    assert!(wait_for(Duration::from_secs(1), || rig.robot.safety().is_emergency()));
    assert_eq!(rig.robot.status().state(), RobotState::EmergencyStop);

    assert!(send(&rig, "estop_release").accepted);

    // Bounce inside the debounce window is dropped
    rig.irq.fire(pin);
    thread::sleep(Duration::from_millis(50));
    assert!(!rig.robot.safety().is_emergency());

    thread::sleep(Duration::from_millis(120));
    rig.irq.fire(pin);
    assert!(wait_for(Duration::from_secs(1), || rig.robot.safety().is_emergency()));
    rig.robot.shutdown();
}

#[test]
fn test_background_loops_ramp_and_integrate() {
    let rig = rig_with(|config| config.safety.watchdog_timeout_ms = 10_000);
    rig.robot.start().unwrap();
    rig.robot.start().unwrap();

    assert!(send(&rig, "forward").accepted);
    assert!(wait_for(Duration::from_secs(2), || {
        rig.robot.motors().currents() == WheelPair::new(60.0, 60.0)
    }));
    assert_eq!(rig.gpio.duty(12), Some(60.0));

    rig.irq.fire_n(5, 360);
    rig.irq.fire_n(16, 360);
    assert!(wait_for(Duration::from_secs(1), || {
        (rig.robot.motors().distance_m() - 0.377).abs() < 0.001
    }));

    let telemetry = rig.robot.telemetry_tick();
    assert_eq!(telemetry.robot.state, RobotState::MovingForward);
    assert!(telemetry.safety.watchdog_ok);
    assert_eq!(telemetry.battery.voltage_v, 27.0);
    assert_eq!(rig.camera.overlay().1, "IDLE");
    rig.robot.shutdown();
}

#[test]
fn test_watchdog_loop_stops_silent_robot() {
    let rig = rig();
    rig.robot.start().unwrap();
    send(&rig, "backward");

    // 100 ms timeout, 20 ms checks
    assert!(wait_for(Duration::from_secs(2), || {
        rig.robot.status().state() == RobotState::Idle
    }));
    assert!(!rig.robot.safety().is_emergency());
    assert_eq!(rig.indicator.state(), IndicatorState::Warning);
    rig.robot.shutdown();
}

#[test]
fn test_shutdown_cuts_power_first_and_is_idempotent() {
    let rig = rig_with(|config| config.safety.watchdog_timeout_ms = 10_000);
    rig.robot.start().unwrap();
    send(&rig, "light_on");
    send(&rig, "forward");
    assert!(wait_for(Duration::from_secs(2), || rig.gpio.duty(12) == Some(60.0)));

    rig.robot.shutdown();
    assert!(rig.robot.motors().is_emergency());
    assert_eq!(rig.gpio.duty(12), Some(0.0));
    assert_eq!(rig.gpio.duty(13), Some(0.0));
    assert_eq!(rig.robot.lighting().duty(), 0.0);
    assert_eq!(rig.indicator.state(), IndicatorState::Idle);
    assert!(!rig.robot.is_running());

    rig.robot.shutdown();
    assert!(rig.robot.start().is_err());
}
