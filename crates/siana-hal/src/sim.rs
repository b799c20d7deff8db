//! Simulated backends
//!
//! Used when the board GPIO, the ranging sensors or the power monitor are
//! not reachable, and by every test in the workspace. Each simulator is a
//! cheap `Clone` handle over shared state so a test can keep one handle and
//! inspect or steer what the component under test sees.

use crate::{
    DigitalOutput, Edge, EdgeHandler, GpioBackend, HalError, InterruptController, Level,
    PowerMonitor, PowerSample, PwmOutput, RangingSensor,
};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// ==================== GPIO ====================

#[derive(Debug, Default)]
struct PinBank {
    levels: HashMap<u8, Level>,
    duties: HashMap<u8, f64>,
    writes: u64,
}

/// In-memory GPIO controller that records the last level and duty per pin.
#[derive(Debug, Clone, Default)]
pub struct SimGpio {
    bank: Arc<Mutex<PinBank>>,
}

impl SimGpio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self, pin: u8) -> Option<Level> {
        self.bank.lock().levels.get(&pin).copied()
    }

    pub fn duty(&self, pin: u8) -> Option<f64> {
        self.bank.lock().duties.get(&pin).copied()
    }

    /// Total number of line/duty writes seen so far.
    pub fn write_count(&self) -> u64 {
        self.bank.lock().writes
    }
}

struct SimOutput {
    pin: u8,
    bank: Arc<Mutex<PinBank>>,
}

impl DigitalOutput for SimOutput {
    fn set_level(&mut self, level: Level) -> Result<(), HalError> {
        let mut bank = self.bank.lock();
        bank.levels.insert(self.pin, level);
        bank.writes += 1;
        Ok(())
    }
}

struct SimPwm {
    pin: u8,
    duty: f64,
    bank: Arc<Mutex<PinBank>>,
}

impl PwmOutput for SimPwm {
    fn set_duty(&mut self, duty_pct: f64) -> Result<(), HalError> {
        self.duty = duty_pct.clamp(0.0, 100.0);
        let mut bank = self.bank.lock();
        bank.duties.insert(self.pin, self.duty);
        bank.writes += 1;
        Ok(())
    }

    fn duty(&self) -> f64 {
        self.duty
    }
}

impl GpioBackend for SimGpio {
    fn output(&self, pin: u8) -> Result<Box<dyn DigitalOutput>, HalError> {
        self.bank.lock().levels.insert(pin, Level::Low);
        Ok(Box::new(SimOutput {
            pin,
            bank: self.bank.clone(),
        }))
    }

    fn pwm(&self, pin: u8, _frequency_hz: u32) -> Result<Box<dyn PwmOutput>, HalError> {
        self.bank.lock().duties.insert(pin, 0.0);
        Ok(Box::new(SimPwm {
            pin,
            duty: 0.0,
            bank: self.bank.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

// ==================== Interrupts ====================

type SharedHandler = Arc<dyn Fn() + Send + Sync + 'static>;

/// Interrupt controller whose edges are fired by hand.
#[derive(Clone, Default)]
pub struct SimInterrupts {
    handlers: Arc<Mutex<HashMap<u8, Vec<(Edge, SharedHandler)>>>>,
}

impl SimInterrupts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate one edge on `pin`; every handler registered on that pin runs.
    ///
    /// Handlers are cloned out of the registry first so they run without the
    /// registry lock held, as they would on a real event thread.
    pub fn fire(&self, pin: u8) {
        let handlers: Vec<SharedHandler> = self
            .handlers
            .lock()
            .get(&pin)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        for handler in handlers {
            handler();
        }
    }

    /// Fire `count` edges on `pin`.
    pub fn fire_n(&self, pin: u8, count: usize) {
        for _ in 0..count {
            self.fire(pin);
        }
    }

    pub fn handler_count(&self, pin: u8) -> usize {
        self.handlers.lock().get(&pin).map_or(0, Vec::len)
    }

    pub fn edge_of(&self, pin: u8) -> Option<Edge> {
        self.handlers.lock().get(&pin).and_then(|list| list.first().map(|(edge, _)| *edge))
    }
}

impl std::fmt::Debug for SimInterrupts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pins: Vec<u8> = self.handlers.lock().keys().copied().collect();
        f.debug_struct("SimInterrupts").field("pins", &pins).finish()
    }
}

impl InterruptController for SimInterrupts {
    fn register(&self, pin: u8, edge: Edge, handler: EdgeHandler) -> Result<(), HalError> {
        self.handlers.lock().entry(pin).or_default().push((edge, Arc::from(handler)));
        Ok(())
    }
}

// ==================== Ranging ====================

#[derive(Debug)]
struct RangingState {
    distance_cm: f64,
    jitter_cm: f64,
    timeout: bool,
    echo_timeout: Duration,
}

/// Speed of sound at 20 °C in cm/s.
const SOUND_CM_PER_S: f64 = 34_300.0;

/// Simulated ultrasonic ranger.
///
/// Reports a fixed distance, optionally with uniform jitter, or times out on
/// demand. Targets whose round trip exceeds the echo timeout also time out.
#[derive(Debug, Clone)]
pub struct SimRanging {
    state: Arc<Mutex<RangingState>>,
}

impl SimRanging {
    pub fn fixed(distance_cm: f64) -> Self {
        Self::jittered(distance_cm, 0.0)
    }

    /// Plausible open-floor readings around `center_cm`.
    pub fn jittered(center_cm: f64, jitter_cm: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(RangingState {
                distance_cm: center_cm,
                jitter_cm: jitter_cm.abs(),
                timeout: false,
                echo_timeout: Duration::from_millis(30),
            })),
        }
    }

    pub fn set_distance(&self, distance_cm: f64) {
        let mut state = self.state.lock();
        state.distance_cm = distance_cm;
        state.jitter_cm = 0.0;
    }

    pub fn set_timeout(&self, timeout: bool) {
        self.state.lock().timeout = timeout;
    }
}

impl RangingSensor for SimRanging {
    fn measure_cm(&mut self) -> Result<f64, HalError> {
        let state = self.state.lock();
        if state.timeout {
            return Err(HalError::Timeout);
        }
        let distance_cm = if state.jitter_cm > 0.0 {
            let noise = rand::thread_rng().gen_range(-state.jitter_cm..=state.jitter_cm);
            ((state.distance_cm + noise).max(0.0) * 10.0).round() / 10.0
        } else {
            state.distance_cm
        };
        let round_trip_s = 2.0 * distance_cm / SOUND_CM_PER_S;
        if round_trip_s > state.echo_timeout.as_secs_f64() {
            return Err(HalError::Timeout);
        }
        Ok(distance_cm)
    }

    fn set_echo_timeout(&mut self, timeout: Duration) {
        self.state.lock().echo_timeout = timeout;
    }
}

// ==================== Power monitor ====================

#[derive(Debug)]
struct PowerState {
    voltage_v: f64,
    drain_v_per_sample: f64,
    current_a: Option<f64>,
    fail: bool,
}

/// Simulated shunt monitor with a slow linear discharge.
#[derive(Debug, Clone)]
pub struct SimPowerMonitor {
    state: Arc<Mutex<PowerState>>,
}

impl SimPowerMonitor {
    /// Discharging pack starting at `voltage_v` with a random 1.5–3.5 A draw.
    pub fn discharging(voltage_v: f64, drain_v_per_sample: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(PowerState {
                voltage_v,
                drain_v_per_sample: drain_v_per_sample.abs(),
                current_a: None,
                fail: false,
            })),
        }
    }

    /// Constant voltage and current, for deterministic tests.
    pub fn constant(voltage_v: f64, current_a: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(PowerState {
                voltage_v,
                drain_v_per_sample: 0.0,
                current_a: Some(current_a),
                fail: false,
            })),
        }
    }

    pub fn set_voltage(&self, voltage_v: f64) {
        self.state.lock().voltage_v = voltage_v;
    }

    pub fn set_fail(&self, fail: bool) {
        self.state.lock().fail = fail;
    }
}

impl PowerMonitor for SimPowerMonitor {
    fn sample(&mut self) -> Result<PowerSample, HalError> {
        let mut state = self.state.lock();
        if state.fail {
            return Err(HalError::Device("bus read failed".to_string()));
        }
        state.voltage_v = (state.voltage_v - state.drain_v_per_sample).max(0.0);
        let current_a = match state.current_a {
            Some(current) => current,
            None => (rand::thread_rng().gen_range(1.5..3.5_f64) * 100.0).round() / 100.0,
        };
        Ok(PowerSample {
            voltage_v: state.voltage_v,
            current_a,
            power_w: ((state.voltage_v * current_a) * 10.0).round() / 10.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_sim_gpio_records_levels_and_duties() {
        let gpio = SimGpio::new();
        let mut out = gpio.output(23).unwrap();
        let mut pwm = gpio.pwm(12, 20_000).unwrap();

        assert_eq!(gpio.level(23), Some(Level::Low));
        out.set_level(Level::High).unwrap();
        pwm.set_duty(150.0).unwrap();

        assert_eq!(gpio.level(23), Some(Level::High));
        assert_eq!(gpio.duty(12), Some(100.0));
        assert_eq!(pwm.duty(), 100.0);
        assert_eq!(gpio.write_count(), 2);
    }

    #[test]
    fn test_sim_interrupts_fire_runs_handlers() {
        let irq = SimInterrupts::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        irq.register(
            5,
            Edge::Rising,
            Box::new(move || {
                c.fetch_add(1, Ordering::Relaxed);
            }),
        )
        .unwrap();

        irq.fire_n(5, 3);
        irq.fire(6);

        assert_eq!(count.load(Ordering::Relaxed), 3);
        assert_eq!(irq.handler_count(5), 1);
        assert_eq!(irq.edge_of(5), Some(Edge::Rising));
        assert_eq!(irq.handler_count(6), 0);
    }

    #[test]
    fn test_sim_ranging_fixed_and_timeout() {
        let mut ranging = SimRanging::fixed(42.0);
        let handle = ranging.clone();
        assert_eq!(ranging.measure_cm().unwrap(), 42.0);

        handle.set_distance(10.0);
        assert_eq!(ranging.measure_cm().unwrap(), 10.0);

        handle.set_timeout(true);
        assert!(ranging.measure_cm().unwrap_err().is_timeout());
    }

    #[test]
    fn test_sim_ranging_far_target_exceeds_echo_timeout() {
        // 30 ms covers about 514 cm there and back
        let mut ranging = SimRanging::fixed(400.0);
        assert_eq!(ranging.measure_cm().unwrap(), 400.0);

        ranging.set_echo_timeout(Duration::from_millis(20));
        assert!(ranging.measure_cm().unwrap_err().is_timeout());

        ranging.set_distance(300.0);
        assert_eq!(ranging.measure_cm().unwrap(), 300.0);
    }

    #[test]
    fn test_sim_ranging_jitter_stays_in_band() {
        let mut ranging = SimRanging::jittered(60.0, 10.0);
        for _ in 0..100 {
            let d = ranging.measure_cm().unwrap();
            assert!((50.0..=70.0).contains(&d), "out of band: {}", d);
        }
    }

    #[test]
    fn test_sim_power_monitor_discharges() {
        let mut monitor = SimPowerMonitor::discharging(25.0, 0.5);
        let first = monitor.sample().unwrap();
        let second = monitor.sample().unwrap();
        assert!((first.voltage_v - 24.5).abs() < 1e-9);
        assert!((second.voltage_v - 24.0).abs() < 1e-9);
        assert!((1.5..3.5).contains(&second.current_a));
    }

    #[test]
    fn test_sim_power_monitor_failure() {
        let mut monitor = SimPowerMonitor::constant(24.0, 2.0);
        let handle = monitor.clone();
        let sample = monitor.sample().unwrap();
        assert_eq!(sample.power_w, 48.0);

        handle.set_fail(true);
        assert!(monitor.sample().is_err());
    }
}
