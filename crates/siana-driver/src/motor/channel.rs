//! One DC motor behind a two-line H-bridge
//!
//! | state        | IN1  | IN2  |
//! |--------------|------|------|
//! | forward      | high | low  |
//! | reverse      | low  | high |
//! | coast        | low  | low  |
//! | active brake | high | high |
//!
//! An inverted channel (motor wired reversed) swaps forward and reverse;
//! coast and brake are symmetric and unaffected.

use siana_hal::{DigitalOutput, GpioBackend, HalError, Level, PwmOutput};
use siana_tools::MotorPins;

/// H-bridge line configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Forward,
    Reverse,
    Coast,
    Brake,
}

impl BridgeState {
    /// `(IN1, IN2)` for this state, after applying the inversion flag.
    pub fn lines(self, inverted: bool) -> (Level, Level) {
        let state = match (self, inverted) {
            (BridgeState::Forward, true) => BridgeState::Reverse,
            (BridgeState::Reverse, true) => BridgeState::Forward,
            (state, _) => state,
        };
        match state {
            BridgeState::Forward => (Level::High, Level::Low),
            BridgeState::Reverse => (Level::Low, Level::High),
            BridgeState::Coast => (Level::Low, Level::Low),
            BridgeState::Brake => (Level::High, Level::High),
        }
    }
}

pub struct MotorChannel {
    name: &'static str,
    pwm: Box<dyn PwmOutput>,
    in1: Box<dyn DigitalOutput>,
    in2: Box<dyn DigitalOutput>,
    inverted: bool,
    state: BridgeState,
}

impl MotorChannel {
    /// Claim the three lines of one motor. The bridge starts in coast.
    pub fn open(
        name: &'static str,
        gpio: &dyn GpioBackend,
        pins: &MotorPins,
        pwm_frequency_hz: u32,
    ) -> Result<Self, HalError> {
        let mut channel = Self {
            name,
            pwm: gpio.pwm(pins.pwm, pwm_frequency_hz)?,
            in1: gpio.output(pins.in1)?,
            in2: gpio.output(pins.in2)?,
            inverted: pins.inverted,
            state: BridgeState::Coast,
        };
        channel.coast()?;
        Ok(channel)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn duty(&self) -> f64 {
        self.pwm.duty()
    }

    /// Apply a signed speed in `[-100, 100]`. Zero is active brake.
    pub fn apply(&mut self, speed_pct: f64) -> Result<(), HalError> {
        let speed_pct = speed_pct.clamp(-100.0, 100.0);
        if speed_pct == 0.0 {
            return self.brake();
        }
        let direction = if speed_pct > 0.0 {
            BridgeState::Forward
        } else {
            BridgeState::Reverse
        };
        self.set_bridge(direction)?;
        self.pwm.set_duty(speed_pct.abs())
    }

    /// Short the motor windings.
    pub fn brake(&mut self) -> Result<(), HalError> {
        self.pwm.set_duty(0.0)?;
        self.set_bridge(BridgeState::Brake)
    }

    /// Cut power and let the wheel spin freely.
    pub fn coast(&mut self) -> Result<(), HalError> {
        self.pwm.set_duty(0.0)?;
        self.set_bridge(BridgeState::Coast)
    }

    fn set_bridge(&mut self, state: BridgeState) -> Result<(), HalError> {
        let (in1, in2) = state.lines(self.inverted);
        self.in1.set_level(in1)?;
        self.in2.set_level(in2)?;
        self.state = state;
        Ok(())
    }
}

impl std::fmt::Debug for MotorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorChannel")
            .field("name", &self.name)
            .field("inverted", &self.inverted)
            .field("state", &self.state)
            .field("duty", &self.pwm.duty())
            .finish()
    }
}
