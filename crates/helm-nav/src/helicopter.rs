//! Collective-pitch helicopters share the rotorcraft controllers; only the lift channel differs.
//! Altitude is flown on collective while the throttle channel holds the governor setpoint.

use helm_ctrl::math::constrain;
use helm_ctrl::profile::{Airframe, ThrottleConfig};
use helm_ctrl::rate::THROTTLE;

use crate::config::NavConfig;
use crate::context::NavigationContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiftChannel {
    Throttle,
    Collective,
}

/// Hover point and limits of the lift command, us.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiftRange {
    pub hover: f32,
    pub min: f32,
    pub max: f32,
    /// Held when the altitude estimate is gone.
    pub failsafe: f32,
}

impl LiftRange {
    pub fn for_airframe(cfg: &NavConfig, throttle: &ThrottleConfig, airframe: Airframe) -> (LiftChannel, Self) {
        match airframe {
            Airframe::Helicopter => (
                LiftChannel::Collective,
                Self {
                    hover: f32::from(cfg.heli.hover_collective),
                    min: f32::from(cfg.heli.min_collective),
                    max: f32::from(cfg.heli.max_collective),
                    failsafe: f32::from(cfg.heli.failsafe_collective),
                },
            ),
            Airframe::Multirotor | Airframe::FixedWing => (
                LiftChannel::Throttle,
                Self {
                    hover: f32::from(cfg.mc.hover_throttle),
                    min: f32::from(throttle.idle),
                    max: f32::from(throttle.max),
                    failsafe: f32::from(cfg.failsafe_throttle),
                },
            ),
        }
    }

    /// Correction bounds around hover.
    pub fn adjustment_bounds(&self) -> (f32, f32) {
        (self.min - self.hover, self.max - self.hover)
    }

    pub fn output(&self, adjustment: f32) -> f32 {
        constrain(self.hover + adjustment, self.min, self.max)
    }
}

impl NavigationContext {
    /// Pilot stick that commands lift.
    pub(crate) fn pilot_lift(&self) -> f32 {
        match self.rotor.channel {
            LiftChannel::Throttle => self.pilot.throttle,
            LiftChannel::Collective => self.pilot.collective,
        }
    }

    pub(crate) fn set_lift_command(&mut self, value: f32) {
        match self.rotor.channel {
            LiftChannel::Throttle => self.rc_command[THROTTLE] = value,
            LiftChannel::Collective => {
                self.collective = value;
                self.rc_command[THROTTLE] = f32::from(self.cfg.heli.governor_throttle);
            }
        }
    }

    /// Lean limit of the position loop, decidegrees.
    pub(crate) fn rotorcraft_max_bank(&self) -> f32 {
        let deg = match self.rotor.channel {
            LiftChannel::Throttle => self.cfg.mc.max_bank_angle,
            LiftChannel::Collective => self.cfg.heli.max_bank_angle,
        };
        f32::from(deg) * 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RcConfig;
    use crate::context::PilotInput;
    use helm_ctrl::profile::PidProfile;

    fn ctx(airframe: Airframe) -> NavigationContext {
        NavigationContext::new(NavConfig::default(), RcConfig::default(), &PidProfile::default(), ThrottleConfig::default(), airframe)
    }

    #[test]
    fn helicopter_flies_on_collective() {
        let mut c = ctx(Airframe::Helicopter);
        c.set_pilot_input(PilotInput { throttle: 1900.0, collective: 1600.0, ..Default::default() });
        assert_eq!(c.pilot_lift(), 1600.0);
        c.set_lift_command(1500.0);
        assert_eq!(c.collective, 1500.0);
        assert_eq!(c.rc_command[THROTTLE], 1700.0);
        assert_eq!(c.rotorcraft_max_bank(), 250.0);
    }

    #[test]
    fn multirotor_flies_on_throttle() {
        let mut c = ctx(Airframe::Multirotor);
        c.set_lift_command(1400.0);
        assert_eq!(c.rc_command[THROTTLE], 1400.0);
        let (min, max) = c.rotor.lift.adjustment_bounds();
        assert_eq!((min, max), (-350.0, 350.0));
        assert_eq!(c.rotor.lift.output(1000.0), 1850.0);
    }
}
