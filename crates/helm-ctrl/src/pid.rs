use bitflags::bitflags;

use crate::filter::Pt1Filter;
use crate::math::constrain;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PidFlags: u8 {
        /// Differentiate the error instead of the (negated) measurement.
        const DTERM_FROM_ERROR  = 1 << 0;
        const ZERO_INTEGRATOR   = 1 << 1;
        /// Accept an integrator update only when it reduces |I|.
        const SHRINK_INTEGRATOR = 1 << 2;
        /// Clamp the integrator to the output bounds.
        const LIMIT_INTEGRATOR  = 1 << 3;
        const FREEZE_INTEGRATOR = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub kff: f32,
    /// Back-calculation tracking gain.
    pub kt: f32,
}

/// Contributions of the last update, exported to telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidTerms {
    pub p: f32,
    pub i: f32,
    pub d: f32,
    pub ff: f32,
    pub output: f32,
}

#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    integrator: f32,
    last_input: f32,
    reset: bool,
    dterm_lpf_hz: f32,
    error_lpf_hz: f32,
    dterm_filter: Pt1Filter,
    error_filter: Pt1Filter,
    terms: PidTerms,
}

impl Default for PidController {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0, 0.0)
    }
}

fn sign(v: f32) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

impl PidController {
    /// Tracking gain is derived from the gains as 2 / (Ti + Td). It stays zero (and I is
    /// disabled) when kP or kI are too small to form the ratios.
    pub fn new(kp: f32, ki: f32, kd: f32, kff: f32, dterm_lpf_hz: f32) -> Self {
        let mut pid = Self {
            gains: PidGains::default(),
            integrator: 0.0,
            last_input: 0.0,
            reset: true,
            dterm_lpf_hz,
            error_lpf_hz: 0.0,
            dterm_filter: Pt1Filter::default(),
            error_filter: Pt1Filter::default(),
            terms: PidTerms::default(),
        };
        pid.set_gains(kp, ki, kd, kff);
        pid
    }

    pub fn with_error_lpf(mut self, hz: f32) -> Self {
        self.error_lpf_hz = hz;
        self
    }

    pub fn set_gains(&mut self, kp: f32, ki: f32, kd: f32, kff: f32) {
        const EPS: f32 = 1e-6;
        let mut g = PidGains { kp, ki, kd, kff, kt: 0.0 };
        if kp.abs() > EPS && ki.abs() > EPS {
            let ti = kp / ki;
            let td = kd / kp;
            let denom = ti + td;
            g.kt = if denom.abs() > EPS { 2.0 / denom } else { 0.0 };
        } else {
            g.ki = 0.0;
        }
        self.gains = g;
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn integrator(&self) -> f32 {
        self.integrator
    }

    pub fn set_integrator(&mut self, value: f32) {
        self.integrator = value;
    }

    pub fn terms(&self) -> PidTerms {
        self.terms
    }

    /// Zeroes accumulators and re-seeds the derivative baseline on the next update.
    pub fn reset(&mut self) {
        self.integrator = 0.0;
        self.last_input = 0.0;
        self.reset = true;
        self.dterm_filter.reset(0.0);
        self.error_filter.reset(0.0);
        self.terms = PidTerms::default();
    }

    pub fn apply2(
        &mut self,
        setpoint: f32,
        measurement: f32,
        dt: f32,
        out_min: f32,
        out_max: f32,
        flags: PidFlags,
    ) -> f32 {
        self.apply3(setpoint, measurement, dt, out_min, out_max, flags, 1.0, 1.0)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn apply3(
        &mut self,
        setpoint: f32,
        measurement: f32,
        dt: f32,
        out_min: f32,
        out_max: f32,
        flags: PidFlags,
        gain_scaler: f32,
        dterm_scaler: f32,
    ) -> f32 {
        let g = self.gains;
        let from_error = flags.contains(PidFlags::DTERM_FROM_ERROR);

        let mut error = setpoint - measurement;
        if self.error_lpf_hz > 0.0 {
            error = self.error_filter.apply_with(error, self.error_lpf_hz, dt);
        }

        let p = error * g.kp * gain_scaler;

        let d = if g.kd == 0.0 || dt <= 0.0 {
            0.0
        } else {
            let input = if from_error { error } else { measurement };
            if self.reset {
                self.last_input = input;
                self.reset = false;
            }
            let mut derivative = if from_error {
                (input - self.last_input) / dt
            } else {
                -(input - self.last_input) / dt
            };
            if self.dterm_lpf_hz > 0.0 {
                derivative = self.dterm_filter.apply_with(derivative, self.dterm_lpf_hz, dt);
            }
            derivative * g.kd * gain_scaler * dterm_scaler
        };
        self.last_input = if from_error { error } else { measurement };
        self.reset = false;

        if flags.contains(PidFlags::ZERO_INTEGRATOR) {
            self.integrator = 0.0;
        }

        let ff = setpoint * g.kff * gain_scaler;
        let out = p + self.integrator * gain_scaler + d + ff;
        let out_constrained = constrain(out, out_min, out_max);

        self.terms = PidTerms { p, i: self.integrator, d, ff, output: out_constrained };

        if flags.intersects(PidFlags::ZERO_INTEGRATOR | PidFlags::FREEZE_INTEGRATOR) {
            return out_constrained;
        }

        // Back-calculation only unwinds: same-sign (or zero integrator) contributions are dropped,
        // and the unwind stops at zero.
        let back_calc = out_constrained - out;
        let mut unwind = 0.0;
        if sign(back_calc) != 0 && sign(self.integrator) != 0 && sign(back_calc) != sign(self.integrator) {
            unwind = back_calc * g.kt * dt;
            if self.integrator > 0.0 {
                unwind = unwind.max(-self.integrator);
            } else {
                unwind = unwind.min(-self.integrator);
            }
        }

        let new_integrator = self.integrator + error * g.ki * gain_scaler * dt + unwind;
        if flags.contains(PidFlags::SHRINK_INTEGRATOR) {
            if new_integrator.abs() < self.integrator.abs() {
                self.integrator = new_integrator;
            }
        } else {
            self.integrator = new_integrator;
        }

        if flags.contains(PidFlags::LIMIT_INTEGRATOR) {
            self.integrator = constrain(self.integrator, out_min, out_max);
        }

        out_constrained
    }
}
