//! Square-root shaped P controller.
//!
//! Inside the linear band the output is `error * kp`; beyond it the response follows
//! `sqrt(2 * d_max * err)` so that the rate of change of the output (the second derivative of
//! the controlled quantity) never exceeds `d_max`.

use crate::math::constrain;

/// Shaped correction for `error`. `d_max <= 0` degenerates to a plain P term.
pub fn sqrt_controller(error: f32, kp: f32, d_max: f32, dt: f32) -> f32 {
    let correction = if d_max <= 0.0 {
        error * kp
    } else if kp == 0.0 {
        if error > 0.0 {
            (2.0 * d_max * error).sqrt()
        } else if error < 0.0 {
            -(2.0 * d_max * -error).sqrt()
        } else {
            0.0
        }
    } else {
        let linear_dist = d_max / (kp * kp);
        if error > linear_dist {
            (2.0 * d_max * (error - linear_dist / 2.0)).max(0.0).sqrt()
        } else if error < -linear_dist {
            -(2.0 * d_max * (-error - linear_dist / 2.0)).max(0.0).sqrt()
        } else {
            error * kp
        }
    };

    // never overshoot the remaining error within one step
    if dt > 0.0 {
        let step = error.abs() / dt;
        constrain(correction, -step, step)
    } else {
        correction
    }
}

/// Error that produces `output` under [`sqrt_controller`]; for a velocity output this is
/// the stopping distance.
pub fn sqrt_controller_inverse(output: f32, kp: f32, d_max: f32) -> f32 {
    if d_max > 0.0 && kp == 0.0 {
        return output * output / (2.0 * d_max);
    }
    if d_max <= 0.0 {
        return if kp != 0.0 { output / kp } else { 0.0 };
    }

    let linear_velocity = d_max / kp;
    if output.abs() < linear_velocity {
        return output / kp;
    }

    let linear_dist = d_max / (kp * kp);
    let stopping_dist = linear_dist * 0.5 + output * output / (2.0 * d_max);
    if output > 0.0 {
        stopping_dist
    } else {
        -stopping_dist
    }
}

/// Stateful wrapper that also limits the input error so the output stays within
/// `[output_min, output_max]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqrtController {
    kp: f32,
    d_max: f32,
    error_min: f32,
    error_max: f32,
    error: f32,
}

impl SqrtController {
    pub fn new(kp: f32, output_min: f32, output_max: f32, d_max: f32) -> Self {
        let error_min = if output_min < 0.0 { sqrt_controller_inverse(output_min, kp, d_max) } else { 0.0 };
        let error_max = if output_max > 0.0 { sqrt_controller_inverse(output_max, kp, d_max) } else { 0.0 };
        Self { kp, d_max, error_min, error_max, error: 0.0 }
    }

    pub fn error(&self) -> f32 {
        self.error
    }

    /// Returns the shaped output and the (possibly pulled-in) target.
    pub fn apply(&mut self, target: f32, measurement: f32, dt: f32) -> (f32, f32) {
        let mut target = target;
        self.error = target - measurement;
        if self.error_min != 0.0 && self.error < self.error_min {
            self.error = self.error_min;
            target = measurement + self.error;
        } else if self.error_max != 0.0 && self.error > self.error_max {
            self.error = self.error_max;
            target = measurement + self.error;
        }
        (sqrt_controller(self.error, self.kp, self.d_max, dt), target)
    }
}
