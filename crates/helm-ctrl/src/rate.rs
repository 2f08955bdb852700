//! Attitude rate loop: stick/nav targets to per-axis mixer commands at gyro rate.
//!
//! Axis order is roll, pitch, yaw. Rates are deg/s, attitude is decidegrees, stick commands
//! span +-500 and throttle is in microseconds. Positive yaw rate increases heading.

use bitflags::bitflags;
use serde::Serialize;
use tracing::debug;

use crate::filter::{
    BiquadFilter, FirFilter, LowPass, LowPassKind, Pt1Filter, RateLimitFilter, FIRST_DIFF_COEFFS,
    NRD_COEFFS,
};
use crate::math::{constrain, decideg_to_rad, scale_range, GRAVITY_CMSS};
use crate::profile::{Airframe, ItermRelax, PidBanks, PidProfile, ThrottleConfig};
use crate::rpm::RpmFilter;
use crate::smith::SmithPredictor;

pub const GYRO_SATURATION_LIMIT: f32 = 1800.0;

const RATE_P_MULTIPLIER: f32 = 31.0;
const RATE_I_MULTIPLIER: f32 = 4.0;
const RATE_D_MULTIPLIER: f32 = 1905.0;
const RATE_FF_MULTIPLIER: f32 = 31.0;
const RATE_CD_MULTIPLIER: f32 = 7270.0;
const LEVEL_P_MULTIPLIER: f32 = 6.56;

const HEADING_HOLD_ERROR_LPF_HZ: f32 = 2.0;
const AXIS_ACCEL_MIN_LIMIT: u32 = 50;
const ITERM_RELAX_SETPOINT_THRESHOLD: f32 = 40.0;
const D_BOOST_LPF_HZ: f32 = 7.0;
// cos(80 deg)
const TURN_ASSIST_MIN_COS_TILT: f32 = 0.173648;

pub const ROLL: usize = 0;
pub const PITCH: usize = 1;
pub const YAW: usize = 2;
pub const THROTTLE: usize = 3;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RateModes: u8 {
        const ANGLE        = 1 << 0;
        const HORIZON      = 1 << 1;
        const HEADING_HOLD = 1 << 2;
        const TURN_ASSIST  = 1 << 3;
        /// Hold integrators at their current magnitude (e.g. throttle low, launch).
        const ANTI_WINDUP  = 1 << 4;
    }
}

impl Default for RateModes {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RateInputs {
    pub gyro: [f32; 3],
    pub attitude: [f32; 3],
    /// roll, pitch, yaw (+-500) and throttle (us)
    pub rc_command: [f32; 4],
    pub modes: RateModes,
    /// cm/s, when a pitot is fitted
    pub airspeed: Option<f32>,
    /// Mixer headroom consumed, 0..1
    pub motor_mix_range: f32,
    pub output_saturated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControllerKind {
    /// P + I + FF with a throw limit.
    FixedWing,
    /// Full PID with control derivative, antigravity and iterm relax.
    Multicopter,
}

impl RateControllerKind {
    pub fn for_airframe(airframe: Airframe) -> Self {
        match airframe {
            Airframe::FixedWing => RateControllerKind::FixedWing,
            Airframe::Multirotor | Airframe::Helicopter => RateControllerKind::Multicopter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadingHoldState {
    Disabled,
    UpdateHeading,
    Enabled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AxisTelemetry {
    pub p: f32,
    pub i: f32,
    pub d: f32,
    pub setpoint: f32,
    pub output: f32,
}

#[derive(Debug, Clone)]
struct AxisState {
    rate_target: f32,
    gyro_rate: f32,
    prev_rate_target: f32,
    prev_gyro_rate: f32,

    kp: f32,
    ki: f32,
    kd: f32,
    kff: f32,
    kcd: f32,
    kt: f32,

    iterm: f32,
    iterm_limit: f32,
    iterm_limit_active: bool,
    iterm_freeze_active: bool,
    pid_sum_limit: f32,

    pterm_lpf: LowPass,
    dterm_lpf: LowPass,
    dterm_lpf2: LowPass,
    dterm_diff: FirFilter<5>,
    rate_target_lpf: BiquadFilter,
    d_boost_gyro_lpf: BiquadFilter,
    d_boost_lpf: Pt1Filter,
    angle_lpf: Pt1Filter,
    relax_lpf: Pt1Filter,
    accel_limiter: RateLimitFilter,
    smith: SmithPredictor,

    telemetry: AxisTelemetry,
}

impl AxisState {
    fn new(axis: usize, profile: &PidProfile, looptime_us: u32) -> Self {
        let dt = looptime_us as f32 * 1e-6;
        let pterm_lpf = if axis == YAW {
            LowPass::from_config(LowPassKind::Pt1, profile.yaw_lpf_hz, looptime_us)
        } else {
            LowPass::None
        };
        let coeffs = if profile.dterm_nrd { NRD_COEFFS } else { FIRST_DIFF_COEFFS };
        Self {
            rate_target: 0.0,
            gyro_rate: 0.0,
            prev_rate_target: 0.0,
            prev_gyro_rate: 0.0,
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            kff: 0.0,
            kcd: 0.0,
            kt: 0.0,
            iterm: 0.0,
            iterm_limit: 0.0,
            iterm_limit_active: false,
            iterm_freeze_active: false,
            pid_sum_limit: if axis == YAW { profile.pid_sum_limit_yaw } else { profile.pid_sum_limit },
            pterm_lpf,
            dterm_lpf: LowPass::from_config(profile.dterm_lpf_kind, profile.dterm_lpf_hz, looptime_us),
            dterm_lpf2: LowPass::from_config(LowPassKind::Pt1, profile.dterm_lpf2_hz, looptime_us),
            dterm_diff: FirFilter::new(coeffs),
            rate_target_lpf: BiquadFilter::lpf(profile.cd_lpf_hz, looptime_us),
            d_boost_gyro_lpf: BiquadFilter::lpf(profile.d_boost_gyro_delta_lpf_hz, looptime_us),
            d_boost_lpf: Pt1Filter::new(D_BOOST_LPF_HZ, dt),
            angle_lpf: Pt1Filter::default(),
            relax_lpf: Pt1Filter::new(profile.iterm_relax_cutoff_hz, dt),
            accel_limiter: RateLimitFilter::default(),
            smith: SmithPredictor::new(&profile.smith, looptime_us),
            telemetry: AxisTelemetry::default(),
        }
    }

    fn apply_iterm_limiting(&mut self) {
        if self.iterm_limit_active {
            self.iterm = constrain(self.iterm, -self.iterm_limit, self.iterm_limit);
        } else {
            self.iterm_limit = self.iterm.abs();
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateController {
    kind: RateControllerKind,
    profile: PidProfile,
    bank: PidBanks,
    throttle: ThrottleConfig,
    axes: [AxisState; 3],
    rpm: RpmFilter,
    heading_hold_target: f32,
    heading_hold_lpf: Pt1Filter,
    heading_hold_cos_z_limit: f32,
    antigravity_lpf: Pt1Filter,
    antigravity_gain: f32,
    anti_windup_scaler: f32,
    tpa_factor: f32,
    armed: bool,
    outputs: [f32; 3],
}

pub fn rc_command_to_rate(stick: f32, rate: u8) -> f32 {
    let max = f32::from(rate) * 10.0;
    scale_range(stick, -500.0, 500.0, -max, max)
}

/// Stick (+-500) to lean angle (decidegrees).
pub fn rc_command_to_angle(stick: f32, max_inclination: f32) -> f32 {
    scale_range(constrain(stick, -500.0, 500.0), -500.0, 500.0, -max_inclination, max_inclination)
}

/// Lean angle (decidegrees) to stick (+-500).
pub fn angle_to_rc_command(angle: f32, max_inclination: f32) -> f32 {
    let stick = scale_range(angle, -max_inclination, max_inclination, -500.0, 500.0);
    constrain(stick, -500.0, 500.0)
}

impl RateController {
    pub fn new(
        kind: RateControllerKind,
        airframe: Airframe,
        profile: &PidProfile,
        throttle: ThrottleConfig,
        motor_count: usize,
        looptime_us: u32,
    ) -> Self {
        let cos_roll = decideg_to_rad(f32::from(profile.max_angle_inclination[0])).cos();
        let cos_pitch = decideg_to_rad(f32::from(profile.max_angle_inclination[1])).cos();
        let dt = looptime_us as f32 * 1e-6;
        let mut ctl = Self {
            kind,
            profile: profile.clone(),
            bank: *profile.bank(airframe),
            throttle,
            axes: [
                AxisState::new(ROLL, profile, looptime_us),
                AxisState::new(PITCH, profile, looptime_us),
                AxisState::new(YAW, profile, looptime_us),
            ],
            rpm: RpmFilter::new(&profile.rpm_filter, motor_count, looptime_us),
            heading_hold_target: 0.0,
            heading_hold_lpf: Pt1Filter::default(),
            heading_hold_cos_z_limit: cos_roll * cos_pitch,
            antigravity_lpf: Pt1Filter::new(profile.antigravity_cutoff_hz, dt),
            antigravity_gain: 1.0,
            anti_windup_scaler: 1.0,
            tpa_factor: 1.0,
            armed: false,
            outputs: [0.0; 3],
        };
        ctl.update_coefficients(f32::from(throttle.idle));
        debug!("rate loop {:?} for {:?}, {} motors at {} us", kind, airframe, motor_count, looptime_us);
        ctl
    }

    pub fn kind(&self) -> RateControllerKind {
        self.kind
    }

    pub fn set_armed(&mut self, armed: bool) {
        self.armed = armed;
    }

    pub fn outputs(&self) -> [f32; 3] {
        self.outputs
    }

    pub fn telemetry(&self, axis: usize) -> AxisTelemetry {
        self.axes.get(axis).map(|a| a.telemetry).unwrap_or_default()
    }

    pub fn tpa_factor(&self) -> f32 {
        self.tpa_factor
    }

    pub fn heading_hold_target(&self) -> f32 {
        self.heading_hold_target
    }

    /// Degrees, 0..360.
    pub fn set_heading_hold_target(&mut self, heading_deg: f32) {
        self.heading_hold_target = heading_deg.rem_euclid(360.0);
    }

    pub fn update_motor_rpm(&mut self, rpm: &[f32]) {
        self.rpm.update(rpm);
    }

    pub fn reset_iterm(&mut self) {
        for axis in self.axes.iter_mut() {
            axis.iterm = 0.0;
            axis.iterm_limit = 0.0;
        }
    }

    fn multicopter_tpa(&self, throttle: f32) -> f32 {
        let rate = f32::from(self.profile.tpa_rate);
        let bp = f32::from(self.profile.tpa_breakpoint);
        let max = f32::from(self.throttle.max);
        if self.profile.tpa_rate == 0 || throttle < bp {
            1.0
        } else if throttle < max {
            (100.0 - rate * (throttle - bp) / (max - bp)) / 100.0
        } else {
            (100.0 - rate) / 100.0
        }
    }

    fn fixed_wing_tpa(&self, throttle: f32) -> f32 {
        let idle = f32::from(self.throttle.idle);
        let bp = f32::from(self.profile.tpa_breakpoint);
        if self.profile.tpa_rate == 0 || bp <= idle || !self.armed {
            return 1.0;
        }
        let factor = if throttle > idle {
            constrain(0.5 + (bp - idle) / (throttle - idle) / 2.0, 0.5, 2.0)
        } else {
            2.0
        };
        1.0 + (factor - 1.0) * (f32::from(self.profile.tpa_rate) / 100.0)
    }

    fn update_coefficients(&mut self, throttle: f32) {
        self.tpa_factor = match self.kind {
            RateControllerKind::Multicopter => self.multicopter_tpa(throttle),
            RateControllerKind::FixedWing => self.fixed_wing_tpa(throttle),
        };
        let tpa = self.tpa_factor;
        for (i, axis) in self.axes.iter_mut().enumerate() {
            let b = self.bank.axis(i);
            let (p, iv, d, ff) = (f32::from(b.p), f32::from(b.i), f32::from(b.d), f32::from(b.ff));
            match self.kind {
                RateControllerKind::Multicopter => {
                    axis.kp = p / RATE_P_MULTIPLIER * tpa;
                    axis.ki = iv / RATE_I_MULTIPLIER;
                    axis.kd = d / RATE_D_MULTIPLIER * tpa;
                    axis.kcd = ff / RATE_CD_MULTIPLIER * tpa;
                    axis.kff = 0.0;
                    axis.kt = if b.p != 0 && b.i != 0 {
                        2.0 / (axis.kp / axis.ki + axis.kd / axis.kp)
                    } else {
                        0.0
                    };
                }
                RateControllerKind::FixedWing => {
                    axis.kp = p / RATE_P_MULTIPLIER * tpa;
                    axis.ki = iv / RATE_I_MULTIPLIER * tpa;
                    axis.kd = d / RATE_D_MULTIPLIER * tpa;
                    axis.kff = ff / RATE_FF_MULTIPLIER * tpa;
                    axis.kcd = 0.0;
                    axis.kt = 0.0;
                }
            }
        }
    }

    pub fn heading_hold_state(&self, input: &RateInputs) -> HeadingHoldState {
        let (roll, pitch) = (decideg_to_rad(input.attitude[ROLL]), decideg_to_rad(input.attitude[PITCH]));
        if roll.cos() * pitch.cos() < self.heading_hold_cos_z_limit {
            return HeadingHoldState::Disabled;
        }
        if input.modes.contains(RateModes::HEADING_HOLD) && input.rc_command[YAW] == 0.0 {
            HeadingHoldState::Enabled
        } else {
            HeadingHoldState::UpdateHeading
        }
    }

    fn heading_hold_rate(&mut self, yaw_decideg: f32, dt: f32) -> f32 {
        let mut error = self.heading_hold_target - yaw_decideg / 10.0;
        if error <= -180.0 {
            error += 360.0;
        }
        if error >= 180.0 {
            error -= 360.0;
        }
        let limit = f32::from(self.profile.heading_hold_rate_limit);
        let rate = constrain(error * f32::from(self.bank.heading.p) / 30.0, -limit, limit);
        self.heading_hold_lpf.apply_with(rate, HEADING_HOLD_ERROR_LPF_HZ, dt)
    }

    fn horizon_rate_magnitude(&self, input: &RateInputs) -> f32 {
        let deflection = input.rc_command[ROLL].abs().max(input.rc_command[PITCH].abs());
        let stick = constrain(deflection, 0.0, 500.0) / 500.0;
        let transition = constrain(f32::from(self.bank.level.d), 0.0, 100.0) / 100.0;
        if transition > 0.0 && stick <= transition {
            stick / transition
        } else {
            1.0
        }
    }

    fn level(&mut self, axis: usize, input: &RateInputs, horizon: f32, dt: f32) {
        let max_incl = f32::from(self.profile.max_angle_inclination[axis]);
        let angle_target = rc_command_to_angle(input.rc_command[axis], max_incl);
        let error_deg = (angle_target - input.attitude[axis]) / 10.0;
        let max_rate = f32::from(self.profile.rates[axis]) * 10.0;
        let level = self.bank.level;
        let mut rate = constrain(error_deg * f32::from(level.p) / LEVEL_P_MULTIPLIER, -max_rate, max_rate);

        let state = &mut self.axes[axis];
        if level.i > 0 {
            rate = state.angle_lpf.apply_with(rate, f32::from(level.i), dt);
        }
        state.rate_target = if input.modes.contains(RateModes::HORIZON) {
            (1.0 - horizon) * rate + horizon * state.rate_target
        } else {
            rate
        };
    }

    fn turn_assist(&mut self, input: &RateInputs) {
        let roll = decideg_to_rad(input.attitude[ROLL]);
        let pitch = decideg_to_rad(input.attitude[PITCH]);

        let earth_yaw_rate = match self.kind {
            RateControllerKind::FixedWing => {
                if roll.cos() * pitch.cos() < TURN_ASSIST_MIN_COS_TILT {
                    return;
                }
                let bank = decideg_to_rad(rc_command_to_angle(
                    input.rc_command[ROLL],
                    f32::from(self.profile.max_angle_inclination[ROLL]),
                ));
                let pitch_target = decideg_to_rad(rc_command_to_angle(
                    input.rc_command[PITCH],
                    f32::from(self.profile.max_angle_inclination[PITCH]),
                ));
                let airspeed = constrain(input.airspeed.unwrap_or(self.profile.fw_reference_airspeed), 300.0, 6000.0);
                let bank = constrain(bank, -60f32.to_radians(), 60f32.to_radians());
                (GRAVITY_CMSS * bank.tan() / airspeed * pitch_target.abs().cos()).to_degrees()
            }
            RateControllerKind::Multicopter => self.axes[YAW].rate_target,
        };

        // earth-frame yaw rate expressed in body axes
        let body = [
            -pitch.sin() * earth_yaw_rate,
            roll.sin() * pitch.cos() * earth_yaw_rate,
            roll.cos() * pitch.cos() * earth_yaw_rate,
        ];
        let limit = |axis: usize| f32::from(self.profile.rates[axis]) * 10.0;
        let (lr, lp, ly) = (limit(ROLL), limit(PITCH), limit(YAW));

        self.axes[ROLL].rate_target = constrain(self.axes[ROLL].rate_target + body[0], -lr, lr);
        self.axes[PITCH].rate_target = constrain(
            self.axes[PITCH].rate_target + body[1] * self.profile.fw_coordinated_pitch_gain,
            -lp,
            lp,
        );
        self.axes[YAW].rate_target = match self.kind {
            RateControllerKind::FixedWing => constrain(
                self.axes[YAW].rate_target + body[2] * self.profile.fw_coordinated_yaw_gain,
                -ly,
                ly,
            ),
            RateControllerKind::Multicopter => constrain(body[2], -ly, ly),
        };
    }

    fn fixed_wing_iterm_limit_active(&self, stick: f32) -> bool {
        let limit = self.profile.fw_iterm_limit_stick_position;
        limit != 0.0 && stick.abs() > limit
    }

    /// One gyro-rate tick. Returns the per-axis mixer commands.
    pub fn update(&mut self, input: &RateInputs, dt: f32) -> [f32; 3] {
        if dt <= 0.0 {
            return self.outputs;
        }
        self.update_coefficients(input.rc_command[THROTTLE]);

        let hold = self.heading_hold_state(input);
        if hold == HeadingHoldState::UpdateHeading {
            self.set_heading_hold_target(input.attitude[YAW] / 10.0);
        }

        for axis in 0..3 {
            let gyro = self.rpm.apply(axis, input.gyro[axis]);
            self.axes[axis].gyro_rate = self.axes[axis].smith.apply(gyro);

            let target = if axis == YAW && hold == HeadingHoldState::Enabled {
                self.heading_hold_rate(input.attitude[YAW], dt)
            } else {
                rc_command_to_rate(input.rc_command[axis], self.profile.rates[axis])
            };
            self.axes[axis].rate_target = constrain(target, -GYRO_SATURATION_LIMIT, GYRO_SATURATION_LIMIT);
        }

        let leveling = input.modes.intersects(RateModes::ANGLE | RateModes::HORIZON);
        if leveling {
            let horizon = self.horizon_rate_magnitude(input);
            self.level(ROLL, input, horizon, dt);
            self.level(PITCH, input, horizon, dt);
        }
        if input.modes.contains(RateModes::TURN_ASSIST) {
            self.turn_assist(input);
        }

        if self.kind == RateControllerKind::Multicopter {
            let thr = input.rc_command[THROTTLE];
            let hpf = thr - self.antigravity_lpf.apply_dt(thr, dt);
            let gain = self.profile.antigravity_gain.max(1.0);
            self.antigravity_gain = constrain(
                scale_range(hpf.abs() * self.profile.antigravity_accelerator, 0.0, 1000.0, 1.0, gain),
                1.0,
                gain,
            );
        }

        let windup_point = 1.0 - f32::from(self.profile.iterm_windup_point_percent.min(99)) / 100.0;
        self.anti_windup_scaler = constrain((1.0 - input.motor_mix_range) / windup_point, 0.0, 1.0);

        for axis in 0..3 {
            let accel_limit = if axis == YAW {
                self.profile.axis_accel_limit_yaw
            } else {
                self.profile.axis_accel_limit_roll_pitch
            };
            if accel_limit > AXIS_ACCEL_MIN_LIMIT {
                let state = &mut self.axes[axis];
                state.rate_target = state.accel_limiter.apply(state.rate_target, accel_limit as f32, dt);
            }

            let saturated = match self.kind {
                RateControllerKind::FixedWing => self.fixed_wing_iterm_limit_active(input.rc_command[axis] / 500.0),
                RateControllerKind::Multicopter => input.output_saturated,
            };
            let freeze = self.kind == RateControllerKind::FixedWing
                && axis == YAW
                && self.profile.fw_yaw_iterm_bank_freeze != 0
                && (input.attitude[ROLL] / 10.0).abs() > f32::from(self.profile.fw_yaw_iterm_bank_freeze)
                && !input.modes.contains(RateModes::TURN_ASSIST);
            {
                let state = &mut self.axes[axis];
                state.iterm_limit_active = input.modes.contains(RateModes::ANTI_WINDUP) || saturated;
                state.iterm_freeze_active = freeze;
            }

            self.outputs[axis] = match self.kind {
                RateControllerKind::FixedWing => self.apply_fixed_wing(axis, dt),
                RateControllerKind::Multicopter => self.apply_multicopter(axis, leveling, dt),
            };
        }
        self.outputs
    }

    fn pterm(state: &mut AxisState, error: f32) -> f32 {
        state.pterm_lpf.apply(error * state.kp)
    }

    fn dterm(&mut self, axis: usize, dt: f32) -> f32 {
        let boost_factor = self.profile.d_boost_factor;
        let boost_max_accel = self.profile.d_boost_max_at_accel;
        let multicopter = self.kind == RateControllerKind::Multicopter;
        let state = &mut self.axes[axis];

        state.dterm_diff.update(state.gyro_rate);
        if state.kd == 0.0 {
            return 0.0;
        }
        // negated measurement derivative (per sample)
        let mut delta = -state.dterm_diff.apply();
        delta = state.dterm_lpf.apply(delta);
        delta = state.dterm_lpf2.apply(delta);

        let mut boost = 1.0;
        if multicopter && boost_factor > 1.0 {
            let gyro_accel = state.d_boost_gyro_lpf.apply((state.gyro_rate - state.prev_gyro_rate) / dt).abs();
            let rate_accel = ((state.rate_target - state.prev_rate_target) / dt).abs();
            let accel = gyro_accel.max(rate_accel);
            boost = scale_range(accel, 0.0, boost_max_accel, 1.0, boost_factor);
            boost = state.d_boost_lpf.apply_with(boost, D_BOOST_LPF_HZ, dt);
            boost = constrain(boost, 1.0, boost_factor);
        }
        delta * (state.kd / dt) * boost
    }

    fn apply_fixed_wing(&mut self, axis: usize, dt: f32) -> f32 {
        let throw_limit = self.profile.fw_iterm_throw_limit;
        let d = self.dterm(axis, dt);
        let state = &mut self.axes[axis];

        let error = state.rate_target - state.gyro_rate;
        let p = Self::pterm(state, error);
        let ff = state.rate_target * state.kff;

        if !state.iterm_freeze_active {
            state.iterm += error * state.ki * dt;
        }
        state.apply_iterm_limiting();
        if throw_limit != 0.0 {
            state.iterm = constrain(state.iterm, -throw_limit, throw_limit);
        }

        let out = constrain(p + ff + state.iterm + d, -state.pid_sum_limit, state.pid_sum_limit);
        state.telemetry = AxisTelemetry { p: p + ff, i: state.iterm, d, setpoint: state.rate_target, output: out };
        state.prev_rate_target = state.rate_target;
        state.prev_gyro_rate = state.gyro_rate;
        out
    }

    fn apply_multicopter(&mut self, axis: usize, leveling: bool, dt: f32) -> f32 {
        let relax = self.profile.iterm_relax;
        let relax_cutoff = self.profile.iterm_relax_cutoff_hz;
        let antigravity = self.antigravity_gain;
        let aw = self.anti_windup_scaler;
        let d = self.dterm(axis, dt);
        let state = &mut self.axes[axis];

        let error = state.rate_target - state.gyro_rate;
        let p = Self::pterm(state, error);

        let target_delta = state.rate_target - state.prev_rate_target;
        let target_delta = state.rate_target_lpf.apply(target_delta);
        let cd = if state.kcd > 0.0 && !leveling { target_delta * (state.kcd / dt) } else { 0.0 };

        let out = p + d + state.iterm + cd;
        let out_limited = constrain(out, -state.pid_sum_limit, state.pid_sum_limit);

        let setpoint_lpf = state.relax_lpf.apply_with(state.rate_target, relax_cutoff, dt);
        let setpoint_hpf = (state.rate_target - setpoint_lpf).abs();
        let relaxed = match relax {
            ItermRelax::Rpy => true,
            ItermRelax::Rp => axis != YAW,
            ItermRelax::Off => false,
        };
        let mut iterm_error = error;
        if relaxed {
            iterm_error *= (1.0 - setpoint_hpf / ITERM_RELAX_SETPOINT_THRESHOLD).max(0.0);
        }
        iterm_error *= antigravity;

        state.iterm += iterm_error * state.ki * aw * dt + (out_limited - out) * state.kt * aw * dt;
        state.apply_iterm_limiting();

        state.telemetry = AxisTelemetry { p, i: state.iterm, d: d + cd, setpoint: state.rate_target, output: out_limited };
        state.prev_rate_target = state.rate_target;
        state.prev_gyro_rate = state.gyro_rate;
        out_limited
    }
}
