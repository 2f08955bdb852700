//! Rotorcraft position, altitude and heading loops.

use helm_ctrl::filter::Pt1Filter;
use helm_ctrl::math::{apply_deadband_f, centideg_to_rad, constrain, rad_to_decideg, scale_range, wrap_18000, GRAVITY_CMSS};
use helm_ctrl::profile::{Airframe, ThrottleConfig};
use helm_ctrl::rate::{angle_to_rc_command, PITCH, ROLL, THROTTLE, YAW};
use helm_ctrl::sqrt::sqrt_controller;
use helm_ctrl::PidFlags;
use tracing::debug;

use crate::config::{NavConfig, UserControlMode};
use crate::context::{EstimateStatus, NavigationContext, PosUpdate, UpdateTimer};
use crate::fsm::{descriptor, MwState, StateFlags};
use crate::helicopter::{LiftChannel, LiftRange};
use crate::modes::BoxModes;
use crate::targets::RocMode;

/// Horizontal acceleration available to the position loop, cm/s/s.
const NAV_ACCELERATION_XY_MAX: f32 = 980.0;
/// cm/s/s/s
const POS_CONTROL_JERK_LIMIT: f32 = 1700.0;
const THROTTLE_CUTOFF_HZ: f32 = 4.0;
/// Bound on how fast the climb-rate target may grow, cm/s/s.
const ALT_VEL_ACCEL_LIMIT: f32 = GRAVITY_CMSS / 5.0;
/// Second-derivative bound of the altitude response.
const ALT_SQRT_D_MAX: f32 = GRAVITY_CMSS / 2.0;
/// Low throttle below this altitude arms the takeoff preparation.
const TAKEOFF_ALTITUDE_CM: f32 = 50.0;
const TAKEOFF_INTEGRATOR: f32 = -500.0;
const MIN_HEADING_ATTENUATION: f32 = 0.05;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrakingState {
    pub active: bool,
    pub boost: bool,
    /// Set on entry, cleared once the pilot moves the sticks again.
    pub locked: bool,
    disengage_at_ms: u64,
    boost_disengage_at_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RotorcraftState {
    pub(crate) channel: LiftChannel,
    pub(crate) lift: LiftRange,
    /// Stick position commanding zero climb.
    rc_zero: f32,
    lift_filter: Pt1Filter,
    prepare_takeoff: bool,
    /// Last lift command of the altitude loop.
    pub(crate) adjusted_lift: f32,
    last_accel: [f32; 2],
    pub(crate) braking: BrakingState,
    alt_timer: UpdateTimer,
    pos_timer: UpdateTimer,
}

impl RotorcraftState {
    pub fn new(cfg: &NavConfig, throttle: &ThrottleConfig, airframe: Airframe) -> Self {
        let (channel, lift) = LiftRange::for_airframe(cfg, throttle, airframe);
        Self {
            channel,
            lift,
            rc_zero: lift.hover,
            lift_filter: Pt1Filter::new(THROTTLE_CUTOFF_HZ, 0.01),
            prepare_takeoff: false,
            adjusted_lift: lift.hover,
            last_accel: [0.0; 2],
            braking: BrakingState::default(),
            alt_timer: UpdateTimer::default(),
            pos_timer: UpdateTimer::default(),
        }
    }

    pub fn is_braking(&self) -> bool {
        self.braking.active
    }

    pub fn reset_braking(&mut self) {
        self.braking = BrakingState::default();
    }
}

impl NavigationContext {
    // ----- Altitude -----

    pub(crate) fn setup_rotorcraft_altitude_controller(&mut self) {
        let lift = self.rotor.lift;
        let mid = match self.rotor.channel {
            LiftChannel::Throttle => f32::from(self.rc_cfg.mid_throttle),
            LiftChannel::Collective => lift.hover,
        };
        let throttle_low = self.is_throttle_low();
        let zero = if self.cfg.use_thr_mid_for_althold || throttle_low { mid } else { self.pilot_lift() };
        let db = f32::from(self.rc_cfg.alt_hold_deadband);
        self.rotor.rc_zero = constrain(zero, lift.min + db + 10.0, lift.max - db - 10.0);
        if throttle_low && self.current_posvel().pos.z.abs() <= TAKEOFF_ALTITUDE_CM {
            self.rotor.prepare_takeoff = true;
        }
    }

    pub(crate) fn reset_rotorcraft_altitude_controller(&mut self) {
        self.pids.vel[2].reset();
        self.pids.surface.reset();
        self.rc_adjustment[THROTTLE] = 0.0;
        self.desired.vel.z = self.current_posvel().vel.z;
        self.rotor.lift_filter.reset(0.0);
    }

    pub(crate) fn adjust_rotorcraft_altitude_from_rc(&mut self) -> bool {
        let lift = self.rotor.lift;
        let stick = self.pilot_lift();
        if self.flags.terrain_follow {
            let target = scale_range(stick, lift.min, lift.max, 0.0, f32::from(self.cfg.max_terrain_follow_altitude));
            if self.est.agl == EstimateStatus::Trusted && target > 10.0 {
                self.update_climb_rate_to_altitude(0.0, RocMode::Reset);
                self.desired.pos.z = target;
            } else {
                self.update_climb_rate_to_altitude(-50.0, RocMode::Normal);
            }
            return true;
        }

        let db = f32::from(self.rc_cfg.alt_hold_deadband);
        let zero = self.rotor.rc_zero;
        let adj = apply_deadband_f(stick - zero, db);
        if adj != 0.0 {
            let span = if adj > 0.0 { lift.max - zero - db } else { zero - lift.min - db };
            let rate = if span > 0.0 { adj * f32::from(self.cfg.max_manual_climb_rate) / span } else { 0.0 };
            self.update_climb_rate_to_altitude(rate, RocMode::Normal);
            return true;
        }
        if self.flags.adjusting_altitude {
            self.update_climb_rate_to_altitude(0.0, RocMode::Reset);
        }
        false
    }

    fn update_altitude_velocity_target(&mut self, dt: f32) {
        let error = self.desired.pos.z - self.current_posvel().pos.z;
        let kp = self.pids.pos[2].gains().kp;
        let limit = if self.flags.adjusting_altitude {
            f32::from(self.cfg.max_manual_climb_rate)
        } else {
            f32::from(self.cfg.max_auto_climb_rate)
        };
        let target = constrain(sqrt_controller(error, kp, ALT_SQRT_D_MAX, dt), -limit, limit);

        // slowing down is never limited
        let current = self.desired.vel.z;
        self.desired.vel.z = if target.abs() > current.abs() {
            let step = dt * ALT_VEL_ACCEL_LIMIT;
            constrain(target, current - step, current + step)
        } else {
            target
        };
    }

    fn update_altitude_lift(&mut self, dt: f32) {
        let (min, max) = self.rotor.lift.adjustment_bounds();
        let measured = self.current_posvel().vel.z;
        let out = self.pids.vel[2].apply2(self.desired.vel.z, measured, dt, min, max, PidFlags::empty());
        let filtered = self.rotor.lift_filter.apply_with(out, THROTTLE_CUTOFF_HZ, dt);
        self.rc_adjustment[THROTTLE] = constrain(filtered, min, max);
    }

    /// Lift command from the current correction, remembered for the landing detector.
    fn output_lift(&mut self) {
        let lift = self.rotor.lift.output(self.rc_adjustment[THROTTLE]);
        self.set_lift_command(lift);
        self.rotor.adjusted_lift = lift;
    }

    fn apply_rotorcraft_altitude_controller(&mut self) {
        if self.mailbox.vertical_new {
            match self.rotor.alt_timer.data(self.now_us) {
                Some(dt) => {
                    if self.rotor.prepare_takeoff {
                        // start from the lowest climb rate so the throttle does not jump
                        let climb = f32::from(self.cfg.max_manual_climb_rate);
                        let kp = self.pids.pos[2].gains().kp;
                        self.desired.vel.z = -climb;
                        if kp > 0.0 {
                            self.desired.pos.z = self.current_posvel().pos.z - climb / kp;
                        }
                        self.pids.vel[2].set_integrator(TAKEOFF_INTEGRATOR);
                        self.rotor.lift_filter.reset(TAKEOFF_INTEGRATOR);
                        self.rotor.prepare_takeoff = false;
                        debug!("altitude hold primed for takeoff");
                    }
                    self.update_altitude_velocity_target(dt);
                    self.update_altitude_lift(dt);
                }
                None => self.reset_rotorcraft_altitude_controller(),
            }
            self.mailbox.vertical_consumed = true;
        }
        self.output_lift();
    }

    // ----- Position -----

    pub(crate) fn reset_rotorcraft_position_controller(&mut self) {
        for axis in [ROLL, PITCH] {
            self.pids.vel[axis].reset();
            self.rc_adjustment[axis] = 0.0;
        }
        self.rotor.last_accel = [0.0; 2];
    }

    pub(crate) fn adjust_rotorcraft_position_from_rc(&mut self) -> bool {
        let db = f32::from(self.rc_cfg.pos_hold_deadband);
        let pitch = apply_deadband_f(self.pilot.sticks[PITCH], db);
        let roll = apply_deadband_f(self.pilot.sticks[ROLL], db);
        let adjusting = pitch != 0.0 || roll != 0.0;

        self.process_braking(adjusting);

        if adjusting {
            // Atti mode hands the sticks straight to the angle loop instead
            if self.cfg.user_control_mode == UserControlMode::Cruise {
                let scale = f32::from(self.cfg.max_manual_speed) / (500.0 - db);
                let (fwd, right) = (pitch * scale, roll * scale);
                let (sin, cos) = (self.actual.sin_yaw, self.actual.cos_yaw);
                let vel_x = fwd * cos - right * sin;
                let vel_y = fwd * sin + right * cos;
                let kp = self.pids.pos[0].gains().kp;
                if kp > 0.0 {
                    let pos = self.current_posvel().pos;
                    self.desired.pos.x = pos.x + vel_x / kp;
                    self.desired.pos.y = pos.y + vel_y / kp;
                }
            }
            return true;
        }
        if self.flags.adjusting_position {
            let stop = self.calculate_initial_hold_position();
            self.set_desired_position(&stop, 0, PosUpdate::XY);
        }
        false
    }

    /// Cruise-mode braking: centring the sticks at speed locks the current position.
    fn process_braking(&mut self, adjusting: bool) {
        if !matches!(descriptor(self.state).mw_state, MwState::None | MwState::HoldInfinit) {
            self.rotor.reset_braking();
            return;
        }
        let now = self.now_ms();
        let mc = self.cfg.mc;
        let vel = self.actual.vel_xy;

        let entry_allowed = self.pilot.boxes.contains(BoxModes::BRAKING)
            && !self.rotor.braking.locked
            && vel > f32::from(mc.braking_speed_threshold)
            && !adjusting
            && self.cfg.user_control_mode == UserControlMode::Cruise
            && mc.braking_speed_threshold > 0;
        if entry_allowed {
            let pos = self.current_posvel().pos;
            self.set_desired_position(&pos, 0, PosUpdate::XY);
            let b = &mut self.rotor.braking;
            b.locked = true;
            b.active = true;
            b.disengage_at_ms = now + u64::from(mc.braking_timeout);
            if vel > f32::from(mc.braking_boost_speed_threshold) {
                b.boost = true;
                b.boost_disengage_at_ms = now + u64::from(mc.braking_boost_timeout);
            }
            debug!("braking from {:.0} cm/s, boost {}", vel, b.boost);
        }

        let b = &mut self.rotor.braking;
        if b.locked && adjusting {
            b.locked = false;
        }
        if b.boost && (vel <= f32::from(mc.braking_boost_disengage_speed) || b.boost_disengage_at_ms < now) {
            b.boost = false;
        }
        if b.active && (vel <= f32::from(mc.braking_disengage_speed) || adjusting || b.disengage_at_ms < now) {
            b.active = false;
            b.boost = false;
            // hold where the aircraft stopped, not where braking began
            let pos = self.current_posvel().pos;
            self.set_desired_position(&pos, 0, PosUpdate::XY);
        }
    }

    fn update_position_velocity_target(&mut self, max_speed: f32) {
        let pos = self.current_posvel().pos;
        let mut vel_x = (self.desired.pos.x - pos.x) * self.pids.pos[0].gains().kp;
        let mut vel_y = (self.desired.pos.y - pos.y) * self.pids.pos[1].gains().kp;
        let mut total = (vel_x * vel_x + vel_y * vel_y).sqrt();

        let auto_wp = self.state_flags().contains(StateFlags::AUTO_WP);
        let fly_through = auto_wp
            && !self.is_approaching_last_waypoint()
            && total < max_speed
            && !self.cfg.mc.slow_down_for_turning;
        if (fly_through || total > max_speed) && total > 0.0 {
            vel_x = max_speed * vel_x / total;
            vel_y = max_speed * vel_y / total;
            total = max_speed;
        }

        // turn first, accelerate later
        let heading_factor = if auto_wp {
            let err = constrain(wrap_18000(self.desired.yaw - self.actual.yaw), -9000, 9000);
            let s = centideg_to_rad(err as f32).cos();
            constrain(s * s, MIN_HEADING_ATTENUATION, 1.0)
        } else {
            1.0
        };
        let expo_factor = {
            let scale = if max_speed > 0.0 { constrain(total / max_speed, 0.01, 1.0) } else { 1.0 };
            1.0 - f32::from(self.cfg.mc.pos_response_expo) / 100.0 * (1.0 - scale * scale)
        };
        self.desired.vel.x = vel_x * heading_factor * expo_factor;
        self.desired.vel.y = vel_y * heading_factor * expo_factor;
    }

    /// D-term scale of the velocity loop, shrinking with the commanded speed.
    fn velocity_dterm_scale(&self, max_speed: f32) -> f32 {
        let mc = &self.cfg.mc;
        let factor = f32::from(mc.vel_xy_dterm_attenuation) / 100.0;
        let start = max_speed * f32::from(mc.vel_xy_dterm_attenuation_start) / 100.0;
        let end = max_speed * f32::from(mc.vel_xy_dterm_attenuation_end) / 100.0;
        if end <= start {
            return 1.0;
        }
        let setpoint = self.desired.vel.xy_length();
        1.0 - constrain(scale_range(setpoint, start, end, 0.0, factor), 0.0, factor)
    }

    fn update_position_accel(&mut self, dt: f32, max_speed: f32) {
        let vel = self.current_posvel().vel;
        let err_x = self.desired.vel.x - vel.x;
        let err_y = self.desired.vel.y - vel.y;
        let err = (err_x * err_x + err_y * err_y).sqrt();
        let (limit_x, limit_y) = if err > 0.1 {
            (NAV_ACCELERATION_XY_MAX / err * err_x.abs(), NAV_ACCELERATION_XY_MAX / err * err_y.abs())
        } else {
            let l = NAV_ACCELERATION_XY_MAX / std::f32::consts::SQRT_2;
            (l, l)
        };

        let mut max_change = dt * POS_CONTROL_JERK_LIMIT;
        if self.rotor.braking.active {
            max_change *= 2.0;
        }
        let [last_x, last_y] = self.rotor.last_accel;
        let x_min = constrain(last_x - max_change, -limit_x, limit_x);
        let x_max = constrain(last_x + max_change, -limit_x, limit_x);
        let y_min = constrain(last_y - max_change, -limit_y, limit_y);
        let y_max = constrain(last_y + max_change, -limit_y, limit_y);

        let dterm = self.velocity_dterm_scale(max_speed);
        let mut accel_x =
            self.pids.vel[0].apply3(self.desired.vel.x, vel.x, dt, x_min, x_max, PidFlags::empty(), 1.0, dterm);
        let mut accel_y =
            self.pids.vel[1].apply3(self.desired.vel.y, vel.y, dt, y_min, y_max, PidFlags::empty(), 1.0, dterm);

        let mc = self.cfg.mc;
        let mut max_bank = self.rotorcraft_max_bank();
        let boost_factor = f32::from(mc.braking_boost_factor) / 100.0;
        if self.rotor.braking.boost && boost_factor > 0.0 {
            let f = constrain(
                scale_range(
                    self.actual.vel_xy,
                    f32::from(mc.braking_boost_speed_threshold),
                    f32::from(self.cfg.max_manual_speed),
                    0.0,
                    boost_factor,
                ),
                0.0,
                boost_factor,
            );
            accel_x *= 1.0 + f;
            accel_y *= 1.0 + f;
            max_bank = f32::from(mc.braking_bank_angle) * 10.0;
        }
        self.rotor.last_accel = [accel_x, accel_y];

        let (sin, cos) = (self.actual.sin_yaw, self.actual.cos_yaw);
        let forward = accel_x * cos + accel_y * sin;
        let right = -accel_x * sin + accel_y * cos;
        let pitch = forward.atan2(GRAVITY_CMSS);
        let roll = (right * pitch.cos()).atan2(GRAVITY_CMSS);
        self.rc_adjustment[ROLL] = constrain(rad_to_decideg(roll), -max_bank, max_bank);
        self.rc_adjustment[PITCH] = constrain(rad_to_decideg(pitch), -max_bank, max_bank);
    }

    fn apply_rotorcraft_position_controller(&mut self) {
        let mut bypass = self.cfg.user_control_mode == UserControlMode::Atti && self.flags.adjusting_position;

        if self.rotor.pos_timer.tick(self.now_us).is_none() {
            self.reset_rotorcraft_position_controller();
            return;
        }

        if self.est.pos >= EstimateStatus::Usable {
            if self.mailbox.horizontal_new {
                let dt = self.rotor.pos_timer.data(self.now_us);
                if !bypass {
                    match dt {
                        Some(dt) => {
                            let max_speed = self.active_waypoint_speed();
                            self.update_position_velocity_target(max_speed);
                            self.update_position_accel(dt, max_speed);
                        }
                        None => self.reset_rotorcraft_position_controller(),
                    }
                }
                self.mailbox.horizontal_consumed = true;
            }
        } else {
            // no position: sticks pass through to the angle loop
            self.rc_adjustment[ROLL] = 0.0;
            self.rc_adjustment[PITCH] = 0.0;
            bypass = true;
        }

        if !bypass {
            self.rc_command[PITCH] = angle_to_rc_command(self.rc_adjustment[PITCH], self.max_angle_inclination[1]);
            self.rc_command[ROLL] = angle_to_rc_command(self.rc_adjustment[ROLL], self.max_angle_inclination[0]);
        }
    }

    // ----- Emergency -----

    fn apply_rotorcraft_emergency_controller(&mut self) {
        self.rc_command[ROLL] = 0.0;
        self.rc_command[PITCH] = 0.0;
        self.rc_command[YAW] = 0.0;

        if self.est.alt < EstimateStatus::Usable {
            let failsafe = self.rotor.lift.failsafe;
            self.set_lift_command(failsafe);
            return;
        }

        if self.mailbox.vertical_new {
            match self.rotor.alt_timer.data(self.now_us) {
                Some(dt) => {
                    let rate = -f32::from(self.cfg.emerg_descent_rate);
                    self.update_climb_rate_to_altitude(rate, RocMode::Normal);
                    self.update_altitude_velocity_target(dt);
                    self.update_altitude_lift(dt);
                }
                None => self.reset_rotorcraft_altitude_controller(),
            }
            self.mailbox.vertical_consumed = true;
        }
        self.output_lift();
    }

    /// Runs the loops the current state asks for.
    pub(crate) fn apply_rotorcraft_navigation(&mut self, flags: StateFlags) {
        if flags.contains(StateFlags::CTL_EMERG) {
            self.apply_rotorcraft_emergency_controller();
            return;
        }
        if flags.contains(StateFlags::CTL_ALT) {
            self.apply_rotorcraft_altitude_controller();
        }
        if flags.contains(StateFlags::CTL_POS) {
            self.apply_rotorcraft_position_controller();
        }
        if flags.contains(StateFlags::CTL_YAW) {
            self.heading_target = self.desired.yaw as f32 / 100.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RcConfig;
    use crate::context::PilotInput;
    use crate::fsm::NavState;
    use helm_ctrl::profile::PidProfile;
    use helm_ctrl::Vec3;

    fn ctx(cfg: NavConfig) -> NavigationContext {
        let mut c = NavigationContext::new(cfg, RcConfig::default(), &PidProfile::default(), ThrottleConfig::default(), Airframe::Multirotor);
        c.est.pos = EstimateStatus::Trusted;
        c.est.vel = EstimateStatus::Trusted;
        c.est.alt = EstimateStatus::Trusted;
        c.est.heading = EstimateStatus::Trusted;
        c
    }

    fn cruise() -> NavConfig {
        NavConfig { user_control_mode: UserControlMode::Cruise, ..Default::default() }
    }

    #[test]
    fn altitude_reset_is_idempotent() {
        let mut c = ctx(NavConfig::default());
        c.actual.abs.vel.z = 30.0;
        c.rc_adjustment[THROTTLE] = 120.0;
        c.reset_rotorcraft_altitude_controller();
        let first = (c.rc_adjustment, c.desired.vel, c.pids.vel[2].integrator());
        c.reset_rotorcraft_altitude_controller();
        assert_eq!(first, (c.rc_adjustment, c.desired.vel, c.pids.vel[2].integrator()));
        assert_eq!(c.desired.vel.z, 30.0);
    }

    #[test]
    fn position_reset_is_idempotent() {
        let mut c = ctx(NavConfig::default());
        c.rc_adjustment = [50.0, -20.0, 0.0, 0.0];
        c.rotor.last_accel = [100.0, 100.0];
        c.reset_rotorcraft_position_controller();
        c.reset_rotorcraft_position_controller();
        assert_eq!(c.rc_adjustment, [0.0; 4]);
        assert_eq!(c.rotor.last_accel, [0.0; 2]);
    }

    #[test]
    fn climb_target_is_rate_limited_when_growing() {
        let mut c = ctx(NavConfig::default());
        c.desired.pos.z = 10_000.0;
        c.update_altitude_velocity_target(0.1);
        assert!((c.desired.vel.z - ALT_VEL_ACCEL_LIMIT * 0.1).abs() < 1e-3);
        c.desired.vel.z = 400.0;
        c.desired.pos.z = 0.0;
        c.update_altitude_velocity_target(0.1);
        assert_eq!(c.desired.vel.z, 0.0);
    }

    #[test]
    fn lift_stays_within_range() {
        let mut c = ctx(NavConfig::default());
        c.desired.vel.z = 10_000.0;
        for _ in 0..500 {
            c.update_altitude_lift(0.01);
        }
        c.output_lift();
        assert!(c.rc_command[THROTTLE] <= 1850.0);
        assert!(c.rc_command[THROTTLE] > 1500.0);
    }

    #[test]
    fn low_throttle_on_ground_primes_takeoff() {
        let mut c = ctx(NavConfig::default());
        c.set_pilot_input(PilotInput { throttle: 1000.0, ..Default::default() });
        c.setup_rotorcraft_altitude_controller();
        assert!(c.rotor.prepare_takeoff);
        assert_eq!(c.rotor.rc_zero, 1500.0);

        let mut c = ctx(NavConfig::default());
        c.set_pilot_input(PilotInput { throttle: 1800.0, ..Default::default() });
        c.setup_rotorcraft_altitude_controller();
        assert!(!c.rotor.prepare_takeoff);
        assert_eq!(c.rotor.rc_zero, 1850.0 - 60.0);
    }

    #[test]
    fn throttle_stick_commands_climb() {
        let mut c = ctx(NavConfig::default());
        c.set_pilot_input(PilotInput { throttle: 1500.0, ..Default::default() });
        c.setup_rotorcraft_altitude_controller();
        c.set_pilot_input(PilotInput { throttle: 1850.0, ..Default::default() });
        assert!(c.adjust_rotorcraft_altitude_from_rc());
        // full stick maps to max_manual_climb_rate, kp 0.5
        assert!((c.desired.pos.z - 400.0).abs() < 1.0);
        c.set_pilot_input(PilotInput { throttle: 1520.0, ..Default::default() });
        c.flags.adjusting_altitude = true;
        c.actual.abs.pos.z = 42.0;
        assert!(!c.adjust_rotorcraft_altitude_from_rc());
        assert_eq!(c.desired.pos.z, 42.0);
    }

    #[test]
    fn cruise_stick_moves_target_in_earth_frame() {
        let mut c = ctx(cruise());
        c.actual.sin_yaw = 1.0;
        c.actual.cos_yaw = 0.0;
        c.set_pilot_input(PilotInput { sticks: [0.0, 500.0, 0.0], ..Default::default() });
        assert!(c.adjust_rotorcraft_position_from_rc());
        // facing east: forward stick moves the target east
        assert!(c.desired.pos.y > 0.0);
        assert!(c.desired.pos.x.abs() < 1e-3);
    }

    #[test]
    fn braking_locks_position_then_releases() {
        let mut c = ctx(cruise());
        c.state = NavState::PosHoldInProgress;
        c.actual.abs.pos = Vec3::new(500.0, 0.0, 0.0);
        c.actual.vel_xy = 300.0;
        c.set_pilot_input(PilotInput { boxes: BoxModes::BRAKING, ..Default::default() });
        c.set_time(1_000_000);
        c.process_braking(false);
        assert!(c.rotor.braking.active && c.rotor.braking.boost && c.rotor.braking.locked);
        assert_eq!(c.desired.pos.x, 500.0);

        c.set_desired_position(&Vec3::new(9000.0, 0.0, 0.0), 0, PosUpdate::XY);
        assert_eq!(c.desired.pos.x, 500.0);

        c.actual.abs.pos.x = 700.0;
        c.actual.vel_xy = 50.0;
        c.process_braking(false);
        assert!(!c.rotor.braking.active);
        assert_eq!(c.desired.pos.x, 700.0);
        assert!(c.rotor.braking.locked);
        c.process_braking(true);
        assert!(!c.rotor.braking.locked);
    }

    #[test]
    fn braking_times_out() {
        let mut c = ctx(cruise());
        c.actual.vel_xy = 120.0;
        c.set_pilot_input(PilotInput { boxes: BoxModes::BRAKING, ..Default::default() });
        c.process_braking(false);
        assert!(c.rotor.braking.active && !c.rotor.braking.boost);
        c.set_time(2_100_000);
        c.process_braking(false);
        assert!(!c.rotor.braking.active);
    }

    #[test]
    fn braking_only_in_hold_states() {
        let mut c = ctx(cruise());
        c.state = NavState::RthHeadHome;
        c.actual.vel_xy = 300.0;
        c.set_pilot_input(PilotInput { boxes: BoxModes::BRAKING, ..Default::default() });
        c.process_braking(false);
        assert!(!c.rotor.braking.active);
    }

    #[test]
    fn position_error_leans_toward_target() {
        let mut c = ctx(NavConfig::default());
        c.state = NavState::PosHoldInProgress;
        c.desired.pos = Vec3::new(1000.0, 0.0, 0.0);
        c.update_position_velocity_target(300.0);
        assert!(c.desired.vel.x > 0.0 && c.desired.vel.x <= 300.0);
        c.update_position_accel(0.1, 300.0);
        assert!(c.rc_adjustment[PITCH] > 0.0);
        assert!(c.rc_adjustment[ROLL].abs() < 1e-3);
        assert!(c.rc_adjustment[PITCH] <= 300.0);
    }

    #[test]
    fn heading_error_slows_waypoint_legs() {
        let mut c = ctx(NavConfig::default());
        c.state = NavState::WaypointInProgress;
        c.desired.pos = Vec3::new(100_000.0, 0.0, 0.0);
        c.desired.yaw = 9000;
        c.actual.yaw = 0;
        c.update_position_velocity_target(300.0);
        assert!((c.desired.vel.x - 300.0 * MIN_HEADING_ATTENUATION).abs() < 1e-2);
    }

    #[test]
    fn jerk_limit_bounds_first_accel_step() {
        let mut c = ctx(NavConfig::default());
        c.desired.vel.x = 500.0;
        c.update_position_accel(0.01, 500.0);
        assert!(c.rotor.last_accel[0] <= POS_CONTROL_JERK_LIMIT * 0.01 + 1e-3);
    }

    #[test]
    fn emergency_without_altitude_holds_failsafe_throttle() {
        let mut c = ctx(NavConfig { failsafe_throttle: 1300, ..Default::default() });
        c.est.alt = EstimateStatus::None;
        c.rc_command = [100.0, 100.0, 100.0, 1600.0];
        c.apply_rotorcraft_navigation(StateFlags::CTL_EMERG);
        assert_eq!(c.rc_command, [0.0, 0.0, 0.0, 1300.0]);
    }

    #[test]
    fn emergency_descends_below_hover() {
        let mut c = ctx(NavConfig::default());
        c.actual.abs.pos.z = 2000.0;
        for i in 0..100u64 {
            c.set_time(i * 20_000);
            c.mailbox.vertical_new = true;
            c.apply_rotorcraft_navigation(StateFlags::CTL_EMERG);
        }
        assert!(c.desired.vel.z < 0.0);
        assert!(c.rc_command[THROTTLE] < 1500.0);
    }
}
