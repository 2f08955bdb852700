//! Fixed-wing navigation: energy-based pitch, virtual-target roll, throttle scheduling.

use helm_ctrl::filter::Pt1Filter;
use helm_ctrl::math::{apply_deadband_f, constrain, wrap_18000, GRAVITY_MSS};
use helm_ctrl::rate::{angle_to_rc_command, PITCH, ROLL, THROTTLE, YAW};
use helm_ctrl::{PidFlags, Vec3};

use crate::context::{EstimateStatus, NavigationContext, UpdateTimer, MIN_POSITION_UPDATE_US};
use crate::fsm::{FlightModes, StateFlags};
use crate::geo::bearing_cd;
use crate::targets::RocMode;

const PITCH_CUTOFF_HZ: f32 = 2.0;
const ROLL_CUTOFF_HZ: f32 = 1.0;
/// Heading error trend is sampled at 2 Hz.
const MONITORING_INTERVAL_US: u64 = 500_000;
/// Below this ground speed the throttle is boosted, cm/s.
const MIN_SPEED_FOR_BOOST: f32 = 700.0;
const SPEED_BOOST_GAIN: f32 = 1.5;
const SPEED_BOOST_DEADBAND: f32 = 50.0;
const SPEED_BOOST_MAX: f32 = 500.0;
/// tan(15 deg): loiter circles only start once the target is within this visual angle.
const TAN_15DEG: f32 = 0.26795;
const FORCED_TURN_ENTER_CD: i32 = 17000;
const FORCED_TURN_EXIT_CD: i32 = 9000;
/// Loiter circles are flown clockwise.
const LOITER_DIRECTION: i32 = 1;

#[derive(Debug, Clone)]
pub struct FixedWingState {
    pitch_valid: bool,
    roll_valid: bool,
    speed_boost: f32,
    auto_throttle_increased: bool,
    /// Last heading error to the virtual target, centidegrees.
    heading_error: i32,
    virtual_target: Vec3,
    pitch_filter: Pt1Filter,
    roll_filter: Pt1Filter,
    prev_heading_error: i32,
    error_decreasing: bool,
    force_turn: bool,
    last_monitor_us: u64,
    alt_timer: UpdateTimer,
    pos_timer: UpdateTimer,
    speed_timer: UpdateTimer,
}

impl FixedWingState {
    pub fn new() -> Self {
        Self {
            pitch_valid: false,
            roll_valid: false,
            speed_boost: 0.0,
            auto_throttle_increased: false,
            heading_error: 0,
            virtual_target: Vec3::ZERO,
            pitch_filter: Pt1Filter::new(PITCH_CUTOFF_HZ, 0.01),
            roll_filter: Pt1Filter::new(ROLL_CUTOFF_HZ, 0.01),
            prev_heading_error: 0,
            error_decreasing: false,
            force_turn: false,
            last_monitor_us: 0,
            alt_timer: UpdateTimer::default(),
            pos_timer: UpdateTimer::default(),
            speed_timer: UpdateTimer::default(),
        }
    }
}

impl Default for FixedWingState {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationContext {
    pub fn heading_error(&self) -> i32 {
        self.fw.heading_error
    }

    pub fn is_auto_throttle_manually_increased(&self) -> bool {
        self.fw.auto_throttle_increased
    }

    // ----- Altitude -----

    pub(crate) fn reset_fixed_wing_altitude_controller(&mut self) {
        self.pids.fw_alt.reset();
        self.rc_adjustment[PITCH] = 0.0;
        self.fw.pitch_valid = false;
        self.fw.speed_boost = 0.0;
    }

    pub(crate) fn adjust_fixed_wing_altitude_from_rc(&mut self) -> bool {
        let db = f32::from(self.rc_cfg.alt_hold_deadband);
        let adj = apply_deadband_f(self.pilot.sticks[PITCH], db);
        if adj != 0.0 {
            // pitch stick back (negative) climbs
            let rate = -adj * f32::from(self.cfg.max_manual_climb_rate) / (500.0 - db);
            self.update_climb_rate_to_altitude(rate, RocMode::Normal);
            return true;
        }
        if self.flags.adjusting_altitude {
            self.update_climb_rate_to_altitude(0.0, RocMode::Reset);
        }
        false
    }

    /// Altitude error expressed as specific potential energy, turned into a pitch angle.
    fn update_fixed_wing_pitch(&mut self, dt: f32) {
        let demanded = self.desired.pos.z / 100.0 * GRAVITY_MSS;
        let estimated = self.current_posvel().pos.z / 100.0 * GRAVITY_MSS;
        let climb = f32::from(self.cfg.fw.max_climb_angle) * 10.0;
        let dive = -f32::from(self.cfg.fw.max_dive_angle) * 10.0;

        let pitch = self.pids.fw_alt.apply3(demanded, estimated, dt, dive, climb, PidFlags::empty(), 1.0, 1.0);
        let pitch = self.fw.pitch_filter.apply_with(pitch, PITCH_CUTOFF_HZ, dt);
        self.rc_adjustment[PITCH] = constrain(pitch, dive, climb);
    }

    fn apply_fixed_wing_altitude_controller(&mut self) {
        if self.fw.alt_timer.tick(self.now_us).is_none() {
            self.reset_fixed_wing_altitude_controller();
            return;
        }
        if self.est.alt >= EstimateStatus::Usable {
            if self.mailbox.vertical_new {
                match self.fw.alt_timer.data(self.now_us) {
                    Some(dt) => self.update_fixed_wing_pitch(dt),
                    None => self.reset_fixed_wing_altitude_controller(),
                }
                self.mailbox.vertical_consumed = true;
            }
            self.fw.pitch_valid = true;
        } else {
            // stick pitch passes through
            self.fw.pitch_valid = false;
        }
    }

    // ----- Position -----

    pub(crate) fn reset_fixed_wing_position_controller(&mut self) {
        self.fw.virtual_target = Vec3::ZERO;
        self.pids.fw_nav.reset();
        self.rc_adjustment[ROLL] = 0.0;
        self.fw.roll_valid = false;
        self.fw.roll_filter.reset(0.0);
    }

    pub(crate) fn adjust_fixed_wing_position_from_rc(&mut self) -> bool {
        apply_deadband_f(self.pilot.sticks[ROLL], f32::from(self.rc_cfg.pos_hold_deadband)) != 0.0
    }

    /// Point `tracking_period` seconds ahead on the way to the target, or onto the loiter circle.
    fn update_virtual_target(&mut self, tracking_period: f32) {
        let pos = self.current_posvel().pos;
        let mut err_x = self.desired.pos.x - pos.x;
        let mut err_y = self.desired.pos.y - pos.y;
        let mut distance = (err_x * err_x + err_y * err_y).sqrt();
        let tracking = tracking_period * self.actual.vel_xy.max(100.0);

        let loiter_radius = f32::from(self.cfg.fw.loiter_radius);
        let circle = self.is_approaching_last_waypoint()
            && distance <= loiter_radius / TAN_15DEG
            && distance > 50.0
            && !self.flight_modes().contains(FlightModes::CRUISE);
        if circle {
            let angle = (-err_y).atan2(-err_x) + (LOITER_DIRECTION as f32 * 45.0).to_radians();
            err_x = self.desired.pos.x + loiter_radius * angle.cos() - pos.x;
            err_y = self.desired.pos.y + loiter_radius * angle.sin() - pos.y;
            distance = (err_x * err_x + err_y * err_y).sqrt();
        }

        let scale = if distance > 0.0 { tracking / distance } else { 0.0 };
        self.fw.virtual_target = Vec3::new(pos.x + err_x * scale, pos.y + err_y * scale, pos.z);

        if self.flags.adjusting_position {
            let roll = apply_deadband_f(self.pilot.sticks[ROLL], f32::from(self.rc_cfg.pos_hold_deadband));
            if roll != 0.0 {
                let shift = roll * f32::from(self.cfg.max_manual_speed) / 500.0 * tracking_period;
                self.fw.virtual_target.x -= shift * self.actual.sin_yaw;
                self.fw.virtual_target.y += shift * self.actual.cos_yaw;
            }
        }
    }

    fn update_fixed_wing_heading(&mut self, dt: f32) {
        let bearing = bearing_cd(&self.current_posvel().pos, &self.fw.virtual_target);
        let mut error = wrap_18000(bearing - self.actual.yaw);

        // near 180 degrees, commit to one turn direction until within 90
        if error.abs() > FORCED_TURN_ENTER_CD {
            self.fw.force_turn = true;
        } else if error.abs() < FORCED_TURN_EXIT_CD && self.fw.force_turn {
            self.fw.force_turn = false;
        }
        if self.fw.force_turn {
            error = LOITER_DIRECTION * error.abs();
        }
        self.fw.heading_error = error;

        if self.now_us.saturating_sub(self.fw.last_monitor_us) >= MONITORING_INTERVAL_US {
            self.fw.error_decreasing = self.fw.prev_heading_error.abs() > error.abs();
            self.fw.prev_heading_error = error;
            self.fw.last_monitor_us = self.now_us;
        }

        let mut flags = PidFlags::DTERM_FROM_ERROR;
        if self.fw.error_decreasing {
            flags |= PidFlags::SHRINK_INTEGRATOR;
        }
        let max_bank = f32::from(self.cfg.fw.max_bank_angle) * 100.0;
        let yaw = self.actual.yaw as f32;
        let roll = self.pids.fw_nav.apply2(yaw + error as f32, yaw, dt, -max_bank, max_bank, flags);
        let roll = self.fw.roll_filter.apply_with(roll, ROLL_CUTOFF_HZ, dt);
        self.rc_adjustment[ROLL] = roll / 10.0;
    }

    fn apply_fixed_wing_position_controller(&mut self) {
        if self.fw.pos_timer.tick(self.now_us).is_none() {
            self.reset_fixed_wing_position_controller();
            return;
        }
        if self.est.pos >= EstimateStatus::Usable {
            if self.mailbox.horizontal_new {
                match self.fw.pos_timer.data(self.now_us) {
                    Some(dt) => {
                        self.update_virtual_target(2.0 * MIN_POSITION_UPDATE_US as f32 * 1e-6);
                        self.update_fixed_wing_heading(dt);
                    }
                    None => self.reset_fixed_wing_position_controller(),
                }
                self.mailbox.horizontal_consumed = true;
            }
            self.fw.roll_valid = true;
        } else {
            self.fw.roll_valid = false;
        }
    }

    /// Extra throttle while ground speed stays below the boost threshold.
    fn apply_min_speed_controller(&mut self) -> f32 {
        if self.fw.speed_timer.tick(self.now_us).is_none() {
            self.fw.speed_boost = 0.0;
            return 0.0;
        }
        if self.est.pos < EstimateStatus::Usable {
            self.fw.speed_boost = 0.0;
            return 0.0;
        }
        if self.mailbox.horizontal_new {
            match self.fw.speed_timer.data(self.now_us) {
                Some(dt) => {
                    let vel = self.actual.vel_xy;
                    if (vel - MIN_SPEED_FOR_BOOST).abs() > SPEED_BOOST_DEADBAND {
                        self.fw.speed_boost += (MIN_SPEED_FOR_BOOST - vel) * SPEED_BOOST_GAIN * dt;
                    }
                    self.fw.speed_boost = constrain(self.fw.speed_boost, 0.0, SPEED_BOOST_MAX);
                }
                None => self.fw.speed_boost = 0.0,
            }
            self.mailbox.horizontal_consumed = true;
        }
        self.fw.speed_boost
    }

    fn pitch_to_throttle(&self, pitch: f32) -> f32 {
        (pitch / 10.0).trunc() * f32::from(self.cfg.fw.pitch_to_throttle)
    }

    fn apply_pitch_roll_throttle(&mut self, flags: StateFlags) {
        let fw = self.cfg.fw;
        let cruise = f32::from(fw.cruise_throttle);
        let min_corr = f32::from(fw.min_throttle) - cruise;
        let max_corr = f32::from(fw.max_throttle) - cruise;

        if self.fw.roll_valid && flags.contains(StateFlags::CTL_POS) {
            let bank = f32::from(fw.max_bank_angle) * 10.0;
            let roll = constrain(self.rc_adjustment[ROLL], -bank, bank);
            self.rc_command[ROLL] = angle_to_rc_command(roll, self.max_angle_inclination[0]);
        }

        if self.fw.pitch_valid && flags.contains(StateFlags::CTL_ALT) {
            let pitch = constrain(
                self.rc_adjustment[PITCH],
                -f32::from(fw.max_dive_angle) * 10.0,
                f32::from(fw.max_climb_angle) * 10.0,
            );
            // positive pitch correction is nose up, stick back
            self.rc_command[PITCH] = -angle_to_rc_command(pitch, self.max_angle_inclination[1]);

            let mut correction = self.pitch_to_throttle(pitch);
            correction = if flags.contains(StateFlags::CTL_LAND) {
                // never add throttle on the landing approach
                constrain(correction, min_corr, 0.0)
            } else {
                constrain(correction, min_corr, max_corr)
            };
            if flags.contains(StateFlags::CTL_POS) && !flags.contains(StateFlags::CTL_LAND) {
                correction = constrain(correction + self.apply_min_speed_controller(), min_corr, max_corr);
            }

            let mut throttle = constrain(cruise + correction, f32::from(fw.min_throttle), f32::from(fw.max_throttle));
            let pilot = self.pilot.throttle;
            if fw.allow_manual_thr_increase && !self.flags.failsafe {
                let top = f32::from(self.throttle.min_command) + (f32::from(self.throttle.max) - f32::from(self.throttle.min_command)) * 0.95;
                if pilot < top {
                    throttle += (pilot - cruise).max(0.0);
                } else {
                    throttle = f32::from(self.throttle.max);
                }
                self.fw.auto_throttle_increased = pilot > cruise;
            } else {
                self.fw.auto_throttle_increased = false;
            }
            self.rc_command[THROTTLE] = constrain(throttle, f32::from(self.throttle.idle), f32::from(self.throttle.max));
        }

        if flags.contains(StateFlags::CTL_LAND) {
            let min_alt = f32::from(self.cfg.land_slowdown_minalt);
            let final_approach = (self.est.alt >= EstimateStatus::Usable && self.current_posvel().pos.z <= min_alt)
                || (self.est.agl == EstimateStatus::Trusted && self.actual.agl.pos.z <= min_alt);
            if final_approach {
                // wings level, idle, shallow dive
                self.rc_command[THROTTLE] = f32::from(self.throttle.idle);
                self.rc_command[ROLL] = 0.0;
                self.rc_command[PITCH] =
                    angle_to_rc_command(f32::from(fw.land_dive_angle) * 10.0, self.max_angle_inclination[1]);
            }
        }
    }

    // ----- Emergency -----

    /// Gliding descent on fixed attitude; no position or altitude loops.
    fn apply_fixed_wing_emergency_controller(&mut self) {
        let fw = self.cfg.fw;
        self.rc_command[ROLL] = angle_to_rc_command(f32::from(fw.emerg_roll_angle), self.max_angle_inclination[0]);
        self.rc_command[PITCH] = angle_to_rc_command(f32::from(fw.emerg_pitch_angle), self.max_angle_inclination[1]);
        self.rc_command[YAW] = -angle_to_rc_command(f32::from(fw.emerg_yaw_rate), self.max_yaw_rate);
        self.rc_command[THROTTLE] = f32::from(self.cfg.failsafe_throttle);
    }

    pub(crate) fn apply_fixed_wing_navigation(&mut self, flags: StateFlags) {
        if flags.contains(StateFlags::CTL_LAUNCH) {
            self.apply_fixed_wing_launch_controller();
            return;
        }
        if flags.contains(StateFlags::CTL_EMERG) {
            self.apply_fixed_wing_emergency_controller();
            return;
        }

        if flags.contains(StateFlags::CTL_ALT) {
            self.apply_fixed_wing_altitude_controller();
        }
        if flags.contains(StateFlags::CTL_POS) {
            self.apply_fixed_wing_position_controller();
        }

        if self.flight_modes().contains(FlightModes::CRUISE) && self.flags.adjusting_position {
            self.rc_command[ROLL] = apply_deadband_f(self.pilot.sticks[ROLL], f32::from(self.rc_cfg.pos_hold_deadband));
        }

        if flags.intersects(StateFlags::CTL_ALT | StateFlags::CTL_POS) {
            self.apply_pitch_roll_throttle(flags);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NavConfig, RcConfig};
    use crate::context::PilotInput;
    use crate::fsm::NavState;
    use helm_ctrl::profile::{Airframe, PidProfile, ThrottleConfig};

    fn ctx(cfg: NavConfig) -> NavigationContext {
        let mut c = NavigationContext::new(cfg, RcConfig::default(), &PidProfile::default(), ThrottleConfig::default(), Airframe::FixedWing);
        c.est.pos = EstimateStatus::Trusted;
        c.est.vel = EstimateStatus::Trusted;
        c.est.alt = EstimateStatus::Trusted;
        c.est.heading = EstimateStatus::Trusted;
        c
    }

    /// Runs `n` ticks 20 ms apart with fresh estimator data on each.
    fn fly(c: &mut NavigationContext, flags: StateFlags, n: u64) {
        for _ in 0..n {
            let t = c.now_us + 20_000;
            c.set_time(t);
            c.mailbox.horizontal_new = true;
            c.mailbox.vertical_new = true;
            c.apply_fixed_wing_navigation(flags);
        }
    }

    #[test]
    fn pitch_stick_moves_altitude_target() {
        let mut c = ctx(NavConfig::default());
        c.set_time(1_000_000);
        c.update_climb_rate_to_altitude(0.0, RocMode::Reset);
        c.set_pilot_input(PilotInput { sticks: [0.0, -500.0, 0.0], ..Default::default() });
        c.set_time(1_100_000);
        assert!(c.adjust_fixed_wing_altitude_from_rc());
        // full back stick climbs at max_manual_climb_rate
        assert!((c.desired.pos.z - 20.0).abs() < 1e-3);
    }

    #[test]
    fn below_target_pitches_up_and_adds_throttle() {
        let mut c = ctx(NavConfig::default());
        c.desired.pos.z = 3000.0;
        c.actual.vel_xy = 1500.0;
        fly(&mut c, StateFlags::CTL_ALT, 50);
        assert!(c.rc_adjustment[PITCH] > 0.0);
        assert!(c.rc_adjustment[PITCH] <= 200.0);
        assert!(c.rc_command[PITCH] < 0.0);
        assert!(c.rc_command[THROTTLE] > 1400.0);
        assert!(c.rc_command[THROTTLE] <= 1700.0);
    }

    #[test]
    fn no_altitude_passes_pitch_through() {
        let mut c = ctx(NavConfig::default());
        c.est.alt = EstimateStatus::None;
        c.desired.pos.z = 3000.0;
        c.rc_command[PITCH] = 123.0;
        fly(&mut c, StateFlags::CTL_ALT, 5);
        assert!(!c.fw.pitch_valid);
        assert_eq!(c.rc_command[PITCH], 123.0);
    }

    #[test]
    fn target_to_the_right_banks_right() {
        let mut c = ctx(NavConfig::default());
        c.state = NavState::PosHoldInProgress;
        c.actual.vel_xy = 1500.0;
        c.desired.pos = Vec3::new(0.0, 100_000.0, 0.0);
        fly(&mut c, StateFlags::CTL_POS, 50);
        assert_eq!(c.heading_error(), 9000);
        assert!(c.rc_adjustment[ROLL] > 0.0);
        assert!(c.rc_adjustment[ROLL] <= 350.0);
        assert!(c.rc_command[ROLL] > 0.0);
    }

    #[test]
    fn target_behind_forces_a_turn_direction() {
        let mut c = ctx(NavConfig::default());
        c.state = NavState::PosHoldInProgress;
        c.actual.vel_xy = 1500.0;
        c.desired.pos = Vec3::new(-100_000.0, -10.0, 0.0);
        fly(&mut c, StateFlags::CTL_POS, 1);
        assert!(c.fw.force_turn);
        assert!(c.heading_error() > 17000);
    }

    #[test]
    fn virtual_target_circles_last_waypoint() {
        let mut c = ctx(NavConfig::default());
        c.state = NavState::RthHeadHome;
        c.actual.vel_xy = 1000.0;
        c.desired.pos = Vec3::new(10_000.0, 0.0, 0.0);
        c.update_virtual_target(0.4);
        // aimed at the loiter circle, not the centre
        assert!(c.fw.virtual_target.y.abs() > 1.0);
        let d = (c.fw.virtual_target.x.powi(2) + c.fw.virtual_target.y.powi(2)).sqrt();
        assert!((d - 400.0).abs() < 1.0);
    }

    #[test]
    fn speed_boost_grows_when_slow() {
        let mut c = ctx(NavConfig::default());
        c.actual.vel_xy = 300.0;
        c.mailbox.horizontal_new = true;
        c.set_time(20_000);
        c.apply_min_speed_controller();
        c.set_time(40_000);
        let boost = c.apply_min_speed_controller();
        assert!((boost - 2.0 * 400.0 * 1.5 * 0.02).abs() < 1e-3);
        c.actual.vel_xy = 720.0;
        c.set_time(60_000);
        assert_eq!(c.apply_min_speed_controller(), boost);
    }

    #[test]
    fn landing_never_adds_throttle_and_idles_on_final() {
        let mut c = ctx(NavConfig::default());
        c.fw.pitch_valid = true;
        c.rc_adjustment[PITCH] = 150.0;
        c.actual.abs.pos.z = 2000.0;
        c.apply_pitch_roll_throttle(StateFlags::CTL_ALT | StateFlags::CTL_LAND);
        assert_eq!(c.rc_command[THROTTLE], 1400.0);

        c.actual.abs.pos.z = 300.0;
        c.apply_pitch_roll_throttle(StateFlags::CTL_ALT | StateFlags::CTL_LAND);
        assert_eq!(c.rc_command[THROTTLE], 1150.0);
        assert_eq!(c.rc_command[ROLL], 0.0);
        assert!(c.rc_command[PITCH] > 0.0);
    }

    #[test]
    fn manual_throttle_increase() {
        let mut cfg = NavConfig::default();
        cfg.fw.allow_manual_thr_increase = true;
        let mut c = ctx(cfg);
        c.fw.pitch_valid = true;
        c.set_pilot_input(PilotInput { throttle: 1500.0, ..Default::default() });
        c.apply_pitch_roll_throttle(StateFlags::CTL_ALT);
        assert_eq!(c.rc_command[THROTTLE], 1500.0);
        assert!(c.is_auto_throttle_manually_increased());
    }

    #[test]
    fn emergency_glides_on_fixed_attitude() {
        let mut c = ctx(NavConfig::default());
        c.apply_fixed_wing_navigation(StateFlags::CTL_EMERG);
        assert!(c.rc_command[ROLL] < 0.0);
        assert!(c.rc_command[PITCH] > 0.0);
        assert!(c.rc_command[YAW] > 0.0);
        assert_eq!(c.rc_command[THROTTLE], 1000.0);
    }

    #[test]
    fn resets_are_idempotent() {
        let mut c = ctx(NavConfig::default());
        c.rc_adjustment = [100.0, 50.0, 0.0, 0.0];
        c.reset_fixed_wing_position_controller();
        c.reset_fixed_wing_altitude_controller();
        let once = (c.rc_adjustment, c.pids.fw_nav.integrator(), c.pids.fw_alt.integrator());
        c.reset_fixed_wing_position_controller();
        c.reset_fixed_wing_altitude_controller();
        assert_eq!(once, (c.rc_adjustment, c.pids.fw_nav.integrator(), c.pids.fw_alt.integrator()));
        assert_eq!(c.rc_adjustment, [0.0; 4]);
    }
}
