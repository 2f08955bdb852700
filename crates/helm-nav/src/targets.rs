use helm_ctrl::math::{constrain, wrap_36000};
use helm_ctrl::Vec3;

use crate::context::{NavigationContext, PosUpdate};
use crate::geo;
use crate::fsm::{FlightModes, StateFlags};
use crate::mission::WaypointAction;

/// Fixed-wing altitude targets never lead the aircraft by more than this.
const FW_ALTITUDE_LEAD_CM: f32 = 500.0;
/// Slowest per-waypoint speed accepted from a mission record.
const MIN_WAYPOINT_SPEED: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RocMode {
    Normal,
    Reset,
}

impl NavigationContext {
    /// Applies the parts of `pos`/`yaw` selected by `mask`. XY is locked while braking.
    pub(crate) fn set_desired_position(&mut self, pos: &Vec3, yaw: i32, mask: PosUpdate) {
        if mask.contains(PosUpdate::XY) && !self.rotor.is_braking() {
            self.desired.pos.x = pos.x;
            self.desired.pos.y = pos.y;
        }
        if mask.contains(PosUpdate::Z) {
            self.update_climb_rate_to_altitude(0.0, RocMode::Reset);
            self.desired.pos.z = pos.z;
        }
        if mask.contains(PosUpdate::HEADING) {
            self.desired.yaw = wrap_36000(yaw);
        } else if mask.contains(PosUpdate::BEARING) {
            self.desired.yaw = self.bearing_to(pos);
        } else if mask.contains(PosUpdate::BEARING_TAIL_FIRST) {
            self.desired.yaw = wrap_36000(self.bearing_to(pos) - 18000);
        }
    }

    /// Where the aircraft will come to rest. Multirotors coast for `pos_deceleration_time`.
    pub(crate) fn calculate_initial_hold_position(&self) -> Vec3 {
        let pv = self.current_posvel();
        if self.is_fixed_wing() {
            return pv.pos;
        }
        let t = f32::from(self.cfg.mc.pos_deceleration_time) / 100.0;
        Vec3::new(pv.pos.x + pv.vel.x * t, pv.pos.y + pv.vel.y * t, pv.pos.z)
    }

    pub(crate) fn far_away_target(&self, yaw: i32, distance: f32) -> Vec3 {
        geo::project(&self.current_posvel().pos, yaw, distance)
    }

    /// Moves the altitude target so the altitude loop yields `rate` cm/s.
    pub(crate) fn update_climb_rate_to_altitude(&mut self, rate: f32, mode: RocMode) {
        let now = self.now_us;
        let z = self.current_posvel().pos.z;
        match mode {
            RocMode::Reset => {
                self.desired.pos.z = z;
            }
            RocMode::Normal if self.is_fixed_wing() => {
                let dt = now.saturating_sub(self.roc_last_update_us) as f32 * 1e-6;
                if dt <= 0.2 {
                    let target = self.desired.pos.z + rate * dt;
                    self.desired.pos.z = constrain(target, z - FW_ALTITUDE_LEAD_CM, z + FW_ALTITUDE_LEAD_CM);
                }
            }
            RocMode::Normal => {
                let kp = self.pids.pos[2].gains().kp;
                if kp > 0.0 {
                    self.desired.pos.z = z + rate / kp;
                }
            }
        }
        self.roc_last_update_us = now;
    }

    // ----- Controller resets, per platform -----

    pub(crate) fn reset_altitude_controller(&mut self, terrain_follow: bool) {
        self.flags.terrain_follow = terrain_follow;
        if self.is_fixed_wing() {
            self.reset_fixed_wing_altitude_controller();
        } else {
            self.reset_rotorcraft_altitude_controller();
        }
    }

    pub(crate) fn setup_altitude_controller(&mut self) {
        if !self.is_fixed_wing() {
            self.setup_rotorcraft_altitude_controller();
        }
    }

    pub(crate) fn reset_heading_controller(&mut self) {
        self.heading_target = self.actual.yaw as f32 / 100.0;
    }

    pub(crate) fn reset_position_controller(&mut self) {
        if self.is_fixed_wing() {
            self.reset_fixed_wing_position_controller();
        } else {
            self.reset_rotorcraft_position_controller();
            self.rotor.reset_braking();
        }
    }

    // ----- Pilot adjustments -----

    pub(crate) fn adjust_altitude_from_rc(&mut self) -> bool {
        if self.is_fixed_wing() {
            self.adjust_fixed_wing_altitude_from_rc()
        } else {
            self.adjust_rotorcraft_altitude_from_rc()
        }
    }

    pub(crate) fn adjust_position_from_rc(&mut self) -> bool {
        if self.is_fixed_wing() {
            self.adjust_fixed_wing_position_from_rc()
        } else {
            self.adjust_rotorcraft_position_from_rc()
        }
    }

    /// Rotorcraft take the current heading as the new target while the stick is out.
    pub(crate) fn adjust_heading_from_rc(&mut self) -> bool {
        let adjusting = self.pilot.sticks[2].abs() > f32::from(self.rc_cfg.pos_hold_deadband);
        if adjusting && !self.is_fixed_wing() {
            self.desired.yaw = self.actual.yaw;
        }
        adjusting
    }

    // ----- Waypoint helpers -----

    pub fn is_approaching_last_waypoint(&self) -> bool {
        (self.flight_modes().contains(FlightModes::WP) && self.mission.is_last_active())
            || self.state_flags().contains(StateFlags::AUTO_RTH)
    }

    /// Speed cap for the position loop, cm/s.
    pub fn active_waypoint_speed(&self) -> f32 {
        if self.flags.adjusting_position {
            return f32::from(self.cfg.max_manual_speed);
        }
        let max = f32::from(self.cfg.max_auto_speed);
        if !self.state_flags().contains(StateFlags::AUTO_WP) {
            return max;
        }
        let specific = match self.mission.active() {
            Some(wp) if wp.action == WaypointAction::HoldTime => f32::from(wp.p2),
            Some(wp) if matches!(wp.action, WaypointAction::Waypoint | WaypointAction::Land) => f32::from(wp.p1),
            _ => 0.0,
        };
        if (MIN_WAYPOINT_SPEED..=max).contains(&specific) {
            specific
        } else {
            max
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NavConfig, RcConfig};
    use crate::fsm::NavState;
    use crate::mission::{Waypoint, FLAG_LAST};
    use helm_ctrl::profile::{Airframe, PidProfile, ThrottleConfig};

    fn ctx(airframe: Airframe) -> NavigationContext {
        NavigationContext::new(NavConfig::default(), RcConfig::default(), &PidProfile::default(), ThrottleConfig::default(), airframe)
    }

    #[test]
    fn bearing_and_tail_first_yaw() {
        let mut c = ctx(Airframe::Multirotor);
        let east = Vec3::new(0.0, 1000.0, 0.0);
        c.set_desired_position(&east, 0, PosUpdate::XY | PosUpdate::BEARING);
        assert_eq!(c.desired.yaw, 9000);
        c.set_desired_position(&east, 0, PosUpdate::BEARING_TAIL_FIRST);
        assert_eq!(c.desired.yaw, 27000);
        c.set_desired_position(&east, 40000, PosUpdate::HEADING | PosUpdate::BEARING);
        assert_eq!(c.desired.yaw, 4000);
    }

    #[test]
    fn hold_position_projects_velocity_on_rotorcraft() {
        let mut c = ctx(Airframe::Multirotor);
        c.actual.abs.vel.x = 100.0;
        assert!((c.calculate_initial_hold_position().x - 120.0).abs() < 1e-3);
        let mut fw = ctx(Airframe::FixedWing);
        fw.actual.abs.vel.x = 100.0;
        assert_eq!(fw.calculate_initial_hold_position().x, 0.0);
    }

    #[test]
    fn far_away_target_keeps_altitude() {
        let mut c = ctx(Airframe::FixedWing);
        c.actual.abs.pos = Vec3::new(0.0, 0.0, 700.0);
        let t = c.far_away_target(9000, 1000.0);
        assert!(t.x.abs() < 1e-2);
        assert!((t.y - 1000.0).abs() < 1e-2);
        assert_eq!(t.z, 700.0);
    }

    #[test]
    fn rotorcraft_climb_rate_sets_target_ahead() {
        let mut c = ctx(Airframe::Multirotor);
        c.actual.abs.pos.z = 1000.0;
        c.update_climb_rate_to_altitude(100.0, RocMode::Normal);
        // pos z kp 0.5
        assert!((c.desired.pos.z - 1200.0).abs() < 1e-3);
        c.update_climb_rate_to_altitude(0.0, RocMode::Reset);
        assert_eq!(c.desired.pos.z, 1000.0);
    }

    #[test]
    fn fixed_wing_climb_rate_integrates_within_lead() {
        let mut c = ctx(Airframe::FixedWing);
        c.set_time(1_000_000);
        c.update_climb_rate_to_altitude(0.0, RocMode::Reset);
        c.set_time(1_100_000);
        c.update_climb_rate_to_altitude(1000.0, RocMode::Normal);
        assert!((c.desired.pos.z - 100.0).abs() < 1e-3);
        for i in 2..20 {
            c.set_time(1_000_000 + i * 100_000);
            c.update_climb_rate_to_altitude(1000.0, RocMode::Normal);
        }
        assert_eq!(c.desired.pos.z, FW_ALTITUDE_LEAD_CM);
    }

    #[test]
    fn waypoint_speed_from_record() {
        let mut c = ctx(Airframe::Multirotor);
        c.mission.upload(0, Waypoint { p1: 150, flag: FLAG_LAST, ..Default::default() });
        assert_eq!(c.active_waypoint_speed(), 300.0);
        c.state = NavState::WaypointInProgress;
        assert_eq!(c.active_waypoint_speed(), 150.0);
        c.mission.upload(0, Waypoint { p1: 20, flag: FLAG_LAST, ..Default::default() });
        assert_eq!(c.active_waypoint_speed(), 300.0);
        c.flags.adjusting_position = true;
        assert_eq!(c.active_waypoint_speed(), 500.0);
    }

    #[test]
    fn last_waypoint_or_rth_is_approaching_last() {
        let mut c = ctx(Airframe::Multirotor);
        c.state = NavState::RthHeadHome;
        assert!(c.is_approaching_last_waypoint());
        c.state = NavState::PosHoldInProgress;
        assert!(!c.is_approaching_last_waypoint());
    }
}
