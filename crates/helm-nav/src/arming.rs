//! Pre-arm checks owned by navigation.

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::config::ArmingSafety;
use crate::context::{EstimateStatus, NavigationContext};
use crate::modes::BoxModes;

/// Yaw stick past this (about 1750 us) bypasses the missing-fix blocker when allowed.
const ARMING_BYPASS_YAW: f32 = 250.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
pub enum ArmingBlocker {
    #[error("navigation is unsafe without a position fix and home")]
    MissingGpsFix,
    #[error("a navigation mode is switched on")]
    NavIsAlreadyActive,
    #[error("first waypoint is {distance_m} m away")]
    FirstWaypointTooFar { distance_m: u32 },
    #[error("waypoint {index} jumps to an invalid target")]
    JumpWaypointError { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArmingClearance {
    Clear,
    /// Armed on the yaw-stick bypass without a fix.
    Bypassed,
}

impl NavigationContext {
    /// Whether navigation lets the craft arm. `uses_nav_modes` is true when any nav box or a
    /// navigation failsafe is configured.
    pub fn check_arming(&self, uses_nav_modes: bool) -> Result<ArmingClearance, ArmingBlocker> {
        if self.cfg.extra_arming_safety == ArmingSafety::Off {
            return Ok(ArmingClearance::Clear);
        }

        let mut clearance = ArmingClearance::Clear;
        if uses_nav_modes && !(self.est.pos >= EstimateStatus::Usable && self.home.is_fixed()) {
            let bypass = self.cfg.extra_arming_safety == ArmingSafety::AllowBypass
                && self.pilot.sticks[2] > ARMING_BYPASS_YAW;
            if !bypass {
                return Err(ArmingBlocker::MissingGpsFix);
            }
            warn!("arming without position fix on yaw bypass");
            clearance = ArmingClearance::Bypassed;
        }

        let boxes = self.pilot.boxes;
        let mut nav_boxes = BoxModes::RTH | BoxModes::WP | BoxModes::POSHOLD;
        if self.is_fixed_wing() {
            nav_boxes |= BoxModes::ALTHOLD | BoxModes::CRUISE;
        }
        let launch_combo = self.launch_enabled()
            && boxes.intersects(BoxModes::RTH | BoxModes::WP | BoxModes::ALTHOLD | BoxModes::CRUISE);
        if !self.flags.armed && boxes.intersects(nav_boxes) && !launch_combo {
            return Err(ArmingBlocker::NavIsAlreadyActive);
        }

        if let Some(index) = self.mission.invalid_jump() {
            return Err(ArmingBlocker::JumpWaypointError { index });
        }

        let safe = self.cfg.waypoint_safe_distance as f32;
        if self.mission.count() > 0 && safe > 0.0 {
            if let Some(first) = self.mission.waypoints().iter().find(|wp| wp.action.is_geo()) {
                if let Some(pos) = self.waypoint_to_local(first) {
                    let distance = self.distance_to(&pos);
                    if distance > safe {
                        return Err(ArmingBlocker::FirstWaypointTooFar { distance_m: (distance / 100.0) as u32 });
                    }
                }
            }
        }

        Ok(clearance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FwLaunchConfig, FwNavConfig, NavConfig, RcConfig};
    use crate::context::{HomeFlags, PilotInput};
    use crate::geo::{GeoOrigin, GeoPoint};
    use crate::mission::{Waypoint, WaypointAction, FLAG_LAST};
    use helm_ctrl::profile::{Airframe, PidProfile, ThrottleConfig};
    use helm_ctrl::Vec3;

    fn ctx(airframe: Airframe, cfg: NavConfig) -> NavigationContext {
        let mut c = NavigationContext::new(cfg, RcConfig::default(), &PidProfile::default(), ThrottleConfig::default(), airframe);
        c.origin = GeoOrigin::new(GeoPoint::from_degrees(47.0, 8.0, 400.0));
        c
    }

    fn fixed(c: &mut NavigationContext) {
        c.est.pos = EstimateStatus::Trusted;
        c.home.flags = HomeFlags::VALID_ALL;
    }

    fn wp_at(c: &NavigationContext, x: f32, last: bool) -> Waypoint {
        let g = c.origin.to_geodetic(&Vec3::new(x, 0.0, 0.0)).unwrap_or_default();
        Waypoint { lat: g.lat, lon: g.lon, alt: 1000, flag: if last { FLAG_LAST } else { 0 }, ..Default::default() }
    }

    #[test]
    fn safety_off_never_blocks() {
        let c = ctx(Airframe::Multirotor, NavConfig { extra_arming_safety: ArmingSafety::Off, ..Default::default() });
        assert_eq!(c.check_arming(true), Ok(ArmingClearance::Clear));
    }

    #[test]
    fn missing_fix_blocks_nav_users_only() {
        let c = ctx(Airframe::Multirotor, NavConfig::default());
        assert_eq!(c.check_arming(true), Err(ArmingBlocker::MissingGpsFix));
        assert_eq!(c.check_arming(false), Ok(ArmingClearance::Clear));
    }

    #[test]
    fn yaw_bypass_when_allowed() {
        let mut c = ctx(Airframe::Multirotor, NavConfig { extra_arming_safety: ArmingSafety::AllowBypass, ..Default::default() });
        c.set_pilot_input(PilotInput { sticks: [0.0, 0.0, 300.0], ..Default::default() });
        assert_eq!(c.check_arming(true), Ok(ArmingClearance::Bypassed));
        c.set_pilot_input(PilotInput { sticks: [0.0, 0.0, 200.0], ..Default::default() });
        assert_eq!(c.check_arming(true), Err(ArmingBlocker::MissingGpsFix));
    }

    #[test]
    fn nav_box_on_at_arming_blocks() {
        let mut c = ctx(Airframe::Multirotor, NavConfig::default());
        fixed(&mut c);
        c.set_pilot_input(PilotInput { boxes: BoxModes::POSHOLD, ..Default::default() });
        assert_eq!(c.check_arming(true), Err(ArmingBlocker::NavIsAlreadyActive));
        c.set_pilot_input(PilotInput { boxes: BoxModes::ALTHOLD, ..Default::default() });
        assert_eq!(c.check_arming(true), Ok(ArmingClearance::Clear));
    }

    #[test]
    fn launch_combo_is_allowed_on_fixed_wing() {
        let cfg = NavConfig {
            fw: FwNavConfig { launch: FwLaunchConfig { enabled: true, ..Default::default() }, ..Default::default() },
            ..Default::default()
        };
        let mut c = ctx(Airframe::FixedWing, cfg);
        fixed(&mut c);
        c.set_pilot_input(PilotInput { boxes: BoxModes::ALTHOLD, ..Default::default() });
        assert_eq!(c.check_arming(true), Ok(ArmingClearance::Clear));
    }

    #[test]
    fn far_first_waypoint_blocks() {
        let mut c = ctx(Airframe::Multirotor, NavConfig::default());
        fixed(&mut c);
        let wp = wp_at(&c, 25_000.0, true);
        c.mission.upload(0, wp);
        assert!(matches!(c.check_arming(true), Err(ArmingBlocker::FirstWaypointTooFar { distance_m: 249..=250 })));
        let near = wp_at(&c, 5_000.0, true);
        c.mission.upload(0, near);
        assert_eq!(c.check_arming(true), Ok(ArmingClearance::Clear));
    }

    #[test]
    fn broken_jump_blocks() {
        let mut c = ctx(Airframe::Multirotor, NavConfig::default());
        fixed(&mut c);
        c.mission.upload(0, wp_at(&c, 100.0, false));
        c.mission.upload(1, Waypoint { action: WaypointAction::Jump, p1: 2, p2: 1, flag: FLAG_LAST, ..Default::default() });
        assert_eq!(c.check_arming(true), Err(ArmingBlocker::JumpWaypointError { index: 1 }));
    }
}
