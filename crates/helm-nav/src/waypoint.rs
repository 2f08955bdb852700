//! Waypoint storage API and the local-frame view of the active waypoint.

use helm_ctrl::Vec3;
use tracing::{debug, info};

use crate::context::{EstimateStatus, HomeFlags, NavigationContext, PosUpdate};
use crate::fsm::NavState;
use crate::geo::{AltitudeDatum, GeoPoint};
use crate::mission::{Waypoint, WaypointAction, WaypointHeading, FLAG_LAST, MAX_WAYPOINTS, WP_CURRENT, WP_HOME};

impl NavigationContext {
    /// Local position of a geo record. `None` until the origin is known.
    pub(crate) fn waypoint_to_local(&self, wp: &Waypoint) -> Option<Vec3> {
        let datum = if wp.absolute_altitude() { AltitudeDatum::Absolute } else { AltitudeDatum::Relative };
        self.origin.to_local(&GeoPoint { lat: wp.lat, lon: wp.lon, alt: wp.alt }, datum)
    }

    /// Starts a new leg towards `pos`.
    pub(crate) fn set_active_waypoint(&mut self, pos: &Vec3) {
        let bearing = self.bearing_to(pos);
        self.active_wp.pos = *pos;
        self.active_wp.yaw = bearing;
        self.active_wp.distance = self.distance_to(pos);
        self.active_wp.initial_distance = self.active_wp.distance;
        self.active_wp.initial_altitude = self.current_posvel().pos.z;
        self.active_wp.altitude_reached = false;
        self.active_wp.reached_at_ms = None;
        self.set_desired_position(pos, bearing, PosUpdate::XY | PosUpdate::Z | PosUpdate::HEADING);
    }

    /// Flies to `target`, pointing the nose as SET_POI / SET_HEAD asked. Fixed wings always fly the bearing.
    pub(crate) fn set_waypoint_target(&mut self, target: &Vec3) {
        let heading = if self.is_fixed_wing() { WaypointHeading::None } else { self.wp_heading };
        match heading {
            WaypointHeading::None => {
                self.set_desired_position(target, 0, PosUpdate::XY | PosUpdate::Z | PosUpdate::BEARING);
            }
            WaypointHeading::Fixed(yaw) => {
                self.set_desired_position(target, yaw, PosUpdate::XY | PosUpdate::Z | PosUpdate::HEADING);
            }
            WaypointHeading::Poi(poi) => {
                let yaw = self.bearing_to(&poi);
                self.set_desired_position(target, yaw, PosUpdate::XY | PosUpdate::Z | PosUpdate::HEADING);
            }
        }
    }

    /// Altitude check for the enforce-altitude option. Always true when the option is off.
    pub(crate) fn is_waypoint_altitude_reached(&self) -> bool {
        let tolerance = f32::from(self.cfg.waypoint_enforce_altitude);
        if tolerance <= 0.0 {
            return true;
        }
        (self.current_posvel().pos.z - self.active_wp.pos.z).abs() <= tolerance
    }

    // ----- Storage API -----

    /// Record `n`: 0 is home, 255 the current position, 1.. the uploaded list.
    /// Anything else reads back as a terminating RTH.
    pub fn get_waypoint(&self, n: u8) -> Waypoint {
        let fallback = Waypoint { action: WaypointAction::Rth, flag: FLAG_LAST, ..Default::default() };
        let at = |pos: &Vec3| {
            self.origin
                .to_geodetic(pos)
                .map(|g| Waypoint { action: WaypointAction::Waypoint, lat: g.lat, lon: g.lon, alt: g.alt, ..fallback })
        };
        match n {
            WP_HOME if self.home.is_fixed() => at(&self.home.pos).unwrap_or(fallback),
            WP_CURRENT => at(&self.actual.abs.pos).unwrap_or(fallback),
            n if n != WP_HOME && usize::from(n) <= self.mission.total() => {
                self.mission.download(usize::from(n) - 1).unwrap_or(fallback)
            }
            _ => fallback,
        }
    }

    /// Writes record `n`. Home and the current target are only accepted in flight from an
    /// enabled ground station, list entries only while disarmed.
    pub fn set_waypoint(&mut self, n: u8, wp: &Waypoint) -> bool {
        match n {
            WP_HOME => {
                if !(self.flags.armed && self.est.pos >= EstimateStatus::Usable && self.flags.gcs_enabled) {
                    return false;
                }
                let Some(pos) = self.origin.to_local(&GeoPoint { lat: wp.lat, lon: wp.lon, alt: wp.alt }, AltitudeDatum::Relative)
                else {
                    return false;
                };
                self.set_home_position(&pos, 0, PosUpdate::XY | PosUpdate::Z | PosUpdate::HEADING, HomeFlags::VALID_ALL);
                info!("home moved by ground station");
                true
            }
            WP_CURRENT => {
                let allowed = wp.action == WaypointAction::Waypoint
                    && self.flags.armed
                    && self.est.pos == EstimateStatus::Trusted
                    && self.flags.gcs_enabled
                    && self.state == NavState::PosHoldInProgress;
                if !allowed {
                    return false;
                }
                let Some(pos) = self.origin.to_local(&GeoPoint { lat: wp.lat, lon: wp.lon, alt: wp.alt }, AltitudeDatum::Relative)
                else {
                    return false;
                };
                let mut mask = PosUpdate::XY;
                if wp.alt != 0 {
                    mask |= PosUpdate::Z;
                }
                if (1..360).contains(&wp.p1) {
                    mask |= PosUpdate::HEADING;
                }
                self.set_desired_position(&pos, i32::from(wp.p1) * 100, mask);
                debug!("hold target moved by ground station");
                true
            }
            n if usize::from(n) <= MAX_WAYPOINTS => !self.flags.armed && self.mission.upload(usize::from(n) - 1, *wp),
            _ => false,
        }
    }

    pub fn reset_waypoint_list(&mut self) -> bool {
        if self.flags.armed {
            return false;
        }
        self.mission.reset();
        true
    }

    pub fn load_waypoints(&mut self) -> bool {
        !self.flags.armed && self.mission.load_stored()
    }

    pub fn save_waypoints(&mut self) -> bool {
        !self.flags.armed && self.mission.save_stored()
    }

    /// Switches between the missions of a multi-mission upload. Disarmed only.
    pub fn select_mission(&mut self, n: u8) -> bool {
        if self.flags.armed {
            return false;
        }
        self.mission.select(n);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NavConfig, RcConfig};
    use crate::geo::GeoOrigin;
    use crate::modes::BoxModes;
    use helm_ctrl::profile::{Airframe, PidProfile, ThrottleConfig};

    fn ctx() -> NavigationContext {
        let mut c = NavigationContext::new(
            NavConfig::default(),
            RcConfig::default(),
            &PidProfile::default(),
            ThrottleConfig::default(),
            Airframe::Multirotor,
        );
        c.origin = GeoOrigin::new(GeoPoint::from_degrees(47.0, 8.0, 400.0));
        c
    }

    fn wp_at(lat: f64, lon: f64, alt_cm: i32) -> Waypoint {
        let g = GeoPoint::from_degrees(lat, lon, 0.0);
        Waypoint { lat: g.lat, lon: g.lon, alt: alt_cm, flag: FLAG_LAST, ..Default::default() }
    }

    #[test]
    fn upload_only_while_disarmed() {
        let mut c = ctx();
        assert!(c.set_waypoint(1, &wp_at(47.001, 8.0, 1000)));
        assert_eq!(c.mission.count(), 1);
        c.set_armed(true);
        assert!(!c.set_waypoint(1, &wp_at(47.002, 8.0, 1000)));
        assert!(!c.reset_waypoint_list());
    }

    #[test]
    fn out_of_range_reads_back_as_rth() {
        let c = ctx();
        let wp = c.get_waypoint(7);
        assert_eq!(wp.action, WaypointAction::Rth);
        assert!(wp.is_last());
    }

    #[test]
    fn jump_downloads_one_based() {
        let mut c = ctx();
        c.set_waypoint(1, &Waypoint { flag: 0, ..wp_at(47.001, 8.0, 500) });
        c.set_waypoint(2, &Waypoint { flag: 0, ..wp_at(47.002, 8.0, 500) });
        let jump = Waypoint { action: WaypointAction::Jump, p1: 1, p2: 2, p3: 0, flag: FLAG_LAST, ..Default::default() };
        assert!(c.set_waypoint(3, &jump));
        assert_eq!(c.mission.get(2).map(|w| w.p1), Some(0));
        assert_eq!(c.get_waypoint(3), jump);
    }

    #[test]
    fn current_position_reads_back_geodetic() {
        let mut c = ctx();
        c.actual.abs.pos = Vec3::new(1113.195, 0.0, 250.0);
        let wp = c.get_waypoint(WP_CURRENT);
        assert_eq!(wp.lat, c.origin.point.lat + 1000);
        assert_eq!(wp.alt, c.origin.point.alt + 250);
    }

    #[test]
    fn gcs_home_needs_arming_and_gcs_box() {
        let mut c = ctx();
        let target = wp_at(47.0, 8.001, 0);
        assert!(!c.set_waypoint(WP_HOME, &target));
        c.set_armed(true);
        c.est.pos = EstimateStatus::Trusted;
        c.pilot.boxes = BoxModes::GCS_NAV;
        c.update_gcs_flags();
        assert!(c.set_waypoint(WP_HOME, &target));
        assert!(c.home.is_fixed());
        assert!(c.home.pos.y > 7000.0);
    }

    #[test]
    fn gcs_target_only_in_poshold() {
        let mut c = ctx();
        c.set_armed(true);
        c.est.pos = EstimateStatus::Trusted;
        c.flags.gcs_enabled = true;
        let target = Waypoint { action: WaypointAction::Waypoint, p1: 90, ..wp_at(47.001, 8.0, 0) };
        assert!(!c.set_waypoint(WP_CURRENT, &target));
        c.state = NavState::PosHoldInProgress;
        c.desired.pos.z = 300.0;
        assert!(c.set_waypoint(WP_CURRENT, &target));
        assert!(c.desired.pos.x > 10_000.0);
        // zero altitude leaves Z alone
        assert_eq!(c.desired.pos.z, 300.0);
        assert_eq!(c.desired.yaw, 9000);
    }

    #[test]
    fn poi_points_the_nose_fixed_heading_overrides() {
        let mut c = ctx();
        let target = Vec3::new(1000.0, 0.0, 500.0);
        c.wp_heading = WaypointHeading::Poi(Vec3::new(0.0, 1000.0, 0.0));
        c.set_waypoint_target(&target);
        assert_eq!(c.desired.yaw, 9000);
        c.wp_heading = WaypointHeading::Fixed(18000);
        c.set_waypoint_target(&target);
        assert_eq!(c.desired.yaw, 18000);
        c.wp_heading = WaypointHeading::None;
        c.set_waypoint_target(&target);
        assert_eq!(c.desired.yaw, 0);
    }

    #[test]
    fn absolute_altitude_uses_msl_datum() {
        let c = ctx();
        let mut wp = wp_at(47.0, 8.0, 45_000);
        wp.p3 = 1;
        assert_eq!(c.waypoint_to_local(&wp).map(|p| p.z), Some(5_000.0));
        wp.p3 = 0;
        assert_eq!(c.waypoint_to_local(&wp).map(|p| p.z), Some(45_000.0));
    }
}
