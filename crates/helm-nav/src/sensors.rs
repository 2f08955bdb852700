use helm_ctrl::math::{centideg_to_rad, wrap_18000, wrap_36000};
use helm_ctrl::Vec3;
use tracing::{debug, info};

use crate::context::{EstimateStatus, HomeFlags, NavigationContext};
use crate::geo::{bearing_cd, distance_xy, AltitudeDatum, GeoOrigin};
use crate::gnss::{FixHealth, GnssThresholds, GpsSolution};
use crate::mission::ActiveWaypoint;

/// Bearing error past which a waypoint counts as overflown.
const WAYPOINT_MISSED_BEARING_CD: i32 = 10000;

impl NavigationContext {
    /// Horizontal estimate. Velocity alone keeps the position usable for dead reckoning.
    pub fn update_position_and_velocity(
        &mut self,
        now_us: u64,
        pos_valid: bool,
        vel_valid: bool,
        pos: [f32; 2],
        vel: [f32; 2],
    ) {
        self.set_time(now_us);
        for pv in [&mut self.actual.abs, &mut self.actual.agl] {
            pv.pos.x = pos[0];
            pv.pos.y = pos[1];
            pv.vel.x = vel[0];
            pv.vel.y = vel[1];
        }
        self.actual.vel_xy = (vel[0] * vel[0] + vel[1] * vel[1]).sqrt();

        if vel_valid {
            self.est.pos = if pos_valid { EstimateStatus::Trusted } else { EstimateStatus::Usable };
            self.est.vel = EstimateStatus::Trusted;
            self.mailbox.horizontal_new = true;
            self.mailbox.last_valid_position_ms = self.now_ms();
        } else {
            self.est.pos = EstimateStatus::None;
            self.est.vel = EstimateStatus::None;
            self.mailbox.horizontal_new = false;
        }
    }

    /// Vertical estimate plus the surface (rangefinder) channel.
    pub fn update_altitude_and_climb_rate(
        &mut self,
        now_us: u64,
        valid: bool,
        altitude: f32,
        climb_rate: f32,
        surface_distance: f32,
        surface_velocity: f32,
        surface_status: EstimateStatus,
    ) {
        self.set_time(now_us);
        self.actual.abs.pos.z = altitude;
        self.actual.abs.vel.z = climb_rate;
        self.actual.agl.pos.z = surface_distance;
        self.actual.agl.vel.z = surface_velocity;

        if valid {
            self.update_desired_rth_altitude();
            self.est.agl = surface_status;
            self.est.alt = EstimateStatus::Trusted;
            self.mailbox.vertical_new = true;
            self.mailbox.last_valid_altitude_ms = self.now_ms();
        } else {
            self.est.alt = EstimateStatus::None;
            self.est.agl = EstimateStatus::None;
            self.mailbox.vertical_new = false;
        }

        if self.flags.armed {
            if self.est.agl == EstimateStatus::Trusted && surface_distance > 0.0 {
                self.actual.surface_min = if self.actual.surface_min > 0.0 {
                    self.actual.surface_min.min(surface_distance)
                } else {
                    surface_distance
                };
            }
        } else {
            self.actual.surface_min = -1.0;
        }
    }

    /// Heading in centidegrees. A home stored before heading was known is rotated onto the real heading.
    pub fn update_heading(&mut self, now_us: u64, valid: bool, heading: i32) {
        self.set_time(now_us);
        let status = if valid { EstimateStatus::Trusted } else { EstimateStatus::None };
        if status >= EstimateStatus::Usable
            && self.est.heading < EstimateStatus::Usable
            && self.home.flags.intersects(HomeFlags::VALID_XY | HomeFlags::VALID_Z)
            && !self.home.flags.contains(HomeFlags::VALID_HEADING)
        {
            let offset = heading - self.actual.yaw;
            self.home.yaw = wrap_36000(self.home.yaw + offset);
            self.home.flags |= HomeFlags::VALID_HEADING;
            debug!("home heading fixed up to {}", self.home.yaw);
        }
        self.actual.yaw = heading;
        self.est.heading = status;
        let yaw = centideg_to_rad(heading as f32);
        self.actual.sin_yaw = yaw.sin();
        self.actual.cos_yaw = yaw.cos();
        self.mailbox.heading_new = true;
    }

    /// Feeds a GPS solution through the fix-health ladder into the horizontal estimate.
    /// The first good fix defines the local origin.
    pub fn ingest_gps(&mut self, now_us: u64, sol: &GpsSolution, thresholds: &GnssThresholds) {
        let health = thresholds.assess(sol);
        if health == FixHealth::Good && !self.origin.valid {
            self.origin = GeoOrigin::new(sol.point);
            info!("nav origin set at {:.7},{:.7}", sol.point.lat_deg(), sol.point.lon_deg());
        }
        self.gps_ground_speed = sol.ground_speed();
        let local = self.origin.to_local(&sol.point, AltitudeDatum::Absolute);
        let vel = [sol.vel_neu[0], sol.vel_neu[1]];
        match (health, local) {
            (FixHealth::Good, Some(p)) => self.update_position_and_velocity(now_us, true, true, [p.x, p.y], vel),
            (FixHealth::Degraded, _) | (FixHealth::Good, None) => {
                let last = [self.actual.abs.pos.x, self.actual.abs.pos.y];
                self.update_position_and_velocity(now_us, false, true, last, vel)
            }
            (FixHealth::Lost, _) => {
                let last = [self.actual.abs.pos.x, self.actual.abs.pos.y];
                self.update_position_and_velocity(now_us, false, false, last, [0.0, 0.0])
            }
        }
    }

    /// True once the position estimate has been missing for longer than `pos_failure_timeout`.
    pub fn check_position_sensor_timeout(&self) -> bool {
        let timeout_s = self.cfg.pos_failure_timeout;
        if timeout_s == 0 {
            return false;
        }
        self.est.pos == EstimateStatus::None
            && self.now_ms().saturating_sub(self.mailbox.last_valid_position_ms) > 1000 * u64::from(timeout_s)
    }

    // ----- Distance / bearing -----

    pub(crate) fn distance_to(&self, dest: &Vec3) -> f32 {
        distance_xy(&self.current_posvel().pos, dest)
    }

    pub(crate) fn bearing_to(&self, dest: &Vec3) -> i32 {
        bearing_cd(&self.current_posvel().pos, dest)
    }

    /// Overflown when the bearing has swung more than 100 degrees from the initial one.
    pub(crate) fn is_waypoint_missed(&self, wp: &ActiveWaypoint) -> bool {
        wrap_18000(self.bearing_to(&wp.pos) - wp.yaw).abs() > WAYPOINT_MISSED_BEARING_CD
    }

    pub(crate) fn is_waypoint_position_reached(&mut self, pos: &Vec3, is_home: bool) -> bool {
        let d = self.distance_to(pos);
        self.active_wp.distance = d;
        let radius = f32::from(self.cfg.waypoint_radius);
        if self.is_fixed_wing() && is_home {
            d <= radius || d <= f32::from(self.cfg.fw.loiter_radius) * 1.1
        } else {
            d <= radius
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NavConfig, RcConfig};
    use crate::gnss::{FixQuality, FixType};
    use crate::geo::GeoPoint;
    use helm_ctrl::profile::{Airframe, PidProfile, ThrottleConfig};

    fn ctx() -> NavigationContext {
        NavigationContext::new(
            NavConfig::default(),
            RcConfig::default(),
            &PidProfile::default(),
            ThrottleConfig::default(),
            Airframe::Multirotor,
        )
    }

    #[test]
    fn velocity_only_is_usable() {
        let mut c = ctx();
        c.update_position_and_velocity(1_000, false, true, [0.0, 0.0], [30.0, 40.0]);
        assert_eq!(c.est.pos, EstimateStatus::Usable);
        assert_eq!(c.est.vel, EstimateStatus::Trusted);
        assert!((c.actual.vel_xy - 50.0).abs() < 1e-4);
    }

    #[test]
    fn position_timeout_needs_elapsed_time() {
        let mut c = ctx();
        c.update_position_and_velocity(1_000_000, true, true, [0.0, 0.0], [0.0, 0.0]);
        c.update_position_and_velocity(2_000_000, false, false, [0.0, 0.0], [0.0, 0.0]);
        assert!(!c.check_position_sensor_timeout());
        c.update_position_and_velocity(6_100_000, false, false, [0.0, 0.0], [0.0, 0.0]);
        assert!(c.check_position_sensor_timeout());
        c.cfg.pos_failure_timeout = 0;
        assert!(!c.check_position_sensor_timeout());
    }

    #[test]
    fn surface_min_tracks_only_while_armed() {
        let mut c = ctx();
        c.update_altitude_and_climb_rate(0, true, 100.0, 0.0, 80.0, 0.0, EstimateStatus::Trusted);
        assert_eq!(c.actual.surface_min, -1.0);
        c.set_armed(true);
        c.update_altitude_and_climb_rate(0, true, 100.0, 0.0, 80.0, 0.0, EstimateStatus::Trusted);
        c.update_altitude_and_climb_rate(0, true, 100.0, 0.0, 60.0, 0.0, EstimateStatus::Trusted);
        c.update_altitude_and_climb_rate(0, true, 100.0, 0.0, 90.0, 0.0, EstimateStatus::Trusted);
        assert_eq!(c.actual.surface_min, 60.0);
    }

    #[test]
    fn home_heading_rotated_when_heading_arrives() {
        let mut c = ctx();
        c.home.flags = HomeFlags::VALID_XY | HomeFlags::VALID_Z;
        c.home.yaw = 0;
        c.actual.yaw = 0;
        c.update_heading(0, true, 9000);
        assert_eq!(c.home.yaw, 9000);
        assert!(c.home.flags.contains(HomeFlags::VALID_HEADING));
    }

    #[test]
    fn gps_ladder_sets_origin_and_statuses() {
        let mut c = ctx();
        let t = GnssThresholds::default();
        let mut sol = GpsSolution {
            fix: FixType::Fix3D,
            point: GeoPoint::from_degrees(47.0, 8.0, 500.0),
            vel_neu: [100.0, 0.0, 0.0],
            quality: FixQuality { sats: 10, hdop: 1.0, fix_age_ms: 100 },
        };
        c.ingest_gps(1_000, &sol, &t);
        assert!(c.origin.valid);
        assert_eq!(c.est.pos, EstimateStatus::Trusted);
        sol.quality.sats = 4;
        c.ingest_gps(2_000, &sol, &t);
        assert_eq!(c.est.pos, EstimateStatus::Usable);
        sol.fix = FixType::NoFix;
        c.ingest_gps(3_000, &sol, &t);
        assert_eq!(c.est.pos, EstimateStatus::None);
    }

    #[test]
    fn missed_waypoint_detection() {
        let mut c = ctx();
        c.update_position_and_velocity(0, true, true, [0.0, 0.0], [0.0, 0.0]);
        let wp = ActiveWaypoint { pos: Vec3::new(1000.0, 0.0, 0.0), yaw: 0, ..Default::default() };
        assert!(!c.is_waypoint_missed(&wp));
        c.update_position_and_velocity(0, true, true, [2000.0, 0.0], [0.0, 0.0]);
        assert!(c.is_waypoint_missed(&wp));
    }
}
