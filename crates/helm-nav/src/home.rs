use helm_ctrl::Vec3;
use tracing::info;

use crate::config::HomeReset;
use crate::context::{EstimateStatus, HomeFlags, NavigationContext, PosUpdate};
use crate::fsm::FlightModes;
use crate::modes::BoxModes;
use crate::rth::RthHomeTarget;

impl NavigationContext {
    /// Stores the parts of home selected by `mask`; `valid` says which of them are trustworthy.
    pub fn set_home_position(&mut self, pos: &Vec3, yaw: i32, mask: PosUpdate, valid: HomeFlags) {
        if mask.contains(PosUpdate::XY) {
            self.home.pos.x = pos.x;
            self.home.pos.y = pos.y;
            self.home.flags.set(HomeFlags::VALID_XY, valid.contains(HomeFlags::VALID_XY));
        }
        if mask.contains(PosUpdate::Z) {
            self.home.pos.z = pos.z;
            self.home.flags.set(HomeFlags::VALID_Z, valid.contains(HomeFlags::VALID_Z));
        }
        if mask.contains(PosUpdate::HEADING) {
            self.home.yaw = yaw;
            self.home.flags.set(HomeFlags::VALID_HEADING, valid.contains(HomeFlags::VALID_HEADING));
        }
        self.home.distance = 0.0;
        self.home.direction = 0;
        self.update_desired_rth_altitude();
    }

    fn actual_home_validity(&self) -> HomeFlags {
        let mut flags = HomeFlags::empty();
        if self.est.pos >= EstimateStatus::Usable {
            flags |= HomeFlags::VALID_XY | HomeFlags::VALID_Z;
        }
        if self.est.heading >= EstimateStatus::Usable {
            flags |= HomeFlags::VALID_HEADING;
        }
        flags
    }

    /// Tracks the current position while disarmed; while armed only the HOME_RESET box moves home.
    pub(crate) fn update_home_position(&mut self) {
        let all = PosUpdate::XY | PosUpdate::Z | PosUpdate::HEADING;
        if !self.flags.armed {
            if self.est.pos < EstimateStatus::Usable {
                return;
            }
            let set_home = !self.home.is_fixed()
                || match self.cfg.home_reset {
                    HomeReset::Never => false,
                    HomeReset::FirstArm => !self.flags.was_ever_armed,
                    HomeReset::EachArm => true,
                };
            if !set_home {
                return;
            }
            let pos = self.actual.abs.pos;
            let valid = self.actual_home_validity();
            if self.cfg.home_offset_distance != 0 {
                let dir = f32::from(self.cfg.home_offset_direction).to_radians();
                let d = f32::from(self.cfg.home_offset_distance);
                let offset = Vec3::new(pos.x + d * dir.cos(), pos.y + d * dir.sin(), pos.z);
                self.set_home_position(&offset, 0, all, valid);
            } else {
                self.set_home_position(&pos, self.actual.yaw, all, valid);
            }
            return;
        }

        let reset_box = self.pilot.boxes.contains(BoxModes::HOME_RESET);
        if reset_box && !self.home_reset_box_prev {
            let modes = self.flight_modes();
            let blocked = self.flags.failsafe || modes.intersects(FlightModes::RTH | FlightModes::WP);
            if !blocked && self.est.pos >= EstimateStatus::Usable {
                let mask = if self.home.is_fixed() { PosUpdate::XY | PosUpdate::HEADING } else { all };
                let pos = self.actual.abs.pos;
                let valid = self.actual_home_validity();
                self.set_home_position(&pos, self.actual.yaw, mask, valid);
                info!("home reset in flight");
            }
        }
        self.home_reset_box_prev = reset_box;

        if self.home.is_fixed() {
            let target = self.rth_home_target(RthHomeTarget::FinalLand);
            self.home.distance = self.distance_to(&target);
            self.home.direction = self.bearing_to(&target);
        }
    }

    /// Integrates ground distance flown while armed.
    pub(crate) fn update_trip_distance(&mut self, dt_s: f32) {
        if self.flags.armed {
            self.trip_distance += self.actual.vel_xy * dt_s;
        }
    }

    /// Losing the GCS_NAV box flags the active hold to drop ground-station setpoints.
    pub(crate) fn update_gcs_flags(&mut self) {
        let enabled = self.pilot.boxes.contains(BoxModes::GCS_NAV);
        if self.flags.gcs_enabled && !enabled {
            self.flags.gcs_reset = true;
        }
        self.flags.gcs_enabled = enabled;
    }

    pub(crate) fn reset_gcs_flags(&mut self) {
        self.flags.gcs_reset = false;
        self.flags.gcs_enabled = false;
    }
}
