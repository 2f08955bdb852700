use bitflags::bitflags;
use serde::Serialize;

use crate::context::{EstimateStatus, NavigationContext};
use crate::fsm::{descriptor, FlightModes, NavEvent, StateFlags};

bitflags! {
    /// Receiver mode switches relevant to navigation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BoxModes: u16 {
        const ALTHOLD    = 1 << 0;
        const POSHOLD    = 1 << 1;
        const RTH        = 1 << 2;
        const WP         = 1 << 3;
        const CRUISE     = 1 << 4;
        const LAUNCH     = 1 << 5;
        const MANUAL     = 1 << 6;
        const HOME_RESET = 1 << 7;
        const GCS_NAV    = 1 << 8;
        /// Terrain following.
        const SURFACE    = 1 << 9;
        const BRAKING    = 1 << 10;
    }
}

impl Default for BoxModes {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeadingControl {
    None,
    Auto,
    Manual,
}

impl NavigationContext {
    // ----- Capabilities -----

    pub(crate) fn can_activate_althold(&self) -> bool {
        self.est.alt >= EstimateStatus::Usable
    }

    pub(crate) fn can_activate_poshold(&self) -> bool {
        self.est.pos >= EstimateStatus::Usable
            && self.est.vel == EstimateStatus::Trusted
            && self.est.heading >= EstimateStatus::Usable
    }

    pub(crate) fn can_activate_navigation(&self) -> bool {
        self.est.pos == EstimateStatus::Trusted
            && self.est.vel == EstimateStatus::Trusted
            && self.est.heading >= EstimateStatus::Usable
    }

    pub(crate) fn launch_enabled(&self) -> bool {
        self.is_fixed_wing() && (self.cfg.fw.launch.enabled || self.pilot.boxes.contains(BoxModes::LAUNCH))
    }

    pub(crate) fn terrain_follow_requested(&self) -> bool {
        !self.is_fixed_wing() && self.pilot.boxes.contains(BoxModes::SURFACE)
    }

    /// Maps the mode switches onto an FSM request. Priority: launch, RTH, manual, WP, poshold, cruise, althold.
    pub(crate) fn select_nav_event(&mut self) -> Option<NavEvent> {
        if !self.flags.armed {
            self.can_activate_waypoint = false;
            self.can_activate_launch = self.launch_enabled();
            return Some(NavEvent::SwitchToIdle);
        }

        let boxes = self.pilot.boxes;
        let modes = self.flight_modes();
        let althold = self.can_activate_althold();
        let poshold = self.can_activate_poshold();
        let nav = self.can_activate_navigation();

        if self.is_fixed_wing() {
            if self.launch_enabled() {
                if self.can_activate_launch {
                    self.can_activate_launch = false;
                    return Some(NavEvent::SwitchToLaunch);
                }
                if modes.contains(FlightModes::LAUNCH) {
                    return None;
                }
            } else if modes.contains(FlightModes::LAUNCH) {
                return self.is_throttle_low().then_some(NavEvent::SwitchToIdle);
            }
        }

        if self.flags.forced_rth || (boxes.contains(BoxModes::RTH) && poshold && nav && althold && self.home.is_fixed()) {
            self.can_activate_waypoint = false;
            return Some(NavEvent::SwitchToRth);
        }

        if boxes.contains(BoxModes::MANUAL) {
            self.can_activate_waypoint = false;
            return Some(NavEvent::SwitchToIdle);
        }

        if boxes.contains(BoxModes::WP) {
            let mission_ok = self.mission.is_valid() && self.mission.count() > 0;
            if modes.contains(FlightModes::WP)
                || (nav && self.can_activate_waypoint && poshold && althold && self.home.is_fixed() && mission_ok)
            {
                return Some(NavEvent::SwitchToWaypoint);
            }
            // nothing to fly: go home instead
            if !mission_ok && nav && poshold && althold && self.home.is_fixed() {
                return Some(NavEvent::SwitchToRth);
            }
        } else {
            self.can_activate_waypoint = true;
        }

        if boxes.contains(BoxModes::POSHOLD) && (modes.contains(FlightModes::POSHOLD) || (poshold && althold)) {
            return Some(NavEvent::SwitchToPosHold);
        }

        if boxes.contains(BoxModes::CRUISE) {
            if boxes.contains(BoxModes::ALTHOLD)
                && (modes.contains(FlightModes::CRUISE | FlightModes::ALTHOLD) || (poshold && althold))
            {
                return Some(NavEvent::SwitchToCruise);
            }
            if modes.contains(FlightModes::CRUISE) || poshold {
                return Some(NavEvent::SwitchToCourseHold);
            }
        }

        if boxes.contains(BoxModes::ALTHOLD) && (modes.contains(FlightModes::ALTHOLD) || althold) {
            return Some(NavEvent::SwitchToAltHold);
        }

        Some(NavEvent::SwitchToIdle)
    }

    /// Pilot stick input while a nav mode holds the aircraft. Ignored in failsafe.
    pub(crate) fn process_rc_adjustments(&mut self) {
        let flags = self.state_flags();
        let failsafe = self.flags.failsafe;

        self.flags.adjusting_altitude =
            flags.contains(StateFlags::RC_ALT) && !failsafe && self.adjust_altitude_from_rc();

        if flags.contains(StateFlags::RC_POS) {
            if !failsafe {
                self.flags.adjusting_position = self.adjust_position_from_rc();
            } else if !self.is_fixed_wing() {
                self.rotor.reset_braking();
            }
        } else {
            self.flags.adjusting_position = false;
        }

        self.flags.adjusting_heading =
            flags.contains(StateFlags::RC_YAW) && !failsafe && self.adjust_heading_from_rc();
    }

    // ----- Status -----

    pub fn flight_modes(&self) -> FlightModes {
        descriptor(self.state).modes
    }

    pub fn is_controlling_throttle(&self) -> bool {
        self.state_flags()
            .intersects(StateFlags::CTL_ALT | StateFlags::CTL_EMERG | StateFlags::CTL_LAUNCH | StateFlags::CTL_LAND)
    }

    pub fn is_flying_autonomous(&self) -> bool {
        self.state_flags().intersects(StateFlags::AUTO_RTH | StateFlags::AUTO_WP)
    }

    pub fn requires_angle_mode(&self) -> bool {
        let flags = self.state_flags();
        flags.contains(StateFlags::REQUIRE_ANGLE) || (flags.contains(StateFlags::REQUIRE_ANGLE_FW) && self.is_fixed_wing())
    }

    pub fn requires_throttle_tilt_compensation(&self) -> bool {
        !self.is_fixed_wing() && self.state_flags().contains(StateFlags::REQUIRE_THRTILT)
    }

    pub fn requires_turn_assistance(&self) -> bool {
        self.is_fixed_wing() && self.state_flags().intersects(StateFlags::CTL_POS | StateFlags::CTL_ALT)
    }

    pub fn heading_control_state(&self) -> HeadingControl {
        if self.is_fixed_wing() {
            HeadingControl::Manual
        } else if self.state_flags().contains(StateFlags::REQUIRE_MAGHOLD) {
            if self.flags.adjusting_heading {
                HeadingControl::Manual
            } else {
                HeadingControl::Auto
            }
        } else {
            HeadingControl::None
        }
    }

    pub fn is_terrain_following(&self) -> bool {
        self.flags.terrain_follow
    }
}
