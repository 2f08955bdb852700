//! State entry handlers. A handler runs when its state is entered, or re-entered on
//! timeout, and returns the event that moves the machine on.

use helm_ctrl::math::{constrain, scale_range, wrap_18000, wrap_36000};
use helm_ctrl::rate::YAW;
use tracing::{debug, info, warn};

use crate::config::TrackbackMode;
use crate::context::{DisarmReason, EstimateStatus, HomeFlags, NavigationContext, PosUpdate};
use crate::fsm::{state_flags, NavEvent, NavState, StateFlags};
use crate::geo;
use crate::mission::{WaypointAction, WaypointHeading};
use crate::rth::{RthHomeTarget, RTH_CLIMB_OVERSHOOT_CM};
use crate::targets::RocMode;

/// Cruise targets lead the aircraft by this many seconds of ground speed.
const CRUISE_TARGET_LEAD_S: f32 = 60.0;
/// Heading stick samples further apart restart the yaw integration.
const CRUISE_YAW_SAMPLE_GAP_MS: u64 = 100;
const CRUISE_YAW_SETTLE_MS: u64 = 4000;
/// Fixed wings point at a target this far out until the return leg is set up.
const FW_RTH_INITIAL_TARGET_CM: f32 = 100_000.0;
/// Rotorcraft turn to within this of the home heading before descending.
const HOME_HEADING_TOLERANCE_CD: i32 = 1500;
/// Keeps the motors pressed down after an RTH landing.
const FINISHED_DESCENT_SHARE: f32 = 0.3;

impl NavigationContext {
    pub(crate) fn on_entry(&mut self, state: NavState, previous: NavState) -> Option<NavEvent> {
        use NavState::*;
        match state {
            Idle => self.on_idle(),

            AltHoldInitialize => self.on_althold_initialize(previous),
            AltHoldInProgress => self.on_althold_in_progress(),

            PosHoldInitialize => self.on_poshold_initialize(previous),
            PosHoldInProgress => self.on_poshold_in_progress(),

            CourseHoldInitialize => self.on_course_hold_initialize(previous),
            CourseHoldInProgress => self.on_course_hold_in_progress(previous),
            CourseHoldAdjusting => self.on_course_hold_adjusting(),

            CruiseInitialize => {
                self.on_althold_initialize(previous);
                self.on_course_hold_initialize(previous)
            }
            CruiseInProgress => {
                self.on_althold_in_progress();
                self.on_course_hold_in_progress(previous)
            }
            CruiseAdjusting => {
                self.on_althold_in_progress();
                self.on_course_hold_adjusting()
            }

            RthInitialize => self.on_rth_initialize(previous),
            RthClimbToSafeAlt => self.on_rth_climb_to_safe_alt(),
            RthTrackback => self.on_rth_trackback(),
            RthHeadHome => self.on_rth_head_home(),
            RthHoverPriorToLanding => self.on_rth_hover_prior_to_landing(),
            RthHoverAboveHome => self.on_rth_hover_above_home(),
            RthLanding => self.land_in_place(true),
            RthFinishing => self.on_rth_finishing(),
            RthFinished => self.on_rth_finished(),

            WaypointInitialize => self.on_waypoint_initialize(),
            WaypointPreAction => self.on_waypoint_pre_action(),
            WaypointInProgress => self.on_waypoint_in_progress(),
            WaypointReached => self.on_waypoint_reached(),
            WaypointHoldTime => self.on_waypoint_hold_time(),
            WaypointRthLand => self.on_waypoint_rth_land(),
            WaypointNext => self.on_waypoint_next(),
            WaypointFinished => self.on_waypoint_finished(),

            EmergencyLandingInitialize => self.on_emergency_landing_initialize(),
            EmergencyLandingInProgress => self.on_emergency_landing_in_progress(),
            EmergencyLandingFinished => None,

            LaunchInitialize => self.on_launch_initialize(),
            LaunchWait => self.on_launch_wait(),
            LaunchInProgress => self.on_launch_in_progress(),
        }
    }

    fn terrain_follow_toggled(&self) -> bool {
        self.terrain_follow_requested() != self.flags.terrain_follow
    }

    fn position_usable(&self) -> bool {
        self.est.pos >= EstimateStatus::Usable
    }

    /// Lost heading is fatal to autonomous flight, lost position only after the failure timeout.
    fn autonomous_fallback(&self) -> Option<NavEvent> {
        if self.est.heading == EstimateStatus::None {
            warn!("heading estimate lost, emergency landing");
            return Some(NavEvent::SwitchToEmergencyLanding);
        }
        if self.check_position_sensor_timeout() {
            warn!("position estimate timed out, emergency landing");
            return Some(NavEvent::SwitchToEmergencyLanding);
        }
        None
    }

    // ----- Idle / holds -----

    fn on_idle(&mut self) -> Option<NavEvent> {
        self.reset_altitude_controller(false);
        self.reset_heading_controller();
        self.reset_position_controller();
        None
    }

    fn on_althold_initialize(&mut self, previous: NavState) -> Option<NavEvent> {
        let prev = state_flags(previous);
        let toggled = self.terrain_follow_toggled();
        self.reset_gcs_flags();

        if !prev.contains(StateFlags::CTL_ALT) || toggled {
            let terrain = self.terrain_follow_requested();
            self.reset_altitude_controller(terrain);
            self.setup_altitude_controller();
        }
        if !prev.contains(StateFlags::CTL_ALT) || prev.intersects(StateFlags::AUTO_RTH | StateFlags::AUTO_WP) || toggled {
            let pos = self.current_posvel().pos;
            self.set_desired_position(&pos, 0, PosUpdate::Z);
        }
        Some(NavEvent::Success)
    }

    fn on_althold_in_progress(&mut self) -> Option<NavEvent> {
        if self.flags.gcs_reset {
            let pos = self.current_posvel().pos;
            self.set_desired_position(&pos, 0, PosUpdate::Z);
            self.reset_gcs_flags();
        }
        None
    }

    fn on_poshold_initialize(&mut self, previous: NavState) -> Option<NavEvent> {
        let prev = state_flags(previous);
        let toggled = self.terrain_follow_toggled();
        self.reset_gcs_flags();

        if !prev.contains(StateFlags::CTL_POS) {
            self.reset_position_controller();
        }
        if !prev.contains(StateFlags::CTL_ALT) || toggled {
            let terrain = self.terrain_follow_requested();
            self.reset_altitude_controller(terrain);
            self.setup_altitude_controller();
        }
        if !prev.contains(StateFlags::CTL_ALT) || prev.intersects(StateFlags::AUTO_RTH | StateFlags::AUTO_WP) || toggled {
            let pos = self.current_posvel().pos;
            self.set_desired_position(&pos, 0, PosUpdate::Z);
        }
        // a hold entered from the final stages of a return keeps the home target
        if !matches!(
            previous,
            NavState::RthHoverPriorToLanding | NavState::RthHoverAboveHome | NavState::RthLanding
        ) {
            let hold = self.calculate_initial_hold_position();
            let yaw = self.actual.yaw;
            self.set_desired_position(&hold, yaw, PosUpdate::XY | PosUpdate::HEADING);
        }
        Some(NavEvent::Success)
    }

    fn on_poshold_in_progress(&mut self) -> Option<NavEvent> {
        if self.flags.gcs_reset {
            let pos = self.current_posvel().pos;
            self.set_desired_position(&pos, 0, PosUpdate::Z);
            let hold = self.calculate_initial_hold_position();
            let yaw = self.actual.yaw;
            self.set_desired_position(&hold, yaw, PosUpdate::XY | PosUpdate::HEADING);
            self.reset_gcs_flags();
        }
        None
    }

    // ----- Course hold / cruise -----

    fn on_course_hold_initialize(&mut self, previous: NavState) -> Option<NavEvent> {
        if !self.is_fixed_wing() {
            return Some(NavEvent::Error);
        }
        if self.check_position_sensor_timeout() {
            return Some(NavEvent::SwitchToIdle);
        }
        if !state_flags(previous).contains(StateFlags::CTL_POS) {
            self.reset_position_controller();
        }
        self.cruise.yaw = self.actual.yaw;
        self.cruise.previous_yaw = self.actual.yaw;
        self.cruise.last_yaw_adjustment_ms = 0;
        Some(NavEvent::Success)
    }

    fn on_course_hold_in_progress(&mut self, previous: NavState) -> Option<NavEvent> {
        if self.check_position_sensor_timeout() {
            return Some(NavEvent::SwitchToIdle);
        }
        if self.flags.adjusting_position {
            return Some(NavEvent::SwitchToCourseAdjusting);
        }

        let now = self.now_ms();
        if self.flags.adjusting_heading {
            let since = now.saturating_sub(self.cruise.last_yaw_adjustment_ms);
            let dt_ms = if since > CRUISE_YAW_SAMPLE_GAP_MS { 0 } else { since };
            let max_rate = f32::from(self.cfg.fw.cruise_yaw_rate) * 100.0;
            let rate = scale_range(self.pilot.sticks[YAW], -500.0, 500.0, -max_rate, max_rate);
            let step = (rate * dt_ms as f32 / 1000.0).round() as i32;
            self.cruise.yaw = wrap_36000(self.cruise.yaw - step);
            self.cruise.last_yaw_adjustment_ms = now;
        }
        if now.saturating_sub(self.cruise.last_yaw_adjustment_ms) > CRUISE_YAW_SETTLE_MS {
            self.cruise.previous_yaw = self.cruise.yaw;
        }

        let distance = self.gps_ground_speed * CRUISE_TARGET_LEAD_S;
        let fresh = matches!(
            previous,
            NavState::CourseHoldInitialize
                | NavState::CourseHoldAdjusting
                | NavState::CruiseInitialize
                | NavState::CruiseAdjusting
        );
        if fresh || self.flags.adjusting_heading {
            self.cruise.target = self.far_away_target(self.cruise.yaw, distance);
        } else if self.distance_to(&self.cruise.target) <= f32::from(self.cfg.fw.loiter_radius) * 1.1 {
            self.cruise.target = geo::project(&self.cruise.target, self.cruise.yaw, distance);
        }
        let target = self.cruise.target;
        self.set_desired_position(&target, self.cruise.yaw, PosUpdate::XY);
        None
    }

    fn on_course_hold_adjusting(&mut self) -> Option<NavEvent> {
        if self.flags.adjusting_position {
            self.cruise.yaw = self.actual.yaw;
            self.cruise.last_yaw_adjustment_ms = self.now_ms();
            return None;
        }
        self.reset_position_controller();
        Some(NavEvent::Success)
    }

    // ----- RTH -----

    fn trackback_wanted(&self) -> bool {
        match self.cfg.rth_trackback_mode {
            TrackbackMode::Off => false,
            TrackbackMode::On => true,
            TrackbackMode::Failsafe => self.flags.forced_rth,
        }
    }

    fn on_rth_initialize(&mut self, previous: NavState) -> Option<NavEvent> {
        let prev = state_flags(previous);
        if self.est.heading == EstimateStatus::None
            || self.est.alt == EstimateStatus::None
            || self.est.pos != EstimateStatus::Trusted
            || !self.home.is_fixed()
        {
            warn!("RTH without usable sensors or home, emergency landing");
            return Some(NavEvent::SwitchToEmergencyLanding);
        }

        let min_distance = f32::from(self.cfg.min_rth_distance);
        if self.is_fixed_wing() && self.home.distance < min_distance && !self.flags.forced_rth {
            return Some(NavEvent::SwitchToIdle);
        }

        if !(self.position_usable() || self.cfg.rth_climb_ignore_emerg) {
            return self.check_position_sensor_timeout().then_some(NavEvent::SwitchToEmergencyLanding);
        }

        if !prev.contains(StateFlags::CTL_POS) {
            self.reset_position_controller();
        }
        if !prev.contains(StateFlags::CTL_ALT) || self.flags.terrain_follow {
            self.reset_altitude_controller(false);
            self.setup_altitude_controller();
        }

        let pos = self.current_posvel().pos;
        let yaw = self.actual.yaw;
        if self.home.distance < min_distance {
            info!("RTH started {:.0} cm from home, landing here", self.home.distance);
            self.set_home_position(&pos, yaw, PosUpdate::XY | PosUpdate::HEADING, HomeFlags::VALID_ALL);
            self.set_desired_position(&pos, yaw, PosUpdate::XY | PosUpdate::Z | PosUpdate::HEADING);
            return Some(NavEvent::SwitchToRthLanding);
        }

        if self.trackback_wanted() && !self.trackback.is_active() && self.trackback.begin(pos) {
            info!("RTH retracing {} trackback points", self.trackback.len());
            return Some(NavEvent::SwitchToRthTrackback);
        }

        let target = if self.is_fixed_wing() {
            self.far_away_target(yaw, FW_RTH_INITIAL_TARGET_CM)
        } else {
            self.initialize_rth_sanity_checker();
            self.calculate_initial_hold_position()
        };
        self.set_desired_position(&target, yaw, PosUpdate::XY | PosUpdate::HEADING);
        Some(NavEvent::Success)
    }

    fn on_rth_trackback(&mut self) -> Option<NavEvent> {
        if self.est.heading == EstimateStatus::None {
            return self.autonomous_fallback();
        }
        if !self.position_usable() {
            return self.autonomous_fallback();
        }

        let pos = self.actual.abs.pos;
        let limit = f32::from(self.cfg.rth_trackback_distance) * 100.0;
        if self.trackback.limit_exceeded(&pos, limit) {
            info!("trackback distance limit reached");
            self.trackback.clear();
            return Some(NavEvent::Success);
        }
        let Some(mut target) = self.trackback.target() else {
            self.trackback.clear();
            return Some(NavEvent::Success);
        };
        if self.is_waypoint_position_reached(&target, false) {
            match self.trackback.advance().then(|| self.trackback.target()).flatten() {
                Some(next) => target = next,
                None => {
                    debug!("trackback complete");
                    self.trackback.clear();
                    return Some(NavEvent::Success);
                }
            }
        }
        self.set_desired_position(&target, 0, PosUpdate::XY | PosUpdate::Z | PosUpdate::BEARING);
        None
    }

    fn on_rth_climb_to_safe_alt(&mut self) -> Option<NavEvent> {
        if self.est.heading == EstimateStatus::None {
            return Some(NavEvent::SwitchToEmergencyLanding);
        }
        if !(self.position_usable() || !self.check_position_sensor_timeout() || self.cfg.rth_climb_ignore_emerg) {
            return Some(NavEvent::SwitchToEmergencyLanding);
        }

        let tail_first = self.cfg.rth_tail_first && !self.is_fixed_wing();
        let bearing = if tail_first { PosUpdate::BEARING_TAIL_FIRST } else { PosUpdate::BEARING };
        let z = self.current_posvel().pos.z;

        if z - self.rth.initial_altitude > -self.rth_climb_margin() || !self.cfg.rth_climb_first {
            if self.is_fixed_wing() {
                self.initialize_rth_sanity_checker();
            }
            self.rth.initial_distance = self.home.distance;
            let target = self.rth_home_target(RthHomeTarget::EnrouteInitial);
            self.set_desired_position(&target, 0, PosUpdate::XY | PosUpdate::Z | bearing);
            return Some(NavEvent::Success);
        }

        if !self.is_fixed_wing() && !self.validate_rth_sanity_checker() {
            return Some(NavEvent::SwitchToEmergencyLanding);
        }
        let mut target = self.rth_home_target(RthHomeTarget::EnrouteInitial);
        target.z += RTH_CLIMB_OVERSHOOT_CM;
        if self.is_fixed_wing() {
            self.set_desired_position(&target, 0, PosUpdate::Z);
        } else {
            self.set_desired_position(&target, 0, PosUpdate::Z | bearing);
        }
        None
    }

    fn on_rth_head_home(&mut self) -> Option<NavEvent> {
        if self.est.heading == EstimateStatus::None || !self.position_usable() {
            return self.autonomous_fallback();
        }
        let target = self.rth_home_target(RthHomeTarget::Proportional);
        if self.is_waypoint_position_reached(&target, true) {
            let home_yaw = self.home.yaw;
            self.set_desired_position(&target, home_yaw, PosUpdate::XY | PosUpdate::Z | PosUpdate::HEADING);
            return Some(NavEvent::Success);
        }
        if !self.validate_rth_sanity_checker() {
            return Some(NavEvent::SwitchToEmergencyLanding);
        }
        self.set_desired_position(&target, 0, PosUpdate::XY | PosUpdate::Z);
        None
    }

    fn begin_landing_or_hover(&mut self) -> Option<NavEvent> {
        self.landing.reset();
        self.update_climb_rate_to_altitude(0.0, RocMode::Reset);
        if self.rth_allows_landing() {
            Some(NavEvent::Success)
        } else {
            Some(NavEvent::SwitchToRthHoverAboveHome)
        }
    }

    fn on_rth_hover_prior_to_landing(&mut self) -> Option<NavEvent> {
        if self.est.heading == EstimateStatus::None {
            return Some(NavEvent::SwitchToEmergencyLanding);
        }
        if !(self.position_usable() || !self.check_position_sensor_timeout()) {
            return Some(NavEvent::SwitchToEmergencyLanding);
        }
        if self.is_fixed_wing() {
            return self.begin_landing_or_hover();
        }
        if wrap_18000(self.home.yaw - self.actual.yaw).abs() < HOME_HEADING_TOLERANCE_CD {
            return self.begin_landing_or_hover();
        }
        if !self.validate_rth_sanity_checker() {
            return Some(NavEvent::SwitchToEmergencyLanding);
        }
        let target = self.rth_home_target(RthHomeTarget::EnrouteFinal);
        let home_yaw = self.home.yaw;
        self.set_desired_position(&target, home_yaw, PosUpdate::XY | PosUpdate::Z | PosUpdate::HEADING);
        None
    }

    fn on_rth_hover_above_home(&mut self) -> Option<NavEvent> {
        let sane = self.validate_rth_sanity_checker();
        if !(sane || self.position_usable() || !self.check_position_sensor_timeout()) {
            return Some(NavEvent::SwitchToEmergencyLanding);
        }
        let target = self.rth_home_target(RthHomeTarget::FinalHover);
        if self.cfg.rth_home_altitude > 0 {
            let climb = f32::from(self.cfg.max_auto_climb_rate);
            let dz = target.z - self.current_posvel().pos.z;
            if climb <= 0.0 || dz.abs() / climb < 1.0 {
                self.set_desired_position(&target, 0, PosUpdate::Z);
            } else {
                self.update_climb_rate_to_altitude(climb.copysign(dz), RocMode::Normal);
            }
        } else {
            self.set_desired_position(&target, 0, PosUpdate::Z);
        }
        None
    }

    /// Descends on the current XY target until landing is detected.
    fn land_in_place(&mut self, check_sanity: bool) -> Option<NavEvent> {
        if !self.flags.armed || self.landing.is_landed() {
            return Some(NavEvent::Success);
        }
        if check_sanity && !self.validate_rth_sanity_checker() {
            return Some(NavEvent::SwitchToEmergencyLanding);
        }
        let rate = self.landing_descent_rate();
        self.update_climb_rate_to_altitude(rate, RocMode::Normal);
        None
    }

    fn on_rth_finishing(&mut self) -> Option<NavEvent> {
        if self.cfg.disarm_on_landing {
            self.disarm_request = Some(DisarmReason::Navigation);
        }
        Some(NavEvent::Success)
    }

    fn on_rth_finished(&mut self) -> Option<NavEvent> {
        let rate = -FINISHED_DESCENT_SHARE * f32::from(self.cfg.land_descent_rate);
        self.update_climb_rate_to_altitude(rate, RocMode::Normal);
        None
    }

    // ----- Waypoint mission -----

    fn on_waypoint_initialize(&mut self) -> Option<NavEvent> {
        if self.mission.count() == 0 || !self.mission.is_valid() {
            return Some(NavEvent::Error);
        }
        self.reset_position_controller();
        self.reset_altitude_controller(false);
        self.setup_altitude_controller();
        if self.mission.needs_restart() {
            self.mission.restart();
        } else {
            debug!("resuming mission at waypoint {}", self.mission.active_index());
        }
        self.wp_heading = WaypointHeading::None;
        Some(NavEvent::Success)
    }

    /// Moves past a non-geo action. Returns `None` to be processed again on the next timeout.
    fn skip_to_next_waypoint(&mut self) -> Option<NavEvent> {
        if self.mission.is_last_active() {
            return Some(NavEvent::SwitchToWaypointFinished);
        }
        self.mission.set_active(self.mission.active_index() + 1);
        None
    }

    fn on_waypoint_pre_action(&mut self) -> Option<NavEvent> {
        let Some(wp) = self.mission.active().copied() else {
            return Some(NavEvent::SwitchToWaypointFinished);
        };
        match wp.action {
            WaypointAction::Waypoint | WaypointAction::HoldTime | WaypointAction::Land => {
                let Some(pos) = self.waypoint_to_local(&wp) else {
                    warn!("waypoint {} without a position origin", self.mission.active_index());
                    return Some(NavEvent::Error);
                };
                self.set_active_waypoint(&pos);
                Some(NavEvent::Success)
            }
            WaypointAction::Jump => match self.mission.resolve_jump() {
                Some(index) => {
                    debug!("jump to waypoint {}", index);
                    self.mission.set_active(index);
                    None
                }
                None => Some(NavEvent::SwitchToWaypointFinished),
            },
            WaypointAction::SetPoi => {
                self.wp_heading = match self.waypoint_to_local(&wp) {
                    Some(poi) => WaypointHeading::Poi(poi),
                    None => WaypointHeading::None,
                };
                self.skip_to_next_waypoint()
            }
            WaypointAction::SetHead => {
                self.wp_heading = if (0..360).contains(&wp.p1) {
                    WaypointHeading::Fixed(i32::from(wp.p1) * 100)
                } else {
                    WaypointHeading::None
                };
                self.skip_to_next_waypoint()
            }
            WaypointAction::Rth => {
                self.rth.initial_distance = self.home.distance;
                self.initialize_rth_sanity_checker();
                let target = self.rth_home_target(RthHomeTarget::EnrouteInitial);
                self.set_active_waypoint(&target);
                Some(NavEvent::Success)
            }
        }
    }

    fn on_waypoint_in_progress(&mut self) -> Option<NavEvent> {
        if self.est.heading < EstimateStatus::Usable || !self.position_usable() {
            return self.autonomous_fallback();
        }
        let leg = self.active_wp;
        match self.mission.active_action() {
            Some(WaypointAction::Rth) => {
                if self.is_waypoint_position_reached(&leg.pos, true) || self.is_waypoint_missed(&leg) {
                    return Some(NavEvent::Success);
                }
                let z = self.rth_home_target(RthHomeTarget::Proportional);
                self.set_desired_position(&z, 0, PosUpdate::Z);
                self.set_desired_position(&leg.pos, 0, PosUpdate::XY | PosUpdate::BEARING);
                None
            }
            _ => {
                if self.is_waypoint_position_reached(&leg.pos, false) || self.is_waypoint_missed(&leg) {
                    return Some(NavEvent::Success);
                }
                let mut target = leg.pos;
                let initial = leg.initial_distance;
                if initial > 0.0 {
                    let d = constrain(self.active_wp.distance, initial / 10.0, initial);
                    target.z = scale_range(d, initial, initial / 10.0, leg.initial_altitude, leg.pos.z);
                }
                self.set_waypoint_target(&target);
                None
            }
        }
    }

    fn on_waypoint_reached(&mut self) -> Option<NavEvent> {
        let now = self.now_ms();
        self.active_wp.altitude_reached = self.is_waypoint_altitude_reached();
        if self.active_wp.altitude_reached {
            self.active_wp.reached_at_ms = Some(now);
        }
        let Some(wp) = self.mission.active().copied() else {
            return Some(NavEvent::Success);
        };
        match wp.action {
            WaypointAction::Rth if wp.p1 != 0 => Some(NavEvent::SwitchToWaypointRthLand),
            WaypointAction::Land => Some(NavEvent::SwitchToWaypointRthLand),
            WaypointAction::HoldTime => Some(NavEvent::SwitchToWaypointHoldTime),
            WaypointAction::Waypoint if !self.active_wp.altitude_reached => Some(NavEvent::SwitchToWaypointHoldTime),
            _ => Some(NavEvent::Success),
        }
    }

    fn on_waypoint_hold_time(&mut self) -> Option<NavEvent> {
        let now = self.now_ms();
        if !self.active_wp.altitude_reached {
            let target = self.active_wp.pos;
            self.set_desired_position(&target, 0, PosUpdate::Z);
            if !self.is_waypoint_altitude_reached() {
                return None;
            }
            debug!("waypoint altitude reached");
            self.active_wp.altitude_reached = true;
            self.active_wp.reached_at_ms = Some(now);
        }
        let hold_ms = match self.mission.active() {
            Some(wp) if wp.action == WaypointAction::HoldTime => u64::try_from(wp.p1).unwrap_or(0) * 1000,
            _ => 0,
        };
        let since = self.active_wp.reached_at_ms.unwrap_or(now);
        (now.saturating_sub(since) >= hold_ms).then_some(NavEvent::Success)
    }

    fn on_waypoint_rth_land(&mut self) -> Option<NavEvent> {
        let returning = self.mission.active_action() == Some(WaypointAction::Rth);
        match self.land_in_place(returning) {
            Some(NavEvent::Success) => self.on_rth_finishing(),
            other => other,
        }
    }

    fn on_waypoint_next(&mut self) -> Option<NavEvent> {
        if self.mission.is_last_active() {
            return Some(NavEvent::SwitchToWaypointFinished);
        }
        self.mission.set_active(self.mission.active_index() + 1);
        Some(NavEvent::Success)
    }

    fn on_waypoint_finished(&mut self) -> Option<NavEvent> {
        self.mission.mark_finished();
        if self.est.heading >= EstimateStatus::Usable && self.position_usable() {
            return None;
        }
        self.autonomous_fallback()
    }

    // ----- Emergency landing -----

    fn on_emergency_landing_initialize(&mut self) -> Option<NavEvent> {
        warn!("emergency landing");
        self.reset_altitude_controller(false);
        Some(NavEvent::Success)
    }

    fn on_emergency_landing_in_progress(&mut self) -> Option<NavEvent> {
        (!self.flags.armed || self.landing.is_landed()).then_some(NavEvent::Success)
    }

    // ----- Launch -----

    fn on_launch_initialize(&mut self) -> Option<NavEvent> {
        self.launch.reset(self.now_us);
        Some(NavEvent::Success)
    }

    fn on_launch_wait(&mut self) -> Option<NavEvent> {
        if self.launch.is_detected() {
            let z = self.actual.abs.pos.z;
            self.launch.enable(self.now_us, z);
            return Some(NavEvent::Success);
        }
        if self.cfg.fw.launch.enabled && self.is_throttle_low() && self.sticks_deflected() {
            self.launch.abort();
            return Some(NavEvent::SwitchToIdle);
        }
        None
    }

    fn on_launch_in_progress(&mut self) -> Option<NavEvent> {
        self.launch.is_finished_or_aborted().then_some(NavEvent::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NavConfig, RcConfig};
    use crate::geo::{GeoOrigin, GeoPoint};
    use crate::mission::{Waypoint, FLAG_LAST};
    use helm_ctrl::profile::{Airframe, PidProfile, ThrottleConfig};
    use helm_ctrl::Vec3;

    fn ctx(airframe: Airframe, cfg: NavConfig) -> NavigationContext {
        let mut c = NavigationContext::new(cfg, RcConfig::default(), &PidProfile::default(), ThrottleConfig::default(), airframe);
        c.est.pos = EstimateStatus::Trusted;
        c.est.vel = EstimateStatus::Trusted;
        c.est.alt = EstimateStatus::Trusted;
        c.est.heading = EstimateStatus::Trusted;
        c.home.flags = HomeFlags::VALID_ALL;
        c.origin = GeoOrigin::new(GeoPoint::from_degrees(47.0, 8.0, 400.0));
        c.set_armed(true);
        c
    }

    fn at(c: &mut NavigationContext, x: f32, y: f32, z: f32) {
        c.actual.abs.pos = Vec3::new(x, y, z);
        c.update_home_position();
    }

    fn tick(c: &mut NavigationContext, ms: u64) {
        let now = c.now_us + ms * 1000;
        c.set_time(now);
        c.process_fsm_events(None);
    }

    fn geo_wp(c: &NavigationContext, x: f32, y: f32, z: i32) -> Waypoint {
        let g = c.origin.to_geodetic(&Vec3::new(x, y, 0.0)).unwrap_or_default();
        Waypoint { lat: g.lat, lon: g.lon, alt: z, ..Default::default() }
    }

    #[test]
    fn poshold_holds_where_it_stops() {
        let mut c = ctx(Airframe::Multirotor, NavConfig::default());
        at(&mut c, 500.0, 200.0, 1200.0);
        c.actual.yaw = 4500;
        c.process_fsm_events(Some(NavEvent::SwitchToPosHold));
        assert_eq!(c.state, NavState::PosHoldInProgress);
        assert_eq!(c.desired.pos, Vec3::new(500.0, 200.0, 1200.0));
        assert_eq!(c.desired.yaw, 4500);
    }

    #[test]
    fn althold_from_poshold_keeps_target() {
        let mut c = ctx(Airframe::Multirotor, NavConfig::default());
        at(&mut c, 0.0, 0.0, 1000.0);
        c.process_fsm_events(Some(NavEvent::SwitchToPosHold));
        c.actual.abs.pos.z = 1300.0;
        c.process_fsm_events(Some(NavEvent::SwitchToAltHold));
        assert_eq!(c.state, NavState::AltHoldInProgress);
        assert_eq!(c.desired.pos.z, 1000.0);
    }

    #[test]
    fn course_hold_is_fixed_wing_only() {
        let mut c = ctx(Airframe::Multirotor, NavConfig::default());
        c.process_fsm_events(Some(NavEvent::SwitchToCourseHold));
        assert_eq!(c.state, NavState::Idle);
    }

    #[test]
    fn course_hold_projects_target_along_yaw() {
        let mut c = ctx(Airframe::FixedWing, NavConfig::default());
        c.actual.yaw = 9000;
        c.gps_ground_speed = 1500.0;
        c.process_fsm_events(Some(NavEvent::SwitchToCourseHold));
        assert_eq!(c.state, NavState::CourseHoldInProgress);
        assert!(c.cruise.target.x.abs() < 1.0);
        assert!((c.cruise.target.y - 90_000.0).abs() < 1.0);
    }

    #[test]
    fn cruise_yaw_follows_stick() {
        let mut c = ctx(Airframe::FixedWing, NavConfig::default());
        c.process_fsm_events(Some(NavEvent::SwitchToCruise));
        assert_eq!(c.state, NavState::CruiseInProgress);
        c.flags.adjusting_heading = true;
        c.pilot.sticks[YAW] = -500.0;
        for _ in 0..11 {
            tick(&mut c, 10);
        }
        // 20 deg/s for 110 ms
        assert_eq!(c.cruise.yaw, 220);
    }

    #[test]
    fn rth_close_to_home_lands_in_place() {
        let mut c = ctx(Airframe::Multirotor, NavConfig::default());
        at(&mut c, 0.0, 0.0, 1000.0);
        c.actual.abs.pos.x = 300.0;
        c.update_home_position();
        c.process_fsm_events(Some(NavEvent::SwitchToRth));
        assert_eq!(c.state, NavState::RthLanding);
        assert_eq!(c.home.pos.x, 300.0);
    }

    #[test]
    fn rth_without_heading_lands_now() {
        let mut c = ctx(Airframe::Multirotor, NavConfig::default());
        c.est.heading = EstimateStatus::None;
        c.process_fsm_events(Some(NavEvent::SwitchToRth));
        assert_eq!(c.state, NavState::EmergencyLandingInProgress);
    }

    #[test]
    fn rth_climbs_before_heading_home() {
        let mut c = ctx(Airframe::Multirotor, NavConfig::default());
        at(&mut c, 0.0, 0.0, 0.0);
        c.actual.abs.pos = Vec3::new(5000.0, 0.0, 200.0);
        c.update_home_position();
        c.update_desired_rth_altitude();
        c.process_fsm_events(Some(NavEvent::SwitchToRth));
        assert_eq!(c.state, NavState::RthClimbToSafeAlt);
        assert_eq!(c.desired.pos.z, 1100.0);
        c.actual.abs.pos.z = 950.0;
        tick(&mut c, 10);
        assert_eq!(c.state, NavState::RthHeadHome);
    }

    #[test]
    fn trackback_retraces_then_returns() {
        let cfg = NavConfig { rth_trackback_mode: TrackbackMode::On, rth_climb_first: false, ..Default::default() };
        let mut c = ctx(Airframe::Multirotor, cfg);
        at(&mut c, 0.0, 0.0, 1000.0);
        c.trackback.record(Vec3::new(2500.0, 0.0, 1000.0), Some(0));
        c.trackback.record(Vec3::new(5000.0, 0.0, 1000.0), Some(0));
        c.actual.abs.pos = Vec3::new(7000.0, 0.0, 1000.0);
        c.update_home_position();
        c.process_fsm_events(Some(NavEvent::SwitchToRth));
        assert_eq!(c.state, NavState::RthTrackback);
        assert_eq!(c.desired.pos.x, 5000.0);
        c.actual.abs.pos.x = 5050.0;
        tick(&mut c, 10);
        assert_eq!(c.desired.pos.x, 2500.0);
        c.actual.abs.pos.x = 2450.0;
        c.update_home_position();
        tick(&mut c, 10);
        assert!(!c.trackback.is_active());
        assert!(matches!(c.state, NavState::RthClimbToSafeAlt | NavState::RthHeadHome));
    }

    #[test]
    fn rth_refuses_landing_when_configured() {
        let cfg = NavConfig { rth_allow_landing: crate::config::RthAllowLanding::Never, ..Default::default() };
        let mut c = ctx(Airframe::Multirotor, cfg);
        c.state = NavState::RthHeadHome;
        c.home.yaw = c.actual.yaw;
        let event = c.on_rth_hover_prior_to_landing();
        assert_eq!(event, Some(NavEvent::SwitchToRthHoverAboveHome));
    }

    #[test]
    fn rth_finishing_requests_disarm() {
        let cfg = NavConfig { disarm_on_landing: true, ..Default::default() };
        let mut c = ctx(Airframe::Multirotor, cfg);
        c.state = NavState::RthLanding;
        c.set_armed(false);
        c.process_fsm_events(Some(NavEvent::Timeout));
        assert_eq!(c.state, NavState::RthFinished);
        assert_eq!(c.disarm_request, Some(DisarmReason::Navigation));
    }

    #[test]
    fn waypoint_without_mission_falls_to_idle() {
        let mut c = ctx(Airframe::Multirotor, NavConfig::default());
        c.process_fsm_events(Some(NavEvent::SwitchToWaypoint));
        assert_eq!(c.state, NavState::Idle);
    }

    #[test]
    fn set_head_and_poi_are_consumed_on_the_way() {
        let mut c = ctx(Airframe::Multirotor, NavConfig::default());
        let list = [
            Waypoint { action: WaypointAction::SetHead, p1: 270, ..Default::default() },
            Waypoint { flag: FLAG_LAST, ..geo_wp(&c, 2000.0, 0.0, 800) },
        ];
        c.set_armed(false);
        for (i, wp) in list.iter().enumerate() {
            c.mission.upload(i, *wp);
        }
        c.set_armed(true);
        c.process_fsm_events(Some(NavEvent::SwitchToWaypoint));
        assert_eq!(c.state, NavState::WaypointPreAction);
        tick(&mut c, 10);
        assert_eq!(c.state, NavState::WaypointInProgress);
        assert_eq!(c.wp_heading, WaypointHeading::Fixed(27000));
        assert_eq!(c.desired.yaw, 27000);
    }

    #[test]
    fn waypoint_altitude_ramps_with_distance() {
        let mut c = ctx(Airframe::Multirotor, NavConfig::default());
        at(&mut c, 0.0, 0.0, 0.0);
        let wp = Waypoint { flag: FLAG_LAST, ..geo_wp(&c, 10_000.0, 0.0, 2000) };
        c.set_armed(false);
        c.mission.upload(0, wp);
        c.set_armed(true);
        c.process_fsm_events(Some(NavEvent::SwitchToWaypoint));
        assert_eq!(c.state, NavState::WaypointInProgress);
        assert!(c.desired.pos.z.abs() < 1.0);
        c.actual.abs.pos.x = 5000.0;
        tick(&mut c, 10);
        let expected = 2000.0 * (10_000.0 - c.active_wp.distance) / 9000.0;
        assert!((c.desired.pos.z - expected).abs() < 30.0);
    }

    #[test]
    fn hold_time_waits_p1_seconds() {
        let mut c = ctx(Airframe::Multirotor, NavConfig::default());
        let wp = Waypoint { action: WaypointAction::HoldTime, p1: 2, flag: FLAG_LAST, ..geo_wp(&c, 0.0, 0.0, 0) };
        c.set_armed(false);
        c.mission.upload(0, wp);
        c.set_armed(true);
        c.process_fsm_events(Some(NavEvent::SwitchToWaypoint));
        assert_eq!(c.state, NavState::WaypointHoldTime);
        for _ in 0..150 {
            tick(&mut c, 10);
        }
        assert_eq!(c.state, NavState::WaypointHoldTime);
        for _ in 0..60 {
            tick(&mut c, 10);
        }
        assert_eq!(c.state, NavState::WaypointFinished);
    }

    #[test]
    fn enforced_altitude_holds_until_reached() {
        let cfg = NavConfig { waypoint_enforce_altitude: 100, ..Default::default() };
        let mut c = ctx(Airframe::Multirotor, cfg);
        let wp = Waypoint { flag: FLAG_LAST, ..geo_wp(&c, 0.0, 0.0, 1500) };
        c.set_armed(false);
        c.mission.upload(0, wp);
        c.set_armed(true);
        c.process_fsm_events(Some(NavEvent::SwitchToWaypoint));
        assert_eq!(c.state, NavState::WaypointHoldTime);
        tick(&mut c, 10);
        assert_eq!(c.state, NavState::WaypointHoldTime);
        c.actual.abs.pos.z = 1450.0;
        tick(&mut c, 10);
        assert_eq!(c.state, NavState::WaypointFinished);
    }

    #[test]
    fn launch_waits_for_throw() {
        let mut c = ctx(Airframe::FixedWing, NavConfig::default());
        c.process_fsm_events(Some(NavEvent::SwitchToLaunch));
        assert_eq!(c.state, NavState::LaunchWait);
        tick(&mut c, 10);
        assert_eq!(c.state, NavState::LaunchWait);
        c.imu.acc[0] = 2500.0;
        for _ in 0..6 {
            c.apply_fixed_wing_launch_controller();
            tick(&mut c, 10);
        }
        assert_eq!(c.state, NavState::LaunchInProgress);
    }

    #[test]
    fn emergency_finishes_on_disarm() {
        let mut c = ctx(Airframe::Multirotor, NavConfig::default());
        c.process_fsm_events(Some(NavEvent::SwitchToEmergencyLanding));
        assert_eq!(c.state, NavState::EmergencyLandingInProgress);
        c.set_armed(false);
        tick(&mut c, 10);
        assert_eq!(c.state, NavState::EmergencyLandingFinished);
    }
}
