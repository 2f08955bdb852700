//! Per-tick entry points.

use helm_ctrl::rate::{PITCH, ROLL, YAW};
use helm_ctrl::Vec3;
use tracing::trace;

use crate::context::{EstimateStatus, NavCommand, NavigationContext};
use crate::fsm::{NavState, StateFlags};
use crate::geo::bearing_cd;
use crate::helicopter::LiftChannel;
use crate::trackback::MIN_COURSE_SPEED;

impl NavigationContext {
    /// Home, mode selection and the FSM step. Runs before [`apply_navigation`](Self::apply_navigation).
    pub fn update_navigation_mode(&mut self, now_us: u64) {
        self.set_time(now_us);
        let dt = if self.last_mode_update_us == 0 {
            0.0
        } else {
            self.now_us.saturating_sub(self.last_mode_update_us) as f32 * 1e-6
        };
        self.last_mode_update_us = self.now_us;

        self.update_gcs_flags();
        self.update_home_position();
        self.update_trip_distance(dt);

        let event = self.select_nav_event();
        self.process_fsm_events(event);

        self.record_trackback();
    }

    fn record_trackback(&mut self) {
        let returning = self.state_flags().contains(StateFlags::AUTO_RTH);
        if !self.flags.armed || returning || self.est.pos != EstimateStatus::Trusted {
            return;
        }
        let pos = self.actual.abs.pos;
        let vel = self.actual.abs.vel;
        let course = (self.actual.vel_xy > MIN_COURSE_SPEED).then(|| bearing_cd(&Vec3::ZERO, &vel));
        if self.trackback.record(pos, course) {
            trace!("trackback point {} at {:.0},{:.0}", self.trackback.len(), pos.x, pos.y);
        }
    }

    /// Runs the controllers the current state asks for and returns the command for the rate loop.
    pub fn apply_navigation(&mut self) -> NavCommand {
        self.rc_command = [self.pilot.sticks[ROLL], self.pilot.sticks[PITCH], self.pilot.sticks[YAW], self.pilot.throttle];
        self.collective = self.pilot.collective;

        let flags = self.state_flags();
        if self.flags.armed {
            self.process_rc_adjustments();
            if self.is_fixed_wing() {
                self.apply_fixed_wing_navigation(flags);
            } else {
                self.apply_rotorcraft_navigation(flags);
            }
        } else {
            self.flags.adjusting_position = false;
            self.flags.adjusting_altitude = false;
            self.flags.adjusting_heading = false;
        }

        self.update_landing_status();
        self.consume_estimates();

        let on_ground = self.landing.is_landed()
            || matches!(self.state, NavState::RthFinished | NavState::EmergencyLandingFinished);
        NavCommand {
            rc_command: self.rc_command,
            collective: (self.rotor.channel == LiftChannel::Collective).then_some(self.collective),
            flight_modes: self.flight_modes(),
            angle_required: self.requires_angle_mode(),
            turn_assist: self.requires_turn_assistance(),
            controlling_throttle: self.is_controlling_throttle(),
            heading_target: flags.contains(StateFlags::CTL_YAW).then_some(self.heading_target),
            disarm: self.disarm_request.take(),
            reset_integrators: on_ground,
        }
    }

    /// Clears the new-data flags the controllers have used up.
    fn consume_estimates(&mut self) {
        let mb = &mut self.mailbox;
        if mb.horizontal_consumed {
            mb.horizontal_new = false;
            mb.horizontal_consumed = false;
        }
        if mb.vertical_consumed {
            mb.vertical_new = false;
            mb.vertical_consumed = false;
        }
        mb.heading_new = false;
    }

    /// One navigation tick.
    pub fn tick(&mut self, now_us: u64) -> NavCommand {
        self.update_navigation_mode(now_us);
        self.apply_navigation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NavConfig, RcConfig};
    use crate::context::{DisarmReason, PilotInput};
    use crate::modes::BoxModes;
    use helm_ctrl::profile::{Airframe, PidProfile, ThrottleConfig};

    fn ctx(airframe: Airframe) -> NavigationContext {
        NavigationContext::new(NavConfig::default(), RcConfig::default(), &PidProfile::default(), ThrottleConfig::default(), airframe)
    }

    fn sensors(c: &mut NavigationContext, now_us: u64, x: f32, z: f32) {
        c.update_position_and_velocity(now_us, true, true, [x, 0.0], [0.0, 0.0]);
        c.update_altitude_and_climb_rate(now_us, true, z, 0.0, -1.0, 0.0, EstimateStatus::None);
        c.update_heading(now_us, true, 0);
    }

    #[test]
    fn disarmed_passes_sticks_through() {
        let mut c = ctx(Airframe::Multirotor);
        c.set_pilot_input(PilotInput { sticks: [100.0, -50.0, 20.0], throttle: 1300.0, ..Default::default() });
        let cmd = c.tick(10_000);
        assert_eq!(cmd.rc_command, [100.0, -50.0, 20.0, 1300.0]);
        assert_eq!(c.state(), NavState::Idle);
        assert!(!cmd.controlling_throttle);
        assert_eq!(cmd.collective, None);
    }

    #[test]
    fn poshold_box_takes_over_throttle() {
        let mut c = ctx(Airframe::Multirotor);
        let mut now = 0;
        for _ in 0..5 {
            now += 10_000;
            sensors(&mut c, now, 0.0, 1000.0);
            c.tick(now);
        }
        c.set_armed(true);
        c.set_pilot_input(PilotInput { boxes: BoxModes::POSHOLD, throttle: 1500.0, ..Default::default() });
        now += 10_000;
        sensors(&mut c, now, 0.0, 1000.0);
        let cmd = c.tick(now);
        assert_eq!(c.state(), NavState::PosHoldInProgress);
        assert!(cmd.controlling_throttle);
        assert!(cmd.angle_required);
        assert_eq!(cmd.heading_target, Some(0.0));
        assert!(!c.mailbox.horizontal_new);
    }

    #[test]
    fn trackback_records_only_outbound() {
        let mut c = ctx(Airframe::Multirotor);
        c.set_armed(true);
        let mut now = 0;
        for i in 0..10 {
            now += 100_000;
            sensors(&mut c, now, i as f32 * 1000.0, 1000.0);
            c.tick(now);
        }
        assert!(c.trackback().len() >= 4);
        let before = c.trackback().len();
        c.state = NavState::RthHeadHome;
        c.record_trackback();
        assert_eq!(c.trackback().len(), before);
    }

    #[test]
    fn trip_distance_integrates_ground_speed() {
        let mut c = ctx(Airframe::Multirotor);
        c.set_armed(true);
        c.actual.vel_xy = 500.0;
        c.update_navigation_mode(1_000_000);
        c.update_navigation_mode(2_000_000);
        assert!((c.trip_distance() - 500.0).abs() < 1e-3);
    }

    #[test]
    fn disarm_request_is_handed_out_once() {
        let mut c = ctx(Airframe::Multirotor);
        c.disarm_request = Some(DisarmReason::Navigation);
        assert_eq!(c.apply_navigation().disarm, Some(DisarmReason::Navigation));
        assert_eq!(c.apply_navigation().disarm, None);
    }

    #[test]
    fn helicopter_reports_collective() {
        let mut c = ctx(Airframe::Helicopter);
        c.set_pilot_input(PilotInput { collective: 1450.0, ..Default::default() });
        assert_eq!(c.apply_navigation().collective, Some(1450.0));
    }
}
