use bitflags::bitflags;
use helm_ctrl::rate::AxisTelemetry;
use helm_ctrl::Vec3;
use helm_nav::fsm::descriptor;
use helm_nav::{DisarmReason, MwError, MwState, NavCommand, NavState, NavigationContext};
use serde::Serialize;
use time::OffsetDateTime;

bitflags! {
    /// Packed navigation status as sent in the blackbox header and the NAV_STATUS frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NavStatusBits: u16 {
        const ADJUSTING_POSITION = 1 << 0;
        const ADJUSTING_ALTITUDE = 1 << 1;
        const ADJUSTING_HEADING  = 1 << 2;
        const FORCED_RTH         = 1 << 3;
        const TERRAIN_FOLLOW     = 1 << 4;
        const GCS_ENABLED        = 1 << 5;
        const ARMED              = 1 << 6;
        const FAILSAFE           = 1 << 7;
        const HOME_FIXED         = 1 << 8;
        const LANDED             = 1 << 9;
    }
}

impl NavStatusBits {
    pub fn from_context(nav: &NavigationContext) -> Self {
        let f = nav.nav_flags();
        let mut bits = Self::empty();
        bits.set(Self::ADJUSTING_POSITION, f.adjusting_position);
        bits.set(Self::ADJUSTING_ALTITUDE, f.adjusting_altitude);
        bits.set(Self::ADJUSTING_HEADING, f.adjusting_heading);
        bits.set(Self::FORCED_RTH, f.forced_rth);
        bits.set(Self::TERRAIN_FOLLOW, f.terrain_follow);
        bits.set(Self::GCS_ENABLED, f.gcs_enabled);
        bits.set(Self::ARMED, f.armed);
        bits.set(Self::FAILSAFE, f.failsafe);
        bits.set(Self::HOME_FIXED, nav.home().is_fixed());
        bits.set(Self::LANDED, nav.is_landing_detected());
        bits
    }
}

fn unix_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// One navigation tick as logged by the blackbox and the simulator.
#[derive(Debug, Clone, Serialize)]
pub struct NavTelemetry {
    pub ts_unix_ms: i64,
    pub t_us: u64,
    pub state: NavState,
    pub state_id: u8,
    pub mw_state: MwState,
    pub mw_error: MwError,
    pub nav_flags: u16,
    pub flight_modes: u8,
    pub target_pos: Vec3,
    pub target_vel: Vec3,
    pub actual_pos: Vec3,
    pub actual_vel: Vec3,
    /// cm
    pub home_distance: f32,
    /// centidegrees
    pub home_direction: i32,
    pub active_wp: usize,
    pub rc_command: [f32; 4],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axes: Option<[AxisTelemetry; 3]>,
}

impl NavTelemetry {
    pub fn capture(nav: &NavigationContext, cmd: &NavCommand, t_us: u64) -> Self {
        let state = nav.state();
        let desc = descriptor(state);
        let desired = nav.desired();
        let actual = nav.actual();
        Self {
            ts_unix_ms: unix_ms(),
            t_us,
            state,
            state_id: desc.persistent_id,
            mw_state: desc.mw_state,
            mw_error: desc.mw_error,
            nav_flags: NavStatusBits::from_context(nav).bits(),
            flight_modes: cmd.flight_modes.bits(),
            target_pos: desired.pos,
            target_vel: desired.vel,
            actual_pos: actual.abs.pos,
            actual_vel: actual.abs.vel,
            home_distance: nav.home().distance,
            home_direction: nav.home().direction,
            active_wp: nav.mission().active_index(),
            rc_command: cmd.rc_command,
            axes: None,
        }
    }

    pub fn with_axes(mut self, axes: [AxisTelemetry; 3]) -> Self {
        self.axes = Some(axes);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlightEventKind {
    ModeChange { from: NavState, to: NavState },
    EmergencyLanding,
    Landed,
    Disarm { reason: DisarmReason },
}

#[derive(Debug, Clone, Serialize)]
pub struct FlightEvent {
    pub ts_unix_ms: i64,
    pub t_us: u64,
    #[serde(flatten)]
    pub kind: FlightEventKind,
}

impl FlightEvent {
    pub fn new(t_us: u64, kind: FlightEventKind) -> Self {
        Self { ts_unix_ms: unix_ms(), t_us, kind }
    }

    /// Events implied by moving from `prev` to the context's current state.
    pub fn between(prev: NavState, nav: &NavigationContext, cmd: &NavCommand, t_us: u64) -> Vec<Self> {
        let mut out = Vec::new();
        let now = nav.state();
        if now != prev {
            out.push(Self::new(t_us, FlightEventKind::ModeChange { from: prev, to: now }));
            if now == NavState::EmergencyLandingInitialize {
                out.push(Self::new(t_us, FlightEventKind::EmergencyLanding));
            }
            if matches!(now, NavState::RthFinished | NavState::EmergencyLandingFinished) {
                out.push(Self::new(t_us, FlightEventKind::Landed));
            }
        }
        if let Some(reason) = cmd.disarm {
            out.push(Self::new(t_us, FlightEventKind::Disarm { reason }));
        }
        out
    }
}

/// Line record of a telemetry stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Nav(NavTelemetry),
    Event(FlightEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use helm_ctrl::profile::{Airframe, PidProfile, ThrottleConfig};
    use helm_nav::{NavConfig, RcConfig};

    fn ctx() -> NavigationContext {
        NavigationContext::new(NavConfig::default(), RcConfig::default(), &PidProfile::default(), ThrottleConfig::default(), Airframe::Multirotor)
    }

    #[test]
    fn idle_snapshot() {
        let mut nav = ctx();
        let cmd = nav.tick(10_000);
        let t = NavTelemetry::capture(&nav, &cmd, 10_000);
        assert_eq!(t.state, NavState::Idle);
        assert_eq!(t.mw_state, MwState::None);
        assert_eq!(t.flight_modes, 0);
        assert_eq!(t.nav_flags & NavStatusBits::ARMED.bits(), 0);
    }

    #[test]
    fn armed_bit_follows_the_context() {
        let mut nav = ctx();
        nav.set_armed(true);
        assert!(NavStatusBits::from_context(&nav).contains(NavStatusBits::ARMED));
    }

    #[test]
    fn records_are_tagged() {
        let ev = FlightEvent::new(5, FlightEventKind::Disarm { reason: DisarmReason::Landing });
        let json = serde_json::to_value(Record::Event(ev)).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["kind"], "disarm");
        assert_eq!(json["reason"], "Landing");
        assert_eq!(json["t_us"], 5);
    }

    #[test]
    fn disarm_is_reported_without_a_state_change() {
        let nav = ctx();
        let cmd = NavCommand { disarm: Some(DisarmReason::Navigation), ..Default::default() };
        let events = FlightEvent::between(NavState::Idle, &nav, &cmd, 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, FlightEventKind::Disarm { reason: DisarmReason::Navigation });
    }
}
