use bitflags::bitflags;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::NavigationContext;

/// Upper bound on chained entry handlers inside one processing pass.
const MAX_CASCADE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NavState {
    Idle,

    AltHoldInitialize,
    AltHoldInProgress,

    PosHoldInitialize,
    PosHoldInProgress,

    CourseHoldInitialize,
    CourseHoldInProgress,
    CourseHoldAdjusting,

    CruiseInitialize,
    CruiseInProgress,
    CruiseAdjusting,

    RthInitialize,
    RthClimbToSafeAlt,
    RthTrackback,
    RthHeadHome,
    RthHoverPriorToLanding,
    RthHoverAboveHome,
    RthLanding,
    RthFinishing,
    RthFinished,

    WaypointInitialize,
    WaypointPreAction,
    WaypointInProgress,
    WaypointReached,
    WaypointHoldTime,
    WaypointRthLand,
    WaypointNext,
    WaypointFinished,

    EmergencyLandingInitialize,
    EmergencyLandingInProgress,
    EmergencyLandingFinished,

    LaunchInitialize,
    LaunchWait,
    LaunchInProgress,
}

impl NavState {
    pub const ALL: [NavState; 34] = [
        NavState::Idle,
        NavState::AltHoldInitialize,
        NavState::AltHoldInProgress,
        NavState::PosHoldInitialize,
        NavState::PosHoldInProgress,
        NavState::CourseHoldInitialize,
        NavState::CourseHoldInProgress,
        NavState::CourseHoldAdjusting,
        NavState::CruiseInitialize,
        NavState::CruiseInProgress,
        NavState::CruiseAdjusting,
        NavState::RthInitialize,
        NavState::RthClimbToSafeAlt,
        NavState::RthTrackback,
        NavState::RthHeadHome,
        NavState::RthHoverPriorToLanding,
        NavState::RthHoverAboveHome,
        NavState::RthLanding,
        NavState::RthFinishing,
        NavState::RthFinished,
        NavState::WaypointInitialize,
        NavState::WaypointPreAction,
        NavState::WaypointInProgress,
        NavState::WaypointReached,
        NavState::WaypointHoldTime,
        NavState::WaypointRthLand,
        NavState::WaypointNext,
        NavState::WaypointFinished,
        NavState::EmergencyLandingInitialize,
        NavState::EmergencyLandingInProgress,
        NavState::EmergencyLandingFinished,
        NavState::LaunchInitialize,
        NavState::LaunchWait,
        NavState::LaunchInProgress,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NavEvent {
    Timeout,
    Success,
    Error,
    SwitchToIdle,
    SwitchToAltHold,
    SwitchToPosHold,
    SwitchToRth,
    SwitchToWaypoint,
    SwitchToEmergencyLanding,
    SwitchToLaunch,
    SwitchToCourseHold,
    SwitchToCruise,
    SwitchToCourseAdjusting,
    SwitchToRthLanding,
    SwitchToRthHoverAboveHome,
    SwitchToRthTrackback,
    SwitchToWaypointHoldTime,
    SwitchToWaypointRthLand,
    SwitchToWaypointFinished,
}

impl NavEvent {
    pub const ALL: [NavEvent; 19] = [
        NavEvent::Timeout,
        NavEvent::Success,
        NavEvent::Error,
        NavEvent::SwitchToIdle,
        NavEvent::SwitchToAltHold,
        NavEvent::SwitchToPosHold,
        NavEvent::SwitchToRth,
        NavEvent::SwitchToWaypoint,
        NavEvent::SwitchToEmergencyLanding,
        NavEvent::SwitchToLaunch,
        NavEvent::SwitchToCourseHold,
        NavEvent::SwitchToCruise,
        NavEvent::SwitchToCourseAdjusting,
        NavEvent::SwitchToRthLanding,
        NavEvent::SwitchToRthHoverAboveHome,
        NavEvent::SwitchToRthTrackback,
        NavEvent::SwitchToWaypointHoldTime,
        NavEvent::SwitchToWaypointRthLand,
        NavEvent::SwitchToWaypointFinished,
    ];
}

bitflags! {
    /// Capabilities a state asserts while active.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StateFlags: u32 {
        const CTL_ALT          = 1 << 0;
        const CTL_POS          = 1 << 1;
        const CTL_YAW          = 1 << 2;
        const CTL_EMERG        = 1 << 3;
        const CTL_LAUNCH       = 1 << 4;
        const CTL_LAND         = 1 << 5;
        const REQUIRE_ANGLE    = 1 << 6;
        const REQUIRE_ANGLE_FW = 1 << 7;
        const REQUIRE_MAGHOLD  = 1 << 8;
        const REQUIRE_THRTILT  = 1 << 9;
        const AUTO_RTH         = 1 << 10;
        const AUTO_WP          = 1 << 11;
        const RC_POS           = 1 << 12;
        const RC_YAW           = 1 << 13;
        const RC_ALT           = 1 << 14;
    }
}

bitflags! {
    /// Flight-mode bits reported to the rest of the firmware.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FlightModes: u8 {
        const ALTHOLD = 1 << 0;
        const POSHOLD = 1 << 1;
        const RTH     = 1 << 2;
        const WP      = 1 << 3;
        const LAUNCH  = 1 << 4;
        const CRUISE  = 1 << 5;
    }
}

impl Default for StateFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl Default for FlightModes {
    fn default() -> Self {
        Self::empty()
    }
}

/// Ground-station facing state summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MwState {
    None,
    HoldInfinit,
    RthStart,
    RthEnroute,
    WpEnroute,
    ProcessNext,
    HoldTimed,
    LandSettle,
    LandInProgress,
    HoverAboveHome,
    Landed,
    EmergencyLanding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MwError {
    None,
    Finish,
    WaitForRthAlt,
    Landing,
}

#[derive(Debug, Clone, Copy)]
pub struct StateDescriptor {
    pub persistent_id: u8,
    pub timeout_ms: u16,
    pub flags: StateFlags,
    pub modes: FlightModes,
    pub mw_state: MwState,
    pub mw_error: MwError,
}

const fn desc(
    persistent_id: u8,
    timeout_ms: u16,
    flags: StateFlags,
    modes: FlightModes,
    mw_state: MwState,
    mw_error: MwError,
) -> StateDescriptor {
    StateDescriptor { persistent_id, timeout_ms, flags, modes, mw_state, mw_error }
}

type F = StateFlags;
type M = FlightModes;

const RTH_FLAGS: StateFlags = F::CTL_ALT
    .union(F::CTL_POS)
    .union(F::CTL_YAW)
    .union(F::REQUIRE_ANGLE)
    .union(F::REQUIRE_MAGHOLD)
    .union(F::REQUIRE_THRTILT)
    .union(F::AUTO_RTH);
const RTH_ENROUTE_FLAGS: StateFlags = RTH_FLAGS.union(F::RC_POS).union(F::RC_YAW);
const WP_FLAGS: StateFlags = F::CTL_ALT
    .union(F::CTL_POS)
    .union(F::CTL_YAW)
    .union(F::REQUIRE_ANGLE)
    .union(F::REQUIRE_MAGHOLD)
    .union(F::REQUIRE_THRTILT)
    .union(F::AUTO_WP);
const RTH_MODES: FlightModes = M::RTH.union(M::ALTHOLD);
const WP_MODES: FlightModes = M::WP.union(M::ALTHOLD);
const POSHOLD_MODES: FlightModes = M::ALTHOLD.union(M::POSHOLD);
const CRUISE_MODES: FlightModes = M::ALTHOLD.union(M::CRUISE);

/// Static per-state properties.
pub fn descriptor(state: NavState) -> StateDescriptor {
    use MwError as E;
    use MwState as W;
    use NavState::*;
    match state {
        Idle => desc(0, 0, F::empty(), M::empty(), W::None, E::None),

        AltHoldInitialize => desc(
            1,
            0,
            F::CTL_ALT.union(F::REQUIRE_ANGLE_FW).union(F::REQUIRE_THRTILT),
            M::ALTHOLD,
            W::None,
            E::None,
        ),
        AltHoldInProgress => desc(
            2,
            10,
            F::CTL_ALT.union(F::REQUIRE_ANGLE_FW).union(F::REQUIRE_THRTILT).union(F::RC_ALT),
            M::ALTHOLD,
            W::None,
            E::None,
        ),

        PosHoldInitialize => desc(
            3,
            0,
            F::CTL_ALT.union(F::CTL_POS).union(F::REQUIRE_ANGLE).union(F::REQUIRE_THRTILT),
            POSHOLD_MODES,
            W::HoldInfinit,
            E::None,
        ),
        PosHoldInProgress => desc(
            4,
            10,
            F::CTL_ALT
                .union(F::CTL_POS)
                .union(F::CTL_YAW)
                .union(F::REQUIRE_ANGLE)
                .union(F::REQUIRE_THRTILT)
                .union(F::RC_ALT)
                .union(F::RC_POS)
                .union(F::RC_YAW),
            POSHOLD_MODES,
            W::HoldInfinit,
            E::None,
        ),

        CourseHoldInitialize => desc(28, 0, F::REQUIRE_ANGLE, M::CRUISE, W::None, E::None),
        CourseHoldInProgress => desc(
            29,
            10,
            F::CTL_POS.union(F::CTL_YAW).union(F::REQUIRE_ANGLE).union(F::RC_POS).union(F::RC_YAW),
            M::CRUISE,
            W::None,
            E::None,
        ),
        CourseHoldAdjusting => desc(30, 10, F::REQUIRE_ANGLE.union(F::RC_POS), M::CRUISE, W::None, E::None),

        CruiseInitialize => desc(31, 0, F::REQUIRE_ANGLE, CRUISE_MODES, W::None, E::None),
        CruiseInProgress => desc(
            32,
            10,
            F::CTL_POS
                .union(F::CTL_YAW)
                .union(F::CTL_ALT)
                .union(F::REQUIRE_ANGLE)
                .union(F::RC_POS)
                .union(F::RC_YAW)
                .union(F::RC_ALT),
            CRUISE_MODES,
            W::None,
            E::None,
        ),
        CruiseAdjusting => desc(
            33,
            10,
            F::CTL_ALT.union(F::REQUIRE_ANGLE).union(F::RC_POS).union(F::RC_ALT),
            CRUISE_MODES,
            W::None,
            E::None,
        ),

        RthInitialize => desc(8, 10, RTH_FLAGS, RTH_MODES, W::RthStart, E::None),
        RthClimbToSafeAlt => desc(9, 10, RTH_ENROUTE_FLAGS, RTH_MODES, W::RthEnroute, E::WaitForRthAlt),
        RthTrackback => desc(38, 10, RTH_ENROUTE_FLAGS, RTH_MODES, W::RthEnroute, E::None),
        RthHeadHome => desc(10, 10, RTH_ENROUTE_FLAGS, RTH_MODES, W::RthEnroute, E::None),
        RthHoverPriorToLanding => desc(11, 500, RTH_ENROUTE_FLAGS, RTH_MODES, W::LandSettle, E::None),
        RthHoverAboveHome => desc(
            35,
            10,
            RTH_ENROUTE_FLAGS.union(F::RC_ALT),
            RTH_MODES,
            W::HoverAboveHome,
            E::None,
        ),
        RthLanding => desc(
            12,
            10,
            RTH_ENROUTE_FLAGS.union(F::CTL_LAND),
            RTH_MODES,
            W::LandInProgress,
            E::Landing,
        ),
        RthFinishing => desc(13, 0, RTH_FLAGS.union(F::CTL_LAND), RTH_MODES, W::LandInProgress, E::Landing),
        RthFinished => desc(
            14,
            10,
            F::CTL_ALT.union(F::REQUIRE_ANGLE).union(F::REQUIRE_THRTILT).union(F::AUTO_RTH),
            RTH_MODES,
            W::Landed,
            E::None,
        ),

        WaypointInitialize => desc(15, 0, WP_FLAGS, WP_MODES, W::ProcessNext, E::None),
        WaypointPreAction => desc(37, 10, WP_FLAGS, WP_MODES, W::ProcessNext, E::None),
        WaypointInProgress => desc(16, 10, WP_FLAGS, WP_MODES, W::WpEnroute, E::None),
        WaypointReached => desc(17, 10, WP_FLAGS, WP_MODES, W::ProcessNext, E::None),
        WaypointHoldTime => desc(34, 10, WP_FLAGS, WP_MODES, W::HoldTimed, E::None),
        WaypointRthLand => desc(20, 10, WP_FLAGS.union(F::CTL_LAND), WP_MODES, W::LandInProgress, E::Landing),
        WaypointNext => desc(18, 0, WP_FLAGS, WP_MODES, W::ProcessNext, E::None),
        WaypointFinished => desc(19, 10, WP_FLAGS, WP_MODES, W::WpEnroute, E::Finish),

        EmergencyLandingInitialize => {
            desc(21, 0, F::CTL_EMERG.union(F::REQUIRE_ANGLE), M::empty(), W::EmergencyLanding, E::Landing)
        }
        EmergencyLandingInProgress => {
            desc(22, 10, F::CTL_EMERG.union(F::REQUIRE_ANGLE), M::empty(), W::EmergencyLanding, E::Landing)
        }
        EmergencyLandingFinished => {
            desc(23, 10, F::CTL_EMERG.union(F::REQUIRE_ANGLE), M::empty(), W::Landed, E::Landing)
        }

        LaunchInitialize => desc(24, 0, F::REQUIRE_ANGLE, M::LAUNCH, W::None, E::None),
        LaunchWait => desc(25, 10, F::CTL_LAUNCH.union(F::REQUIRE_ANGLE), M::LAUNCH, W::None, E::None),
        LaunchInProgress => desc(27, 10, F::CTL_LAUNCH.union(F::REQUIRE_ANGLE), M::LAUNCH, W::None, E::None),
    }
}

pub fn state_flags(state: NavState) -> StateFlags {
    descriptor(state).flags
}

/// Pilot mode switches accepted from an established mode. `from` is excluded by the caller.
fn pilot_switch(event: NavEvent) -> Option<NavState> {
    match event {
        NavEvent::SwitchToIdle => Some(NavState::Idle),
        NavEvent::SwitchToAltHold => Some(NavState::AltHoldInitialize),
        NavEvent::SwitchToPosHold => Some(NavState::PosHoldInitialize),
        NavEvent::SwitchToRth => Some(NavState::RthInitialize),
        NavEvent::SwitchToWaypoint => Some(NavState::WaypointInitialize),
        NavEvent::SwitchToEmergencyLanding => Some(NavState::EmergencyLandingInitialize),
        NavEvent::SwitchToCourseHold => Some(NavState::CourseHoldInitialize),
        NavEvent::SwitchToCruise => Some(NavState::CruiseInitialize),
        _ => None,
    }
}

/// Transition table. Unlisted pairs are no-ops.
pub fn next_state(state: NavState, event: NavEvent) -> Option<NavState> {
    use NavEvent as Ev;
    use NavState::*;
    match state {
        Idle => match event {
            Ev::SwitchToLaunch => Some(LaunchInitialize),
            Ev::SwitchToIdle => None,
            e => pilot_switch(e),
        },

        AltHoldInitialize | PosHoldInitialize | CourseHoldInitialize | CruiseInitialize => match event {
            Ev::Success => Some(match state {
                AltHoldInitialize => AltHoldInProgress,
                PosHoldInitialize => PosHoldInProgress,
                CourseHoldInitialize => CourseHoldInProgress,
                _ => CruiseInProgress,
            }),
            Ev::Error | Ev::SwitchToIdle => Some(Idle),
            _ => None,
        },

        AltHoldInProgress => match event {
            Ev::Timeout => Some(AltHoldInProgress),
            Ev::SwitchToAltHold => None,
            e => pilot_switch(e),
        },
        PosHoldInProgress => match event {
            Ev::Timeout => Some(PosHoldInProgress),
            Ev::SwitchToPosHold => None,
            e => pilot_switch(e),
        },
        CourseHoldInProgress => match event {
            Ev::Timeout => Some(CourseHoldInProgress),
            Ev::SwitchToCourseAdjusting => Some(CourseHoldAdjusting),
            Ev::SwitchToCourseHold => None,
            e => pilot_switch(e),
        },
        CourseHoldAdjusting => match event {
            Ev::Success => Some(CourseHoldInProgress),
            Ev::Timeout => Some(CourseHoldAdjusting),
            Ev::Error => Some(Idle),
            Ev::SwitchToCourseHold => None,
            e => pilot_switch(e),
        },
        CruiseInProgress => match event {
            Ev::Timeout => Some(CruiseInProgress),
            Ev::SwitchToCourseAdjusting => Some(CruiseAdjusting),
            Ev::SwitchToCruise => None,
            e => pilot_switch(e),
        },
        CruiseAdjusting => match event {
            Ev::Success => Some(CruiseInProgress),
            Ev::Timeout => Some(CruiseAdjusting),
            Ev::Error => Some(Idle),
            Ev::SwitchToCruise => None,
            e => pilot_switch(e),
        },

        RthInitialize => match event {
            Ev::Timeout => Some(RthInitialize),
            Ev::Success => Some(RthClimbToSafeAlt),
            Ev::SwitchToRthTrackback => Some(RthTrackback),
            Ev::SwitchToRthLanding => Some(RthHoverPriorToLanding),
            Ev::SwitchToEmergencyLanding => Some(EmergencyLandingInitialize),
            Ev::SwitchToIdle => Some(Idle),
            _ => None,
        },
        RthClimbToSafeAlt | RthTrackback | RthHeadHome | RthHoverPriorToLanding | RthHoverAboveHome => {
            match event {
                Ev::Timeout => Some(state),
                Ev::Success => match state {
                    RthClimbToSafeAlt => Some(RthHeadHome),
                    RthTrackback => Some(RthInitialize),
                    RthHeadHome => Some(RthHoverPriorToLanding),
                    RthHoverPriorToLanding => Some(RthLanding),
                    _ => None,
                },
                Ev::SwitchToRthHoverAboveHome if matches!(state, RthHeadHome | RthHoverPriorToLanding) => {
                    Some(RthHoverAboveHome)
                }
                Ev::SwitchToRth | Ev::SwitchToWaypoint => None,
                e => pilot_switch(e),
            }
        }
        RthLanding => match event {
            Ev::Timeout => Some(RthLanding),
            Ev::Success => Some(RthFinishing),
            Ev::SwitchToIdle | Ev::SwitchToAltHold | Ev::SwitchToPosHold | Ev::SwitchToEmergencyLanding => {
                pilot_switch(event)
            }
            _ => None,
        },
        RthFinishing => match event {
            Ev::Success => Some(RthFinished),
            Ev::SwitchToIdle => Some(Idle),
            _ => None,
        },
        RthFinished => match event {
            Ev::Timeout => Some(RthFinished),
            Ev::SwitchToIdle | Ev::SwitchToAltHold | Ev::SwitchToPosHold | Ev::SwitchToEmergencyLanding => {
                pilot_switch(event)
            }
            _ => None,
        },

        WaypointInitialize => match event {
            Ev::Success => Some(WaypointPreAction),
            Ev::Error | Ev::SwitchToIdle => Some(Idle),
            Ev::SwitchToWaypointFinished => Some(WaypointFinished),
            Ev::SwitchToEmergencyLanding => Some(EmergencyLandingInitialize),
            _ => None,
        },
        WaypointPreAction => match event {
            Ev::Timeout => Some(WaypointPreAction),
            Ev::Success => Some(WaypointInProgress),
            Ev::Error => Some(Idle),
            Ev::SwitchToWaypointFinished => Some(WaypointFinished),
            Ev::SwitchToWaypoint => None,
            e => pilot_switch(e),
        },
        WaypointInProgress | WaypointReached | WaypointHoldTime | WaypointRthLand => match event {
            Ev::Timeout => Some(state),
            Ev::Success => Some(match state {
                WaypointInProgress => WaypointReached,
                WaypointRthLand => WaypointFinished,
                _ => WaypointNext,
            }),
            Ev::SwitchToWaypointFinished if state == WaypointReached => Some(WaypointFinished),
            Ev::SwitchToWaypointRthLand if state == WaypointReached => Some(WaypointRthLand),
            Ev::SwitchToWaypointHoldTime if state == WaypointReached => Some(WaypointHoldTime),
            Ev::SwitchToWaypoint => None,
            e => pilot_switch(e),
        },
        WaypointNext => match event {
            Ev::Success => Some(WaypointPreAction),
            Ev::SwitchToWaypointFinished => Some(WaypointFinished),
            _ => None,
        },
        WaypointFinished => match event {
            Ev::Timeout => Some(WaypointFinished),
            Ev::SwitchToWaypoint => None,
            e => pilot_switch(e),
        },

        EmergencyLandingInitialize => match event {
            Ev::Success => Some(EmergencyLandingInProgress),
            Ev::Error | Ev::SwitchToIdle | Ev::SwitchToAltHold => Some(Idle),
            _ => None,
        },
        EmergencyLandingInProgress => match event {
            Ev::Timeout => Some(EmergencyLandingInProgress),
            Ev::Success => Some(EmergencyLandingFinished),
            Ev::SwitchToIdle | Ev::SwitchToAltHold => Some(Idle),
            _ => None,
        },
        EmergencyLandingFinished => match event {
            Ev::Timeout => Some(EmergencyLandingFinished),
            Ev::SwitchToIdle => Some(Idle),
            _ => None,
        },

        LaunchInitialize => match event {
            Ev::Success => Some(LaunchWait),
            Ev::Error | Ev::SwitchToIdle => Some(Idle),
            _ => None,
        },
        LaunchWait => match event {
            Ev::Timeout => Some(LaunchWait),
            Ev::Success => Some(LaunchInProgress),
            Ev::Error | Ev::SwitchToIdle => Some(Idle),
            _ => None,
        },
        LaunchInProgress => match event {
            Ev::Timeout => Some(LaunchInProgress),
            Ev::Success | Ev::Error | Ev::SwitchToIdle => Some(Idle),
            _ => None,
        },
    }
}

impl NavigationContext {
    fn set_state(&mut self, new_state: NavState, event: NavEvent) -> NavState {
        let previous = self.state;
        if previous != new_state {
            debug!("nav: {:?} -> {:?} on {:?}", previous, new_state, event);
            let old_modes = descriptor(previous).modes;
            let new_modes = descriptor(new_state).modes;
            if old_modes != new_modes {
                info!("nav mode {:?} -> {:?}", old_modes, new_modes);
            }
            self.state = new_state;
        }
        previous
    }

    /// Moves to `target` and runs entry handlers until one settles.
    fn enter_and_cascade(&mut self, target: NavState, event: NavEvent) {
        let mut previous = self.set_state(target, event);
        for _ in 0..MAX_CASCADE {
            let Some(next_event) = self.on_entry(self.state, previous) else {
                return;
            };
            match next_state(self.state, next_event) {
                Some(next) => previous = self.set_state(next, next_event),
                None => return,
            }
        }
        warn!("nav: entry cascade did not settle in {:?}", self.state);
    }

    /// Fires the state timeout when due, then applies the injected event.
    pub(crate) fn process_fsm_events(&mut self, injected: Option<NavEvent>) {
        let now_ms = self.now_ms();
        let d = descriptor(self.state);
        if d.timeout_ms > 0 && now_ms.saturating_sub(self.last_state_process_ms) >= u64::from(d.timeout_ms) {
            if let Some(target) = next_state(self.state, NavEvent::Timeout) {
                self.enter_and_cascade(target, NavEvent::Timeout);
                self.last_state_process_ms = now_ms;
            }
        }

        if let Some(event) = injected {
            if let Some(target) = next_state(self.state, event) {
                self.enter_and_cascade(target, event);
                self.last_state_process_ms = now_ms;
            }
        }
    }
}
