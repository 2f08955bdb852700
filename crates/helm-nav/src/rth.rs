use helm_ctrl::Vec3;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{RthAllowLanding, RthAltMode};
use crate::context::{EstimateStatus, NavigationContext};
use crate::fsm::{NavEvent, NavState, StateFlags};
use crate::mission::WaypointAction;

/// Targeted above the return altitude during the initial climb.
pub const RTH_CLIMB_OVERSHOOT_CM: f32 = 100.0;
pub const RTH_CLIMB_MARGIN_MIN_CM: f32 = 100.0;
pub const RTH_CLIMB_MARGIN_PERCENT: f32 = 15.0;

const SANITY_CHECK_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RthState {
    pub initial_altitude: f32,
    pub final_altitude: f32,
    pub initial_distance: f32,
}

/// Which altitude the home target is given during each phase of a return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RthHomeTarget {
    EnrouteInitial,
    Proportional,
    EnrouteFinal,
    FinalHover,
    FinalLand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ForcedRthState {
    Idle,
    InProgress,
    HasLanded,
}

/// Aborts a return that keeps moving away from home.
#[derive(Debug, Clone, Copy, Default)]
pub struct SanityChecker {
    last_check_ms: u64,
    minimal_distance: f32,
    tripped: bool,
}

impl SanityChecker {
    pub fn init(&mut self, now_ms: u64, distance_to_home: f32) {
        self.last_check_ms = now_ms;
        self.minimal_distance = distance_to_home;
        self.tripped = false;
    }

    pub fn minimal_distance(&self) -> f32 {
        self.minimal_distance
    }

    /// Checked at 10 Hz. Reports a failure once per initialisation, a zero threshold disables it.
    pub fn validate(&mut self, now_ms: u64, distance_to_home: f32, abort_threshold: f32) -> bool {
        if now_ms.saturating_sub(self.last_check_ms) < SANITY_CHECK_INTERVAL_MS {
            return true;
        }
        self.last_check_ms = now_ms;
        self.minimal_distance = self.minimal_distance.min(distance_to_home);
        if self.tripped || abort_threshold <= 0.0 {
            return true;
        }
        if distance_to_home - self.minimal_distance > abort_threshold {
            self.tripped = true;
            return false;
        }
        true
    }
}

impl NavigationContext {
    /// Recomputes the return altitudes. Frozen while a return is being flown.
    pub(crate) fn update_desired_rth_altitude(&mut self) {
        let z = self.actual.abs.pos.z;
        if !self.flags.armed {
            self.rth.initial_altitude = z;
            self.rth.final_altitude = z;
            return;
        }
        let flags = self.state_flags();
        let returning = flags.contains(StateFlags::AUTO_RTH)
            || (flags.contains(StateFlags::AUTO_WP) && self.mission.active_action() == Some(WaypointAction::Rth));
        if returning {
            return;
        }
        let above_home = self.home.pos.z + f32::from(self.cfg.rth_altitude);
        let (initial, last) = match self.cfg.rth_alt_control_mode {
            RthAltMode::NoAlt => (z, z),
            RthAltMode::ExtraAlt => (z + f32::from(self.cfg.rth_altitude), z + f32::from(self.cfg.rth_altitude)),
            RthAltMode::MaxAlt => {
                let a = self.rth.initial_altitude.max(z);
                (a, a)
            }
            RthAltMode::AtLeastAlt => (above_home.max(z), above_home.max(z)),
            RthAltMode::AtLeastAltLinearDescent => (above_home.max(z), above_home),
            RthAltMode::ConstAlt => (above_home, above_home),
        };
        self.rth.initial_altitude = initial;
        self.rth.final_altitude = last;
    }

    /// Margin below the return altitude at which the initial climb counts as done.
    pub(crate) fn rth_climb_margin(&self) -> f32 {
        (RTH_CLIMB_MARGIN_PERCENT / 100.0 * (self.rth.initial_altitude - self.home.pos.z).abs())
            .max(RTH_CLIMB_MARGIN_MIN_CM)
    }

    /// Home position with the altitude for `mode`.
    pub(crate) fn rth_home_target(&self, mode: RthHomeTarget) -> Vec3 {
        let mut target = self.home.pos;
        match mode {
            RthHomeTarget::EnrouteInitial => target.z = self.rth.initial_altitude,
            RthHomeTarget::Proportional => {
                let loiter = if self.is_fixed_wing() { f32::from(self.cfg.fw.loiter_radius) } else { 0.0 };
                let total = self.rth.initial_distance - loiter;
                target.z = if total >= 100.0 {
                    let remaining = (self.home.distance / total).clamp(0.0, 1.0);
                    self.rth.initial_altitude * remaining + self.rth.final_altitude * (1.0 - remaining)
                } else {
                    self.rth.final_altitude
                };
            }
            RthHomeTarget::EnrouteFinal => target.z = self.rth.final_altitude,
            RthHomeTarget::FinalHover => {
                target.z = if self.cfg.rth_home_altitude > 0 {
                    self.home.pos.z + f32::from(self.cfg.rth_home_altitude)
                } else {
                    self.rth.final_altitude
                };
            }
            RthHomeTarget::FinalLand => {}
        }
        target
    }

    pub(crate) fn initialize_rth_sanity_checker(&mut self) {
        let now = self.now_ms();
        self.sanity.init(now, self.home.distance);
    }

    pub(crate) fn validate_rth_sanity_checker(&mut self) -> bool {
        let now = self.now_ms();
        let ok = self.sanity.validate(now, self.home.distance, self.cfg.rth_abort_threshold as f32);
        if !ok {
            warn!(
                "RTH sanity check failed: {:.0} cm from home, best {:.0} cm",
                self.home.distance,
                self.sanity.minimal_distance()
            );
        }
        ok
    }

    pub fn rth_allows_landing(&self) -> bool {
        match self.cfg.rth_allow_landing {
            RthAllowLanding::Always => true,
            RthAllowLanding::FsOnly => self.flags.failsafe,
            RthAllowLanding::Never => false,
        }
    }

    /// Landing sink rate (negative): full rate above the slowdown band, a quarter below it.
    pub(crate) fn landing_descent_rate(&self) -> f32 {
        let rate = f32::from(self.cfg.land_descent_rate);
        if self.est.agl == EstimateStatus::Trusted && self.actual.agl.pos.z < 50.0 {
            return (-0.15 * rate).min(-30.0);
        }
        let min_alt = f32::from(self.cfg.land_slowdown_minalt);
        let max_alt = f32::from(self.cfg.land_slowdown_maxalt);
        let above = self.current_posvel().pos.z - self.home.pos.z;
        let scaling = if max_alt > min_alt {
            ((above - min_alt) / (max_alt - min_alt) * 0.75 + 0.25).clamp(0.25, 1.0)
        } else {
            1.0
        };
        (-scaling * rate).min(-50.0)
    }

    // ----- Forced RTH -----

    /// Failsafe-driven return. Takes priority over every pilot mode.
    pub fn activate_forced_rth(&mut self) {
        warn!("forced RTH activated");
        self.launch.abort();
        self.flags.forced_rth = true;
        let event = self.select_nav_event();
        self.process_fsm_events(event);
    }

    pub fn abort_forced_rth(&mut self) {
        if !self.flags.forced_rth {
            return;
        }
        debug!("forced RTH aborted");
        self.flags.forced_rth = false;
        self.process_fsm_events(Some(NavEvent::SwitchToIdle));
    }

    pub fn forced_rth_state(&self) -> ForcedRthState {
        let flags = self.state_flags();
        if self.flags.forced_rth && flags.intersects(StateFlags::AUTO_RTH | StateFlags::CTL_EMERG) {
            if matches!(self.state, NavState::RthFinished | NavState::EmergencyLandingFinished) {
                ForcedRthState::HasLanded
            } else {
                ForcedRthState::InProgress
            }
        } else {
            ForcedRthState::Idle
        }
    }
}
