use bitflags::bitflags;
use helm_ctrl::profile::{Airframe, PidProfile, ThrottleConfig};
use helm_ctrl::{PidController, Vec3};
use serde::Serialize;
use tracing::info;

use crate::config::{NavConfig, RcConfig};
use crate::fixedwing::FixedWingState;
use crate::fsm::{descriptor, FlightModes, NavState, StateFlags};
use crate::geo::GeoOrigin;
use crate::landing::LandingDetector;
use crate::launch::LaunchController;
use crate::mission::{ActiveWaypoint, Mission, WaypointHeading};
use crate::modes::BoxModes;
use crate::multicopter::RotorcraftState;
use crate::rth::{RthState, SanityChecker};
use crate::trackback::Trackback;

/// D-term cutoff of the navigation velocity loops.
pub const NAV_DTERM_CUT_HZ: f32 = 10.0;

/// Loops that have not run for this long restart from scratch.
pub const MIN_POSITION_UPDATE_US: u64 = 200_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub enum EstimateStatus {
    #[default]
    None,
    Usable,
    Trusted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PosVel {
    pub pos: Vec3,
    pub vel: Vec3,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ActualState {
    pub abs: PosVel,
    pub agl: PosVel,
    pub vel_xy: f32,
    /// Centidegrees, 0..36000.
    pub yaw: i32,
    pub sin_yaw: f32,
    pub cos_yaw: f32,
    /// Lowest trusted AGL reading while armed, -1 when unknown.
    pub surface_min: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DesiredState {
    pub pos: Vec3,
    pub vel: Vec3,
    pub yaw: i32,
    /// Offset between the surface-tracking and the absolute altitude target.
    pub surface_offset: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EstimateFlags {
    pub pos: EstimateStatus,
    pub vel: EstimateStatus,
    pub alt: EstimateStatus,
    pub agl: EstimateStatus,
    pub heading: EstimateStatus,
}

/// Single-slot handshakes between the estimator and the controllers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataMailbox {
    pub horizontal_new: bool,
    pub horizontal_consumed: bool,
    pub vertical_new: bool,
    pub vertical_consumed: bool,
    pub heading_new: bool,
    pub last_valid_position_ms: u64,
    pub last_valid_altitude_ms: u64,
}

bitflags! {
    /// Which parts of a target are applied.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PosUpdate: u8 {
        const XY                 = 1 << 0;
        const Z                  = 1 << 1;
        const HEADING            = 1 << 2;
        const BEARING            = 1 << 3;
        const BEARING_TAIL_FIRST = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HomeFlags: u8 {
        const VALID_XY      = 1 << 0;
        const VALID_Z       = 1 << 1;
        const VALID_HEADING = 1 << 2;
        const VALID_ALL     = Self::VALID_XY.bits() | Self::VALID_Z.bits() | Self::VALID_HEADING.bits();
    }
}

impl Default for HomeFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HomeState {
    pub pos: Vec3,
    pub yaw: i32,
    pub flags: HomeFlags,
    /// cm
    pub distance: f32,
    /// centidegrees
    pub direction: i32,
}

impl HomeState {
    pub fn is_fixed(&self) -> bool {
        self.flags.contains(HomeFlags::VALID_XY | HomeFlags::VALID_Z)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CruiseState {
    pub target: Vec3,
    pub yaw: i32,
    pub previous_yaw: i32,
    pub last_yaw_adjustment_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NavFlags {
    pub adjusting_position: bool,
    pub adjusting_altitude: bool,
    pub adjusting_heading: bool,
    pub forced_rth: bool,
    pub terrain_follow: bool,
    pub gcs_enabled: bool,
    pub gcs_reset: bool,
    pub armed: bool,
    pub was_ever_armed: bool,
    pub failsafe: bool,
}

/// Receiver view for one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct PilotInput {
    /// roll, pitch, yaw in +-500.
    pub sticks: [f32; 3],
    /// us
    pub throttle: f32,
    /// us, helicopters only.
    pub collective: f32,
    pub boxes: BoxModes,
    pub failsafe: bool,
}

/// Attitude and inertial data from the AHRS.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImuSample {
    /// roll, pitch, yaw in decidegrees.
    pub attitude: [f32; 3],
    /// deg/s
    pub gyro: [f32; 3],
    /// Body-frame acceleration in cm/s/s, including gravity on z.
    pub acc: [f32; 3],
    /// Baro climb rate, cm/s.
    pub baro_climb_rate: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisarmReason {
    Landing,
    Navigation,
}

/// What the navigation layer hands to the rate loop and mixer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NavCommand {
    /// roll, pitch, yaw (+-500), throttle (us).
    pub rc_command: [f32; 4],
    pub collective: Option<f32>,
    pub flight_modes: FlightModes,
    pub angle_required: bool,
    pub turn_assist: bool,
    pub controlling_throttle: bool,
    /// Heading the rate loop should hold, degrees.
    pub heading_target: Option<f32>,
    pub disarm: Option<DisarmReason>,
    /// Rate-loop integrators should be cleared, the craft is on the ground.
    pub reset_integrators: bool,
}

/// Call and data-arrival timing of one control loop.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UpdateTimer {
    last_us: u64,
    last_data_us: u64,
}

impl UpdateTimer {
    /// Seconds since the previous call, `None` when the loop was idle and must be reset.
    pub(crate) fn tick(&mut self, now_us: u64) -> Option<f32> {
        let dt = now_us.saturating_sub(self.last_us);
        self.last_us = now_us;
        if dt > MIN_POSITION_UPDATE_US {
            self.last_data_us = now_us;
            None
        } else {
            Some(dt as f32 * 1e-6)
        }
    }

    /// Seconds since fresh estimator data was last consumed, `None` when too stale.
    pub(crate) fn data(&mut self, now_us: u64) -> Option<f32> {
        let dt = now_us.saturating_sub(self.last_data_us);
        self.last_data_us = now_us;
        (dt < MIN_POSITION_UPDATE_US).then(|| dt as f32 * 1e-6)
    }
}

#[derive(Debug, Clone)]
pub struct NavPids {
    pub pos: [PidController; 3],
    pub vel: [PidController; 3],
    pub surface: PidController,
    pub fw_nav: PidController,
    pub fw_alt: PidController,
}

impl NavPids {
    /// Scales configured integer gains into controller units.
    pub fn from_profile(profile: &PidProfile, airframe: Airframe) -> Self {
        let b = profile.bank(airframe);
        let p = |v: u16, div: f32| f32::from(v) / div;
        let pos_xy = PidController::new(p(b.pos_xy.p, 100.0), 0.0, 0.0, 0.0, 0.0);
        let vel_xy = PidController::new(
            p(b.vel_xy.p, 20.0),
            p(b.vel_xy.i, 100.0),
            p(b.vel_xy.d, 100.0),
            p(b.vel_xy.ff, 100.0),
            NAV_DTERM_CUT_HZ,
        );
        let fw = &profile.bank_fw;
        Self {
            pos: [
                pos_xy.clone(),
                pos_xy,
                PidController::new(p(b.pos_z.p, 100.0), 0.0, 0.0, 0.0, 0.0),
            ],
            vel: [
                vel_xy.clone(),
                vel_xy,
                PidController::new(
                    p(b.vel_z.p, 66.7),
                    p(b.vel_z.i, 20.0),
                    p(b.vel_z.d, 100.0),
                    0.0,
                    NAV_DTERM_CUT_HZ,
                ),
            ],
            surface: PidController::new(2.0, 0.0, 0.0, 0.0, 0.0),
            fw_nav: PidController::new(
                p(fw.pos_xy.p, 100.0),
                p(fw.pos_xy.i, 100.0),
                p(fw.pos_xy.d, 100.0),
                0.0,
                NAV_DTERM_CUT_HZ,
            ),
            fw_alt: PidController::new(
                p(fw.pos_z.p, 10.0),
                p(fw.pos_z.i, 10.0),
                p(fw.pos_z.d, 10.0),
                0.0,
                NAV_DTERM_CUT_HZ,
            ),
        }
    }
}

/// All navigation state of one vehicle. Owned by the control-loop driver.
#[derive(Debug, Clone)]
pub struct NavigationContext {
    pub(crate) cfg: NavConfig,
    pub(crate) rc_cfg: RcConfig,
    pub(crate) throttle: ThrottleConfig,
    pub(crate) airframe: Airframe,
    /// Decidegrees (roll, pitch).
    pub(crate) max_angle_inclination: [f32; 2],
    /// Stabilised yaw rate at full stick, deg/s.
    pub(crate) max_yaw_rate: f32,

    pub(crate) now_us: u64,
    pub(crate) state: NavState,
    pub(crate) last_state_process_ms: u64,

    pub(crate) actual: ActualState,
    pub(crate) desired: DesiredState,
    pub(crate) est: EstimateFlags,
    pub(crate) mailbox: DataMailbox,
    pub(crate) imu: ImuSample,
    pub(crate) gps_ground_speed: f32,
    pub(crate) origin: GeoOrigin,

    pub(crate) home: HomeState,
    pub(crate) rth: RthState,
    pub(crate) sanity: SanityChecker,
    pub(crate) trackback: Trackback,

    pub(crate) mission: Mission,
    pub(crate) active_wp: ActiveWaypoint,
    pub(crate) wp_heading: WaypointHeading,
    pub(crate) cruise: CruiseState,

    pub(crate) pids: NavPids,
    pub(crate) rotor: RotorcraftState,
    pub(crate) fw: FixedWingState,
    pub(crate) landing: LandingDetector,
    pub(crate) launch: LaunchController,

    pub(crate) flags: NavFlags,
    pub(crate) pilot: PilotInput,
    pub(crate) rc_command: [f32; 4],
    pub(crate) collective: f32,
    pub(crate) rc_adjustment: [f32; 4],
    /// Heading handed to the rate loop's heading hold, degrees.
    pub(crate) heading_target: f32,
    pub(crate) roc_last_update_us: u64,
    pub(crate) trip_distance: f32,
    pub(crate) last_mode_update_us: u64,
    pub(crate) can_activate_waypoint: bool,
    pub(crate) can_activate_launch: bool,
    pub(crate) home_reset_box_prev: bool,
    pub(crate) disarm_request: Option<DisarmReason>,
}

impl NavigationContext {
    pub fn new(
        cfg: NavConfig,
        rc_cfg: RcConfig,
        profile: &PidProfile,
        throttle: ThrottleConfig,
        airframe: Airframe,
    ) -> Self {
        info!("navigation init for {:?}", airframe);
        let rotor = RotorcraftState::new(&cfg, &throttle, airframe);
        let fw = FixedWingState::new();
        let landing = LandingDetector::for_airframe(airframe);
        let launch = LaunchController::new(cfg.fw.launch);
        Self {
            pids: NavPids::from_profile(profile, airframe),
            max_angle_inclination: [
                f32::from(profile.max_angle_inclination[0]),
                f32::from(profile.max_angle_inclination[1]),
            ],
            max_yaw_rate: f32::from(profile.rates[2]) * 10.0,
            cfg,
            rc_cfg,
            throttle,
            airframe,
            now_us: 0,
            state: NavState::Idle,
            last_state_process_ms: 0,
            actual: ActualState { surface_min: -1.0, cos_yaw: 1.0, ..Default::default() },
            desired: DesiredState::default(),
            est: EstimateFlags::default(),
            mailbox: DataMailbox::default(),
            imu: ImuSample::default(),
            gps_ground_speed: 0.0,
            origin: GeoOrigin::default(),
            home: HomeState::default(),
            rth: RthState::default(),
            sanity: SanityChecker::default(),
            trackback: Trackback::default(),
            mission: Mission::default(),
            active_wp: ActiveWaypoint::default(),
            wp_heading: WaypointHeading::None,
            cruise: CruiseState::default(),
            rotor,
            fw,
            landing,
            launch,
            flags: NavFlags::default(),
            pilot: PilotInput::default(),
            rc_command: [0.0; 4],
            collective: 0.0,
            rc_adjustment: [0.0; 4],
            heading_target: 0.0,
            roc_last_update_us: 0,
            trip_distance: 0.0,
            last_mode_update_us: 0,
            can_activate_waypoint: false,
            can_activate_launch: false,
            home_reset_box_prev: false,
            disarm_request: None,
        }
    }

    // ----- Clock -----

    pub(crate) fn now_ms(&self) -> u64 {
        self.now_us / 1000
    }

    pub(crate) fn set_time(&mut self, now_us: u64) {
        self.now_us = self.now_us.max(now_us);
    }

    // ----- Inputs -----

    pub fn set_pilot_input(&mut self, input: PilotInput) {
        self.pilot = input;
        self.flags.failsafe = input.failsafe;
    }

    pub fn set_imu(&mut self, imu: ImuSample) {
        self.imu = imu;
    }

    /// Arming edge handling. Re-arming always restarts the mission from its first waypoint.
    pub fn set_armed(&mut self, armed: bool) {
        if armed && !self.flags.armed {
            self.flags.was_ever_armed = true;
            self.mission.restart();
            self.landing.reset();
            self.trackback.clear();
            self.trip_distance = 0.0;
            info!("nav: armed");
        } else if !armed && self.flags.armed {
            info!("nav: disarmed");
        }
        self.flags.armed = armed;
    }

    // ----- Accessors -----

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn state_flags(&self) -> StateFlags {
        descriptor(self.state).flags
    }

    pub fn airframe(&self) -> Airframe {
        self.airframe
    }

    pub fn config(&self) -> &NavConfig {
        &self.cfg
    }

    pub fn actual(&self) -> &ActualState {
        &self.actual
    }

    pub fn desired(&self) -> &DesiredState {
        &self.desired
    }

    pub fn estimates(&self) -> &EstimateFlags {
        &self.est
    }

    pub fn home(&self) -> &HomeState {
        &self.home
    }

    pub fn origin(&self) -> &GeoOrigin {
        &self.origin
    }

    pub fn mission(&self) -> &Mission {
        &self.mission
    }

    pub fn mission_mut(&mut self) -> &mut Mission {
        &mut self.mission
    }

    pub fn rth_state(&self) -> &RthState {
        &self.rth
    }

    pub fn trackback(&self) -> &Trackback {
        &self.trackback
    }

    pub fn pids(&self) -> &NavPids {
        &self.pids
    }

    pub fn nav_flags(&self) -> &NavFlags {
        &self.flags
    }

    pub fn trip_distance(&self) -> f32 {
        self.trip_distance
    }

    pub fn active_waypoint(&self) -> &ActiveWaypoint {
        &self.active_wp
    }

    pub fn is_landing_detected(&self) -> bool {
        self.landing.is_landed()
    }

    /// Position source for control: AGL while terrain following, absolute otherwise.
    pub(crate) fn current_posvel(&self) -> &PosVel {
        if self.flags.terrain_follow {
            &self.actual.agl
        } else {
            &self.actual.abs
        }
    }

    pub(crate) fn is_fixed_wing(&self) -> bool {
        self.airframe.is_fixed_wing()
    }

    pub(crate) fn is_throttle_low(&self) -> bool {
        self.pilot.throttle < f32::from(self.rc_cfg.min_check)
    }

    pub(crate) fn sticks_deflected(&self) -> bool {
        let db = f32::from(self.rc_cfg.pos_hold_deadband);
        self.pilot.sticks.iter().any(|s| s.abs() > db)
    }
}
