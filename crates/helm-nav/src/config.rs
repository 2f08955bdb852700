use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserControlMode {
    #[default]
    Atti,
    Cruise,
}

/// How the return altitude is chosen while flying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RthAltMode {
    NoAlt,
    ExtraAlt,
    MaxAlt,
    #[default]
    AtLeastAlt,
    AtLeastAltLinearDescent,
    ConstAlt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RthAllowLanding {
    Never,
    #[default]
    Always,
    FsOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackbackMode {
    #[default]
    Off,
    On,
    /// Only when RTH was triggered by failsafe.
    Failsafe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomeReset {
    Never,
    #[default]
    FirstArm,
    EachArm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmingSafety {
    Off,
    #[default]
    On,
    /// Full yaw stick at arming bypasses the missing-fix blocker.
    AllowBypass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct McNavConfig {
    /// Degrees.
    pub max_bank_angle: u8,
    pub hover_throttle: u16,
    pub braking_speed_threshold: u16,
    pub braking_disengage_speed: u16,
    /// ms
    pub braking_timeout: u16,
    /// percent
    pub braking_boost_factor: u8,
    pub braking_boost_timeout: u16,
    pub braking_boost_speed_threshold: u16,
    pub braking_boost_disengage_speed: u16,
    pub braking_bank_angle: u8,
    /// Centiseconds of velocity projected into the initial hold point.
    pub pos_deceleration_time: u8,
    /// percent
    pub pos_response_expo: u8,
    pub slow_down_for_turning: bool,
    /// Velocity D-term cut at speed, percent.
    pub vel_xy_dterm_attenuation: u8,
    /// Attenuation band as percent of the speed limit.
    pub vel_xy_dterm_attenuation_start: u8,
    pub vel_xy_dterm_attenuation_end: u8,
}

impl Default for McNavConfig {
    fn default() -> Self {
        Self {
            max_bank_angle: 30,
            hover_throttle: 1500,
            braking_speed_threshold: 100,
            braking_disengage_speed: 75,
            braking_timeout: 2000,
            braking_boost_factor: 100,
            braking_boost_timeout: 750,
            braking_boost_speed_threshold: 150,
            braking_boost_disengage_speed: 100,
            braking_bank_angle: 40,
            pos_deceleration_time: 120,
            pos_response_expo: 10,
            slow_down_for_turning: true,
            vel_xy_dterm_attenuation: 90,
            vel_xy_dterm_attenuation_start: 10,
            vel_xy_dterm_attenuation_end: 60,
        }
    }
}

/// Collective-pitch helicopter. Headspeed is held by the governor, altitude by collective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeliNavConfig {
    pub max_bank_angle: u8,
    pub hover_collective: u16,
    pub min_collective: u16,
    pub max_collective: u16,
    /// Collective held when no altitude estimate is left.
    pub failsafe_collective: u16,
    pub governor_throttle: u16,
}

impl Default for HeliNavConfig {
    fn default() -> Self {
        Self {
            max_bank_angle: 25,
            hover_collective: 1550,
            min_collective: 1250,
            max_collective: 1850,
            failsafe_collective: 1450,
            governor_throttle: 1700,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FwLaunchConfig {
    pub enabled: bool,
    /// Swing detection speed, cm/s.
    pub velocity_thresh: u16,
    /// Forward acceleration, cm/s/s.
    pub accel_thresh: u16,
    /// ms
    pub detect_time: u16,
    pub throttle: u16,
    pub idle_throttle: u16,
    pub motor_delay: u16,
    pub spinup_time: u16,
    pub timeout: u16,
    /// Degrees.
    pub climb_angle: u8,
    /// cm above launch, 0 disables.
    pub max_altitude: u16,
}

impl Default for FwLaunchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            velocity_thresh: 300,
            accel_thresh: 1863,
            detect_time: 40,
            throttle: 1700,
            idle_throttle: 1000,
            motor_delay: 500,
            spinup_time: 100,
            timeout: 5000,
            climb_angle: 18,
            max_altitude: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FwNavConfig {
    pub cruise_throttle: u16,
    pub min_throttle: u16,
    pub max_throttle: u16,
    pub max_bank_angle: u8,
    pub max_climb_angle: u8,
    pub max_dive_angle: u8,
    pub pitch_to_throttle: u8,
    pub loiter_radius: u16,
    /// deg/s
    pub cruise_yaw_rate: u8,
    pub land_dive_angle: i8,
    pub allow_manual_thr_increase: bool,
    /// Decidegrees held while gliding down without position.
    pub emerg_roll_angle: i16,
    pub emerg_pitch_angle: i16,
    /// deg/s
    pub emerg_yaw_rate: i16,
    pub launch: FwLaunchConfig,
}

impl Default for FwNavConfig {
    fn default() -> Self {
        Self {
            cruise_throttle: 1400,
            min_throttle: 1200,
            max_throttle: 1700,
            max_bank_angle: 35,
            max_climb_angle: 20,
            max_dive_angle: 15,
            pitch_to_throttle: 10,
            loiter_radius: 5000,
            cruise_yaw_rate: 20,
            land_dive_angle: 2,
            allow_manual_thr_increase: false,
            emerg_roll_angle: -200,
            emerg_pitch_angle: 100,
            emerg_yaw_rate: -45,
            launch: FwLaunchConfig::default(),
        }
    }
}

/// Navigation parameters. Distances in cm, speeds in cm/s, times in ms unless noted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    pub user_control_mode: UserControlMode,
    pub extra_arming_safety: ArmingSafety,
    /// Seconds, 0 disables.
    pub pos_failure_timeout: u8,
    pub waypoint_radius: u16,
    pub waypoint_safe_distance: u32,
    /// Altitude error accepted before leaving a waypoint, 0 disables.
    pub waypoint_enforce_altitude: u16,
    pub max_auto_speed: u16,
    pub max_auto_climb_rate: u16,
    pub max_manual_speed: u16,
    pub max_manual_climb_rate: u16,
    pub land_descent_rate: u16,
    pub land_slowdown_minalt: u16,
    pub land_slowdown_maxalt: u16,
    pub emerg_descent_rate: u16,
    /// Throttle commanded when no altitude estimate is left.
    pub failsafe_throttle: u16,
    pub min_rth_distance: u16,
    pub rth_altitude: u16,
    pub rth_home_altitude: u16,
    pub rth_abort_threshold: u32,
    pub rth_climb_first: bool,
    pub rth_climb_ignore_emerg: bool,
    pub rth_tail_first: bool,
    pub rth_alt_control_mode: RthAltMode,
    pub rth_allow_landing: RthAllowLanding,
    pub rth_trackback_mode: TrackbackMode,
    /// Metres.
    pub rth_trackback_distance: u16,
    pub land_detect_sensitivity: u8,
    pub auto_disarm_delay: u16,
    pub disarm_on_landing: bool,
    pub use_thr_mid_for_althold: bool,
    pub max_terrain_follow_altitude: u16,
    pub home_reset: HomeReset,
    pub home_offset_distance: u16,
    /// Degrees.
    pub home_offset_direction: i16,
    /// 1-based index of the mission flown from a multi-mission list.
    pub active_mission: u8,
    pub mc: McNavConfig,
    pub heli: HeliNavConfig,
    pub fw: FwNavConfig,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            user_control_mode: UserControlMode::Atti,
            extra_arming_safety: ArmingSafety::On,
            pos_failure_timeout: 5,
            waypoint_radius: 100,
            waypoint_safe_distance: 10000,
            waypoint_enforce_altitude: 0,
            max_auto_speed: 300,
            max_auto_climb_rate: 500,
            max_manual_speed: 500,
            max_manual_climb_rate: 200,
            land_descent_rate: 200,
            land_slowdown_minalt: 500,
            land_slowdown_maxalt: 2000,
            emerg_descent_rate: 500,
            failsafe_throttle: 1000,
            min_rth_distance: 500,
            rth_altitude: 1000,
            rth_home_altitude: 0,
            rth_abort_threshold: 50000,
            rth_climb_first: true,
            rth_climb_ignore_emerg: false,
            rth_tail_first: false,
            rth_alt_control_mode: RthAltMode::AtLeastAlt,
            rth_allow_landing: RthAllowLanding::Always,
            rth_trackback_mode: TrackbackMode::Off,
            rth_trackback_distance: 500,
            land_detect_sensitivity: 5,
            auto_disarm_delay: 1000,
            disarm_on_landing: false,
            use_thr_mid_for_althold: false,
            max_terrain_follow_altitude: 100,
            home_reset: HomeReset::FirstArm,
            home_offset_distance: 0,
            home_offset_direction: 0,
            active_mission: 1,
            mc: McNavConfig::default(),
            heli: HeliNavConfig::default(),
            fw: FwNavConfig::default(),
        }
    }
}

/// Stick handling shared with the receiver layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RcConfig {
    pub pos_hold_deadband: u8,
    pub alt_hold_deadband: u8,
    pub mid_throttle: u16,
    /// Throttle below this counts as low.
    pub min_check: u16,
}

impl Default for RcConfig {
    fn default() -> Self {
        Self { pos_hold_deadband: 10, alt_hold_deadband: 50, mid_throttle: 1500, min_check: 1100 }
    }
}
