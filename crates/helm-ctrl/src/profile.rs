use serde::{Deserialize, Serialize};

use crate::filter::LowPassKind;
use crate::rpm::RpmFilterConfig;
use crate::smith::SmithConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Airframe {
    #[default]
    Multirotor,
    Helicopter,
    FixedWing,
}

impl Airframe {
    pub fn is_fixed_wing(self) -> bool {
        matches!(self, Airframe::FixedWing)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidBank {
    pub p: u16,
    pub i: u16,
    pub d: u16,
    #[serde(default)]
    pub ff: u16,
}

impl PidBank {
    pub const fn new(p: u16, i: u16, d: u16, ff: u16) -> Self {
        Self { p, i, d, ff }
    }
}

/// Gain set for one airframe class. Rate axes, self-level, heading hold and the navigation loops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidBanks {
    pub roll: PidBank,
    pub pitch: PidBank,
    pub yaw: PidBank,
    /// P: self-level strength, I: level LPF cutoff (Hz), D: horizon transition (% stick).
    pub level: PidBank,
    pub heading: PidBank,
    pub pos_xy: PidBank,
    pub vel_xy: PidBank,
    pub pos_z: PidBank,
    pub vel_z: PidBank,
    pub surface: PidBank,
}

impl PidBanks {
    pub fn multirotor() -> Self {
        Self {
            roll: PidBank::new(40, 30, 23, 60),
            pitch: PidBank::new(40, 30, 23, 60),
            yaw: PidBank::new(85, 45, 0, 0),
            level: PidBank::new(20, 15, 75, 0),
            heading: PidBank::new(60, 0, 0, 0),
            pos_xy: PidBank::new(65, 0, 0, 0),
            vel_xy: PidBank::new(40, 15, 100, 40),
            pos_z: PidBank::new(50, 0, 0, 0),
            vel_z: PidBank::new(100, 50, 10, 0),
            surface: PidBank::new(50, 0, 0, 0),
        }
    }

    pub fn fixed_wing() -> Self {
        Self {
            roll: PidBank::new(5, 7, 0, 50),
            pitch: PidBank::new(5, 7, 0, 50),
            yaw: PidBank::new(6, 10, 0, 60),
            level: PidBank::new(20, 5, 75, 0),
            heading: PidBank::new(60, 0, 0, 0),
            pos_xy: PidBank::new(75, 5, 8, 0),
            vel_xy: PidBank::new(0, 0, 0, 0),
            pos_z: PidBank::new(40, 5, 10, 0),
            vel_z: PidBank::new(0, 0, 0, 0),
            surface: PidBank::new(50, 0, 0, 0),
        }
    }

    pub fn axis(&self, axis: usize) -> PidBank {
        match axis {
            0 => self.roll,
            1 => self.pitch,
            _ => self.yaw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItermRelax {
    Off,
    Rp,
    Rpy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PidProfile {
    pub bank_mc: PidBanks,
    pub bank_fw: PidBanks,

    /// Stabilised rates in units of 10 deg/s (roll, pitch, yaw).
    pub rates: [u8; 3],
    /// Decidegrees (roll, pitch).
    pub max_angle_inclination: [i16; 2],

    pub dterm_lpf_kind: LowPassKind,
    pub dterm_lpf_hz: f32,
    pub dterm_lpf2_hz: f32,
    /// Use the noise-robust FIR differentiator on gyro instead of a plain first difference.
    pub dterm_nrd: bool,
    pub yaw_lpf_hz: f32,
    pub cd_lpf_hz: f32,

    pub iterm_windup_point_percent: u8,
    pub pid_sum_limit: f32,
    pub pid_sum_limit_yaw: f32,
    pub axis_accel_limit_roll_pitch: u32,
    pub axis_accel_limit_yaw: u32,
    pub heading_hold_rate_limit: u8,

    pub d_boost_factor: f32,
    pub d_boost_max_at_accel: f32,
    pub d_boost_gyro_delta_lpf_hz: f32,

    pub antigravity_gain: f32,
    pub antigravity_accelerator: f32,
    pub antigravity_cutoff_hz: f32,

    pub iterm_relax: ItermRelax,
    pub iterm_relax_cutoff_hz: f32,

    pub fw_iterm_throw_limit: f32,
    pub fw_reference_airspeed: f32,
    pub fw_coordinated_yaw_gain: f32,
    pub fw_coordinated_pitch_gain: f32,
    pub fw_iterm_limit_stick_position: f32,
    pub fw_yaw_iterm_bank_freeze: u8,

    /// Throttle PID attenuation percentage and breakpoint (us).
    pub tpa_rate: u8,
    pub tpa_breakpoint: u16,

    pub rpm_filter: RpmFilterConfig,
    pub smith: SmithConfig,
}

impl Default for PidProfile {
    fn default() -> Self {
        Self {
            bank_mc: PidBanks::multirotor(),
            bank_fw: PidBanks::fixed_wing(),
            rates: [20, 20, 20],
            max_angle_inclination: [300, 300],
            dterm_lpf_kind: LowPassKind::Biquad,
            dterm_lpf_hz: 40.0,
            dterm_lpf2_hz: 0.0,
            dterm_nrd: false,
            yaw_lpf_hz: 0.0,
            cd_lpf_hz: 30.0,
            iterm_windup_point_percent: 50,
            pid_sum_limit: 500.0,
            pid_sum_limit_yaw: 400.0,
            axis_accel_limit_roll_pitch: 0,
            axis_accel_limit_yaw: 10000,
            heading_hold_rate_limit: 90,
            d_boost_factor: 1.25,
            d_boost_max_at_accel: 7500.0,
            d_boost_gyro_delta_lpf_hz: 80.0,
            antigravity_gain: 1.0,
            antigravity_accelerator: 1.0,
            antigravity_cutoff_hz: 15.0,
            iterm_relax: ItermRelax::Rp,
            iterm_relax_cutoff_hz: 15.0,
            fw_iterm_throw_limit: 165.0,
            fw_reference_airspeed: 1000.0,
            fw_coordinated_yaw_gain: 1.0,
            fw_coordinated_pitch_gain: 1.0,
            fw_iterm_limit_stick_position: 0.5,
            fw_yaw_iterm_bank_freeze: 0,
            tpa_rate: 0,
            tpa_breakpoint: 1500,
            rpm_filter: RpmFilterConfig::default(),
            smith: SmithConfig::default(),
        }
    }
}

impl PidProfile {
    pub fn bank(&self, airframe: Airframe) -> &PidBanks {
        if airframe.is_fixed_wing() {
            &self.bank_fw
        } else {
            &self.bank_mc
        }
    }
}

/// Motor command range in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub min_command: u16,
    pub idle: u16,
    pub max: u16,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self { min_command: 1000, idle: 1150, max: 1850 }
    }
}
