use serde::{Deserialize, Serialize};

use crate::filter::{BiquadFilter, BiquadKind, Pt1Filter};
use crate::math::constrain;

pub const MAX_RPM_MOTORS: usize = 8;
pub const MAX_RPM_HARMONICS: usize = 3;
const FREQ_LPF_HZ: f32 = 150.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RpmFilterConfig {
    pub enabled: bool,
    pub harmonics: u8,
    pub min_hz: f32,
    /// Notch Q scaled by 100.
    pub q: u16,
}

impl Default for RpmFilterConfig {
    fn default() -> Self {
        Self { enabled: false, harmonics: 1, min_hz: 100.0, q: 500 }
    }
}

#[derive(Debug, Clone)]
struct MotorNotches {
    freq: Pt1Filter,
    // [harmonic][axis]
    notches: Vec<[BiquadFilter; 3]>,
}

#[derive(Debug, Clone)]
pub struct RpmNotchBank {
    looptime_us: u32,
    q: f32,
    min_hz: f32,
    max_hz: f32,
    motors: Vec<MotorNotches>,
}

/// Gyro notch stage tracking motor RPM harmonics, chosen once from configuration.
#[derive(Debug, Clone)]
pub enum RpmFilter {
    Disabled,
    Enabled(RpmNotchBank),
}

impl RpmFilter {
    pub fn new(cfg: &RpmFilterConfig, motor_count: usize, looptime_us: u32) -> Self {
        if !cfg.enabled || motor_count == 0 || looptime_us == 0 {
            return RpmFilter::Disabled;
        }
        let harmonics = usize::from(cfg.harmonics).clamp(1, MAX_RPM_HARMONICS);
        let sample_rate = 1e6 / looptime_us as f32;
        let update_dt = looptime_us as f32 * 1e-6;
        let motors = (0..motor_count.min(MAX_RPM_MOTORS))
            .map(|_| MotorNotches {
                freq: Pt1Filter::new(FREQ_LPF_HZ, update_dt),
                notches: vec![[BiquadFilter::passthrough(); 3]; harmonics],
            })
            .collect();
        RpmFilter::Enabled(RpmNotchBank {
            looptime_us,
            q: f32::from(cfg.q) / 100.0,
            min_hz: cfg.min_hz,
            max_hz: 0.48 * sample_rate,
            motors,
        })
    }

    /// Retunes notches from the latest motor speeds (RPM).
    pub fn update(&mut self, motor_rpm: &[f32]) {
        let RpmFilter::Enabled(bank) = self else {
            return;
        };
        for (motor, &rpm) in bank.motors.iter_mut().zip(motor_rpm) {
            let base_hz = motor.freq.apply(rpm / 60.0);
            for (h, axes) in motor.notches.iter_mut().enumerate() {
                let hz = constrain(base_hz * (h as f32 + 1.0), bank.min_hz, bank.max_hz);
                for notch in axes.iter_mut() {
                    notch.update(hz, bank.looptime_us, bank.q, BiquadKind::Notch);
                }
            }
        }
    }

    pub fn apply(&mut self, axis: usize, input: f32) -> f32 {
        match self {
            RpmFilter::Disabled => input,
            RpmFilter::Enabled(bank) => {
                let mut out = input;
                for motor in bank.motors.iter_mut() {
                    for axes in motor.notches.iter_mut() {
                        if let Some(notch) = axes.get_mut(axis) {
                            out = notch.apply(out);
                        }
                    }
                }
                out
            }
        }
    }
}
