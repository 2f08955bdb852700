//! Fixed-wing hand and bungee launch: detect the throw, hold the motor, spin up, climb out.

use helm_ctrl::math::{constrain, scale_range};
use helm_ctrl::rate::{angle_to_rc_command, PITCH, ROLL, THROTTLE};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::FwLaunchConfig;
use crate::context::NavigationContext;

/// A throw is only accepted with the wings within this bank and pitch, decidegrees.
const LAUNCH_MAX_ANGLE: f32 = 450.0;
/// Yaw rate of an arm swing, deg/s.
const SWING_RATE_THRESH: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LaunchPhase {
    Idle,
    /// Armed and waiting for the throw.
    Waiting,
    MotorDelay,
    SpinUp,
    Climb,
    Finished,
    Aborted,
}

/// What the throw detector samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchInputs {
    /// Body-frame forward acceleration, cm/s/s.
    pub forward_accel: f32,
    /// roll, pitch in decidegrees.
    pub attitude: [f32; 2],
    /// deg/s
    pub yaw_rate: f32,
    /// cm/s
    pub ground_speed: f32,
}

impl LaunchInputs {
    fn is_level(&self) -> bool {
        self.attitude.iter().all(|a| a.abs() <= LAUNCH_MAX_ANGLE)
    }
}

/// Throttle (us) and pitch (decidegrees, nose up positive) for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaunchOutput {
    pub throttle: f32,
    pub pitch: f32,
    pub level_wings: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct LaunchController {
    cfg: FwLaunchConfig,
    phase: LaunchPhase,
    phase_started_us: u64,
    launch_started_us: u64,
    detect_since_us: Option<u64>,
    detected: bool,
    start_altitude: f32,
}

impl LaunchController {
    pub fn new(cfg: FwLaunchConfig) -> Self {
        Self {
            cfg,
            phase: LaunchPhase::Idle,
            phase_started_us: 0,
            launch_started_us: 0,
            detect_since_us: None,
            detected: false,
            start_altitude: 0.0,
        }
    }

    pub fn phase(&self) -> LaunchPhase {
        self.phase
    }

    /// Arms detection.
    pub fn reset(&mut self, now_us: u64) {
        self.phase = LaunchPhase::Waiting;
        self.phase_started_us = now_us;
        self.detect_since_us = None;
        self.detected = false;
    }

    /// Bungee (forward kick while level) or swing (fast yaw with ground speed), held for `detect_time`.
    pub fn detect(&mut self, now_us: u64, inp: &LaunchInputs) -> bool {
        if self.detected {
            return true;
        }
        let bungee = inp.forward_accel > f32::from(self.cfg.accel_thresh) && inp.is_level();
        let swing = inp.yaw_rate > SWING_RATE_THRESH && inp.ground_speed > f32::from(self.cfg.velocity_thresh);
        if !(bungee || swing) {
            self.detect_since_us = None;
            return false;
        }
        let since = *self.detect_since_us.get_or_insert(now_us);
        if now_us.saturating_sub(since) >= u64::from(self.cfg.detect_time) * 1000 {
            info!("launch detected ({})", if bungee { "bungee" } else { "swing" });
            self.detected = true;
        }
        self.detected
    }

    pub fn is_detected(&self) -> bool {
        self.detected
    }

    pub fn enable(&mut self, now_us: u64, altitude: f32) {
        self.launch_started_us = now_us;
        self.start_altitude = altitude;
        self.enter(LaunchPhase::MotorDelay, now_us);
    }

    pub fn abort(&mut self) {
        if matches!(self.phase, LaunchPhase::Idle | LaunchPhase::Finished | LaunchPhase::Aborted) {
            return;
        }
        warn!("launch aborted in {:?}", self.phase);
        self.phase = LaunchPhase::Aborted;
    }

    pub fn is_finished_or_aborted(&self) -> bool {
        matches!(self.phase, LaunchPhase::Finished | LaunchPhase::Aborted)
    }

    fn enter(&mut self, phase: LaunchPhase, now_us: u64) {
        self.phase = phase;
        self.phase_started_us = now_us;
    }

    fn elapsed_ms(&self, now_us: u64, since_us: u64) -> u64 {
        now_us.saturating_sub(since_us) / 1000
    }

    /// Advances the sequence. Stick input after the motor started hands control back to the pilot.
    pub fn update(&mut self, now_us: u64, altitude: f32, sticks_deflected: bool) -> LaunchOutput {
        let idle = f32::from(self.cfg.idle_throttle);
        let launch = f32::from(self.cfg.throttle);
        let climb = f32::from(self.cfg.climb_angle) * 10.0;

        if matches!(self.phase, LaunchPhase::SpinUp | LaunchPhase::Climb) {
            if sticks_deflected {
                self.abort();
            } else if self.elapsed_ms(now_us, self.launch_started_us) >= u64::from(self.cfg.timeout) {
                info!("launch finished on timeout");
                self.enter(LaunchPhase::Finished, now_us);
            } else if self.cfg.max_altitude > 0 && altitude - self.start_altitude >= f32::from(self.cfg.max_altitude) {
                info!("launch finished at {:.0} cm", altitude - self.start_altitude);
                self.enter(LaunchPhase::Finished, now_us);
            }
        }

        match self.phase {
            LaunchPhase::Idle | LaunchPhase::Waiting | LaunchPhase::Finished | LaunchPhase::Aborted => {
                LaunchOutput { throttle: idle, pitch: climb, level_wings: false }
            }
            LaunchPhase::MotorDelay => {
                if self.elapsed_ms(now_us, self.phase_started_us) >= u64::from(self.cfg.motor_delay) {
                    self.enter(LaunchPhase::SpinUp, now_us);
                }
                LaunchOutput { throttle: idle, pitch: climb, level_wings: true }
            }
            LaunchPhase::SpinUp => {
                let spinup = f32::from(self.cfg.spinup_time);
                let t = self.elapsed_ms(now_us, self.phase_started_us) as f32;
                let throttle = if spinup > 0.0 {
                    constrain(scale_range(t, 0.0, spinup, idle, launch), idle.min(launch), idle.max(launch))
                } else {
                    launch
                };
                if t >= spinup {
                    self.enter(LaunchPhase::Climb, now_us);
                }
                LaunchOutput { throttle, pitch: climb, level_wings: true }
            }
            LaunchPhase::Climb => LaunchOutput { throttle: launch, pitch: climb, level_wings: true },
        }
    }
}

impl NavigationContext {
    fn launch_inputs(&self) -> LaunchInputs {
        LaunchInputs {
            forward_accel: self.imu.acc[0],
            attitude: [self.imu.attitude[0], self.imu.attitude[1]],
            yaw_rate: self.imu.gyro[2].abs(),
            ground_speed: self.gps_ground_speed,
        }
    }

    /// Drives the launch sequence while a LAUNCH state owns the outputs.
    pub(crate) fn apply_fixed_wing_launch_controller(&mut self) {
        let now = self.now_us;
        if self.launch.phase() == LaunchPhase::Waiting {
            let inputs = self.launch_inputs();
            self.launch.detect(now, &inputs);
        }
        let deflected = self.sticks_deflected();
        let out = self.launch.update(now, self.actual.abs.pos.z, deflected);
        if out.level_wings {
            self.rc_command[ROLL] = 0.0;
        }
        // nose up is stick back
        self.rc_command[PITCH] = -angle_to_rc_command(out.pitch, self.max_angle_inclination[1]);
        self.rc_command[THROTTLE] = out.throttle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> FwLaunchConfig {
        FwLaunchConfig { enabled: true, max_altitude: 2000, ..Default::default() }
    }

    fn kick() -> LaunchInputs {
        LaunchInputs { forward_accel: 2500.0, ..Default::default() }
    }

    #[test]
    fn throw_must_be_held_for_detect_time() {
        let mut l = LaunchController::new(cfg());
        l.reset(0);
        assert!(!l.detect(0, &kick()));
        assert!(!l.detect(30_000, &kick()));
        assert!(l.detect(40_000, &kick()));
        assert!(l.is_detected());
    }

    #[test]
    fn short_spike_is_ignored() {
        let mut l = LaunchController::new(cfg());
        l.reset(0);
        l.detect(0, &kick());
        l.detect(20_000, &LaunchInputs::default());
        assert!(!l.detect(45_000, &kick()));
    }

    #[test]
    fn banked_kick_is_no_launch_but_swing_is() {
        let mut l = LaunchController::new(cfg());
        l.reset(0);
        let banked = LaunchInputs { attitude: [600.0, 0.0], ..kick() };
        l.detect(0, &banked);
        assert!(!l.detect(50_000, &banked));
        let swing = LaunchInputs { yaw_rate: 150.0, ground_speed: 400.0, ..Default::default() };
        l.detect(60_000, &swing);
        assert!(l.detect(100_000, &swing));
    }

    #[test]
    fn sequence_holds_motor_then_spins_up_then_climbs() {
        let mut l = LaunchController::new(cfg());
        l.enable(0, 0.0);
        let out = l.update(100_000, 0.0, false);
        assert_eq!(out.throttle, 1000.0);
        assert_eq!(l.phase(), LaunchPhase::MotorDelay);
        l.update(500_000, 0.0, false);
        assert_eq!(l.phase(), LaunchPhase::SpinUp);
        let out = l.update(550_000, 0.0, false);
        assert!((out.throttle - 1350.0).abs() < 1e-3);
        l.update(600_000, 0.0, false);
        assert_eq!(l.phase(), LaunchPhase::Climb);
        let out = l.update(700_000, 100.0, false);
        assert_eq!(out.throttle, 1700.0);
        assert_eq!(out.pitch, 180.0);
    }

    #[test]
    fn climb_ends_on_altitude_or_timeout() {
        let mut l = LaunchController::new(cfg());
        l.enable(0, 100.0);
        l.update(500_000, 100.0, false);
        l.update(600_000, 100.0, false);
        l.update(700_000, 2100.0, false);
        assert_eq!(l.phase(), LaunchPhase::Finished);

        let mut l = LaunchController::new(cfg());
        l.enable(0, 0.0);
        l.update(500_000, 0.0, false);
        l.update(600_000, 0.0, false);
        l.update(5_000_000, 10.0, false);
        assert!(l.is_finished_or_aborted());
    }

    #[test]
    fn sticks_abort_only_once_motor_runs() {
        let mut l = LaunchController::new(cfg());
        l.enable(0, 0.0);
        l.update(100_000, 0.0, true);
        assert_eq!(l.phase(), LaunchPhase::MotorDelay);
        l.update(500_000, 0.0, false);
        l.update(520_000, 0.0, true);
        assert_eq!(l.phase(), LaunchPhase::Aborted);
    }

    #[test]
    fn abort_is_a_no_op_when_idle() {
        let mut l = LaunchController::new(cfg());
        l.abort();
        assert_eq!(l.phase(), LaunchPhase::Idle);
    }
}
