//! Touchdown detection. Rotorcraft watch thrust and motion, fixed wings motion only.
//! Either way the condition must hold without a break before landing is declared.

use helm_ctrl::math::GRAVITY_CMSS;
use helm_ctrl::profile::Airframe;
use tracing::{debug, info};

use crate::context::{DisarmReason, EstimateStatus, NavigationContext};
use crate::fsm::StateFlags;

/// Hold time with a trusted altitude estimate.
pub const SAFETY_TIME_MS: u64 = 1000;
pub const SAFETY_TIME_UNTRUSTED_ALT_MS: u64 = 5000;

/// cm/s at sensitivity 5.
const VEL_Z_MOVING: f32 = 100.0;
const VEL_XY_MOVING: f32 = 100.0;
/// Average absolute gyro rate, deg/s at sensitivity 5.
const MC_GYRO_STILL: f32 = 4.0;
const FW_GYRO_STILL: f32 = 2.0;
/// Thrust averaging starts once the descent throttle has settled.
const THR_STABILISE_DELAY_MS: u64 = 1000;
/// Lift this far below the descent average means the ground carries the weight.
const DESCEND_THROTTLE_MARGIN: f32 = 40.0;
const SAFE_SURFACE_CM: f32 = 5.0;

const GBUMP_WINDOW_MS: u64 = 100;
const GBUMP_SINK_RATE: f32 = -200.0;

/// Rotorcraft count as flying above hover with some rotation going on.
const MC_FLYING_GYRO: f32 = 7.0;
const FW_FLYING_SPEED: f32 = 250.0;

/// One sample of what the detector looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct LandingInputs {
    pub now_ms: u64,
    pub vel_z: f32,
    pub vel_xy: f32,
    /// deg/s
    pub gyro: [f32; 3],
    /// cm/s/s, gravity included.
    pub acc_z: f32,
    pub baro_climb_rate: f32,
    /// An autonomous landing is being flown.
    pub landing_phase: bool,
    /// Lift command actually sent, us.
    pub lift: f32,
    pub hover_lift: f32,
    /// Lift must be under this for a touchdown bump to count.
    pub gbump_lift_limit: f32,
    pub alt_trusted: bool,
    /// AGL and lowest AGL seen, when the surface sensor is trusted.
    pub surface: Option<(f32, f32)>,
    /// `land_detect_sensitivity / 5`.
    pub sensitivity: f32,
    pub auto_disarm_delay_ms: u64,
}

impl LandingInputs {
    fn average_gyro(&self) -> f32 {
        self.gyro.iter().map(|g| g.abs()).sum::<f32>() / 3.0
    }

    fn is_still(&self) -> bool {
        self.vel_z.abs() < VEL_Z_MOVING * self.sensitivity && self.vel_xy < VEL_XY_MOVING * self.sensitivity
    }

    fn required_hold_ms(&self) -> u64 {
        let safety = if self.alt_trusted { SAFETY_TIME_MS } else { SAFETY_TIME_UNTRUSTED_ALT_MS };
        safety + self.auto_disarm_delay_ms
    }
}

/// Continuous-truth timer. The first true sample starts it, any false one clears it.
#[derive(Debug, Clone, Copy, Default)]
struct Hold {
    since_ms: Option<u64>,
}

impl Hold {
    fn check(&mut self, condition: bool, now_ms: u64, required_ms: u64) -> bool {
        if !condition {
            self.since_ms = None;
            return false;
        }
        let since = *self.since_ms.get_or_insert(now_ms);
        now_ms.saturating_sub(since) >= required_ms
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RotorcraftLanding {
    started_ms: Option<u64>,
    thr_sum: f32,
    thr_samples: u32,
    gbump_at_ms: Option<u64>,
}

impl RotorcraftLanding {
    /// Touchdown spike: over 2 g, then back under 1 g within 100 ms while sinking with low lift.
    fn gbump(&mut self, inp: &LandingInputs) -> bool {
        let g = inp.acc_z / GRAVITY_CMSS;
        match self.gbump_at_ms {
            None => {
                if g > 2.0 && inp.baro_climb_rate < 0.0 {
                    self.gbump_at_ms = Some(inp.now_ms);
                }
                false
            }
            Some(at) if inp.now_ms < at + GBUMP_WINDOW_MS => {
                g < 1.0 && inp.baro_climb_rate < GBUMP_SINK_RATE && inp.lift < inp.gbump_lift_limit
            }
            Some(_) => {
                if g <= 1.0 {
                    self.gbump_at_ms = None;
                }
                false
            }
        }
    }

    fn possible_landing(&mut self, inp: &LandingInputs) -> bool {
        let started = *self.started_ms.get_or_insert(inp.now_ms);
        let still = inp.is_still();

        let mut possible = if inp.landing_phase {
            let mut minimal_thrust = false;
            if inp.now_ms.saturating_sub(started) > THR_STABILISE_DELAY_MS {
                self.thr_sum += inp.lift;
                self.thr_samples += 1;
                minimal_thrust = inp.lift < self.thr_sum / self.thr_samples as f32 - DESCEND_THROTTLE_MARGIN;
            }
            minimal_thrust && still
        } else {
            // first sample only arms the detector
            started != inp.now_ms && still && inp.average_gyro() < MC_GYRO_STILL * inp.sensitivity
        };

        if let Some((agl, surface_min)) = inp.surface {
            if agl >= 0.0 {
                possible = possible && agl <= surface_min + SAFE_SURFACE_CM;
            }
        }
        possible
    }

    fn is_flying(inp: &LandingInputs) -> bool {
        inp.lift > inp.hover_lift && inp.average_gyro() > MC_FLYING_GYRO
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FixedWingLanding;

impl FixedWingLanding {
    fn possible_landing(inp: &LandingInputs) -> bool {
        inp.is_still() && inp.average_gyro() < FW_GYRO_STILL * inp.sensitivity
    }

    fn is_flying(inp: &LandingInputs) -> bool {
        inp.vel_xy > FW_FLYING_SPEED
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Detector {
    Rotorcraft(RotorcraftLanding),
    FixedWing(FixedWingLanding),
}

/// Per-airframe detector plus the common activation and hold logic.
#[derive(Debug, Clone, Copy)]
pub struct LandingDetector {
    detector: Detector,
    active: bool,
    landed: bool,
    hold: Hold,
}

impl LandingDetector {
    pub fn for_airframe(airframe: Airframe) -> Self {
        let detector = match airframe {
            Airframe::FixedWing => Detector::FixedWing(FixedWingLanding),
            Airframe::Multirotor | Airframe::Helicopter => Detector::Rotorcraft(RotorcraftLanding::default()),
        };
        Self { detector, active: false, landed: false, hold: Hold::default() }
    }

    /// Restarts detection. Activation survives so a landing can follow straight away.
    pub fn reset(&mut self) {
        self.landed = false;
        self.hold = Hold::default();
        if let Detector::Rotorcraft(mc) = &mut self.detector {
            *mc = RotorcraftLanding::default();
        }
    }

    /// Back to the on-ground state of a fresh arming.
    pub fn deactivate(&mut self) {
        self.reset();
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_landed(&self) -> bool {
        self.landed
    }

    /// Feeds one sample. Inactive until flight has been seen or an autonomous landing starts.
    pub fn update(&mut self, inp: &LandingInputs) -> bool {
        if self.landed {
            return true;
        }
        if !self.active {
            let flying = match self.detector {
                Detector::Rotorcraft(_) => RotorcraftLanding::is_flying(inp),
                Detector::FixedWing(_) => FixedWingLanding::is_flying(inp),
            };
            if !(flying || inp.landing_phase) {
                return false;
            }
            debug!("landing detector active");
            self.reset();
            self.active = true;
        }

        let possible = match &mut self.detector {
            Detector::Rotorcraft(mc) => {
                if inp.landing_phase && mc.gbump(inp) {
                    self.landed = true;
                    return true;
                }
                mc.possible_landing(inp)
            }
            Detector::FixedWing(_) => FixedWingLanding::possible_landing(inp),
        };
        self.landed = self.hold.check(possible, inp.now_ms, inp.required_hold_ms());
        self.landed
    }
}

impl NavigationContext {
    fn landing_inputs(&self) -> LandingInputs {
        let lift = if self.is_controlling_throttle() { self.rotor.adjusted_lift } else { self.pilot_lift() };
        let range = self.rotor.lift;
        let share = if self.is_controlling_throttle() { 0.8 } else { 0.5 };
        let surface = (self.est.agl == EstimateStatus::Trusted).then_some((self.actual.agl.pos.z, self.actual.surface_min));
        LandingInputs {
            now_ms: self.now_ms(),
            vel_z: self.current_posvel().vel.z,
            vel_xy: self.actual.vel_xy,
            gyro: self.imu.gyro,
            acc_z: self.imu.acc[2],
            baro_climb_rate: self.imu.baro_climb_rate,
            landing_phase: self.state_flags().contains(StateFlags::CTL_LAND),
            lift,
            hover_lift: range.hover,
            gbump_lift_limit: range.min + share * (range.hover - range.min),
            alt_trusted: self.est.alt == EstimateStatus::Trusted,
            surface,
            sensitivity: f32::from(self.cfg.land_detect_sensitivity) / 5.0,
            auto_disarm_delay_ms: u64::from(self.cfg.auto_disarm_delay),
        }
    }

    /// Runs the detector once per tick and asks for a disarm after touchdown when configured.
    pub(crate) fn update_landing_status(&mut self) {
        if !self.flags.armed {
            self.landing.deactivate();
            return;
        }
        if self.landing.is_landed() {
            return;
        }
        let inputs = self.landing_inputs();
        if self.landing.update(&inputs) {
            info!("landing detected");
            if self.cfg.disarm_on_landing && !self.flags.failsafe {
                self.disarm_request = Some(DisarmReason::Landing);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn still(now_ms: u64) -> LandingInputs {
        LandingInputs {
            now_ms,
            vel_z: -10.0,
            vel_xy: 20.0,
            gyro: [1.0, 1.0, 1.0],
            acc_z: GRAVITY_CMSS,
            lift: 1300.0,
            hover_lift: 1500.0,
            gbump_lift_limit: 1400.0,
            alt_trusted: true,
            sensitivity: 1.0,
            auto_disarm_delay_ms: 1000,
            ..Default::default()
        }
    }

    fn active(airframe: Airframe) -> LandingDetector {
        let mut d = LandingDetector::for_airframe(airframe);
        d.active = true;
        d
    }

    #[test]
    fn hold_needs_safety_time_plus_disarm_delay() {
        let mut d = active(Airframe::Multirotor);
        // arming sample
        assert!(!d.update(&still(0)));
        let mut t = 100;
        while t < 2100 {
            assert!(!d.update(&still(t)), "landed early at {}", t);
            t += 100;
        }
        assert!(d.update(&still(2100)));
        assert!(d.is_landed());
    }

    #[test]
    fn untrusted_altitude_waits_longer() {
        let mut d = active(Airframe::Multirotor);
        d.update(&still(0));
        let sample = |t| LandingInputs { alt_trusted: false, ..still(t) };
        for t in (100..6100).step_by(100) {
            assert!(!d.update(&sample(t)), "landed early at {}", t);
        }
        assert!(d.update(&sample(6100)));
    }

    #[test]
    fn movement_restarts_the_hold() {
        let mut d = active(Airframe::Multirotor);
        d.update(&still(0));
        for t in (100..1500).step_by(100) {
            d.update(&still(t));
        }
        let moving = LandingInputs { vel_xy: 150.0, ..still(1500) };
        assert!(!d.update(&moving));
        for t in (1600..3600).step_by(100) {
            assert!(!d.update(&still(t)), "landed early at {}", t);
        }
        assert!(d.update(&still(3600)));
    }

    #[test]
    fn velocity_thresholds_scale_with_sensitivity() {
        let inp = LandingInputs { vel_z: 150.0, ..still(0) };
        assert!(!inp.is_still());
        assert!(LandingInputs { sensitivity: 2.0, ..inp }.is_still());
        assert!(!LandingInputs { vel_xy: 100.0, ..still(0) }.is_still());
    }

    #[test]
    fn autonomous_landing_needs_thrust_below_average() {
        let mut d = LandingDetector::for_airframe(Airframe::Multirotor);
        let landing = |t, lift| LandingInputs { landing_phase: true, lift, ..still(t) };
        // descending at a steady lift never counts
        for t in (0..5000).step_by(100) {
            assert!(!d.update(&landing(t, 1400.0)));
        }
        assert!(d.is_active());
        // lift drops well below the running average once on the ground
        let mut landed_at = None;
        for t in (5000..9000).step_by(100) {
            if d.update(&landing(t, 1300.0)) {
                landed_at = Some(t);
                break;
            }
        }
        assert_eq!(landed_at, Some(7000));
    }

    #[test]
    fn surface_sensor_must_read_ground() {
        let mut mc = RotorcraftLanding::default();
        mc.possible_landing(&still(0));
        assert!(mc.possible_landing(&LandingInputs { surface: Some((12.0, 10.0)), ..still(100) }));
        assert!(!mc.possible_landing(&LandingInputs { surface: Some((40.0, 10.0)), ..still(200) }));
    }

    #[test]
    fn gbump_declares_landing_at_once() {
        let mut d = active(Airframe::Multirotor);
        let base = |t| LandingInputs { landing_phase: true, baro_climb_rate: -250.0, vel_z: -250.0, ..still(t) };
        assert!(!d.update(&LandingInputs { acc_z: 2.5 * GRAVITY_CMSS, ..base(0) }));
        assert!(d.update(&LandingInputs { acc_z: 0.5 * GRAVITY_CMSS, ..base(40) }));
    }

    #[test]
    fn gbump_window_expires() {
        let mut mc = RotorcraftLanding::default();
        let base = |t, acc| LandingInputs { acc_z: acc, baro_climb_rate: -250.0, ..still(t) };
        assert!(!mc.gbump(&base(0, 2.5 * GRAVITY_CMSS)));
        assert!(!mc.gbump(&base(150, 0.5 * GRAVITY_CMSS)));
        assert!(mc.gbump_at_ms.is_none());
    }

    #[test]
    fn inactive_until_flight_seen() {
        let mut d = LandingDetector::for_airframe(Airframe::Multirotor);
        for t in (0..5000).step_by(100) {
            assert!(!d.update(&still(t)));
        }
        assert!(!d.is_active());
        d.update(&LandingInputs { lift: 1600.0, gyro: [10.0, 10.0, 10.0], ..still(5000) });
        assert!(d.is_active());
    }

    #[test]
    fn fixed_wing_activates_on_speed_and_lands_still() {
        let mut d = LandingDetector::for_airframe(Airframe::FixedWing);
        d.update(&LandingInputs { vel_xy: 1200.0, ..still(0) });
        assert!(d.is_active());
        for t in (100..2100).step_by(100) {
            assert!(!d.update(&still(t)));
        }
        assert!(d.update(&still(2100)));
    }
}
