use helm_ctrl::profile::{Airframe, PidProfile, ThrottleConfig};
use helm_ctrl::Vec3;
use helm_nav::gnss::{FixQuality, FixType};
use helm_nav::landing::{LandingDetector, LandingInputs};
use helm_nav::mission::{FLAG_LAST, WP_CURRENT};
use helm_nav::{
    BoxModes, EstimateStatus, ForcedRthState, GeoPoint, GnssThresholds, GpsSolution, NavConfig, NavState,
    NavigationContext, PilotInput, RcConfig, Waypoint, WaypointAction,
};

const TICK_US: u64 = 10_000;

/// Teleporting vehicle: each step reports `pos` as a good GPS fix, baro altitude and north heading.
struct Rig {
    nav: NavigationContext,
    now_us: u64,
    pos: Vec3,
    gps_ok: bool,
    boxes: BoxModes,
}

impl Rig {
    fn new(cfg: NavConfig) -> Self {
        let nav =
            NavigationContext::new(cfg, RcConfig::default(), &PidProfile::default(), ThrottleConfig::default(), Airframe::Multirotor);
        Self { nav, now_us: 0, pos: Vec3::ZERO, gps_ok: true, boxes: BoxModes::empty() }
    }

    fn launch_site() -> GeoPoint {
        GeoPoint::from_degrees(46.52, 6.63, 380.0)
    }

    fn geo(&self, local: &Vec3) -> GeoPoint {
        self.nav.origin().to_geodetic(local).unwrap_or_else(Self::launch_site)
    }

    fn waypoint_at(&self, x: f32, y: f32, alt: i32, last: bool) -> Waypoint {
        let g = self.geo(&Vec3::new(x, y, 0.0));
        Waypoint {
            action: WaypointAction::Waypoint,
            lat: g.lat,
            lon: g.lon,
            alt,
            flag: if last { FLAG_LAST } else { 0 },
            ..Default::default()
        }
    }

    fn step(&mut self) {
        self.now_us += TICK_US;
        let sol = if self.gps_ok {
            GpsSolution {
                fix: FixType::Fix3D,
                point: self.geo(&self.pos),
                vel_neu: [0.0; 3],
                quality: FixQuality { sats: 14, hdop: 0.8, fix_age_ms: 100 },
            }
        } else {
            GpsSolution::default()
        };
        let now = self.now_us;
        self.nav.ingest_gps(now, &sol, &GnssThresholds::default());
        self.nav.update_altitude_and_climb_rate(now, true, self.pos.z, 0.0, -1.0, 0.0, EstimateStatus::None);
        self.nav.update_heading(now, true, 0);
        self.nav.set_pilot_input(PilotInput { boxes: self.boxes, throttle: 1500.0, ..Default::default() });
        self.nav.tick(now);
    }

    fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Settles on the ground, arms, and hovers at `alt` with no mode selected.
    fn take_off(&mut self, alt: f32) {
        self.run(5);
        assert!(self.nav.home().is_fixed());
        self.nav.set_armed(true);
        self.pos.z = alt;
        self.run(2);
    }
}

#[test]
fn jump_repeats_its_target_then_falls_through() {
    let mut rig = Rig::new(NavConfig::default());
    rig.run(5);

    let first = rig.waypoint_at(3000.0, 0.0, 1500, false);
    let jump = Waypoint { action: WaypointAction::Jump, p1: 1, p2: 2, ..Default::default() };
    let last = rig.waypoint_at(0.0, 3000.0, 1500, true);
    assert!(rig.nav.set_waypoint(1, &first));
    assert!(rig.nav.set_waypoint(2, &jump));
    assert!(rig.nav.set_waypoint(3, &last));
    assert_eq!(rig.nav.mission().invalid_jump(), None);

    rig.take_off(1500.0);
    rig.boxes = BoxModes::WP;

    // away from every waypoint while a leg is being set up
    let park = Vec3::new(-5000.0, -5000.0, 1500.0);
    let mut legs = Vec::new();
    let mut was_on_leg = false;
    for _ in 0..300 {
        let on_leg = rig.nav.state() == NavState::WaypointInProgress;
        if on_leg {
            if !was_on_leg {
                legs.push(rig.nav.mission().active_index());
            }
            rig.pos = rig.nav.active_waypoint().pos;
        } else {
            rig.pos = park;
        }
        was_on_leg = on_leg;
        rig.step();
        if rig.nav.state() == NavState::WaypointFinished {
            break;
        }
    }

    assert_eq!(legs, vec![0, 0, 0, 2]);
    assert_eq!(rig.nav.state(), NavState::WaypointFinished);
    // the counter is restored for the next run
    assert_eq!(rig.nav.mission().get(1).map(|wp| wp.p3), Some(2));
}

#[test]
fn rth_heads_home_and_starts_landing() {
    let mut rig = Rig::new(NavConfig::default());
    rig.take_off(1500.0);
    rig.pos = Vec3::new(5000.0, 0.0, 1500.0);
    rig.run(2);
    rig.boxes = BoxModes::RTH;

    let mut seen = Vec::new();
    for _ in 0..400 {
        rig.step();
        let state = rig.nav.state();
        if seen.last() != Some(&state) {
            seen.push(state);
        }
        match state {
            NavState::RthClimbToSafeAlt => rig.pos.z = rig.nav.desired().pos.z,
            // close in a metre per tick
            NavState::RthHeadHome => rig.pos.x = (rig.pos.x - 100.0).max(0.0),
            NavState::RthLanding => break,
            _ => {}
        }
    }

    assert!(seen.contains(&NavState::RthHeadHome), "{seen:?}");
    assert_eq!(rig.nav.state(), NavState::RthLanding);
    assert!(rig.nav.is_controlling_throttle());
    assert!(rig.nav.rth_allows_landing());
}

#[test]
fn rth_flying_away_aborts_into_emergency_landing() {
    let cfg = NavConfig { rth_abort_threshold: 2000, ..Default::default() };
    let mut rig = Rig::new(cfg);
    rig.take_off(1500.0);
    rig.pos = Vec3::new(5000.0, 0.0, 1500.0);
    rig.run(2);
    rig.boxes = BoxModes::RTH;
    rig.run(3);
    assert_eq!(rig.nav.state(), NavState::RthHeadHome);

    // compass error: every tick takes the craft further out
    for _ in 0..100 {
        rig.pos.x += 100.0;
        rig.step();
        if rig.nav.state() == NavState::EmergencyLandingInProgress {
            break;
        }
    }
    assert_eq!(rig.nav.state(), NavState::EmergencyLandingInProgress);
    assert!(rig.pos.x - 5000.0 > 2000.0);

    // the RTH switch is still on but emergency landing keeps control
    rig.run(20);
    assert_eq!(rig.nav.state(), NavState::EmergencyLandingInProgress);
}

#[test]
fn lost_position_lands_after_the_failure_timeout() {
    let mut rig = Rig::new(NavConfig::default());
    rig.run(5);
    let far = rig.waypoint_at(50_000.0, 0.0, 1500, true);
    assert!(rig.nav.set_waypoint(1, &far));
    rig.take_off(1500.0);
    rig.boxes = BoxModes::WP;
    rig.run(3);
    assert_eq!(rig.nav.state(), NavState::WaypointInProgress);

    rig.gps_ok = false;
    rig.run(490);
    assert_eq!(rig.nav.estimates().pos, EstimateStatus::None);
    assert_eq!(rig.nav.state(), NavState::WaypointInProgress);

    rig.run(20);
    assert_eq!(rig.nav.state(), NavState::EmergencyLandingInProgress);

    rig.nav.set_armed(false);
    rig.step();
    assert_eq!(rig.nav.state(), NavState::Idle);
}

#[test]
fn ground_station_moves_the_hold_point_until_released() {
    let mut rig = Rig::new(NavConfig::default());
    rig.take_off(1500.0);
    rig.boxes = BoxModes::POSHOLD | BoxModes::GCS_NAV;
    rig.run(3);
    assert_eq!(rig.nav.state(), NavState::PosHoldInProgress);
    assert!(rig.nav.desired().pos.x.abs() < 1.0);

    let target = rig.waypoint_at(2000.0, 0.0, 0, false);
    assert!(rig.nav.set_waypoint(WP_CURRENT, &target));
    assert!((rig.nav.desired().pos.x - 2000.0).abs() < 2.0);
    assert!((rig.nav.desired().pos.z - 1500.0).abs() < 1.0);

    rig.run(5);
    assert!(rig.nav.desired().vel.x > 0.0);

    rig.boxes = BoxModes::POSHOLD;
    rig.run(2);
    assert_eq!(rig.nav.state(), NavState::PosHoldInProgress);
    assert!(rig.nav.desired().pos.x.abs() < 1.0);
}

#[test]
fn forced_rth_overrides_the_pilot() {
    let mut rig = Rig::new(NavConfig::default());
    rig.take_off(1500.0);
    rig.pos = Vec3::new(5000.0, 0.0, 1500.0);
    rig.boxes = BoxModes::POSHOLD;
    rig.run(3);
    assert_eq!(rig.nav.state(), NavState::PosHoldInProgress);

    rig.nav.activate_forced_rth();
    assert_eq!(rig.nav.forced_rth_state(), ForcedRthState::InProgress);
    rig.run(3);
    assert!(rig.nav.is_flying_autonomous());

    rig.nav.abort_forced_rth();
    rig.run(3);
    assert_eq!(rig.nav.forced_rth_state(), ForcedRthState::Idle);
    assert_eq!(rig.nav.state(), NavState::PosHoldInProgress);
}

fn resting(now_ms: u64) -> LandingInputs {
    LandingInputs {
        now_ms,
        vel_z: 20.0,
        vel_xy: 30.0,
        gyro: [1.0, 0.5, 0.5],
        acc_z: 981.0,
        lift: 1150.0,
        hover_lift: 1500.0,
        gbump_lift_limit: 1400.0,
        alt_trusted: true,
        sensitivity: 1.0,
        auto_disarm_delay_ms: 1000,
        ..Default::default()
    }
}

#[test]
fn landing_needs_an_unbroken_still_period() {
    let mut d = LandingDetector::for_airframe(Airframe::Multirotor);
    // ground idle before takeoff never counts
    for t in (0..3000).step_by(100) {
        assert!(!d.update(&resting(t)));
    }
    assert!(!d.is_active());

    let flying = LandingInputs { lift: 1600.0, gyro: [10.0, 10.0, 10.0], ..resting(3000) };
    assert!(!d.update(&flying));
    assert!(d.is_active());

    // still from 3100, with a bump at 3500 that restarts the clock
    for t in (3100..3500).step_by(100) {
        assert!(!d.update(&resting(t)));
    }
    assert!(!d.update(&LandingInputs { vel_z: 150.0, ..resting(3500) }));
    for t in (3600..5600).step_by(100) {
        assert!(!d.update(&resting(t)), "landed early at {t}");
    }
    assert!(d.update(&resting(5600)));
    assert!(d.is_landed());
}

#[test]
fn untrusted_altitude_stretches_the_landing_hold() {
    let mut d = LandingDetector::for_airframe(Airframe::Multirotor);
    let flying = LandingInputs { lift: 1600.0, gyro: [10.0, 10.0, 10.0], ..resting(0) };
    d.update(&flying);
    let blind = |t| LandingInputs { alt_trusted: false, ..resting(t) };
    for t in (100..6100).step_by(100) {
        assert!(!d.update(&blind(t)), "landed early at {t}");
    }
    assert!(d.update(&blind(6100)));
}
