//! Closed-loop simulator: a point-mass multirotor flown by the navigation stack and the rate
//! loop, with scripted pilot input.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use helm_ctrl::math::GRAVITY_CMSS;
use helm_ctrl::rate::{rc_command_to_angle, rc_command_to_rate, PITCH, ROLL, THROTTLE, YAW};
use helm_ctrl::{Airframe, RateController, RateControllerKind, RateInputs, RateModes, Vec3};
use helm_link::mav::GcsLink;
use helm_link::GcsRequest;
use helm_nav::gnss::{FixQuality, FixType};
use helm_nav::{
    BoxModes, EstimateStatus, GeoOrigin, GeoPoint, GpsSolution, ImuSample, NavCommand, NavState,
    NavigationContext, PilotInput,
};
use helm_proto::{FlightEvent, NavTelemetry, Record};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Config;

/// Linear drag, 1/s.
const DRAG: f32 = 0.35;
/// Attitude response time constant, s.
const ATTITUDE_TAU: f32 = 0.1;
/// Yaw rate per degree of heading error when holding a heading, 1/s.
const HEADING_GAIN: f32 = 2.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub duration_s: f32,
    pub loop_hz: u32,
    pub realtime: bool,
    pub seed: u64,
    pub gps_noise_cm: f32,
    pub baro_noise_cm: f32,
    pub launch_lat: f64,
    pub launch_lon: f64,
    pub launch_alt_m: f32,
    /// Nav records are written every this many ticks.
    pub telemetry_every: u32,
    /// Include rate-loop PID terms in nav records.
    pub axes: bool,
    pub stop_on_disarm: bool,
    pub script: Vec<ScriptStep>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            duration_s: 120.0,
            loop_hz: 100,
            realtime: false,
            seed: 1,
            gps_noise_cm: 0.0,
            baro_noise_cm: 0.0,
            launch_lat: 46.52,
            launch_lon: 6.63,
            launch_alt_m: 380.0,
            telemetry_every: 10,
            axes: false,
            stop_on_disarm: true,
            script: Vec::new(),
        }
    }
}

/// Pilot input change at `at_s`. Unset fields keep their previous value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScriptStep {
    pub at_s: f32,
    pub arm: Option<bool>,
    /// Box names: althold, poshold, rth, wp, cruise, launch, manual, home_reset, gcs_nav, surface, braking.
    pub boxes: Option<Vec<String>>,
    pub throttle: Option<f32>,
    pub sticks: Option<[f32; 3]>,
    /// false drops the GPS fix.
    pub gps: Option<bool>,
    pub forced_rth: Option<bool>,
}

#[derive(Debug, Clone)]
struct Cue {
    at_us: u64,
    step: ScriptStep,
    boxes: Option<BoxModes>,
}

pub fn parse_boxes(names: &[String]) -> Result<BoxModes> {
    names.iter().try_fold(BoxModes::empty(), |acc, name| {
        BoxModes::from_name(&name.to_ascii_uppercase())
            .map(|b| acc | b)
            .with_context(|| format!("unknown box {name:?}"))
    })
}

/// Point-mass multirotor flying in angle mode.
#[derive(Debug, Clone, Default)]
pub struct Vehicle {
    pub pos: Vec3,
    pub vel: Vec3,
    /// roll, pitch, yaw in decidegrees.
    pub attitude: [f32; 3],
    /// deg/s
    pub gyro: [f32; 3],
    /// Specific force along body z, cm/s/s.
    pub acc_z: f32,
    hover_throttle: f32,
    min_command: f32,
    max_inclination: [f32; 2],
    yaw_rate: u8,
}

impl Vehicle {
    pub fn new(cfg: &Config) -> Self {
        Self {
            acc_z: GRAVITY_CMSS,
            hover_throttle: f32::from(cfg.nav.mc.hover_throttle),
            min_command: f32::from(cfg.throttle.min_command),
            max_inclination: [f32::from(cfg.pid.max_angle_inclination[0]), f32::from(cfg.pid.max_angle_inclination[1])],
            yaw_rate: cfg.pid.rates[YAW],
            ..Default::default()
        }
    }

    pub fn on_ground(&self) -> bool {
        self.pos.z <= 0.0
    }

    pub fn step(&mut self, cmd: &NavCommand, armed: bool, dt: f32) {
        let lag = (dt / ATTITUDE_TAU).min(1.0);
        let targets = [
            rc_command_to_angle(cmd.rc_command[ROLL], self.max_inclination[0]),
            rc_command_to_angle(cmd.rc_command[PITCH], self.max_inclination[1]),
        ];
        for axis in [ROLL, PITCH] {
            let delta = (targets[axis] - self.attitude[axis]) * lag;
            self.attitude[axis] += delta;
            self.gyro[axis] = delta / 10.0 / dt;
        }

        let yaw_rate = match cmd.heading_target {
            Some(target) => {
                let error = (target - self.attitude[YAW] / 10.0 + 540.0).rem_euclid(360.0) - 180.0;
                let max = f32::from(self.yaw_rate) * 10.0;
                (error * HEADING_GAIN).clamp(-max, max)
            }
            None => rc_command_to_rate(cmd.rc_command[YAW], self.yaw_rate),
        };
        self.gyro[YAW] = yaw_rate;
        self.attitude[YAW] = (self.attitude[YAW] + yaw_rate * 10.0 * dt).rem_euclid(3600.0);

        let thrust = if armed {
            ((cmd.rc_command[THROTTLE] - self.min_command) / (self.hover_throttle - self.min_command)).clamp(0.0, 2.5)
        } else {
            0.0
        };
        let roll = (self.attitude[ROLL] / 10.0).to_radians();
        let pitch = (self.attitude[PITCH] / 10.0).to_radians();
        let yaw = (self.attitude[YAW] / 10.0).to_radians();

        let lift = GRAVITY_CMSS * thrust;
        let forward = lift * pitch.sin();
        let right = lift * roll.sin();
        let up = lift * roll.cos() * pitch.cos();
        let accel = Vec3::new(
            forward * yaw.cos() - right * yaw.sin() - DRAG * self.vel.x,
            forward * yaw.sin() + right * yaw.cos() - DRAG * self.vel.y,
            up - GRAVITY_CMSS - DRAG * self.vel.z,
        );

        self.vel.x += accel.x * dt;
        self.vel.y += accel.y * dt;
        self.vel.z += accel.z * dt;
        self.pos.x += self.vel.x * dt;
        self.pos.y += self.vel.y * dt;
        self.pos.z += self.vel.z * dt;
        self.acc_z = accel.z + GRAVITY_CMSS;

        if self.pos.z <= 0.0 && self.vel.z <= 0.0 {
            self.pos.z = 0.0;
            self.vel = Vec3::ZERO;
            self.acc_z = GRAVITY_CMSS;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimSummary {
    pub ticks: u64,
    pub final_state: Option<NavState>,
    pub max_home_distance: f32,
    pub disarmed_by_nav: bool,
}

pub struct Simulator {
    cfg: Config,
    pub nav: NavigationContext,
    rate: RateController,
    pub vehicle: Vehicle,
    origin: GeoOrigin,
    rng: StdRng,
    cues: Vec<Cue>,
    next_cue: usize,
    pilot: PilotInput,
    gps_ok: bool,
    hold_requested: bool,
    now_us: u64,
    tick_us: u64,
    summary: SimSummary,
}

impl Simulator {
    pub fn new(cfg: Config) -> Result<Self> {
        anyhow::ensure!(cfg.airframe == Airframe::Multirotor, "the simulator models a multirotor only");
        anyhow::ensure!((10..=1000).contains(&cfg.sim.loop_hz), "sim.loop_hz should be 10..1000");

        let mut cues = cfg
            .sim
            .script
            .iter()
            .map(|step| {
                let boxes = step.boxes.as_deref().map(parse_boxes).transpose()?;
                Ok(Cue { at_us: (step.at_s.max(0.0) * 1e6) as u64, step: step.clone(), boxes })
            })
            .collect::<Result<Vec<_>>>()
            .context("sim.script")?;
        cues.sort_by_key(|c| c.at_us);

        let mut nav = NavigationContext::new(cfg.nav.clone(), cfg.rc, &cfg.pid, cfg.throttle, cfg.airframe);
        for (i, wp) in cfg.mission.records().iter().enumerate() {
            let n = u8::try_from(i + 1).context("mission too long")?;
            anyhow::ensure!(nav.set_waypoint(n, wp), "waypoint {n} rejected");
        }

        let tick_us = 1_000_000 / u64::from(cfg.sim.loop_hz);
        let rate = RateController::new(
            RateControllerKind::for_airframe(cfg.airframe),
            cfg.airframe,
            &cfg.pid,
            cfg.throttle,
            4,
            tick_us as u32,
        );
        let origin = GeoOrigin::new(GeoPoint::from_degrees(cfg.sim.launch_lat, cfg.sim.launch_lon, cfg.sim.launch_alt_m));
        let pilot = PilotInput { throttle: f32::from(cfg.throttle.min_command), ..Default::default() };

        Ok(Self {
            vehicle: Vehicle::new(&cfg),
            rng: StdRng::seed_from_u64(cfg.sim.seed),
            cfg,
            nav,
            rate,
            origin,
            cues,
            next_cue: 0,
            pilot,
            gps_ok: true,
            hold_requested: false,
            now_us: 0,
            tick_us,
            summary: SimSummary::default(),
        })
    }

    pub fn now_us(&self) -> u64 {
        self.now_us
    }

    pub fn summary(&self) -> SimSummary {
        SimSummary { final_state: Some(self.nav.state()), ..self.summary }
    }

    pub fn finished(&self) -> bool {
        let out_of_time = self.now_us as f32 * 1e-6 >= self.cfg.sim.duration_s;
        let landed = self.cfg.sim.stop_on_disarm && self.summary.disarmed_by_nav;
        out_of_time || landed
    }

    fn noise(&mut self, amplitude: f32) -> f32 {
        if amplitude > 0.0 {
            self.rng.gen_range(-amplitude..=amplitude)
        } else {
            0.0
        }
    }

    fn apply_cues(&mut self) {
        while let Some(cue) = self.cues.get(self.next_cue).filter(|c| c.at_us <= self.now_us).cloned() {
            self.next_cue += 1;
            let step = &cue.step;
            if let Some(boxes) = cue.boxes {
                self.pilot.boxes = boxes;
            }
            if let Some(throttle) = step.throttle {
                self.pilot.throttle = throttle;
            }
            if let Some(sticks) = step.sticks {
                self.pilot.sticks = sticks;
            }
            if let Some(gps) = step.gps {
                self.gps_ok = gps;
            }
            match step.forced_rth {
                Some(true) => self.nav.activate_forced_rth(),
                Some(false) => self.nav.abort_forced_rth(),
                None => {}
            }
            match step.arm {
                Some(true) => self.arm(),
                Some(false) => self.disarm(),
                None => {}
            }
        }
    }

    fn arm(&mut self) {
        self.nav.set_pilot_input(self.pilot);
        match self.nav.check_arming(true) {
            Ok(clearance) => {
                info!("sim: armed ({:?})", clearance);
                self.nav.set_armed(true);
                self.rate.set_armed(true);
            }
            Err(blocker) => warn!("sim: arming refused: {}", blocker),
        }
    }

    fn disarm(&mut self) {
        self.nav.set_armed(false);
        self.rate.set_armed(false);
    }

    pub fn apply_gcs(&mut self, req: GcsRequest) {
        match req {
            GcsRequest::ReturnToLaunch => self.nav.activate_forced_rth(),
            GcsRequest::Hold => self.hold_requested = true,
        }
    }

    fn feed_sensors(&mut self) {
        let now = self.now_us;
        let v = self.vehicle.clone();

        let sol = if self.gps_ok {
            let n = self.cfg.sim.gps_noise_cm;
            let noisy = Vec3::new(v.pos.x + self.noise(n), v.pos.y + self.noise(n), v.pos.z);
            GpsSolution {
                fix: FixType::Fix3D,
                point: self.origin.to_geodetic(&noisy).unwrap_or(self.origin.point),
                vel_neu: [v.vel.x, v.vel.y, v.vel.z],
                quality: FixQuality { sats: 14, hdop: 0.8, fix_age_ms: 100 },
            }
        } else {
            GpsSolution::default()
        };
        self.nav.ingest_gps(now, &sol, &self.cfg.gnss);

        let baro = v.pos.z + self.noise(self.cfg.sim.baro_noise_cm);
        self.nav.update_altitude_and_climb_rate(now, true, baro, v.vel.z, -1.0, 0.0, EstimateStatus::None);
        self.nav.update_heading(now, true, (v.attitude[YAW] * 10.0).round() as i32);
        self.nav.set_imu(ImuSample {
            attitude: v.attitude,
            gyro: v.gyro,
            acc: [0.0, 0.0, v.acc_z],
            baro_climb_rate: v.vel.z,
        });
    }

    /// One loop iteration. Returns the records it produced.
    pub fn step(&mut self) -> Vec<Record> {
        self.now_us += self.tick_us;
        let dt = self.tick_us as f32 * 1e-6;
        self.apply_cues();
        self.feed_sensors();

        let mut pilot = self.pilot;
        if self.hold_requested {
            pilot.boxes |= BoxModes::POSHOLD;
        }
        self.nav.set_pilot_input(pilot);

        let prev = self.nav.state();
        let cmd = self.nav.tick(self.now_us);
        if cmd.disarm.is_some() {
            self.disarm();
            self.summary.disarmed_by_nav = true;
        }

        let mut modes = RateModes::empty();
        if cmd.angle_required {
            modes |= RateModes::ANGLE;
        }
        if let Some(heading) = cmd.heading_target {
            self.rate.set_heading_hold_target(heading);
            modes |= RateModes::HEADING_HOLD;
        }
        if cmd.reset_integrators {
            self.rate.reset_iterm();
        }
        let inputs = RateInputs {
            gyro: self.vehicle.gyro,
            attitude: self.vehicle.attitude,
            rc_command: cmd.rc_command,
            modes,
            ..Default::default()
        };
        self.rate.update(&inputs, dt);

        let armed = self.nav.nav_flags().armed;
        self.vehicle.step(&cmd, armed, dt);

        self.summary.ticks += 1;
        self.summary.max_home_distance = self.summary.max_home_distance.max(self.nav.home().distance);

        let mut out: Vec<Record> =
            FlightEvent::between(prev, &self.nav, &cmd, self.now_us).into_iter().map(Record::Event).collect();
        if self.summary.ticks % u64::from(self.cfg.sim.telemetry_every.max(1)) == 0 {
            let mut t = NavTelemetry::capture(&self.nav, &cmd, self.now_us);
            if self.cfg.sim.axes {
                t = t.with_axes([self.rate.telemetry(ROLL), self.rate.telemetry(PITCH), self.rate.telemetry(YAW)]);
            }
            out.push(Record::Nav(t));
        }
        out
    }
}

pub fn write_records(out: &mut dyn Write, records: &[Record]) -> Result<()> {
    for r in records {
        serde_json::to_writer(&mut *out, r).context("encode record")?;
        out.write_all(b"\n").context("write record")?;
    }
    Ok(())
}

pub async fn run(cfg: Config, out: &mut dyn Write) -> Result<SimSummary> {
    let realtime = cfg.sim.realtime;
    let mut link = if cfg.link.enable { Some(GcsLink::open(&cfg.link)?) } else { None };
    let mut sim = Simulator::new(cfg)?;
    let mut pace = tokio::time::interval(Duration::from_micros(sim.tick_us));

    info!("sim: starting, {} us per tick", sim.tick_us);
    while !sim.finished() {
        if realtime {
            pace.tick().await;
        }
        if let Some(link) = link.as_mut() {
            for req in link.poll() {
                sim.apply_gcs(req);
            }
        }
        let records = sim.step();
        write_records(out, &records)?;
        if let Some(link) = link.as_mut() {
            let t_ms = u32::try_from(sim.now_us() / 1000).unwrap_or(u32::MAX);
            if let Err(e) = link.service(&sim.nav, t_ms) {
                warn!("sim: gcs link: {:#}", e);
            }
        }
    }
    out.flush().context("flush telemetry")?;

    let summary = sim.summary();
    info!(
        "sim: {} ticks, final state {:?}, max {:.0} m from home",
        summary.ticks,
        summary.final_state,
        summary.max_home_distance / 100.0
    );
    Ok(summary)
}
