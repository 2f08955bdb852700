use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use helm_ctrl::Airframe;
use helm_nav::fsm::descriptor;
use helm_nav::{NavigationContext, StateFlags};
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavMessage, MavModeFlag, MavState, MavType, COMMAND_LONG_DATA,
        GLOBAL_POSITION_INT_DATA, HEARTBEAT_DATA,
    },
    MavConnection, MavHeader,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::safety::CommandRateLimit;
use crate::state::LinkStatus;
use crate::{GcsRequest, LinkConfig};

type SharedConnection = Arc<dyn MavConnection<MavMessage> + Send + Sync>;

pub fn heartbeat_for(nav: &NavigationContext) -> HEARTBEAT_DATA {
    let flags = nav.state_flags();
    let armed = nav.nav_flags().armed;

    let mut base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
    if armed {
        base_mode |= MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED;
    }
    if nav.requires_angle_mode() {
        base_mode |= MavModeFlag::MAV_MODE_FLAG_STABILIZE_ENABLED;
    }
    if flags.contains(StateFlags::CTL_POS) {
        base_mode |= MavModeFlag::MAV_MODE_FLAG_GUIDED_ENABLED;
    }
    if nav.is_flying_autonomous() {
        base_mode |= MavModeFlag::MAV_MODE_FLAG_AUTO_ENABLED;
    }

    let system_status = if flags.contains(StateFlags::CTL_EMERG) {
        MavState::MAV_STATE_EMERGENCY
    } else if armed {
        MavState::MAV_STATE_ACTIVE
    } else {
        MavState::MAV_STATE_STANDBY
    };

    HEARTBEAT_DATA {
        // persistent state id, stable across firmware versions
        custom_mode: u32::from(descriptor(nav.state()).persistent_id),
        mavtype: match nav.airframe() {
            Airframe::Multirotor => MavType::MAV_TYPE_QUADROTOR,
            Airframe::Helicopter => MavType::MAV_TYPE_HELICOPTER,
            Airframe::FixedWing => MavType::MAV_TYPE_FIXED_WING,
        },
        autopilot: MavAutopilot::MAV_AUTOPILOT_GENERIC,
        base_mode,
        system_status,
        mavlink_version: 3,
    }
}

fn saturate_i16(v: f32) -> i16 {
    v.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

/// None until the local frame has a geodetic origin.
pub fn global_position_for(nav: &NavigationContext, time_boot_ms: u32) -> Option<GLOBAL_POSITION_INT_DATA> {
    let actual = nav.actual();
    let geo = nav.origin().to_geodetic(&actual.abs.pos)?;
    let relative_cm = actual.abs.pos.z - nav.home().pos.z;
    Some(GLOBAL_POSITION_INT_DATA {
        time_boot_ms,
        lat: geo.lat,
        lon: geo.lon,
        alt: geo.alt.saturating_mul(10),
        relative_alt: (relative_cm * 10.0).round() as i32,
        // NED
        vx: saturate_i16(actual.abs.vel.x),
        vy: saturate_i16(actual.abs.vel.y),
        vz: saturate_i16(-actual.abs.vel.z),
        hdg: actual.yaw.rem_euclid(36_000) as u16,
    })
}

pub fn request_for(cmd: &COMMAND_LONG_DATA) -> Option<GcsRequest> {
    match cmd.command {
        MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH => Some(GcsRequest::ReturnToLaunch),
        MavCmd::MAV_CMD_NAV_LOITER_UNLIM => Some(GcsRequest::Hold),
        _ => None,
    }
}

/// Inbound side: ground-station tracking, addressing, config gating and rate limiting.
#[derive(Debug)]
pub struct CommandGate {
    sys_id: u8,
    comp_id: u8,
    gcs_sys_id: u8,
    allow_rtl: bool,
    allow_hold: bool,
    limiter: CommandRateLimit,
    status: LinkStatus,
}

impl CommandGate {
    pub fn new(cfg: &LinkConfig) -> Self {
        Self {
            sys_id: cfg.sys_id,
            comp_id: cfg.comp_id,
            gcs_sys_id: cfg.gcs_sys_id,
            allow_rtl: cfg.allow_rtl,
            allow_hold: cfg.allow_hold,
            limiter: CommandRateLimit::new(Duration::from_millis(cfg.command_min_interval_ms)),
            status: LinkStatus::default(),
        }
    }

    pub fn status(&self) -> &LinkStatus {
        &self.status
    }

    fn from_our_gcs(&self, hdr: &MavHeader) -> bool {
        self.gcs_sys_id == 0 || hdr.system_id == self.gcs_sys_id
    }

    fn addressed_to_us(&self, cmd: &COMMAND_LONG_DATA) -> bool {
        (cmd.target_system == 0 || cmd.target_system == self.sys_id)
            && (cmd.target_component == 0 || cmd.target_component == self.comp_id)
    }

    pub fn on_message(&mut self, hdr: &MavHeader, msg: &MavMessage, now: Instant) -> Option<GcsRequest> {
        if !self.from_our_gcs(hdr) {
            return None;
        }
        match msg {
            MavMessage::HEARTBEAT(_) => {
                if !self.status.connected {
                    info!("gcs: heartbeat from system {}", hdr.system_id);
                }
                self.status.connected = true;
                self.status.gcs_sys_id = Some(hdr.system_id);
                self.status.last_heartbeat = Some(now);
                None
            }
            MavMessage::COMMAND_LONG(cmd) if self.addressed_to_us(cmd) => {
                let req = request_for(cmd)?;
                let allowed = match req {
                    GcsRequest::ReturnToLaunch => self.allow_rtl,
                    GcsRequest::Hold => self.allow_hold,
                };
                if !allowed {
                    warn!("gcs: {:?} disabled by config", req);
                    self.status.dropped_requests += 1;
                    return None;
                }
                if !self.limiter.allow_at(req, now) {
                    debug!("gcs: {:?} rate-limited", req);
                    self.status.dropped_requests += 1;
                    return None;
                }
                info!("gcs: {:?} requested", req);
                self.status.last_request = Some(req);
                Some(req)
            }
            _ => None,
        }
    }
}

pub struct GcsLink {
    conn: SharedConnection,
    hdr: MavHeader,
    gate: CommandGate,
    inbound: mpsc::Receiver<(MavHeader, MavMessage)>,
    heartbeat_interval: Duration,
    position_interval: Duration,
    last_heartbeat_sent: Option<Instant>,
    last_position_sent: Option<Instant>,
}

impl GcsLink {
    /// Connects and starts the blocking reader. Must be called inside a tokio runtime.
    pub fn open(cfg: &LinkConfig) -> Result<Self> {
        let conn: SharedConnection = Arc::from(
            mavlink::connect::<MavMessage>(&cfg.url).with_context(|| format!("mavlink connect {}", cfg.url))?,
        );

        let (tx, inbound) = mpsc::channel(64);
        let reader = conn.clone();
        // recv blocks, so the reader lives on the blocking pool until the link is dropped
        tokio::task::spawn_blocking(move || loop {
            match reader.recv() {
                Ok(frame) => {
                    if tx.blocking_send(frame).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    if tx.is_closed() {
                        break;
                    }
                    debug!("gcs: recv failed: {:?}", e);
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        });

        info!("gcs: link on {}", cfg.url);
        Ok(Self {
            conn,
            hdr: MavHeader { system_id: cfg.sys_id, component_id: cfg.comp_id, sequence: 0 },
            gate: CommandGate::new(cfg),
            inbound,
            heartbeat_interval: Duration::from_secs_f32(1.0 / cfg.heartbeat_hz.max(0.2)),
            position_interval: Duration::from_secs_f32(1.0 / cfg.position_hz.max(0.2)),
            last_heartbeat_sent: None,
            last_position_sent: None,
        })
    }

    pub fn status(&self) -> &LinkStatus {
        self.gate.status()
    }

    /// Drains what the reader has queued and returns the accepted requests.
    pub fn poll(&mut self) -> Vec<GcsRequest> {
        let now = Instant::now();
        let mut out = Vec::new();
        while let Ok((hdr, msg)) = self.inbound.try_recv() {
            if let Some(req) = self.gate.on_message(&hdr, &msg, now) {
                out.push(req);
            }
        }
        out
    }

    fn due(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
        last.map_or(true, |t| now.duration_since(t) >= interval)
    }

    /// Sends the heartbeat and position stream when they are due.
    pub fn service(&mut self, nav: &NavigationContext, time_boot_ms: u32) -> Result<()> {
        let now = Instant::now();
        if Self::due(self.last_heartbeat_sent, self.heartbeat_interval, now) {
            self.send(MavMessage::HEARTBEAT(heartbeat_for(nav)))?;
            self.last_heartbeat_sent = Some(now);
        }
        if Self::due(self.last_position_sent, self.position_interval, now) {
            if let Some(pos) = global_position_for(nav, time_boot_ms) {
                self.send(MavMessage::GLOBAL_POSITION_INT(pos))?;
            }
            self.last_position_sent = Some(now);
        }
        Ok(())
    }

    fn send(&mut self, msg: MavMessage) -> Result<()> {
        self.hdr.sequence = self.hdr.sequence.wrapping_add(1);
        self.conn.send(&self.hdr, &msg).context("mavlink send")?;
        Ok(())
    }
}
