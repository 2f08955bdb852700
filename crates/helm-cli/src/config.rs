use anyhow::{Context, Result};
use helm_ctrl::{Airframe, PidProfile, ThrottleConfig};
use helm_link::LinkConfig;
use helm_nav::mission::{Mission, FLAG_LAST};
use helm_nav::{GeoPoint, GnssThresholds, NavConfig, RcConfig, Waypoint, WaypointAction};
use serde::Deserialize;

use crate::sim::SimConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub airframe: Airframe,
    pub nav: NavConfig,
    pub rc: RcConfig,
    pub gnss: GnssThresholds,
    pub pid: PidProfile,
    pub throttle: ThrottleConfig,
    pub mission: MissionCfg,
    pub sim: SimConfig,
    pub link: LinkConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MissionCfg {
    pub waypoints: Vec<MissionItem>,
}

/// Mission record as written by hand: degrees and metres, JUMP targets 1-based.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MissionItem {
    pub action: WaypointAction,
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f32,
    /// Altitude above mean sea level instead of above home.
    pub amsl: bool,
    pub p1: i16,
    pub p2: i16,
    pub p3: i16,
    /// Ends a mission inside a multi-mission list. The final item always does.
    pub last: bool,
}

impl MissionCfg {
    /// Records in ground-station form.
    pub fn records(&self) -> Vec<Waypoint> {
        let n = self.waypoints.len();
        self.waypoints
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let geo = GeoPoint::from_degrees(item.lat, item.lon, item.alt_m);
                let mut p3 = item.p3;
                if item.action.is_geo() && item.amsl {
                    p3 |= 1;
                }
                Waypoint {
                    action: item.action,
                    lat: if item.action.is_geo() { geo.lat } else { 0 },
                    lon: if item.action.is_geo() { geo.lon } else { 0 },
                    alt: if item.action.is_geo() { geo.alt } else { 0 },
                    p1: item.p1,
                    p2: item.p2,
                    p3,
                    flag: if item.last || i + 1 == n { FLAG_LAST } else { 0 },
                }
            })
            .collect()
    }
}

/// Uploads ground-station form records in order, as a GCS would.
pub fn upload(records: &[Waypoint]) -> Result<Mission> {
    let mut mission = Mission::default();
    for (i, wp) in records.iter().enumerate() {
        anyhow::ensure!(mission.upload(i, *wp), "waypoint {} rejected by the mission store", i + 1);
    }
    Ok(mission)
}

pub fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {path}"))?;
    parse_config(&s)
}

pub fn parse_config(s: &str) -> Result<Config> {
    toml::from_str(s).context("parse config toml")
}
