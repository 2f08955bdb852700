//! MAVLink ground-station link: the vehicle side of heartbeat, position stream and the
//! RTL / LOITER commands a ground station may send.

pub mod mav;
pub mod safety;
pub mod state;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub enable: bool,

    /// mavlink connection string, e.g. "udpout:127.0.0.1:14550" or "serial:/dev/ttyUSB0:57600".
    pub url: String,

    /// Our MAVLink ids.
    pub sys_id: u8,
    pub comp_id: u8,

    /// Only ground stations with this system id are obeyed. 0 accepts any.
    pub gcs_sys_id: u8,

    /// Hard safety: which inbound commands are acted upon.
    pub allow_rtl: bool,
    pub allow_hold: bool,

    pub heartbeat_hz: f32,
    pub position_hz: f32,

    /// Repeats of the same command inside this window are dropped.
    pub command_min_interval_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            enable: false,
            url: "udpout:127.0.0.1:14550".into(),
            sys_id: 1,
            comp_id: 1,
            gcs_sys_id: 0,
            allow_rtl: true,
            allow_hold: true,
            heartbeat_hz: 1.0,
            position_hz: 5.0,
            command_min_interval_ms: 2000,
        }
    }
}

/// What an inbound command asks of the navigation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcsRequest {
    /// MAV_CMD_NAV_RETURN_TO_LAUNCH: forced RTH.
    ReturnToLaunch,
    /// MAV_CMD_NAV_LOITER_UNLIM: hold position. The caller selects the POSHOLD box.
    Hold,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_link_section_keeps_defaults() {
        let cfg: LinkConfig = toml::from_str("enable = true\nurl = \"udpin:0.0.0.0:14551\"").unwrap();
        assert!(cfg.enable);
        assert_eq!(cfg.url, "udpin:0.0.0.0:14551");
        assert_eq!(cfg.command_min_interval_ms, 2000);
        assert!(cfg.allow_rtl);
    }
}
