use anyhow::{Context, Result};

use crate::config::{NavConfig, RcConfig};
use crate::gnss::GnssThresholds;
use crate::mission::{Mission, Waypoint, WaypointAction, MAX_WAYPOINTS};

pub fn check_gnss_thresholds(t: &GnssThresholds) -> Result<()> {
    anyhow::ensure!(t.min_sats >= 4, "gnss.min_sats too low");
    anyhow::ensure!(t.max_hdop > 0.5 && t.max_hdop <= 10.0, "gnss.max_hdop out of range");
    anyhow::ensure!((500..=10_000).contains(&t.max_fix_age_ms), "gnss.max_fix_age_ms should be 500..10000");
    Ok(())
}

pub fn check_nav_config(cfg: &NavConfig) -> Result<()> {
    anyhow::ensure!(cfg.waypoint_radius >= 10, "nav.waypoint_radius too small");
    anyhow::ensure!(cfg.max_auto_speed >= 10, "nav.max_auto_speed too low");
    anyhow::ensure!(cfg.max_manual_speed >= 10, "nav.max_manual_speed too low");
    anyhow::ensure!(cfg.max_auto_climb_rate >= 10, "nav.max_auto_climb_rate too low");
    anyhow::ensure!(cfg.land_descent_rate >= 100, "nav.land_descent_rate below 100 cm/s");
    anyhow::ensure!(
        cfg.land_slowdown_minalt < cfg.land_slowdown_maxalt,
        "nav.land_slowdown_minalt must be below land_slowdown_maxalt"
    );
    anyhow::ensure!(cfg.pos_failure_timeout <= 10, "nav.pos_failure_timeout should be 0..10 s");
    anyhow::ensure!((1..=15).contains(&cfg.land_detect_sensitivity), "nav.land_detect_sensitivity should be 1..15");
    anyhow::ensure!((1..=4).contains(&cfg.active_mission), "nav.active_mission should be 1..4");
    anyhow::ensure!(cfg.home_offset_direction.abs() <= 180, "nav.home_offset_direction should be -180..180");

    let mc = &cfg.mc;
    anyhow::ensure!((5..=80).contains(&mc.max_bank_angle), "nav.mc.max_bank_angle should be 5..80 deg");
    anyhow::ensure!((1000..=2000).contains(&mc.hover_throttle), "nav.mc.hover_throttle out of range");
    anyhow::ensure!(
        mc.braking_disengage_speed <= mc.braking_speed_threshold,
        "nav.mc.braking_disengage_speed above braking_speed_threshold"
    );
    anyhow::ensure!(
        mc.braking_boost_disengage_speed <= mc.braking_boost_speed_threshold,
        "nav.mc.braking_boost_disengage_speed above braking_boost_speed_threshold"
    );

    let heli = &cfg.heli;
    anyhow::ensure!(heli.min_collective < heli.max_collective, "nav.heli.min_collective must be below max_collective");
    anyhow::ensure!(
        (heli.min_collective..=heli.max_collective).contains(&heli.hover_collective),
        "nav.heli.hover_collective outside min/max collective"
    );

    let fw = &cfg.fw;
    anyhow::ensure!(fw.min_throttle <= fw.cruise_throttle, "nav.fw.cruise_throttle below min_throttle");
    anyhow::ensure!(fw.cruise_throttle <= fw.max_throttle, "nav.fw.cruise_throttle above max_throttle");
    anyhow::ensure!(fw.loiter_radius >= 1000, "nav.fw.loiter_radius too small");
    anyhow::ensure!((5..=80).contains(&fw.max_bank_angle), "nav.fw.max_bank_angle should be 5..80 deg");
    anyhow::ensure!(
        fw.launch.idle_throttle <= fw.launch.throttle,
        "nav.fw.launch.idle_throttle above launch throttle"
    );
    Ok(())
}

pub fn check_rc_config(rc: &RcConfig) -> Result<()> {
    anyhow::ensure!((1000..=2000).contains(&rc.mid_throttle), "rc.mid_throttle out of range");
    anyhow::ensure!(rc.min_check < rc.mid_throttle, "rc.min_check must be below mid_throttle");
    anyhow::ensure!(rc.pos_hold_deadband <= 100, "rc.pos_hold_deadband too wide");
    anyhow::ensure!(rc.alt_hold_deadband <= 200, "rc.alt_hold_deadband too wide");
    Ok(())
}

fn check_waypoint(n: usize, wp: &Waypoint, max_auto_speed: u16) -> Result<()> {
    if wp.action.is_geo() {
        anyhow::ensure!(wp.lat.abs() <= 900_000_000, "waypoint {n}: latitude out of range");
        anyhow::ensure!(wp.lon.abs() <= 1_800_000_000, "waypoint {n}: longitude out of range");
    }
    match wp.action {
        WaypointAction::Waypoint if wp.p1 != 0 => {
            anyhow::ensure!(
                (50..=i32::from(max_auto_speed)).contains(&i32::from(wp.p1)),
                "waypoint {n}: speed {} outside 50..{max_auto_speed} cm/s",
                wp.p1
            );
        }
        WaypointAction::HoldTime => anyhow::ensure!(wp.p1 >= 0, "waypoint {n}: negative hold time"),
        WaypointAction::Jump => anyhow::ensure!(wp.p2 >= -1, "waypoint {n}: jump repeat count below -1"),
        _ => {}
    }
    Ok(())
}

/// Structure of an uploaded mission: termination, record ranges and jump targets.
pub fn check_mission(mission: &Mission, cfg: &NavConfig) -> Result<()> {
    anyhow::ensure!(mission.total() <= MAX_WAYPOINTS, "mission has more than {MAX_WAYPOINTS} waypoints");
    if mission.total() == 0 {
        return Ok(());
    }
    anyhow::ensure!(mission.is_valid(), "mission is not terminated by a LAST flag");
    for (i, wp) in (0..mission.total()).filter_map(|i| mission.get(i).map(|wp| (i, wp))) {
        check_waypoint(i + 1, wp, cfg.max_auto_speed).with_context(|| format!("mission record {}", i + 1))?;
    }
    if let Some(index) = mission.invalid_jump() {
        anyhow::bail!("waypoint {} jumps to an invalid target", mission.start_index() + index + 1);
    }
    Ok(())
}
