mod config;
mod sim;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use helm_nav::geo::AltitudeDatum;
use helm_nav::{doctor, GeoOrigin, GeoPoint, NavigationContext, Waypoint};
use helm_proto::waypoint::{self as wpcodec, MspDirection, MSP_SET_WP};
use tracing::{info, warn};

use config::{load_config, upload, Config};

#[derive(Debug, Parser)]
#[command(name = "helm", version, about = "helm - flight navigation stack tools and simulator")]
struct Cli {
    #[arg(long, default_value = "config/helm.toml")]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and the configured mission.
    Doctor,
    Mission {
        #[command(subcommand)]
        cmd: MissionCmd,
    },
    /// Fly the configured script through the closed-loop simulator.
    Sim {
        /// JSON-lines telemetry file; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Pace the loop in wall-clock time.
        #[arg(long)]
        realtime: bool,
        /// Override sim.duration_s.
        #[arg(long)]
        seconds: Option<f32>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    /// Persisted list, 20 bytes per record.
    Raw,
    /// MSP v1 MSP_SET_WP request frames.
    Msp,
}

#[derive(Debug, Subcommand)]
enum MissionCmd {
    /// Structural checks and arming blockers of the configured mission.
    Check,
    /// Encode the configured mission; hex on stdout when no file is given.
    Encode {
        #[arg(long, value_enum, default_value = "raw")]
        format: Format,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Decode a persisted list (raw bytes or hex) and print it as JSON.
    Decode {
        input: PathBuf,
        #[arg(long)]
        hex: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor_cmd(&cfg)?,
        Command::Mission { cmd } => mission_cmd(&cfg, cmd)?,
        Command::Sim { out, realtime, seconds } => {
            cfg.sim.realtime |= realtime;
            if let Some(s) = seconds {
                cfg.sim.duration_s = s;
            }
            match out {
                Some(path) => {
                    let file = std::fs::File::create(&path).with_context(|| format!("create {}", path.display()))?;
                    let mut w = std::io::BufWriter::new(file);
                    sim::run(cfg, &mut w).await?;
                }
                None => {
                    let mut w = std::io::stdout().lock();
                    sim::run(cfg, &mut w).await?;
                }
            }
        }
    }
    Ok(())
}

fn doctor_cmd(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    doctor::check_nav_config(&cfg.nav)?;
    doctor::check_rc_config(&cfg.rc)?;
    doctor::check_gnss_thresholds(&cfg.gnss)?;
    check_configured_mission(cfg)?;
    if cfg.link.enable {
        anyhow::ensure!(!cfg.link.url.is_empty(), "link.url missing");
        anyhow::ensure!(cfg.link.heartbeat_hz > 0.0, "link.heartbeat_hz must be positive");
    }
    info!("doctor: OK");
    Ok(())
}

/// Mission checks, then the arming blockers as seen from the simulator launch point.
fn check_configured_mission(cfg: &Config) -> Result<()> {
    let records = cfg.mission.records();
    let mission = upload(&records)?;
    doctor::check_mission(&mission, &cfg.nav)?;

    let mut nav = NavigationContext::new(cfg.nav.clone(), cfg.rc, &cfg.pid, cfg.throttle, cfg.airframe);
    for (i, wp) in records.iter().enumerate() {
        let n = u8::try_from(i + 1).context("mission too long")?;
        anyhow::ensure!(nav.set_waypoint(n, wp), "waypoint {n} rejected");
    }
    let launch = GeoPoint::from_degrees(cfg.sim.launch_lat, cfg.sim.launch_lon, cfg.sim.launch_alt_m);
    let origin = GeoOrigin::new(launch);
    if let Some(first) = records.iter().find(|wp| wp.action.is_geo()) {
        if let Some(local) = origin.to_local(&GeoPoint { lat: first.lat, lon: first.lon, alt: first.alt }, AltitudeDatum::Relative) {
            let distance = local.xy_length();
            if cfg.nav.waypoint_safe_distance > 0 && distance > cfg.nav.waypoint_safe_distance as f32 {
                warn!("mission: first waypoint {:.0} m from the launch point", distance / 100.0);
            }
        }
    }
    // without a fix only the mission-related blockers are meaningful
    if let Err(blocker) = nav.check_arming(false) {
        anyhow::bail!("mission blocks arming: {blocker}");
    }
    info!("mission: {} records, {} mission(s)", records.len(), mission.mission_count().max(1));
    Ok(())
}

fn mission_cmd(cfg: &Config, cmd: MissionCmd) -> Result<()> {
    match cmd {
        MissionCmd::Check => check_configured_mission(cfg),
        MissionCmd::Encode { format, out } => {
            let records = cfg.mission.records();
            let bytes = match format {
                Format::Raw => wpcodec::encode_list(&records).to_vec(),
                Format::Msp => {
                    let mut buf = Vec::new();
                    for (i, wp) in records.iter().enumerate() {
                        let n = u8::try_from(i + 1).context("mission too long")?;
                        let frame = wpcodec::msp_v1_frame(MspDirection::Request, MSP_SET_WP, &wpcodec::encode_msp_wp(n, wp))?;
                        buf.extend_from_slice(&frame);
                    }
                    buf
                }
            };
            match out {
                Some(path) => std::fs::write(&path, &bytes).with_context(|| format!("write {}", path.display()))?,
                None => println!("{}", hex::encode(&bytes)),
            }
            Ok(())
        }
        MissionCmd::Decode { input, hex } => {
            let raw = std::fs::read(&input).with_context(|| format!("read {}", input.display()))?;
            let bytes = if hex {
                let text = String::from_utf8(raw).context("hex input is not text")?;
                hex::decode(text.trim()).context("decode hex")?
            } else {
                raw
            };
            let records: Vec<Waypoint> = wpcodec::decode_list(&bytes)?;
            let mission = upload(&records)?;
            if let Err(e) = doctor::check_mission(&mission, &cfg.nav) {
                warn!("decoded mission: {:#}", e);
            }
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &records).context("encode json")?;
            writeln!(stdout)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_mission_passes_the_doctor() {
        let cfg = config::parse_config(include_str!("../config/helm.toml")).unwrap();
        doctor_cmd(&cfg).unwrap();
    }

    #[test]
    fn encoded_mission_decodes_to_the_same_records() {
        let cfg = config::parse_config(include_str!("../config/helm.toml")).unwrap();
        let records = cfg.mission.records();
        let bytes = wpcodec::encode_list(&records);
        let text = hex::encode(&bytes);
        let back = wpcodec::decode_list(&hex::decode(text).unwrap()).unwrap();
        assert_eq!(back, records);
    }
}
