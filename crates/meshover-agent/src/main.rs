//! Meshover Node Agent
//!
//! Daemon running on each emulated mobile node.
//!
//! - Monitors the connectivity quality of the node's wireless interface,
//!   either from live link/scan signal readings or from an externally
//!   maintained predicted-state trace (`--state-file`)
//! - Hands the node over between the access point and the ad-hoc mesh
//!   under hysteresis thresholds
//! - Applies optional egress throttling during handover transients
//! - Persists a start-parameter snapshot plus append-only event and
//!   signal-quality logs for later analysis
//!
//! The process runs until it receives SIGINT.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use meshover_core::config::{self, AccessPoint, ControllerConfig, Rate};
use meshover_core::env::SysEnv;
use meshover_core::quality::{LinkSignalSource, QualitySource, StateTraceSource};
use meshover_core::HandoverController;

/// Meshover handover agent.
#[derive(Parser, Debug)]
#[command(name = "meshover-agent", about = "AP/mesh handover controller for emulated nodes")]
struct Cli {
    /// Wireless interface to monitor and hand over.
    #[arg(short, long)]
    interface: String,

    /// Interface used for discovery scans (defaults to --interface).
    #[arg(short = 'S', long)]
    scan_interface: Option<String>,

    /// Seconds between discovery scans while in mesh mode.
    #[arg(short = 's', long, default_value_t = 10.0)]
    scan_interval: f64,

    /// Quality at or below which the node leaves the AP (dBm for the link
    /// variant, predicted-state value with --state-file).
    #[arg(short = 'd', long, default_value_t = -88.0)]
    disconnect_threshold: f64,

    /// Quality at or above which the node returns to the AP.
    #[arg(short = 'r', long, default_value_t = -85.0)]
    reconnect_threshold: f64,

    /// Sliding-window size for quality averaging (default: 3, or 10 with
    /// --state-file).
    #[arg(short = 'w', long)]
    window_size: Option<usize>,

    /// SSID of the access point.
    #[arg(short = 'A', long, default_value = "ap1-ssid")]
    ap_ssid: String,

    /// BSSID of the access point.
    #[arg(short = 'B', long, default_value = "00:00:00:00:01:00")]
    ap_bssid: String,

    /// IP address of the access point.
    #[arg(short = 'I', long, default_value = "10.0.0.10")]
    ap_ip: String,

    /// Directory receiving statistics (events, signal log, snapshot).
    #[arg(short, long)]
    output: PathBuf,

    /// Address to ping after each (re)attach, as a liveness probe.
    #[arg(short, long)]
    pingto: Option<String>,

    /// Static IPv4 (CIDR) assigned to the interface after association.
    #[arg(long)]
    ip: Option<String>,

    /// Throttle rate in bit/s during the AP→mesh transient (0 = off).
    #[arg(long = "qdisc-disconnect", default_value_t = 0)]
    qdisc_disconnect: u64,

    /// Throttle rate in bit/s during the mesh→AP transient (0 = off).
    #[arg(long = "qdisc-reconnect", default_value_t = 0)]
    qdisc_reconnect: u64,

    /// Predicted-state trace file; selects the prediction variant.
    #[arg(short = 'f', long)]
    state_file: Option<PathBuf>,

    /// Experiment start reference (epoch seconds) for relative event times.
    #[arg(short = 't', long)]
    start_time: Option<f64>,

    /// Control-loop tick in seconds (default: 1.0, or 0.1 with --state-file).
    #[arg(long)]
    tick_interval: Option<f64>,

    /// Keep scanning for the AP but never fall back to the mesh.
    #[arg(long, default_value_t = false)]
    no_mesh_fallback: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let prediction = cli.state_file.is_some();

    let mut cfg = ControllerConfig::new(
        &cli.interface,
        &cli.output,
        cli.start_time.unwrap_or_else(meshover_core::events::epoch_now),
    );
    cfg.scan_interface = cli
        .scan_interface
        .clone()
        .unwrap_or_else(|| cli.interface.clone());
    cfg.ap = AccessPoint {
        ssid: cli.ap_ssid.clone(),
        bssid: cli.ap_bssid.clone(),
        ip: cli.ap_ip.clone(),
    };
    cfg.disconnect_threshold = cli.disconnect_threshold;
    cfg.reconnect_threshold = cli.reconnect_threshold;
    cfg.window_size = cli.window_size.unwrap_or(if prediction { 10 } else { 3 });
    cfg.scan_interval = Duration::from_secs_f64(cli.scan_interval);
    cfg.tick_interval =
        Duration::from_secs_f64(cli.tick_interval.unwrap_or(if prediction { 0.1 } else { 1.0 }));
    cfg.mesh_fallback = !cli.no_mesh_fallback;
    cfg.pingto = cli.pingto.clone();
    cfg.static_ip = cli.ip.clone();
    if cli.qdisc_disconnect > 0 {
        cfg.shaping.disconnect = Some(Rate::bits(cli.qdisc_disconnect));
    }
    if cli.qdisc_reconnect > 0 {
        cfg.shaping.reconnect = Some(Rate::bits(cli.qdisc_reconnect));
    }

    std::fs::create_dir_all(&cfg.out_dir)
        .with_context(|| format!("creating output dir {}", cfg.out_dir.display()))?;
    let snapshot = config::write_start_params(&cfg).context("writing start parameters")?;

    tracing::info!(
        interface = %cfg.interface,
        scan_interface = %cfg.scan_interface,
        variant = if prediction { "prediction" } else { "link-signal" },
        snapshot = %snapshot.display(),
        "meshover-agent starting"
    );

    let env = Arc::new(SysEnv::new());
    let source: Box<dyn QualitySource> = match &cli.state_file {
        Some(path) => Box::new(StateTraceSource::new(path)),
        None => Box::new(LinkSignalSource::new(
            env.clone(),
            &cfg.interface,
            &cfg.scan_interface,
            cfg.ap.clone(),
        )),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        tracing::info!("received SIGINT, shutting down");
        shutdown_flag.store(true, Ordering::Relaxed);
    })
    .context("installing SIGINT handler")?;

    let mut controller = HandoverController::new(cfg, env, source);
    controller.run(&shutdown).context("handover controller failed")?;

    tracing::info!("meshover-agent stopped");
    Ok(())
}
