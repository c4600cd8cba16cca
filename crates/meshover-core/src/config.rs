//! Controller, actuator, and shaping configuration.
//!
//! Everything here is plain data with sensible emulation defaults; the agent
//! binary populates it from CLI flags and writes the one-shot start-parameter
//! snapshot for later analysis.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Identity of the preferred infrastructure access point.
#[derive(Debug, Clone, Serialize)]
pub struct AccessPoint {
    pub ssid: String,
    pub bssid: String,
    pub ip: String,
}

impl Default for AccessPoint {
    fn default() -> Self {
        AccessPoint {
            ssid: "ap1-ssid".into(),
            bssid: "00:00:00:00:01:00".into(),
            ip: "10.0.0.10".into(),
        }
    }
}

/// Parameters of the fixed ad-hoc cell every node joins when it falls back
/// to mesh mode. All nodes must agree on these for the mesh to form.
#[derive(Debug, Clone, Serialize)]
pub struct IbssParams {
    pub ssid: String,
    pub freq_mhz: u32,
    pub ht_cap: String,
    pub bssid: String,
}

impl Default for IbssParams {
    fn default() -> Self {
        IbssParams {
            ssid: "adhocNet".into(),
            freq_mhz: 2432,
            ht_cap: "HT40+".into(),
            bssid: "02:CA:FF:EE:BA:01".into(),
        }
    }
}

/// Unit suffix accepted by the `tc` rate parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateUnit {
    Bit,
    Kbit,
    Mbit,
}

impl fmt::Display for RateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateUnit::Bit => write!(f, "bit"),
            RateUnit::Kbit => write!(f, "kbit"),
            RateUnit::Mbit => write!(f, "mbit"),
        }
    }
}

/// A shaping rate as passed to `tc` (e.g. `1mbit`, `50000bit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rate {
    pub value: u64,
    pub unit: RateUnit,
}

impl Rate {
    pub fn bits(value: u64) -> Self {
        Rate {
            value,
            unit: RateUnit::Bit,
        }
    }

    pub fn mbits(value: u64) -> Self {
        Rate {
            value,
            unit: RateUnit::Mbit,
        }
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit)
    }
}

/// Transient throttle rates applied around handovers to model the throughput
/// penalty of switching networks. `None` disables the transient entirely;
/// when both are `None` no qdisc is installed at all.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShapingRates {
    /// Rate applied while leaving the access point for the mesh.
    pub disconnect: Option<Rate>,
    /// Rate applied while reconnecting to the access point.
    pub reconnect: Option<Rate>,
}

impl ShapingRates {
    /// Nominal rate restored after each transient.
    pub const STANDARD: Rate = Rate {
        value: 1,
        unit: RateUnit::Mbit,
    };

    pub fn enabled(&self) -> bool {
        self.disconnect.is_some() || self.reconnect.is_some()
    }
}

/// Mesh actuator parameters: the ad-hoc cell, the routing daemon, and the
/// bounded waits around daemon startup.
#[derive(Debug, Clone)]
pub struct MeshParams {
    pub ibss: IbssParams,
    /// Routing daemon binary, launched with `-f <config> -d 0`.
    pub daemon_bin: String,
    /// Per-interface daemon configuration file.
    pub daemon_config: PathBuf,
    /// Process-listing polls before giving up on the daemon PID.
    pub pid_attempts: u32,
    pub pid_delay: Duration,
    /// Oper-state polls while waiting for the interface to leave DOWN.
    pub link_wait_attempts: u32,
    pub link_wait_delay: Duration,
}

impl MeshParams {
    /// Defaults bound to one interface; the daemon config file follows the
    /// `<interface>-olsrd.conf` convention.
    pub fn for_interface(iface: &str) -> Self {
        MeshParams {
            ibss: IbssParams::default(),
            daemon_bin: "olsrd".into(),
            daemon_config: PathBuf::from(format!("{iface}-olsrd.conf")),
            pid_attempts: 50,
            pid_delay: Duration::from_millis(100),
            link_wait_attempts: 50,
            link_wait_delay: Duration::from_millis(100),
        }
    }
}

/// Attachment actuator parameters: bounded association confirmation.
#[derive(Debug, Clone)]
pub struct AttachParams {
    /// Link-status polls per reconnect before reporting a timeout.
    pub confirm_attempts: u32,
    pub confirm_delay: Duration,
    /// Polls for the initial attach, where peers may come up in any order.
    /// Deliberately generous, but still bounded.
    pub initial_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for AttachParams {
    fn default() -> Self {
        AttachParams {
            confirm_attempts: 20,
            confirm_delay: Duration::from_millis(250),
            initial_attempts: 120,
            initial_delay: Duration::from_millis(500),
        }
    }
}

/// Full controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Interface carrying the monitored link.
    pub interface: String,
    /// Interface used for discovery scans. A second radio avoids stalling
    /// the monitored link during active scans; defaults to `interface`.
    pub scan_interface: String,
    pub ap: AccessPoint,
    /// Filtered average at or below this disconnects from the AP (dBm for
    /// the link variant, predicted-state value for the trace variant).
    pub disconnect_threshold: f64,
    /// Filtered average at or above this triggers the reconnect. Must sit
    /// above `disconnect_threshold` to provide hysteresis.
    pub reconnect_threshold: f64,
    /// Sliding-window capacity for both quality filters.
    pub window_size: usize,
    pub tick_interval: Duration,
    pub scan_interval: Duration,
    /// When false the node never enters mesh mode; it keeps scanning for
    /// the AP instead.
    pub mesh_fallback: bool,
    /// Optional probe address pinged after each (re)attach.
    pub pingto: Option<String>,
    /// Static IPv4 (CIDR) assigned to the interface after association.
    pub static_ip: Option<String>,
    pub shaping: ShapingRates,
    pub mesh: MeshParams,
    pub attach: AttachParams,
    /// Directory receiving the event, signal, and snapshot files.
    pub out_dir: PathBuf,
    /// Experiment start reference (epoch seconds); event rows carry times
    /// relative to this so nodes can be correlated later.
    pub start_time: f64,
}

impl ControllerConfig {
    pub fn new(interface: &str, out_dir: impl Into<PathBuf>, start_time: f64) -> Self {
        ControllerConfig {
            interface: interface.to_string(),
            scan_interface: interface.to_string(),
            ap: AccessPoint::default(),
            disconnect_threshold: -88.0,
            reconnect_threshold: -85.0,
            window_size: 3,
            tick_interval: Duration::from_secs(1),
            scan_interval: Duration::from_secs(10),
            mesh_fallback: true,
            pingto: None,
            static_ip: None,
            shaping: ShapingRates::default(),
            mesh: MeshParams::for_interface(interface),
            attach: AttachParams::default(),
            out_dir: out_dir.into(),
            start_time,
        }
    }

    /// Node name used in output file names; the emulator names interfaces
    /// `<station>-wlan0`.
    pub fn station(&self) -> &str {
        station_name(&self.interface)
    }
}

/// `"sta1-wlan0"` → `"sta1"`.
pub fn station_name(interface: &str) -> &str {
    interface.split('-').next().unwrap_or(interface)
}

#[derive(Serialize)]
struct QdiscSnapshot<'a> {
    mode: &'static str,
    rates: &'a ShapingRates,
    standard: Rate,
}

#[derive(Serialize)]
struct StartParams<'a> {
    start_time: f64,
    interface: &'a str,
    qdisc: QdiscSnapshot<'a>,
    #[serde(rename = "AP")]
    ap: &'a AccessPoint,
}

/// Writes the one-shot `<station>_start-params.json` snapshot describing how
/// this run was configured. Returns the path written.
pub fn write_start_params(config: &ControllerConfig) -> io::Result<PathBuf> {
    let params = StartParams {
        start_time: config.start_time,
        interface: &config.interface,
        qdisc: QdiscSnapshot {
            mode: if config.shaping.enabled() { "on" } else { "off" },
            rates: &config.shaping,
            standard: ShapingRates::STANDARD,
        },
        ap: &config.ap,
    };
    let path = config
        .out_dir
        .join(format!("{}_start-params.json", config.station()));
    let json = serde_json::to_string_pretty(&params)?;
    std::fs::write(&path, json)?;
    Ok(path)
}
