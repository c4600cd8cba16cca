//! Narrow command interface to the node's link-layer environment.
//!
//! The underlying queueing discipline, the wireless join/scan primitives,
//! and the routing daemon are external actuators; everything the controller
//! does to them goes through [`NodeEnv`]. Commands may silently fail
//! (success of a `connect` is only ever established by re-querying the
//! link status), so the trait exposes point-in-time reads alongside the
//! fire-and-forget commands.

use std::io;
use std::path::Path;

use crate::config::{AccessPoint, IbssParams, Rate};

mod sys;

pub use sys::SysEnv;

/// Link-layer operating mode of a wireless interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiMode {
    Managed,
    Ibss,
}

impl WifiMode {
    pub fn as_str(self) -> &'static str {
        match self {
            WifiMode::Managed => "managed",
            WifiMode::Ibss => "ibss",
        }
    }
}

/// Point-in-time association state of an interface, from the link status
/// query. Absent entirely when the interface is not associated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Association {
    pub bssid: String,
    pub ssid: Option<String>,
    pub signal_dbm: Option<f64>,
    pub rx_bitrate: Option<String>,
    pub tx_bitrate: Option<String>,
}

/// Command interface to the external link-layer actuators.
///
/// Implemented by [`SysEnv`] (shelling out to `iw`/`ip`/`tc`) and by the
/// mock environment in tests. All methods are point-in-time, blocking
/// operations bounded by OS-command latency.
pub trait NodeEnv: Send + Sync {
    /// Current association of `iface`, `None` when not connected.
    fn link_status(&self, iface: &str) -> io::Result<Option<Association>>;

    /// Signal of `ap` in the most recent scan results for `iface`, `None`
    /// when the AP was not seen. Reads the cached dump; does not scan.
    fn scan_signal(&self, iface: &str, ap: &AccessPoint) -> io::Result<Option<f64>>;

    /// Requests a fresh (possibly slow) active scan for `ssid`.
    fn trigger_scan(&self, iface: &str, ssid: &str) -> io::Result<()>;

    /// Fire-and-forget association request; confirm via [`Self::link_status`].
    fn connect(&self, iface: &str, ssid: &str) -> io::Result<()>;

    fn set_mode(&self, iface: &str, mode: WifiMode) -> io::Result<()>;

    fn link_up(&self, iface: &str) -> io::Result<()>;

    /// Whether the interface oper-state is still DOWN.
    fn link_is_down(&self, iface: &str) -> io::Result<bool>;

    fn ibss_join(&self, iface: &str, ibss: &IbssParams) -> io::Result<()>;

    fn ibss_leave(&self, iface: &str) -> io::Result<()>;

    /// Launches the routing daemon bound to `config`. The daemon detaches;
    /// its PID must be discovered via [`Self::find_routing_daemon`].
    fn spawn_routing_daemon(&self, daemon: &str, config: &Path) -> io::Result<()>;

    /// First PID of `daemon` whose command line contains `marker`
    /// (the per-interface config path distinguishes daemons of co-located
    /// emulated nodes).
    fn find_routing_daemon(&self, daemon: &str, marker: &str) -> io::Result<Option<u32>>;

    /// Sends SIGTERM to a previously discovered daemon.
    fn stop_routing_daemon(&self, pid: u32) -> io::Result<()>;

    /// Assigns a static IPv4 address (CIDR notation) to the interface.
    fn assign_ipv4(&self, iface: &str, addr: &str) -> io::Result<()>;

    /// Installs the HTB root qdisc used for handover throttling.
    fn install_qdisc(&self, iface: &str, rate: Rate) -> io::Result<()>;

    /// Replaces the HTB class rate on an installed qdisc.
    fn update_qdisc(&self, iface: &str, rate: Rate) -> io::Result<()>;

    /// One-shot reachability probe (ARP/route priming after attach).
    fn ping(&self, host: &str) -> io::Result<()>;
}
