//! Mock link-layer environment and helpers for the unit and scenario tests.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::{AccessPoint, AttachParams, ControllerConfig, IbssParams, MeshParams, Rate};
use crate::env::{Association, NodeEnv, WifiMode};

/// Monotonically increasing counter for generating unique test resource names.
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Creates a unique output directory under the system temp dir. Combines
/// the prefix, process ID, and an atomic counter so parallel tests never
/// collide.
pub fn unique_out_dir(prefix: &str) -> PathBuf {
    let seq = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "meshover_{}_{:x}_{}",
        prefix,
        std::process::id(),
        seq
    ));
    std::fs::create_dir_all(&dir).expect("failed to create test output dir");
    dir
}

/// Mesh parameters with all waits collapsed for fast tests.
pub fn fast_mesh_params(iface: &str) -> MeshParams {
    MeshParams {
        ibss: IbssParams::default(),
        daemon_bin: "olsrd".into(),
        daemon_config: PathBuf::from(format!("{iface}-olsrd.conf")),
        pid_attempts: 3,
        pid_delay: Duration::ZERO,
        link_wait_attempts: 3,
        link_wait_delay: Duration::ZERO,
    }
}

/// Attach parameters with all waits collapsed for fast tests.
pub fn fast_attach_params() -> AttachParams {
    AttachParams {
        confirm_attempts: 5,
        confirm_delay: Duration::ZERO,
        initial_attempts: 5,
        initial_delay: Duration::ZERO,
    }
}

/// Controller configuration against the mock environment: default
/// thresholds, window of one, collapsed waits, and a scan interval long
/// enough that the scanner thread stays silent during a test.
pub fn fast_controller_config(iface: &str, out_dir: &Path) -> ControllerConfig {
    let mut config = ControllerConfig::new(iface, out_dir, 0.0);
    config.window_size = 1;
    config.scan_interval = Duration::from_secs(3600);
    config.mesh = fast_mesh_params(iface);
    config.attach = fast_attach_params();
    config
}

const FOREIGN_BSSID: &str = "66:66:66:66:66:66";

#[derive(Default)]
struct MockState {
    /// Scripted attached readings, consumed one per link-status query.
    /// `None` entries mean "not associated this query".
    link_script: VecDeque<Option<f64>>,
    /// Steady attached signal once the script is drained. `None` means not
    /// associated (unless a connect established the association).
    link_signal: Option<f64>,
    /// When set, link status reports association with a foreign BSSID.
    foreign_association: bool,
    /// Whether a connect command establishes the association.
    associate_on_connect: bool,
    /// Link-status polls to swallow before a fresh association confirms.
    association_delay: u32,
    connected: bool,
    /// Scripted scan results, consumed one per scan-signal query.
    scan_script: VecDeque<Option<f64>>,
    scan_signal: Option<f64>,
    daemon_discoverable: bool,
    daemon_spawned: bool,
    link_down_polls: u32,
    calls: Vec<String>,
}

/// Scriptable [`NodeEnv`] that records every command it receives.
pub struct MockEnv {
    ap: AccessPoint,
    state: Mutex<MockState>,
}

impl MockEnv {
    pub fn new(ap: AccessPoint) -> Self {
        MockEnv {
            ap,
            state: Mutex::new(MockState {
                daemon_discoverable: true,
                ..MockState::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_link_signal(&self, signal: Option<f64>) {
        self.lock().link_signal = signal;
    }

    pub fn push_link_script(&self, readings: &[Option<f64>]) {
        self.lock().link_script.extend(readings.iter().copied());
    }

    pub fn set_foreign_association(&self, foreign: bool) {
        self.lock().foreign_association = foreign;
    }

    pub fn set_associate_on_connect(&self, associate: bool) {
        self.lock().associate_on_connect = associate;
    }

    pub fn set_association_delay_polls(&self, polls: u32) {
        self.lock().association_delay = polls;
    }

    pub fn set_scan_signal(&self, signal: Option<f64>) {
        self.lock().scan_signal = signal;
    }

    pub fn push_scan_script(&self, readings: &[Option<f64>]) {
        self.lock().scan_script.extend(readings.iter().copied());
    }

    pub fn set_daemon_discoverable(&self, discoverable: bool) {
        self.lock().daemon_discoverable = discoverable;
    }

    pub fn set_link_down_polls(&self, polls: u32) {
        self.lock().link_down_polls = polls;
    }

    /// Number of recorded calls starting with `prefix`.
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn association(&self, bssid: &str, signal: f64) -> Association {
        Association {
            bssid: bssid.to_string(),
            ssid: Some(self.ap.ssid.clone()),
            signal_dbm: Some(signal),
            rx_bitrate: Some("6.0 MBit/s".into()),
            tx_bitrate: Some("6.0 MBit/s".into()),
        }
    }
}

impl NodeEnv for MockEnv {
    fn link_status(&self, iface: &str) -> io::Result<Option<Association>> {
        let mut st = self.lock();
        st.calls.push(format!("link_status {iface}"));

        if let Some(entry) = st.link_script.pop_front() {
            return Ok(entry.map(|signal| self.association(&self.ap.bssid, signal)));
        }

        if st.foreign_association {
            let signal = st.link_signal.unwrap_or(-50.0);
            return Ok(Some(self.association(FOREIGN_BSSID, signal)));
        }

        let associated = st.link_signal.is_some() || st.connected;
        if !associated {
            return Ok(None);
        }
        if st.association_delay > 0 {
            st.association_delay -= 1;
            return Ok(None);
        }
        let signal = st.link_signal.unwrap_or(-50.0);
        Ok(Some(self.association(&self.ap.bssid, signal)))
    }

    fn scan_signal(&self, iface: &str, _ap: &AccessPoint) -> io::Result<Option<f64>> {
        let mut st = self.lock();
        st.calls.push(format!("scan_signal {iface}"));
        if let Some(entry) = st.scan_script.pop_front() {
            return Ok(entry);
        }
        Ok(st.scan_signal)
    }

    fn trigger_scan(&self, iface: &str, ssid: &str) -> io::Result<()> {
        self.lock().calls.push(format!("trigger_scan {iface} {ssid}"));
        Ok(())
    }

    fn connect(&self, iface: &str, ssid: &str) -> io::Result<()> {
        let mut st = self.lock();
        st.calls.push(format!("connect {iface} {ssid}"));
        if st.associate_on_connect {
            st.connected = true;
        }
        Ok(())
    }

    fn set_mode(&self, iface: &str, mode: WifiMode) -> io::Result<()> {
        self.lock()
            .calls
            .push(format!("set_mode {iface} {}", mode.as_str()));
        Ok(())
    }

    fn link_up(&self, iface: &str) -> io::Result<()> {
        self.lock().calls.push(format!("link_up {iface}"));
        Ok(())
    }

    fn link_is_down(&self, iface: &str) -> io::Result<bool> {
        let mut st = self.lock();
        st.calls.push(format!("link_is_down {iface}"));
        if st.link_down_polls > 0 {
            st.link_down_polls -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn ibss_join(&self, iface: &str, ibss: &IbssParams) -> io::Result<()> {
        self.lock()
            .calls
            .push(format!("ibss_join {iface} {}", ibss.ssid));
        Ok(())
    }

    fn ibss_leave(&self, iface: &str) -> io::Result<()> {
        self.lock().calls.push(format!("ibss_leave {iface}"));
        Ok(())
    }

    fn spawn_routing_daemon(&self, daemon: &str, config: &Path) -> io::Result<()> {
        let mut st = self.lock();
        st.calls
            .push(format!("spawn_daemon {daemon} {}", config.display()));
        st.daemon_spawned = true;
        Ok(())
    }

    fn find_routing_daemon(&self, daemon: &str, _marker: &str) -> io::Result<Option<u32>> {
        let mut st = self.lock();
        st.calls.push(format!("find_daemon {daemon}"));
        if st.daemon_spawned && st.daemon_discoverable {
            Ok(Some(4242))
        } else {
            Ok(None)
        }
    }

    fn stop_routing_daemon(&self, pid: u32) -> io::Result<()> {
        let mut st = self.lock();
        st.calls.push(format!("stop_daemon {pid}"));
        st.daemon_spawned = false;
        Ok(())
    }

    fn assign_ipv4(&self, iface: &str, addr: &str) -> io::Result<()> {
        self.lock()
            .calls
            .push(format!("assign_ipv4 {iface} {addr}"));
        Ok(())
    }

    fn install_qdisc(&self, iface: &str, rate: Rate) -> io::Result<()> {
        self.lock()
            .calls
            .push(format!("install_qdisc {iface} {rate}"));
        Ok(())
    }

    fn update_qdisc(&self, iface: &str, rate: Rate) -> io::Result<()> {
        self.lock()
            .calls
            .push(format!("update_qdisc {iface} {rate}"));
        Ok(())
    }

    fn ping(&self, host: &str) -> io::Result<()> {
        self.lock().calls.push(format!("ping {host}"));
        Ok(())
    }
}
