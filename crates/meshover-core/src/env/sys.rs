//! [`NodeEnv`] implementation shelling out to the standard Linux tooling:
//! `iw` for wireless control, `ip` for link state and addressing, `tc` for
//! the shaping qdisc, `pgrep` for daemon discovery, and SIGTERM via
//! `libc::kill` for daemon shutdown.
//!
//! All output parsing lives in pure functions below so the formats can be
//! pinned down in unit tests without a wireless stack.

use std::io;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use crate::config::{AccessPoint, IbssParams, Rate};

use super::{Association, NodeEnv, WifiMode};

/// Production environment backed by OS commands.
#[derive(Debug, Default)]
pub struct SysEnv;

impl SysEnv {
    pub fn new() -> Self {
        SysEnv
    }

    fn iw(&self, iface: &str, args: &[&str]) -> io::Result<Output> {
        Command::new("iw").args(["dev", iface]).args(args).output()
    }

    fn ip(&self, args: &[&str]) -> io::Result<Output> {
        Command::new("ip").args(args).output()
    }

    fn tc(&self, args: &[&str]) -> io::Result<Output> {
        Command::new("tc").args(args).output()
    }
}

fn expect_success(output: Output, what: &str) -> io::Result<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!(
            "{what} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

impl NodeEnv for SysEnv {
    fn link_status(&self, iface: &str) -> io::Result<Option<Association>> {
        let output = self.iw(iface, &["link"])?;
        Ok(parse_link_status(&String::from_utf8_lossy(&output.stdout)))
    }

    fn scan_signal(&self, iface: &str, ap: &AccessPoint) -> io::Result<Option<f64>> {
        let output = self.iw(iface, &["scan", "dump"])?;
        Ok(signal_from_scan_dump(
            &String::from_utf8_lossy(&output.stdout),
            &ap.bssid,
            &ap.ssid,
        ))
    }

    fn trigger_scan(&self, iface: &str, ssid: &str) -> io::Result<()> {
        // A busy radio makes this fail transiently; the caller retries on
        // its next interval, so the exit status is all we need.
        expect_success(self.iw(iface, &["scan", "ssid", ssid])?, "scan request")
    }

    fn connect(&self, iface: &str, ssid: &str) -> io::Result<()> {
        expect_success(self.iw(iface, &["connect", ssid])?, "connect")
    }

    fn set_mode(&self, iface: &str, mode: WifiMode) -> io::Result<()> {
        expect_success(
            self.iw(iface, &["set", "type", mode.as_str()])?,
            "set type",
        )
    }

    fn link_up(&self, iface: &str) -> io::Result<()> {
        expect_success(self.ip(&["link", "set", iface, "up"])?, "link up")
    }

    fn link_is_down(&self, iface: &str) -> io::Result<bool> {
        let output = self.ip(&["link", "show", iface])?;
        Ok(String::from_utf8_lossy(&output.stdout).contains("state DOWN"))
    }

    fn ibss_join(&self, iface: &str, ibss: &IbssParams) -> io::Result<()> {
        let freq = ibss.freq_mhz.to_string();
        expect_success(
            self.iw(
                iface,
                &["ibss", "join", &ibss.ssid, &freq, &ibss.ht_cap, &ibss.bssid],
            )?,
            "ibss join",
        )
    }

    fn ibss_leave(&self, iface: &str) -> io::Result<()> {
        expect_success(self.iw(iface, &["ibss", "leave"])?, "ibss leave")
    }

    fn spawn_routing_daemon(&self, daemon: &str, config: &Path) -> io::Result<()> {
        // The daemon forks into the background itself; the direct child
        // exits immediately and the real PID comes from the process listing.
        let output = Command::new(daemon)
            .arg("-f")
            .arg(config)
            .arg("-d")
            .arg("0")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .output()?;
        expect_success(output, "routing daemon launch")
    }

    fn find_routing_daemon(&self, daemon: &str, marker: &str) -> io::Result<Option<u32>> {
        let output = Command::new("pgrep").args(["-a", daemon]).output()?;
        Ok(first_pid_matching(
            &String::from_utf8_lossy(&output.stdout),
            marker,
        ))
    }

    fn stop_routing_daemon(&self, pid: u32) -> io::Result<()> {
        // SAFETY: sends SIGTERM to a PID we discovered via pgrep; worst
        // case the process is already gone and kill reports ESRCH.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn assign_ipv4(&self, iface: &str, addr: &str) -> io::Result<()> {
        expect_success(
            self.ip(&["addr", "replace", addr, "dev", iface])?,
            "addr replace",
        )
    }

    fn install_qdisc(&self, iface: &str, rate: Rate) -> io::Result<()> {
        // Clear any leftover root qdisc first; failure there only means
        // none was installed.
        let _ = self.tc(&["qdisc", "del", "dev", iface, "root"]);
        expect_success(
            self.ip(&["link", "set", "dev", iface, "txqueuelen", "10000"])?,
            "txqueuelen",
        )?;
        expect_success(
            self.tc(&[
                "qdisc", "add", "dev", iface, "root", "handle", "1:", "htb", "default", "1",
            ])?,
            "qdisc add",
        )?;
        let rate = rate.to_string();
        expect_success(
            self.tc(&[
                "class", "add", "dev", iface, "parent", "1:", "classid", "1:1", "htb", "rate",
                &rate,
            ])?,
            "class add",
        )
    }

    fn update_qdisc(&self, iface: &str, rate: Rate) -> io::Result<()> {
        let rate = rate.to_string();
        expect_success(
            self.tc(&[
                "class", "replace", "dev", iface, "parent", "1:", "classid", "1:1", "htb", "rate",
                &rate,
            ])?,
            "class replace",
        )
    }

    fn ping(&self, host: &str) -> io::Result<()> {
        let _ = Command::new("ping")
            .args(["-c1", "-W1", host])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .output()?;
        Ok(())
    }
}

/// Parses `iw dev <iface> link` output into an [`Association`].
///
/// ```text
/// Connected to 00:00:00:00:01:00 (on sta1-wlan0)
///         SSID: ap1-ssid
///         freq: 2412
///         signal: -62 dBm
///         rx bitrate: 6.0 MBit/s
///         tx bitrate: 6.0 MBit/s
/// ```
///
/// `Not connected.` (or anything without the `Connected to` marker) parses
/// as `None`.
pub fn parse_link_status(output: &str) -> Option<Association> {
    let rest = output.split("Connected to ").nth(1)?;
    let bssid = rest.split_whitespace().next()?.to_string();

    let mut assoc = Association {
        bssid,
        ..Association::default()
    };
    for line in rest.lines().skip(1) {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "SSID" => assoc.ssid = Some(value.to_string()),
            "signal" => assoc.signal_dbm = parse_leading_float(value),
            "rx bitrate" => assoc.rx_bitrate = Some(value.to_string()),
            "tx bitrate" => assoc.tx_bitrate = Some(value.to_string()),
            _ => {}
        }
    }
    Some(assoc)
}

/// Extracts the signal of the given AP from `iw dev <iface> scan dump`
/// output. Returns `None` unless a `BSS <bssid>` block advertising
/// `SSID: <ssid>` with a parsable signal line is present.
pub fn signal_from_scan_dump(output: &str, bssid: &str, ssid: &str) -> Option<f64> {
    for block in output.split("BSS ") {
        if !block.starts_with(bssid) {
            continue;
        }
        let advertises_ssid = block
            .lines()
            .any(|l| l.trim().strip_prefix("SSID:").map(str::trim) == Some(ssid));
        if !advertises_ssid {
            continue;
        }
        let signal = block.lines().find_map(|l| {
            l.trim()
                .strip_prefix("signal:")
                .and_then(|v| parse_leading_float(v.trim()))
        });
        if signal.is_some() {
            return signal;
        }
    }
    None
}

/// First PID in `pgrep -a` output whose command line contains `marker`.
pub fn first_pid_matching(output: &str, marker: &str) -> Option<u32> {
    output
        .lines()
        .find(|line| line.contains(marker))
        .and_then(|line| line.split_whitespace().next())
        .and_then(|pid| pid.parse().ok())
}

/// Parses the leading (possibly signed, possibly fractional) number of a
/// string like `-62.00 dBm`.
fn parse_leading_float(value: &str) -> Option<f64> {
    let end = value
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    value[..end].parse().ok()
}
