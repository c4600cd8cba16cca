//! Attachment actuator: association with the base station.
//!
//! A connect command returning success means only that the request was
//! accepted; the link may never come up. Ground truth is always the link
//! status query, so every connect here is followed by a bounded
//! confirmation poll instead of trusting the exit code.

use std::sync::Arc;

use crate::config::{AccessPoint, AttachParams};
use crate::env::NodeEnv;
use crate::error::HandoverError;

/// Connects one interface to the configured access point.
pub struct AttachmentActuator {
    env: Arc<dyn NodeEnv>,
    iface: String,
    ap: AccessPoint,
    params: AttachParams,
    static_ip: Option<String>,
    pingto: Option<String>,
}

impl AttachmentActuator {
    pub fn new(
        env: Arc<dyn NodeEnv>,
        iface: &str,
        ap: AccessPoint,
        params: AttachParams,
        static_ip: Option<String>,
        pingto: Option<String>,
    ) -> Self {
        AttachmentActuator {
            env,
            iface: iface.to_string(),
            ap,
            params,
            static_ip,
            pingto,
        }
    }

    /// Whether the interface is currently associated with the configured AP.
    fn confirmed(&self) -> bool {
        matches!(
            self.env.link_status(&self.iface),
            Ok(Some(assoc)) if assoc.bssid == self.ap.bssid
        )
    }

    fn assign_static_ip(&self) {
        if let Some(addr) = &self.static_ip {
            if let Err(e) = self.env.assign_ipv4(&self.iface, addr) {
                tracing::warn!(iface = %self.iface, addr = %addr, error = %e, "address assignment failed");
            }
        }
    }

    /// Primes ARP/routing toward the AP and the optional probe address once
    /// a link is up. Best-effort; a lost probe means nothing here.
    fn prime_path(&self) {
        if let Err(e) = self.env.ping(&self.ap.ip) {
            tracing::debug!(host = %self.ap.ip, error = %e, "ap probe failed");
        }
        if let Some(host) = &self.pingto {
            if let Err(e) = self.env.ping(host) {
                tracing::debug!(host = %host, error = %e, "probe failed");
            }
        }
    }

    /// Startup attach. Nodes of the emulation come up in arbitrary order,
    /// so this retries generously, but still under a bound, surfacing a
    /// `ConnectTimeout` instead of spinning forever if the AP never appears.
    pub fn initial_connect(&self) -> Result<(), HandoverError> {
        tracing::info!(iface = %self.iface, ssid = %self.ap.ssid, "initial connect to access point");
        self.attach_with_retries(self.params.initial_attempts, self.params.initial_delay)
    }

    /// Reconnect during a mesh-to-AP handover: the scan already saw the AP,
    /// so confirmation is expected quickly.
    pub fn reconnect(&self) -> Result<(), HandoverError> {
        tracing::info!(iface = %self.iface, ssid = %self.ap.ssid, "reconnecting to access point");
        self.attach_with_retries(self.params.confirm_attempts, self.params.confirm_delay)
    }

    fn attach_with_retries(
        &self,
        attempts: u32,
        delay: std::time::Duration,
    ) -> Result<(), HandoverError> {
        for attempt in 0..attempts {
            if let Err(e) = self.env.connect(&self.iface, &self.ap.ssid) {
                tracing::warn!(iface = %self.iface, error = %e, "connect command failed");
            }
            self.assign_static_ip();
            if self.confirmed() {
                tracing::info!(iface = %self.iface, ssid = %self.ap.ssid, attempt, "association confirmed");
                self.prime_path();
                return Ok(());
            }
            if attempt + 1 < attempts {
                std::thread::sleep(delay);
            }
        }
        Err(HandoverError::ConnectTimeout {
            ssid: self.ap.ssid.clone(),
            attempts,
        })
    }
}
