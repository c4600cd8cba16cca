//! Background discovery scanner.
//!
//! While a node sits in mesh mode it keeps probing for the base station
//! with periodic active scans. Scan requests can block for seconds, so they
//! run on their own thread and never touch the controller's tick cadence.
//! The only state shared with the controller is the scanner's own
//! append-only event file.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::env::NodeEnv;
use crate::error::HandoverError;
use crate::events::{EventKind, EventLog};

/// Periodic scan task bound to one interface and one target SSID.
///
/// Instances are single-use: once terminated they cannot be started again,
/// which rules out restart races on the underlying thread. The controller
/// constructs a fresh scanner for each mesh episode.
pub struct DiscoveryScanner {
    env: Arc<dyn NodeEnv>,
    iface: String,
    ssid: String,
    interval: Duration,
    events: EventLog,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    terminated: bool,
}

impl DiscoveryScanner {
    pub fn new(
        env: Arc<dyn NodeEnv>,
        iface: &str,
        ssid: &str,
        interval: Duration,
        events: EventLog,
    ) -> Self {
        DiscoveryScanner {
            env,
            iface: iface.to_string(),
            ssid: ssid.to_string(),
            interval,
            events,
            stop_tx: None,
            handle: None,
            terminated: false,
        }
    }

    /// Spawns the scan loop: sleep one interval, request a scan, record a
    /// `scan_trigger` row, repeat until terminated. Scan failures are logged
    /// and the loop keeps going; a busy radio is a transient condition.
    pub fn start(&mut self) -> Result<(), HandoverError> {
        if self.terminated || self.handle.is_some() {
            return Err(HandoverError::ScannerReused);
        }

        let env = Arc::clone(&self.env);
        let iface = self.iface.clone();
        let ssid = self.ssid.clone();
        let interval = self.interval;
        let events = self.events.clone();
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name(format!("meshover-scan-{iface}"))
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                tracing::debug!(iface = %iface, ssid = %ssid, "requesting scan");
                if let Err(e) = env.trigger_scan(&iface, &ssid) {
                    tracing::warn!(iface = %iface, error = %e, "scan request failed");
                }
                if let Err(e) = events.record(EventKind::ScanTrigger) {
                    tracing::warn!(error = %e, "recording scan trigger failed");
                }
            })?;

        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        Ok(())
    }

    /// Whether the scan thread is currently running.
    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the scan loop and joins the thread. The instance is spent
    /// afterwards; construct a fresh one to resume scanning.
    pub fn terminate(&mut self) {
        // Dropping the sender disconnects the channel, which wakes the loop
        // even mid-sleep.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(iface = %self.iface, "scan thread panicked");
            }
        }
        self.terminated = true;
    }
}

impl Drop for DiscoveryScanner {
    fn drop(&mut self) {
        self.terminate();
    }
}
