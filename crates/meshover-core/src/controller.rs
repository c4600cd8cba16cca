//! Handover controller.
//!
//! Single-threaded cooperative control loop owning the node's connectivity
//! state. Each tick it polls the quality source, feeds the hysteresis
//! filters, and drives the actuators across the two transitions:
//!
//! ```text
//!            filtered quality ≤ disconnect threshold
//!   ATTACHED ─────────────────────────────────────────▶ MESH
//!            ◀─────────────────────────────────────────
//!            filtered reachability ≥ reconnect threshold
//! ```
//!
//! Actuator failures are absorbed here: the failed transition is logged,
//! state is left unchanged, and the next qualifying tick retries. The only
//! fatal condition is an unreadable initial state at startup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::attach::AttachmentActuator;
use crate::config::ControllerConfig;
use crate::env::NodeEnv;
use crate::error::HandoverError;
use crate::events::{EventKind, EventLog, SignalLog};
use crate::mesh::MeshActuator;
use crate::quality::{QualityReading, QualitySource};
use crate::scanner::DiscoveryScanner;
use crate::shaper::TrafficShaper;
use crate::window::SlidingWindow;

/// Connectivity mode of the node. Exactly one holder (the controller)
/// mutates this; everything else reads it through [`HandoverController::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// Associated with the infrastructure access point.
    Attached,
    /// Participating in the ad-hoc mesh with the routing daemon up.
    Mesh,
}

impl ConnectivityState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectivityState::Attached => "attached",
            ConnectivityState::Mesh => "mesh",
        }
    }
}

/// Per-node handover state machine and control loop.
pub struct HandoverController {
    config: ControllerConfig,
    env: Arc<dyn NodeEnv>,
    source: Box<dyn QualitySource>,
    state: ConnectivityState,
    attached_window: SlidingWindow,
    reach_window: SlidingWindow,
    mesh: MeshActuator,
    attach: AttachmentActuator,
    shaper: TrafficShaper,
    scanner: Option<DiscoveryScanner>,
    events: EventLog,
    scanner_events: EventLog,
    signal_log: SignalLog,
}

impl HandoverController {
    /// Builds a controller. `config.out_dir` must already exist; log files
    /// are created lazily on first append.
    pub fn new(
        config: ControllerConfig,
        env: Arc<dyn NodeEnv>,
        source: Box<dyn QualitySource>,
    ) -> Self {
        let station = config.station();
        let events = EventLog::new(
            config.out_dir.join(format!("{station}_events.csv")),
            config.start_time,
        );
        let scanner_events = EventLog::new(
            config.out_dir.join(format!("{station}_scanner_events.csv")),
            config.start_time,
        );
        let signal_log = SignalLog::new(
            config
                .out_dir
                .join(format!("{}_signal.csv", config.interface)),
        );
        let mesh = MeshActuator::new(Arc::clone(&env), &config.interface, config.mesh.clone());
        let attach = AttachmentActuator::new(
            Arc::clone(&env),
            &config.interface,
            config.ap.clone(),
            config.attach.clone(),
            config.static_ip.clone(),
            config.pingto.clone(),
        );
        let shaper = TrafficShaper::new(Arc::clone(&env), &config.interface, config.shaping.clone());
        let attached_window = SlidingWindow::new(config.window_size);
        let reach_window = SlidingWindow::new(config.window_size);

        HandoverController {
            config,
            env,
            source,
            state: ConnectivityState::Attached,
            attached_window,
            reach_window,
            mesh,
            attach,
            shaper,
            scanner: None,
            events,
            scanner_events,
            signal_log,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    /// PID of the routing daemon while in mesh mode.
    pub fn daemon_pid(&self) -> Option<u32> {
        self.mesh.daemon().pid()
    }

    pub fn scanner_alive(&self) -> bool {
        self.scanner.as_ref().is_some_and(|s| s.is_alive())
    }

    /// Picks the initial connectivity state from the first observable
    /// quality reading and performs the matching cold start. The mesh-side
    /// cold start applies no shaping transient; there is nothing to
    /// transition away from yet.
    pub fn start(&mut self) -> Result<(), HandoverError> {
        if let Err(e) = self.shaper.install() {
            tracing::warn!(error = %e, "qdisc install failed; continuing unshaped");
        }

        let initial = self.source.initial()?;
        match initial {
            Some(quality) if quality < self.config.reconnect_threshold => {
                tracing::info!(
                    quality,
                    threshold = self.config.reconnect_threshold,
                    "initial reading inadequate; starting in mesh mode"
                );
                match self.mesh.join_mesh() {
                    Ok(pid) => {
                        self.state = ConnectivityState::Mesh;
                        tracing::info!(pid, "mesh cold start complete");
                    }
                    Err(e) => {
                        // Stay nominally attached; the loop falls back to
                        // the mesh on the first qualifying tick.
                        self.state = ConnectivityState::Attached;
                        tracing::warn!(error = %e, "mesh cold start failed");
                    }
                }
            }
            _ => {
                if let Err(e) = self.attach.initial_connect() {
                    tracing::warn!(error = %e, "initial attach not confirmed; loop will re-evaluate");
                }
                self.state = ConnectivityState::Attached;
            }
        }
        tracing::info!(state = self.state.as_str(), "handover controller started");
        Ok(())
    }

    /// One control-loop iteration. Never blocks on the scanner and never
    /// lets an actuator failure escape.
    pub fn tick(&mut self) {
        if self.state == ConnectivityState::Attached {
            match self.source.attached() {
                Some(reading) => {
                    let value = reading.value();
                    self.attached_window.push(value);
                    let average = self.attached_window.average().unwrap_or(value);
                    if average > self.config.disconnect_threshold {
                        if let QualityReading::Link(sample) = &reading {
                            if let Err(e) = self.signal_log.record(sample) {
                                tracing::warn!(error = %e, "signal log append failed");
                            }
                        }
                        return;
                    }
                    tracing::info!(
                        average,
                        threshold = self.config.disconnect_threshold,
                        "attached quality at or below disconnect threshold"
                    );
                }
                // A missing link-status reading means the association is
                // already gone: fall through to the reachability check and
                // the mesh fallback in this same tick. A quiet trace source
                // just means no update.
                None if self.source.absent_is_link_loss() => {}
                None => return,
            }
        }

        if self.source.needs_scanner() {
            self.ensure_scanner();
        }
        if let Some(quality) = self.source.reachability() {
            self.reach_window.push(quality);
            let average = self.reach_window.average().unwrap_or(quality);
            if average >= self.config.reconnect_threshold {
                self.reconnect_transition(average);
                return;
            }
        }

        if self.state == ConnectivityState::Attached
            && self.config.mesh_fallback
            && !self.mesh.daemon_running()
        {
            self.disconnect_transition();
        }
    }

    /// Runs the control loop until `shutdown` is raised. The controller has
    /// no normal termination condition of its own.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), HandoverError> {
        self.start()?;
        while !shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(self.config.tick_interval);
            self.tick();
        }
        self.stop_scanner();
        tracing::info!("handover controller stopped");
        Ok(())
    }

    // ─── Transitions ────────────────────────────────────────────────────

    fn disconnect_transition(&mut self) {
        tracing::info!(iface = %self.config.interface, "activating mesh fallback");
        self.record_event(EventKind::DisconnectBegin);
        match self.mesh.switch_to_mesh(&mut self.shaper) {
            Ok(pid) => {
                self.state = ConnectivityState::Mesh;
                self.attached_window.clear();
                self.reach_window.clear();
                self.record_event(EventKind::DisconnectEnd);
                tracing::info!(pid, "mesh fallback active");
            }
            Err(e) => {
                tracing::warn!(error = %e, "mesh handover failed; retrying on a later tick");
            }
        }
    }

    fn reconnect_transition(&mut self, average: f64) {
        tracing::info!(
            average,
            threshold = self.config.reconnect_threshold,
            "access point back in range; reconnecting"
        );
        self.record_event(EventKind::ReconnectBegin);
        if let Err(e) = self.shaper.throttle_reconnect() {
            tracing::warn!(error = %e, "reconnect throttle failed");
        }
        if let Err(e) = self.mesh.leave_mesh() {
            tracing::warn!(error = %e, "leaving mesh failed");
        }
        let reconnected = self.attach.reconnect();
        if let Err(e) = self.shaper.restore() {
            tracing::warn!(error = %e, "rate restore failed");
        }
        match reconnected {
            Ok(()) => {
                self.stop_scanner();
                self.state = ConnectivityState::Attached;
                self.attached_window.clear();
                self.reach_window.clear();
                self.record_event(EventKind::ReconnectEnd);
                tracing::info!("reconnected to access point");
            }
            Err(e) => {
                tracing::warn!(error = %e, "reconnect failed; retrying on a later tick");
            }
        }
    }

    // ─── Scanner lifecycle ──────────────────────────────────────────────

    fn ensure_scanner(&mut self) {
        if self.scanner.as_ref().is_some_and(|s| s.is_alive()) {
            return;
        }
        let mut scanner = DiscoveryScanner::new(
            Arc::clone(&self.env),
            &self.config.scan_interface,
            &self.config.ap.ssid,
            self.config.scan_interval,
            self.scanner_events.clone(),
        );
        match scanner.start() {
            Ok(()) => {
                tracing::info!(iface = %self.config.scan_interface, "started background scan");
                self.record_event(EventKind::ScannerStart);
                self.scanner = Some(scanner);
            }
            Err(e) => {
                tracing::warn!(error = %e, "starting background scan failed");
            }
        }
    }

    fn stop_scanner(&mut self) {
        if let Some(mut scanner) = self.scanner.take() {
            if scanner.is_alive() {
                tracing::info!("stopping background scan");
                scanner.terminate();
                self.record_event(EventKind::ScannerStop);
            }
        }
    }

    fn record_event(&self, kind: EventKind) {
        if let Err(e) = self.events.record(kind) {
            tracing::warn!(error = %e, "event log append failed");
        }
    }
}
