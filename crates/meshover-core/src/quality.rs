//! Connectivity quality sources.
//!
//! The controller is parameterized over one [`QualitySource`] with two
//! interchangeable implementations: live link/scan signal readings, or a
//! predicted network state maintained by an external predictor in an
//! append-only trace file. A source never blocks the control loop; "no
//! sample this tick" is an ordinary answer, not an error.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::config::AccessPoint;
use crate::env::NodeEnv;
use crate::error::HandoverError;
use crate::events::epoch_now;

/// One live signal reading from the attached link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSample {
    /// Epoch seconds at the time of the reading.
    pub time: f64,
    pub ssid: String,
    pub signal_dbm: f64,
    pub rx_bitrate: Option<String>,
    pub tx_bitrate: Option<String>,
}

/// One row of the externally maintained predicted-state trace.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictedState {
    pub time: f64,
    pub x: Option<f64>,
    pub y: Option<f64>,
    /// Network state observed by the predictor.
    pub state: f64,
    /// State predicted `dtime` ahead; this is what handover decisions use.
    pub state_pred: f64,
    pub dtime: f64,
}

/// A quality observation handed to the controller while attached.
#[derive(Debug, Clone, PartialEq)]
pub enum QualityReading {
    Link(LinkSample),
    Predicted(PredictedState),
}

impl QualityReading {
    /// Scalar value fed into the hysteresis filter.
    pub fn value(&self) -> f64 {
        match self {
            QualityReading::Link(sample) => sample.signal_dbm,
            QualityReading::Predicted(state) => state.state_pred,
        }
    }
}

/// Source of connectivity quality for one node.
pub trait QualitySource: Send {
    /// Quality at startup, used to pick the initial connectivity state.
    /// `Ok(None)` means nothing observable yet (acceptable for the link
    /// variant, whose ground truth is the association wait); `Err` is the
    /// one fatal startup condition.
    fn initial(&mut self) -> Result<Option<f64>, HandoverError>;

    /// Quality of the attached link this tick, if observable.
    fn attached(&mut self) -> Option<QualityReading>;

    /// Evidence that the base station is back in range while in mesh mode
    /// (scan result or predicted state), if available this tick.
    fn reachability(&mut self) -> Option<f64>;

    /// Whether this source relies on the background discovery scanner to
    /// refresh its reachability evidence.
    fn needs_scanner(&self) -> bool;

    /// Whether an absent attached reading means the link itself is gone.
    /// Live link status reads are absent exactly when the association is
    /// lost; a trace source is merely reporting "no new data this tick".
    fn absent_is_link_loss(&self) -> bool {
        true
    }
}

/// Live-signal source: attached quality from the link status, reachability
/// from the scan results that the discovery scanner keeps fresh.
pub struct LinkSignalSource {
    env: Arc<dyn NodeEnv>,
    iface: String,
    scan_iface: String,
    ap: AccessPoint,
}

impl LinkSignalSource {
    pub fn new(env: Arc<dyn NodeEnv>, iface: &str, scan_iface: &str, ap: AccessPoint) -> Self {
        LinkSignalSource {
            env,
            iface: iface.to_string(),
            scan_iface: scan_iface.to_string(),
            ap,
        }
    }

    fn current_sample(&self) -> Option<LinkSample> {
        let assoc = self.env.link_status(&self.iface).ok().flatten()?;
        // Association with anything but the configured AP carries no
        // information about the AP's link quality.
        if assoc.bssid != self.ap.bssid {
            return None;
        }
        let signal_dbm = assoc.signal_dbm?;
        Some(LinkSample {
            time: epoch_now(),
            ssid: assoc.ssid.unwrap_or_else(|| self.ap.ssid.clone()),
            signal_dbm,
            rx_bitrate: assoc.rx_bitrate,
            tx_bitrate: assoc.tx_bitrate,
        })
    }
}

impl QualitySource for LinkSignalSource {
    fn initial(&mut self) -> Result<Option<f64>, HandoverError> {
        Ok(self.current_sample().map(|s| s.signal_dbm))
    }

    fn attached(&mut self) -> Option<QualityReading> {
        self.current_sample().map(QualityReading::Link)
    }

    fn reachability(&mut self) -> Option<f64> {
        match self.env.scan_signal(&self.scan_iface, &self.ap) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::debug!(iface = %self.scan_iface, error = %e, "scan dump unavailable");
                None
            }
        }
    }

    fn needs_scanner(&self) -> bool {
        true
    }
}

/// Trace columns written by the predictor.
const TRACE_COLUMNS: usize = 8;

/// Predicted-state source reading the newest row of an append-only trace
/// file. The file's modification time gates re-reads, so an unchanged file
/// costs one `stat` per tick rather than a parse.
pub struct StateTraceSource {
    path: PathBuf,
    last_mtime: Option<SystemTime>,
    current: Option<PredictedState>,
    reads: Arc<AtomicU64>,
}

impl StateTraceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StateTraceSource {
            path: path.into(),
            last_mtime: None,
            current: None,
            reads: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter of full trace reads, shared for observability in tests and
    /// diagnostics. mtime-gated polling keeps this far below the tick count.
    pub fn read_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.reads)
    }

    fn read_last_row(&self) -> std::io::Result<Option<PredictedState>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(contents
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .and_then(parse_trace_row))
    }

    /// Newest state if the trace changed since the last poll. A file caught
    /// mid-append simply yields nothing this tick.
    fn poll(&mut self) -> Option<PredictedState> {
        let mtime = std::fs::metadata(&self.path).ok()?.modified().ok()?;
        if self.last_mtime == Some(mtime) {
            return None;
        }
        self.last_mtime = Some(mtime);
        match self.read_last_row() {
            Ok(Some(row)) => {
                if self.current.as_ref() == Some(&row) {
                    None
                } else {
                    self.current = Some(row.clone());
                    Some(row)
                }
            }
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "trace read failed");
                None
            }
        }
    }
}

impl QualitySource for StateTraceSource {
    fn initial(&mut self) -> Result<Option<f64>, HandoverError> {
        self.last_mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();
        match self.read_last_row() {
            Ok(Some(row)) => {
                let state = row.state;
                self.current = Some(row);
                Ok(Some(state))
            }
            Ok(None) => Err(HandoverError::InitialState {
                path: self.path.clone(),
                reason: "trace contains no parsable state row".into(),
            }),
            Err(e) => Err(HandoverError::InitialState {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn attached(&mut self) -> Option<QualityReading> {
        self.poll().map(QualityReading::Predicted)
    }

    fn reachability(&mut self) -> Option<f64> {
        self.poll().map(|row| row.state_pred)
    }

    fn needs_scanner(&self) -> bool {
        false
    }

    fn absent_is_link_loss(&self) -> bool {
        false
    }
}

/// Parses one `time,x,y,state,x_pred,y_pred,state_pred,dtime` row. Returns
/// `None` for headers, short rows, and rows torn by a concurrent append.
fn parse_trace_row(line: &str) -> Option<PredictedState> {
    let fields: Vec<&str> = line.trim().split(',').collect();
    if fields.len() < TRACE_COLUMNS {
        return None;
    }
    Some(PredictedState {
        time: fields[0].trim().parse().ok()?,
        x: fields[1].trim().parse().ok(),
        y: fields[2].trim().parse().ok(),
        state: fields[3].trim().parse().ok()?,
        state_pred: fields[6].trim().parse().ok()?,
        dtime: fields[7].trim().parse().ok()?,
    })
}
