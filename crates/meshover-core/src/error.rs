use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the handover controller and its actuators.
///
/// Only [`HandoverError::InitialState`] is fatal to the control process;
/// every other variant is absorbed by the control loop, logged, and retried
/// on the next qualifying tick.
#[derive(Debug, Error)]
pub enum HandoverError {
    /// A link-layer command could not be executed at all.
    #[error("link-layer command failed: {0}")]
    Env(#[from] io::Error),

    /// The routing daemon was launched but its PID never showed up in the
    /// process listing.
    #[error("routing daemon not found after {attempts} attempts")]
    DaemonStartTimeout { attempts: u32 },

    /// A second daemon start was requested while one is still tracked.
    #[error("routing daemon already running (pid {pid})")]
    DaemonAlreadyRunning { pid: u32 },

    /// The interface never left the DOWN state after the IBSS join.
    #[error("interface {iface} still DOWN after {attempts} polls")]
    LinkStuckDown { iface: String, attempts: u32 },

    /// Association with the access point was not confirmed in time. The
    /// connect command itself reports success eagerly, so confirmation is
    /// always taken from the link status query.
    #[error("association with {ssid} not confirmed after {attempts} attempts")]
    ConnectTimeout { ssid: String, attempts: u32 },

    /// The initial network state could not be read at startup. There is no
    /// sensible default to fall back to, so the process must abort.
    #[error("cannot read initial state from {path}: {reason}")]
    InitialState { path: PathBuf, reason: String },

    /// A terminated discovery scanner was asked to start again.
    #[error("discovery scanner instances are single-use; construct a fresh one")]
    ScannerReused,
}
