//! Durable handover event and signal-quality logs.
//!
//! Operators observe handover health exclusively through these files, so
//! every row is appended with its own write syscall instead of sitting in a
//! userspace buffer: a crash mid-handover leaves an accurate partial trail.
//! Each writer owns its file (the controller and the scanner log to separate
//! paths), which keeps the append path lock-free.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::quality::LinkSample;

/// Column order of the event CSV. One row per state-transition edge; the
/// matching column carries 1 for a `…Begin`/one-shot event and 2 for an
/// `…End` event, all other columns are 0.
pub const EVENT_COLUMNS: [&str; 6] = [
    "time",
    "disconnect",
    "reconnect",
    "scanner_start",
    "scanner_stop",
    "scan_trigger",
];

/// Edge of a handover transition or scanner lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    DisconnectBegin,
    DisconnectEnd,
    ReconnectBegin,
    ReconnectEnd,
    ScannerStart,
    ScannerStop,
    ScanTrigger,
}

impl EventKind {
    /// CSV column carrying this event.
    pub fn column(self) -> &'static str {
        match self {
            EventKind::DisconnectBegin | EventKind::DisconnectEnd => "disconnect",
            EventKind::ReconnectBegin | EventKind::ReconnectEnd => "reconnect",
            EventKind::ScannerStart => "scanner_start",
            EventKind::ScannerStop => "scanner_stop",
            EventKind::ScanTrigger => "scan_trigger",
        }
    }

    /// Cell value within [`EventKind::column`]: 1 marks a begin edge or a
    /// one-shot event, 2 marks an end edge.
    pub fn value(self) -> u8 {
        match self {
            EventKind::DisconnectBegin
            | EventKind::ReconnectBegin
            | EventKind::ScannerStart
            | EventKind::ScannerStop
            | EventKind::ScanTrigger => 1,
            EventKind::DisconnectEnd | EventKind::ReconnectEnd => 2,
        }
    }

    fn from_column_value(column: &str, value: u8) -> Option<Self> {
        match (column, value) {
            ("disconnect", 1) => Some(EventKind::DisconnectBegin),
            ("disconnect", 2) => Some(EventKind::DisconnectEnd),
            ("reconnect", 1) => Some(EventKind::ReconnectBegin),
            ("reconnect", 2) => Some(EventKind::ReconnectEnd),
            ("scanner_start", 1) => Some(EventKind::ScannerStart),
            ("scanner_stop", 1) => Some(EventKind::ScannerStop),
            ("scan_trigger", 1) => Some(EventKind::ScanTrigger),
            _ => None,
        }
    }
}

/// One persisted event row. `time` is relative to the experiment start
/// reference so rows from different nodes can be correlated.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoverEvent {
    pub time: f64,
    pub kind: EventKind,
}

impl HandoverEvent {
    fn to_row(&self) -> String {
        let mut cells = [0u8; 5];
        let idx = EVENT_COLUMNS
            .iter()
            .skip(1)
            .position(|c| *c == self.kind.column())
            .unwrap_or(0);
        cells[idx] = self.kind.value();
        format!(
            "{:.6},{},{},{},{},{}\n",
            self.time, cells[0], cells[1], cells[2], cells[3], cells[4]
        )
    }

    fn parse_row(line: &str) -> Option<Self> {
        let mut fields = line.trim().split(',');
        let time: f64 = fields.next()?.parse().ok()?;
        for column in &EVENT_COLUMNS[1..] {
            let value: u8 = fields.next()?.parse().ok()?;
            if value != 0 {
                return EventKind::from_column_value(column, value)
                    .map(|kind| HandoverEvent { time, kind });
            }
        }
        None
    }
}

/// Append-only event log bound to one file and one start reference.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    start_time: f64,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, start_time: f64) -> Self {
        EventLog {
            path: path.into(),
            start_time,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one event row stamped with the current relative time and
    /// returns the event as written. The time is rounded to the microsecond
    /// precision of the persisted format, so the returned event reads back
    /// identically.
    pub fn record(&self, kind: EventKind) -> io::Result<HandoverEvent> {
        let event = HandoverEvent {
            time: ((epoch_now() - self.start_time) * 1e6).round() / 1e6,
            kind,
        };
        append_row(&self.path, &EVENT_COLUMNS.join(","), &event.to_row())?;
        Ok(event)
    }

    /// Reads every event row back from `path`. Rows that do not parse are
    /// skipped; a partially written trailing row must not poison the log.
    pub fn read(path: &Path) -> io::Result<Vec<HandoverEvent>> {
        let contents = std::fs::read_to_string(path)?;
        Ok(contents
            .lines()
            .skip(1)
            .filter_map(HandoverEvent::parse_row)
            .collect())
    }
}

/// Signal-quality log: one row per healthy attached tick.
#[derive(Debug, Clone)]
pub struct SignalLog {
    path: PathBuf,
}

const SIGNAL_COLUMNS: [&str; 5] = ["time", "SSID", "signal", "rx_bitrate", "tx_bitrate"];

impl SignalLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SignalLog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, sample: &LinkSample) -> io::Result<()> {
        let row = format!(
            "{:.6},{},{},{},{}\n",
            sample.time,
            sample.ssid,
            sample.signal_dbm,
            sample.rx_bitrate.as_deref().unwrap_or("NaN"),
            sample.tx_bitrate.as_deref().unwrap_or("NaN"),
        );
        append_row(&self.path, &SIGNAL_COLUMNS.join(","), &row)
    }
}

/// Appends `row` to `path`, writing `header` first if the file is new.
fn append_row(path: &Path, header: &str, row: &str) -> io::Result<()> {
    let new_file = !path.exists();
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if new_file {
        file.write_all(header.as_bytes())?;
        file.write_all(b"\n")?;
    }
    file.write_all(row.as_bytes())
}

/// Current wall-clock time as fractional epoch seconds.
pub fn epoch_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}
