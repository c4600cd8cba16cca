//! End-to-end handover scenarios against the mock link-layer environment.
//!
//! These drive the controller tick by tick and assert on the connectivity
//! state, the actuator command stream, and the persisted event trail.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::AccessPoint;
use crate::controller::{ConnectivityState, HandoverController};
use crate::events::{EventKind, EventLog};
use crate::quality::{LinkSignalSource, StateTraceSource};
use crate::test_util::{fast_controller_config, unique_out_dir, MockEnv};

const TRACE_HEADER: &str = "time,x,y,state,x_pred,y_pred,state_pred,dtime\n";

/// Controller over the live-signal source, started while attached with a
/// healthy steady signal.
fn started_link_controller(
    dir: &Path,
    window_size: usize,
) -> (Arc<MockEnv>, HandoverController) {
    let env = Arc::new(MockEnv::new(AccessPoint::default()));
    env.set_link_signal(Some(-70.0));
    let mut config = fast_controller_config("sta1-wlan0", dir);
    config.window_size = window_size;
    let source = LinkSignalSource::new(
        env.clone(),
        "sta1-wlan0",
        "sta1-wlan0",
        AccessPoint::default(),
    );
    let mut controller = HandoverController::new(config, env.clone(), Box::new(source));
    controller.start().unwrap();
    assert_eq!(controller.state(), ConnectivityState::Attached);
    (env, controller)
}

fn controller_events(dir: &Path) -> Vec<EventKind> {
    EventLog::read(&dir.join("sta1_events.csv"))
        .map(|events| events.into_iter().map(|e| e.kind).collect())
        .unwrap_or_default()
}

fn append_trace_row(path: &PathBuf, row: &str) {
    // keep appends apart so the mtime is guaranteed to move
    std::thread::sleep(std::time::Duration::from_millis(20));
    let mut contents = std::fs::read_to_string(path).unwrap();
    contents.push_str(row);
    contents.push('\n');
    std::fs::write(path, contents).unwrap();
}

// ─── Disconnect handover ────────────────────────────────────────────────

#[test]
fn mesh_entry_on_first_filtered_crossing() {
    let dir = unique_out_dir("sc_disconnect");
    let (env, mut controller) = started_link_controller(&dir, 1);

    env.push_link_script(&[
        Some(-70.0),
        Some(-75.0),
        Some(-80.0),
        Some(-90.0),
        Some(-90.0),
        Some(-90.0),
    ]);

    for _ in 0..3 {
        controller.tick();
        assert_eq!(controller.state(), ConnectivityState::Attached);
        assert!(controller.daemon_pid().is_none());
    }

    // the first -90 crosses the -88 threshold with a window of one
    controller.tick();
    assert_eq!(controller.state(), ConnectivityState::Mesh);
    assert_eq!(controller.daemon_pid(), Some(4242));

    for _ in 0..2 {
        controller.tick();
        assert_eq!(controller.state(), ConnectivityState::Mesh);
    }

    assert_eq!(
        controller_events(&dir),
        vec![
            EventKind::ScannerStart,
            EventKind::DisconnectBegin,
            EventKind::DisconnectEnd,
        ]
    );

    // the three healthy ticks each left a signal row
    let signal = std::fs::read_to_string(dir.join("sta1-wlan0_signal.csv")).unwrap();
    assert_eq!(signal.lines().count(), 4, "header plus one row per healthy tick");
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn filtered_oscillation_does_not_flap() {
    let dir = unique_out_dir("sc_hysteresis");
    let (env, mut controller) = started_link_controller(&dir, 2);

    // instantaneous readings cross -88 every other tick; the two-sample
    // average never does
    let mut script = Vec::new();
    for _ in 0..10 {
        script.push(Some(-86.0));
        script.push(Some(-89.0));
    }
    env.push_link_script(&script);

    for _ in 0..20 {
        controller.tick();
        assert_eq!(controller.state(), ConnectivityState::Attached);
    }
    assert!(controller_events(&dir).is_empty());
    assert_eq!(env.count_calls("spawn_daemon"), 0);
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn failed_daemon_start_keeps_state_and_retries() {
    let dir = unique_out_dir("sc_daemon_fail");
    let (env, mut controller) = started_link_controller(&dir, 1);
    env.set_daemon_discoverable(false);
    env.push_link_script(&[Some(-95.0), Some(-95.0)]);

    controller.tick();
    assert_eq!(controller.state(), ConnectivityState::Attached);
    assert!(controller.daemon_pid().is_none());

    controller.tick();
    assert_eq!(controller.state(), ConnectivityState::Attached);

    // each qualifying tick retried the whole switch
    assert_eq!(env.count_calls("spawn_daemon"), 2);
    let events = controller_events(&dir);
    assert_eq!(
        events
            .iter()
            .filter(|k| **k == EventKind::DisconnectBegin)
            .count(),
        2
    );
    assert!(!events.contains(&EventKind::DisconnectEnd));
    std::fs::remove_dir_all(dir).ok();
}

// ─── Reconnect handover ─────────────────────────────────────────────────

#[test]
fn reconnect_fires_on_first_scan_result() {
    let dir = unique_out_dir("sc_reconnect");
    let env = Arc::new(MockEnv::new(AccessPoint::default()));
    // above the -65 reconnect threshold, so the run starts attached
    env.set_link_signal(Some(-60.0));
    let mut config = fast_controller_config("sta1-wlan0", &dir);
    config.window_size = 2;
    config.reconnect_threshold = -65.0;
    let source = LinkSignalSource::new(
        env.clone(),
        "sta1-wlan0",
        "sta1-wlan0",
        AccessPoint::default(),
    );
    let mut controller = HandoverController::new(config, env.clone(), Box::new(source));
    controller.start().unwrap();
    assert_eq!(controller.state(), ConnectivityState::Attached);

    // association drops; five empty scan intervals precede the AP sighting
    env.push_link_script(&[None]);
    env.push_scan_script(&[None, None, None, None, None, Some(-60.0)]);

    controller.tick();
    assert_eq!(controller.state(), ConnectivityState::Mesh);
    assert!(controller.scanner_alive());

    for _ in 0..4 {
        controller.tick();
        assert_eq!(controller.state(), ConnectivityState::Mesh);
        assert!(!controller_events(&dir).contains(&EventKind::ReconnectBegin));
    }

    // first successful scan result clears the -65 reconnect threshold
    controller.tick();
    assert_eq!(controller.state(), ConnectivityState::Attached);
    assert!(controller.daemon_pid().is_none());
    assert!(!controller.scanner_alive());
    assert_eq!(env.count_calls("stop_daemon 4242"), 1);

    assert_eq!(
        controller_events(&dir),
        vec![
            EventKind::ScannerStart,
            EventKind::DisconnectBegin,
            EventKind::DisconnectEnd,
            EventKind::ReconnectBegin,
            EventKind::ScannerStop,
            EventKind::ReconnectEnd,
        ]
    );
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn failed_reconnect_stays_in_mesh_and_retries() {
    let dir = unique_out_dir("sc_reconnect_fail");
    let (env, mut controller) = started_link_controller(&dir, 1);

    env.push_link_script(&[None]);
    controller.tick();
    assert_eq!(controller.state(), ConnectivityState::Mesh);

    // AP visible in scans, but the association never confirms
    env.set_link_signal(None);
    env.set_associate_on_connect(false);
    env.set_scan_signal(Some(-60.0));
    controller.tick();
    assert_eq!(controller.state(), ConnectivityState::Mesh);
    let events = controller_events(&dir);
    assert!(events.contains(&EventKind::ReconnectBegin));
    assert!(!events.contains(&EventKind::ReconnectEnd));

    // the AP finally accepts the association; the next tick completes it
    env.set_associate_on_connect(true);
    controller.tick();
    assert_eq!(controller.state(), ConnectivityState::Attached);
    let events = controller_events(&dir);
    assert_eq!(
        events
            .iter()
            .filter(|k| **k == EventKind::ReconnectBegin)
            .count(),
        2
    );
    assert_eq!(
        events
            .iter()
            .filter(|k| **k == EventKind::ReconnectEnd)
            .count(),
        1
    );
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn event_trail_pairs_never_interleave() {
    let dir = unique_out_dir("sc_trail");
    let (env, mut controller) = started_link_controller(&dir, 1);

    // two full attach→mesh→attach cycles
    for _ in 0..2 {
        env.push_link_script(&[Some(-95.0)]);
        controller.tick();
        assert_eq!(controller.state(), ConnectivityState::Mesh);

        env.set_scan_signal(Some(-55.0));
        controller.tick();
        assert_eq!(controller.state(), ConnectivityState::Attached);
        env.set_scan_signal(None);
    }

    let events = controller_events(&dir);
    let disconnects: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, k)| matches!(k, EventKind::DisconnectBegin | EventKind::DisconnectEnd))
        .map(|(i, _)| i)
        .collect();
    // begin/end strictly alternate, one pair per cycle
    assert_eq!(disconnects.len(), 4);
    for pair in disconnects.chunks(2) {
        assert_eq!(events[pair[0]], EventKind::DisconnectBegin);
        assert_eq!(events[pair[1]], EventKind::DisconnectEnd);
        // nothing reconnect-ish sits between a begin and its end
        assert!(events[pair[0] + 1..pair[1]]
            .iter()
            .all(|k| !matches!(k, EventKind::ReconnectBegin | EventKind::ReconnectEnd)));
    }
    // a fresh scanner instance was started for the second episode
    assert_eq!(
        events
            .iter()
            .filter(|k| **k == EventKind::ScannerStart)
            .count(),
        2
    );
    std::fs::remove_dir_all(dir).ok();
}

// ─── Predicted-state variant ────────────────────────────────────────────

#[test]
fn unchanged_trace_means_no_reads_and_no_transitions() {
    let dir = unique_out_dir("sc_trace_idle");
    let trace = dir.join("state.csv");
    std::fs::write(
        &trace,
        format!("{TRACE_HEADER}1.0,0,0,3,0,0,2.9,0.4\n"),
    )
    .unwrap();

    let env = Arc::new(MockEnv::new(AccessPoint::default()));
    env.set_link_signal(Some(-50.0));
    let mut config = fast_controller_config("sta1-wlan0", &dir);
    config.disconnect_threshold = 0.0;
    config.reconnect_threshold = 2.0;
    let source = StateTraceSource::new(&trace);
    let reads = source.read_counter();
    let mut controller = HandoverController::new(config, env.clone(), Box::new(source));

    controller.start().unwrap();
    assert_eq!(controller.state(), ConnectivityState::Attached);
    let reads_after_start = reads.load(std::sync::atomic::Ordering::Relaxed);

    for _ in 0..10 {
        controller.tick();
    }
    assert_eq!(
        reads.load(std::sync::atomic::Ordering::Relaxed),
        reads_after_start,
        "unchanged mtime must not trigger re-reads"
    );
    assert_eq!(controller.state(), ConnectivityState::Attached);
    assert!(controller_events(&dir).is_empty());
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn predicted_state_drives_both_handovers() {
    let dir = unique_out_dir("sc_trace_cycle");
    let trace = dir.join("state.csv");
    std::fs::write(
        &trace,
        format!("{TRACE_HEADER}1.0,0,0,3,0,0,2.9,0.4\n"),
    )
    .unwrap();

    let env = Arc::new(MockEnv::new(AccessPoint::default()));
    env.set_link_signal(Some(-50.0));
    let mut config = fast_controller_config("sta1-wlan0", &dir);
    config.disconnect_threshold = 0.0;
    config.reconnect_threshold = 2.0;
    let source = StateTraceSource::new(&trace);
    let mut controller = HandoverController::new(config, env.clone(), Box::new(source));
    controller.start().unwrap();
    assert_eq!(controller.state(), ConnectivityState::Attached);

    // predictor sees the node leaving coverage
    append_trace_row(&trace, "2.0,0,0,0,0,0,0.0,0.4");
    controller.tick();
    assert_eq!(controller.state(), ConnectivityState::Mesh);
    assert_eq!(controller.daemon_pid(), Some(4242));

    // idle polls change nothing
    controller.tick();
    assert_eq!(controller.state(), ConnectivityState::Mesh);

    // predictor sees coverage returning
    append_trace_row(&trace, "3.0,0,0,3,0,0,2.5,0.4");
    controller.tick();
    assert_eq!(controller.state(), ConnectivityState::Attached);
    assert!(controller.daemon_pid().is_none());

    // the trace variant never runs the discovery scanner
    assert_eq!(env.count_calls("trigger_scan"), 0);
    let events = controller_events(&dir);
    assert_eq!(
        events,
        vec![
            EventKind::DisconnectBegin,
            EventKind::DisconnectEnd,
            EventKind::ReconnectBegin,
            EventKind::ReconnectEnd,
        ]
    );
    std::fs::remove_dir_all(dir).ok();
}
