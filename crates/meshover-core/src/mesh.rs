//! Mesh actuator: ad-hoc membership and the routing daemon lifecycle.
//!
//! Entering the mesh means reconfiguring the interface for IBSS, joining
//! the fixed ad-hoc cell, and bringing up the routing daemon; leaving
//! reverses the sequence. The daemon is an external OS process reached only
//! through launch, a process-listing poll, and SIGTERM, so "is it up" is
//! approximate. The PID poll is bounded and a miss is surfaced as an error
//! instead of hanging the control loop.

use std::sync::Arc;

use crate::config::MeshParams;
use crate::env::{NodeEnv, WifiMode};
use crate::error::HandoverError;
use crate::shaper::TrafficShaper;

/// Owned handle to the routing daemon process. At most one live handle per
/// interface; the actuator refuses to start a second daemon while one is
/// tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DaemonHandle {
    #[default]
    None,
    Live {
        pid: u32,
    },
}

impl DaemonHandle {
    pub fn pid(&self) -> Option<u32> {
        match self {
            DaemonHandle::None => None,
            DaemonHandle::Live { pid } => Some(*pid),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, DaemonHandle::Live { .. })
    }
}

/// Drives one interface in and out of the ad-hoc mesh.
pub struct MeshActuator {
    env: Arc<dyn NodeEnv>,
    iface: String,
    params: MeshParams,
    daemon: DaemonHandle,
}

impl MeshActuator {
    pub fn new(env: Arc<dyn NodeEnv>, iface: &str, params: MeshParams) -> Self {
        MeshActuator {
            env,
            iface: iface.to_string(),
            params,
            daemon: DaemonHandle::None,
        }
    }

    pub fn daemon(&self) -> DaemonHandle {
        self.daemon
    }

    pub fn daemon_running(&self) -> bool {
        self.daemon.is_live()
    }

    /// Full handover into the mesh: throttle the egress for the transient,
    /// join the ad-hoc cell and start the daemon, then restore the nominal
    /// rate. The rate is restored even when the join fails so a failed
    /// attempt never leaves the node stuck at the transient rate.
    pub fn switch_to_mesh(&mut self, shaper: &mut TrafficShaper) -> Result<u32, HandoverError> {
        if let Err(e) = shaper.throttle_disconnect() {
            tracing::warn!(iface = %self.iface, error = %e, "disconnect throttle failed");
        }
        let result = self.join_mesh();
        if let Err(e) = shaper.restore() {
            tracing::warn!(iface = %self.iface, error = %e, "rate restore failed");
        }
        result
    }

    /// Joins the ad-hoc cell and starts the routing daemon, without any
    /// shaping transient. Used directly for a mesh-side cold start, where
    /// there is no attached state to transition away from.
    pub fn join_mesh(&mut self) -> Result<u32, HandoverError> {
        if let Some(pid) = self.daemon.pid() {
            return Err(HandoverError::DaemonAlreadyRunning { pid });
        }

        self.env.set_mode(&self.iface, WifiMode::Ibss)?;
        tracing::info!(iface = %self.iface, "set type to ibss");
        self.env.link_up(&self.iface)?;
        self.env.ibss_join(&self.iface, &self.params.ibss)?;
        tracing::info!(iface = %self.iface, ssid = %self.params.ibss.ssid, "joined ibss");

        self.wait_link_not_down()?;

        self.env
            .spawn_routing_daemon(&self.params.daemon_bin, &self.params.daemon_config)?;
        let pid = self.wait_for_daemon_pid()?;
        self.daemon = DaemonHandle::Live { pid };
        tracing::info!(iface = %self.iface, pid, "routing daemon running");
        Ok(pid)
    }

    /// Stops the routing daemon and restores managed mode. A call with no
    /// live daemon handle is a complete no-op: no stop signal, no interface
    /// reconfiguration.
    pub fn leave_mesh(&mut self) -> Result<(), HandoverError> {
        let Some(pid) = self.daemon.pid() else {
            tracing::debug!(iface = %self.iface, "no routing daemon to stop");
            return Ok(());
        };

        // The daemon may have died on its own; a failed signal still means
        // the handle is stale, so it is cleared either way.
        if let Err(e) = self.env.stop_routing_daemon(pid) {
            tracing::warn!(iface = %self.iface, pid, error = %e, "stopping routing daemon failed");
        } else {
            tracing::info!(iface = %self.iface, pid, "stopped routing daemon");
        }
        self.daemon = DaemonHandle::None;

        self.env.ibss_leave(&self.iface)?;
        tracing::info!(iface = %self.iface, "left ibss");
        self.env.set_mode(&self.iface, WifiMode::Managed)?;
        tracing::info!(iface = %self.iface, "set type to managed");
        Ok(())
    }

    fn wait_link_not_down(&self) -> Result<(), HandoverError> {
        for _ in 0..self.params.link_wait_attempts {
            if !self.env.link_is_down(&self.iface)? {
                return Ok(());
            }
            std::thread::sleep(self.params.link_wait_delay);
        }
        Err(HandoverError::LinkStuckDown {
            iface: self.iface.clone(),
            attempts: self.params.link_wait_attempts,
        })
    }

    fn wait_for_daemon_pid(&self) -> Result<u32, HandoverError> {
        let marker = self.params.daemon_config.to_string_lossy();
        for attempt in 0..self.params.pid_attempts {
            if let Some(pid) = self
                .env
                .find_routing_daemon(&self.params.daemon_bin, &marker)?
            {
                return Ok(pid);
            }
            if attempt + 1 < self.params.pid_attempts {
                std::thread::sleep(self.params.pid_delay);
            }
        }
        Err(HandoverError::DaemonStartTimeout {
            attempts: self.params.pid_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccessPoint, ShapingRates};
    use crate::test_util::{fast_mesh_params, MockEnv};

    fn actuator(env: &Arc<MockEnv>) -> MeshActuator {
        MeshActuator::new(env.clone(), "sta1-wlan0", fast_mesh_params("sta1-wlan0"))
    }

    fn no_shaper(env: &Arc<MockEnv>) -> TrafficShaper {
        TrafficShaper::new(env.clone(), "sta1-wlan0", ShapingRates::default())
    }

    #[test]
    fn join_records_daemon_pid() {
        let env = Arc::new(MockEnv::new(AccessPoint::default()));
        let mut mesh = actuator(&env);

        let pid = mesh.join_mesh().unwrap();
        assert!(pid > 0);
        assert_eq!(mesh.daemon().pid(), Some(pid));
        assert_eq!(env.count_calls("set_mode sta1-wlan0 ibss"), 1);
        assert_eq!(env.count_calls("ibss_join sta1-wlan0 adhocNet"), 1);
        assert_eq!(env.count_calls("spawn_daemon olsrd"), 1);
    }

    #[test]
    fn second_join_without_leave_is_refused() {
        let env = Arc::new(MockEnv::new(AccessPoint::default()));
        let mut mesh = actuator(&env);
        mesh.join_mesh().unwrap();

        assert!(matches!(
            mesh.join_mesh(),
            Err(HandoverError::DaemonAlreadyRunning { .. })
        ));
        assert_eq!(env.count_calls("spawn_daemon"), 1);
    }

    #[test]
    fn daemon_pid_poll_is_bounded() {
        let env = Arc::new(MockEnv::new(AccessPoint::default()));
        env.set_daemon_discoverable(false);
        let mut mesh = actuator(&env);

        match mesh.join_mesh() {
            Err(HandoverError::DaemonStartTimeout { attempts }) => assert_eq!(attempts, 3),
            other => panic!("expected DaemonStartTimeout, got {other:?}"),
        }
        assert!(!mesh.daemon_running());
        assert_eq!(env.count_calls("find_daemon"), 3);
    }

    #[test]
    fn link_down_wait_is_bounded() {
        let env = Arc::new(MockEnv::new(AccessPoint::default()));
        env.set_link_down_polls(u32::MAX);
        let mut mesh = actuator(&env);

        assert!(matches!(
            mesh.join_mesh(),
            Err(HandoverError::LinkStuckDown { .. })
        ));
        assert_eq!(env.count_calls("spawn_daemon"), 0);
    }

    #[test]
    fn leave_without_daemon_is_a_no_op() {
        let env = Arc::new(MockEnv::new(AccessPoint::default()));
        let mut mesh = actuator(&env);

        mesh.leave_mesh().unwrap();
        assert_eq!(env.count_calls("stop_daemon"), 0);
        assert_eq!(env.count_calls("ibss_leave"), 0);
        assert_eq!(env.count_calls("set_mode"), 0);
    }

    #[test]
    fn leave_stops_daemon_and_restores_managed_mode() {
        let env = Arc::new(MockEnv::new(AccessPoint::default()));
        let mut mesh = actuator(&env);
        let pid = mesh.join_mesh().unwrap();

        mesh.leave_mesh().unwrap();
        assert!(!mesh.daemon_running());
        assert_eq!(env.count_calls(&format!("stop_daemon {pid}")), 1);
        assert_eq!(env.count_calls("ibss_leave sta1-wlan0"), 1);
        assert_eq!(env.count_calls("set_mode sta1-wlan0 managed"), 1);
    }

    #[test]
    fn switch_wraps_join_in_shaping_transient() {
        let env = Arc::new(MockEnv::new(AccessPoint::default()));
        let mut mesh = actuator(&env);
        let mut shaper = TrafficShaper::new(
            env.clone(),
            "sta1-wlan0",
            ShapingRates {
                disconnect: Some(crate::config::Rate::bits(100_000)),
                reconnect: None,
            },
        );
        shaper.install().unwrap();

        mesh.switch_to_mesh(&mut shaper).unwrap();
        assert_eq!(env.count_calls("update_qdisc sta1-wlan0 100000bit"), 1);
        assert_eq!(env.count_calls("update_qdisc sta1-wlan0 1mbit"), 1);
        assert!(!shaper.is_throttled());
    }

    #[test]
    fn failed_switch_still_restores_rate() {
        let env = Arc::new(MockEnv::new(AccessPoint::default()));
        env.set_daemon_discoverable(false);
        let mut mesh = actuator(&env);
        let mut shaper = TrafficShaper::new(
            env.clone(),
            "sta1-wlan0",
            ShapingRates {
                disconnect: Some(crate::config::Rate::bits(100_000)),
                reconnect: None,
            },
        );
        shaper.install().unwrap();

        assert!(mesh.switch_to_mesh(&mut shaper).is_err());
        assert!(!shaper.is_throttled());
        assert_eq!(env.count_calls("update_qdisc sta1-wlan0 1mbit"), 1);
    }

    #[test]
    fn cold_start_join_applies_no_shaping() {
        let env = Arc::new(MockEnv::new(AccessPoint::default()));
        let mut mesh = actuator(&env);
        let mut shaper = no_shaper(&env);
        shaper.install().unwrap();

        mesh.join_mesh().unwrap();
        assert_eq!(env.count_calls("update_qdisc"), 0);
    }
}
