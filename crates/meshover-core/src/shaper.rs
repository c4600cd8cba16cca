//! Egress traffic shaper for handover transients.
//!
//! Handovers are modeled with a temporary throughput penalty: the egress
//! HTB class is throttled to a configured rate while the node switches
//! networks and restored to the nominal rate once the switch completes.
//! The shaper tracks whether a throttle is in force so repeated calls never
//! issue redundant or conflicting `tc` commands.

use std::io;
use std::sync::Arc;

use crate::config::{Rate, ShapingRates};
use crate::env::NodeEnv;

/// Shaping rule state for one interface.
pub struct TrafficShaper {
    env: Arc<dyn NodeEnv>,
    iface: String,
    rates: ShapingRates,
    installed: bool,
    throttled: bool,
}

impl TrafficShaper {
    pub fn new(env: Arc<dyn NodeEnv>, iface: &str, rates: ShapingRates) -> Self {
        TrafficShaper {
            env,
            iface: iface.to_string(),
            rates,
            installed: false,
            throttled: false,
        }
    }

    pub fn enabled(&self) -> bool {
        self.rates.enabled()
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled
    }

    /// Installs the root qdisc at the nominal rate. No-op when no transient
    /// rate is configured.
    pub fn install(&mut self) -> io::Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        tracing::info!(iface = %self.iface, rate = %ShapingRates::STANDARD, "installing htb qdisc");
        self.env.install_qdisc(&self.iface, ShapingRates::STANDARD)?;
        self.installed = true;
        Ok(())
    }

    /// Applies the disconnect-transient throttle, once.
    pub fn throttle_disconnect(&mut self) -> io::Result<()> {
        let Some(rate) = self.rates.disconnect else {
            return Ok(());
        };
        self.throttle(rate)
    }

    /// Applies the reconnect-transient throttle, once.
    pub fn throttle_reconnect(&mut self) -> io::Result<()> {
        let Some(rate) = self.rates.reconnect else {
            return Ok(());
        };
        self.throttle(rate)
    }

    fn throttle(&mut self, rate: Rate) -> io::Result<()> {
        if !self.installed || self.throttled {
            return Ok(());
        }
        tracing::info!(iface = %self.iface, rate = %rate, "throttling for handover transient");
        self.env.update_qdisc(&self.iface, rate)?;
        self.throttled = true;
        Ok(())
    }

    /// Restores the nominal rate after a transient. No-op unless throttled.
    pub fn restore(&mut self) -> io::Result<()> {
        if !self.throttled {
            return Ok(());
        }
        tracing::info!(iface = %self.iface, rate = %ShapingRates::STANDARD, "restoring nominal rate");
        self.env.update_qdisc(&self.iface, ShapingRates::STANDARD)?;
        self.throttled = false;
        Ok(())
    }
}
