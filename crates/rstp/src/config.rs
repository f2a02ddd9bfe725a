//! Engine configuration.
//!
//! Configuration is fixed for the lifetime of an engine. It can be built in
//! code or loaded from TOML:
//!
//! ```toml
//! auto_edge = true
//!
//! [bridge]
//! priority = 4096
//! address = "00:00:00:00:00:01"
//!
//! [timers]
//! hello_time_ms = 2000
//!
//! [[port]]
//! number = 1
//! link_cost = 4
//!
//! [[port]]
//! number = 2
//! edge = true
//! ```

use crate::error::{RstpError, RstpResult};
use rstp_types::{
    BridgeId, MacAddress, DEFAULT_BRIDGE_PRIORITY, DEFAULT_PORT_PRIORITY, MAX_PORT_NUMBER,
    MAX_PORT_PRIORITY,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Largest path cost a single link may carry.
pub const MAX_LINK_COST: u32 = 200_000_000;

/// Bridge identity configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bridge priority (lower wins root election)
    #[serde(default = "default_bridge_priority")]
    pub priority: u16,

    /// Bridge MAC address
    pub address: MacAddress,
}

/// Protocol timers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Interval between hello transmissions in milliseconds
    #[serde(default = "default_hello_time")]
    pub hello_time_ms: u64,

    /// Provisional period after link up, and rapid transition step, in milliseconds
    #[serde(default = "default_migrate_time")]
    pub migrate_time_ms: u64,

    /// Topology-change notification window in milliseconds
    #[serde(default = "default_tc_while_time")]
    pub tc_while_time_ms: u64,

    /// Slow transition step for ports without a rapid peer, in milliseconds
    #[serde(default = "default_forward_delay")]
    pub forward_delay_ms: u64,
}

/// Per-port configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Stable port number (1-4095)
    pub number: u16,

    /// Port priority (0-240)
    #[serde(default = "default_port_priority")]
    pub priority: u16,

    /// Path cost of the attached link
    #[serde(default = "default_link_cost")]
    pub link_cost: u32,

    /// Administratively an edge port (no bridge attached)
    #[serde(default)]
    pub edge: bool,

    /// Peer is a legacy bridge; use slow timed transitions
    #[serde(default)]
    pub legacy: bool,
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RstpConfig {
    /// Bridge identity
    pub bridge: BridgeConfig,

    /// Protocol timers
    #[serde(default)]
    pub timers: TimerConfig,

    /// Treat ports that hear no vector during migration as edge ports
    #[serde(default = "default_auto_edge")]
    pub auto_edge: bool,

    /// Ports, one entry per interface
    #[serde(default, rename = "port")]
    pub ports: Vec<PortConfig>,
}

// Default functions
fn default_bridge_priority() -> u16 {
    DEFAULT_BRIDGE_PRIORITY
}

fn default_hello_time() -> u64 {
    2000
}

fn default_migrate_time() -> u64 {
    3000
}

fn default_tc_while_time() -> u64 {
    2000
}

fn default_forward_delay() -> u64 {
    15000
}

fn default_port_priority() -> u16 {
    DEFAULT_PORT_PRIORITY
}

fn default_link_cost() -> u32 {
    19
}

fn default_auto_edge() -> bool {
    true
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            hello_time_ms: default_hello_time(),
            migrate_time_ms: default_migrate_time(),
            tc_while_time_ms: default_tc_while_time(),
            forward_delay_ms: default_forward_delay(),
        }
    }
}

impl PortConfig {
    /// A point-to-point port with default priority and cost.
    pub fn new(number: u16) -> Self {
        Self {
            number,
            priority: default_port_priority(),
            link_cost: default_link_cost(),
            edge: false,
            legacy: false,
        }
    }

    pub fn with_link_cost(mut self, link_cost: u32) -> Self {
        self.link_cost = link_cost;
        self
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    pub fn edge(mut self) -> Self {
        self.edge = true;
        self
    }

    pub fn legacy(mut self) -> Self {
        self.legacy = true;
        self
    }
}

impl RstpConfig {
    /// Creates a configuration with default timers and no ports.
    pub fn new(priority: u16, address: MacAddress) -> Self {
        Self {
            bridge: BridgeConfig { priority, address },
            timers: TimerConfig::default(),
            auto_edge: default_auto_edge(),
            ports: Vec::new(),
        }
    }

    pub fn with_port(mut self, port: PortConfig) -> Self {
        self.ports.push(port);
        self
    }

    /// Adds default point-to-point ports numbered `numbers`.
    pub fn with_ports<I>(mut self, numbers: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.ports.extend(numbers.into_iter().map(PortConfig::new));
        self
    }

    pub fn with_timers(mut self, timers: TimerConfig) -> Self {
        self.timers = timers;
        self
    }

    pub fn with_auto_edge(mut self, auto_edge: bool) -> Self {
        self.auto_edge = auto_edge;
        self
    }

    /// Parses a TOML document.
    pub fn from_toml_str(content: &str) -> RstpResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Loads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> RstpResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn bridge_id(&self) -> BridgeId {
        BridgeId::new(self.bridge.priority, self.bridge.address)
    }

    pub fn hello_time(&self) -> Duration {
        Duration::from_millis(self.timers.hello_time_ms)
    }

    pub fn migrate_time(&self) -> Duration {
        Duration::from_millis(self.timers.migrate_time_ms)
    }

    pub fn tc_while_time(&self) -> Duration {
        Duration::from_millis(self.timers.tc_while_time_ms)
    }

    pub fn forward_delay(&self) -> Duration {
        Duration::from_millis(self.timers.forward_delay_ms)
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> RstpResult<()> {
        let address = self.bridge.address;
        if address.is_zero() || address.is_multicast() {
            return Err(RstpError::invalid_config(
                "bridge.address",
                format!("{} is not a unicast address", address),
            ));
        }

        let timers = [
            ("timers.hello_time_ms", self.timers.hello_time_ms),
            ("timers.migrate_time_ms", self.timers.migrate_time_ms),
            ("timers.tc_while_time_ms", self.timers.tc_while_time_ms),
            ("timers.forward_delay_ms", self.timers.forward_delay_ms),
        ];
        for (field, value) in timers {
            if value == 0 {
                return Err(RstpError::invalid_config(field, "must be non-zero"));
            }
        }

        if self.ports.is_empty() {
            return Err(RstpError::invalid_config("port", "at least one port is required"));
        }

        let mut seen = HashSet::new();
        for port in &self.ports {
            let field = |name: &str| format!("port[{}].{}", port.number, name);
            if port.number == 0 || port.number > MAX_PORT_NUMBER {
                return Err(RstpError::invalid_config(
                    field("number"),
                    format!("must be 1-{}", MAX_PORT_NUMBER),
                ));
            }
            if !seen.insert(port.number) {
                return Err(RstpError::invalid_config(field("number"), "duplicate port number"));
            }
            if port.priority > MAX_PORT_PRIORITY {
                return Err(RstpError::invalid_config(
                    field("priority"),
                    format!("must be 0-{}", MAX_PORT_PRIORITY),
                ));
            }
            if port.link_cost == 0 || port.link_cost > MAX_LINK_COST {
                return Err(RstpError::invalid_config(
                    field("link_cost"),
                    format!("must be 1-{}", MAX_LINK_COST),
                ));
            }
        }

        Ok(())
    }
}
