//! Configuration types

use crate::controller::{
    DEFAULT_GATEWAY_SWITCH, DEFAULT_HOST_SWITCH, DEFAULT_INSIDE_PORT, DEFAULT_INSIDE_SUBNET,
    DEFAULT_OUTSIDE_PORT, DEFAULT_OUTSIDE_SUBNET, DEFAULT_PUBLIC_ADDR, GatewaySettings,
};
use crate::openflow::{DatapathId, PortNo};
use crate::protocol::{Ipv4Subnet, MacAddr};
use crate::telemetry::LogConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:6653";
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_ECHO_INTERVAL_SECS: u64 = 15;

/// User-defined configuration (config.toml)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the OpenFlow listener binds to
    pub listen: String,
    /// Seconds between metrics log lines
    pub stats_interval_secs: u64,
    /// Idle seconds before a switch is sent ECHO_REQUEST
    pub echo_interval_secs: u64,
    pub switches: SwitchesConfig,
    pub gateway: GatewayConfig,
    pub logging: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            stats_interval_secs: DEFAULT_STATS_INTERVAL_SECS,
            echo_interval_secs: DEFAULT_ECHO_INTERVAL_SECS,
            switches: SwitchesConfig::default(),
            gateway: GatewayConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

/// Datapath ids of the two switch roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchesConfig {
    /// Switch running the learning switch
    pub host: u64,
    /// Switch acting as NAT router
    pub gateway: u64,
}

impl Default for SwitchesConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST_SWITCH.0,
            gateway: DEFAULT_GATEWAY_SWITCH.0,
        }
    }
}

/// Addressing of the gateway switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub inside_subnet: String,
    pub outside_subnet: String,
    pub public_address: Ipv4Addr,
    pub inside_port: PortNo,
    pub outside_port: PortNo,
    /// Used when the switch does not describe the inside port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inside_mac: Option<String>,
    /// Used when the switch does not describe the outside port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outside_mac: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            inside_subnet: DEFAULT_INSIDE_SUBNET.to_string(),
            outside_subnet: DEFAULT_OUTSIDE_SUBNET.to_string(),
            public_address: DEFAULT_PUBLIC_ADDR,
            inside_port: DEFAULT_INSIDE_PORT,
            outside_port: DEFAULT_OUTSIDE_PORT,
            inside_mac: None,
            outside_mac: None,
        }
    }
}

fn parse_subnet(field: &str, value: &str) -> Result<Ipv4Subnet> {
    value
        .parse()
        .map_err(|e| Error::Config(format!("{}: {}", field, e)))
}

fn parse_mac(field: &str, value: &str) -> Result<MacAddr> {
    value
        .parse()
        .map_err(|e| Error::Config(format!("{}: {}", field, e)))
}

impl Config {
    /// Topology handed to the controller
    pub fn to_settings(&self) -> Result<GatewaySettings> {
        Ok(GatewaySettings {
            host_switch: DatapathId(self.switches.host),
            gateway_switch: DatapathId(self.switches.gateway),
            inside: parse_subnet("gateway.inside_subnet", &self.gateway.inside_subnet)?,
            outside: parse_subnet("gateway.outside_subnet", &self.gateway.outside_subnet)?,
            public_addr: self.gateway.public_address,
            inside_port: self.gateway.inside_port,
            outside_port: self.gateway.outside_port,
        })
    }

    /// Static gateway port addresses, keyed by port number
    pub fn fallback_port_macs(&self) -> Result<HashMap<PortNo, MacAddr>> {
        let mut macs = HashMap::new();
        if let Some(mac) = &self.gateway.inside_mac {
            macs.insert(self.gateway.inside_port, parse_mac("gateway.inside_mac", mac)?);
        }
        if let Some(mac) = &self.gateway.outside_mac {
            macs.insert(self.gateway.outside_port, parse_mac("gateway.outside_mac", mac)?);
        }
        Ok(macs)
    }
}
