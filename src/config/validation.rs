//! Configuration validation

use super::Config;
use crate::openflow::port;
use crate::protocol::{Ipv4Subnet, MacAddr};
use crate::telemetry::is_known_level;
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_listener(config, &mut result);
    validate_switches(config, &mut result);
    validate_gateway(config, &mut result);
    validate_logging(config, &mut result);

    result
}

fn validate_listener(config: &Config, result: &mut ValidationResult) {
    if config.listen.parse::<SocketAddr>().is_err() {
        result.error(format!("listen: '{}' is not a socket address", config.listen));
    }
    if config.stats_interval_secs == 0 {
        result.error("stats_interval_secs: must be at least 1");
    }
    if config.echo_interval_secs == 0 {
        result.error("echo_interval_secs: must be at least 1");
    }
}

fn validate_switches(config: &Config, result: &mut ValidationResult) {
    if config.switches.host == config.switches.gateway {
        result.error(format!(
            "switches: host and gateway are both datapath {}",
            config.switches.host
        ));
    }
}

fn parse_subnet(field: &str, value: &str, result: &mut ValidationResult) -> Option<Ipv4Subnet> {
    match value.parse::<Ipv4Subnet>() {
        Ok(subnet) => Some(subnet),
        Err(e) => {
            result.error(format!("gateway.{}: {}", field, e));
            None
        }
    }
}

fn validate_gateway(config: &Config, result: &mut ValidationResult) {
    let gw = &config.gateway;

    let inside = parse_subnet("inside_subnet", &gw.inside_subnet, result);
    let outside = parse_subnet("outside_subnet", &gw.outside_subnet, result);

    if let (Some(inside), Some(outside)) = (inside, outside) {
        if inside.overlaps(&outside) {
            result.error(format!(
                "gateway: inside subnet {} overlaps outside subnet {}",
                inside, outside
            ));
        }
        if !outside.contains(gw.public_address) {
            result.warn(format!(
                "gateway.public_address: {} is outside {}, replies may not be routed back",
                gw.public_address, outside
            ));
        }
    }

    if gw.inside_port == gw.outside_port {
        result.error(format!(
            "gateway: inside and outside are both port {}",
            gw.inside_port
        ));
    }
    for (field, port_no) in [("inside_port", gw.inside_port), ("outside_port", gw.outside_port)] {
        if port_no == 0 || port_no > port::MAX {
            result.error(format!("gateway.{}: {} is not a physical port", field, port_no));
        }
    }

    for (field, mac) in [("inside_mac", &gw.inside_mac), ("outside_mac", &gw.outside_mac)] {
        match mac.as_deref().map(str::parse::<MacAddr>) {
            Some(Err(e)) => result.error(format!("gateway.{}: {}", field, e)),
            Some(Ok(mac)) if mac.is_multicast() => {
                result.error(format!("gateway.{}: {} is a multicast address", field, mac));
            }
            None => result.warn(format!(
                "gateway.{}: not set, relying on the switch port description",
                field
            )),
            Some(Ok(_)) => {}
        }
    }
}

fn validate_logging(config: &Config, result: &mut ValidationResult) {
    if !is_known_level(&config.logging.level) {
        result.warn(format!(
            "logging.level: unknown level '{}', using info",
            config.logging.level
        ));
    }
    if !matches!(config.logging.format.as_str(), "pretty" | "compact" | "json") {
        result.warn(format!(
            "logging.format: unknown format '{}', using pretty",
            config.logging.format
        ));
    }
}
