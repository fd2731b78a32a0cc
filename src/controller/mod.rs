//! Gateway control logic
//!
//! One [`GatewayState`] owns every table. Handlers run one event at a time
//! and talk to switches only through the [`Datapath`] trait, so they can be
//! driven by a live OpenFlow connection or by a recording test double.

pub mod address_table;
pub mod arp_proxy;
pub mod classifier;
pub mod dispatcher;
pub mod flow_table;
pub mod learning_switch;
pub mod nat;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use address_table::{AddressTable, PendingResolutions};
pub use dispatcher::{ConnectionId, Controller, DispatchTable, Event, EventKind, SwitchEvent};
pub use learning_switch::{L2ForwardAction, MacPortTable};
pub use nat::{NatOutcome, NatSessionTable};

use crate::openflow::{DatapathId, FlowRule, PacketOut, PortNo};
use crate::protocol::{Ipv4Subnet, MacAddr};
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Outbound side of one connected switch
///
/// Commands are fire-and-forget: a rule or packet the switch rejects is
/// indistinguishable from one it accepted.
pub trait Datapath {
    fn id(&self) -> DatapathId;

    fn install_rule(&mut self, rule: FlowRule);

    fn send(&mut self, packet: PacketOut);

    /// Hardware address of a switch port, if known
    fn port_mac(&self, port: PortNo) -> Option<MacAddr>;
}

pub(crate) fn require_port_mac(datapath: &dyn Datapath, port: PortNo) -> Result<MacAddr> {
    datapath.port_mac(port).ok_or(Error::PortAddressUnknown {
        datapath: datapath.id(),
        port,
    })
}

pub const DEFAULT_HOST_SWITCH: DatapathId = DatapathId(1);
pub const DEFAULT_GATEWAY_SWITCH: DatapathId = DatapathId(2);
pub const DEFAULT_INSIDE_SUBNET: Ipv4Subnet = Ipv4Subnet::new(Ipv4Addr::new(5, 5, 0, 0), 24).unwrap();
pub const DEFAULT_OUTSIDE_SUBNET: Ipv4Subnet = Ipv4Subnet::new(Ipv4Addr::new(5, 5, 1, 0), 24).unwrap();
pub const DEFAULT_PUBLIC_ADDR: Ipv4Addr = Ipv4Addr::new(5, 5, 1, 0);
pub const DEFAULT_INSIDE_PORT: PortNo = 1;
pub const DEFAULT_OUTSIDE_PORT: PortNo = 2;

/// Which gateway subnet an address belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Inside,
    Outside,
}

/// Fixed topology, immutable for the life of the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Switch running the learning switch
    pub host_switch: DatapathId,
    /// Switch acting as NAT router
    pub gateway_switch: DatapathId,
    pub inside: Ipv4Subnet,
    pub outside: Ipv4Subnet,
    /// Source address of every translated echo request
    pub public_addr: Ipv4Addr,
    /// Gateway port facing the inside subnet
    pub inside_port: PortNo,
    /// Gateway port facing the outside subnet
    pub outside_port: PortNo,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host_switch: DEFAULT_HOST_SWITCH,
            gateway_switch: DEFAULT_GATEWAY_SWITCH,
            inside: DEFAULT_INSIDE_SUBNET,
            outside: DEFAULT_OUTSIDE_SUBNET,
            public_addr: DEFAULT_PUBLIC_ADDR,
            inside_port: DEFAULT_INSIDE_PORT,
            outside_port: DEFAULT_OUTSIDE_PORT,
        }
    }
}

impl GatewaySettings {
    pub fn side_of(&self, ip: Ipv4Addr) -> Option<Side> {
        if self.inside.contains(ip) {
            Some(Side::Inside)
        } else if self.outside.contains(ip) {
            Some(Side::Outside)
        } else {
            None
        }
    }

    pub fn port(&self, side: Side) -> PortNo {
        match side {
            Side::Inside => self.inside_port,
            Side::Outside => self.outside_port,
        }
    }
}

/// Every table the controller keeps, empty at startup
#[derive(Debug)]
pub struct GatewayState {
    pub settings: GatewaySettings,
    pub mac_ports: MacPortTable,
    pub addresses: AddressTable,
    pub pending: PendingResolutions,
    pub nat: NatSessionTable,
    pub metrics: Arc<MetricsRegistry>,
}

impl GatewayState {
    pub fn new(settings: GatewaySettings, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            settings,
            mac_ports: MacPortTable::new(),
            addresses: AddressTable::new(),
            pending: PendingResolutions::new(),
            nat: NatSessionTable::new(),
            metrics,
        }
    }

    /// Publish table sizes to the gauges
    pub fn refresh_gauges(&self) {
        self.metrics.set_mac_bindings(self.mac_ports.len());
        self.metrics.set_address_entries(self.addresses.len());
        self.metrics.set_nat_sessions(self.nat.len());
    }
}

impl Default for GatewayState {
    fn default() -> Self {
        Self::new(GatewaySettings::default(), Arc::new(MetricsRegistry::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = GatewaySettings::default();
        assert_eq!(settings.inside.to_string(), "5.5.0.0/24");
        assert_eq!(settings.outside.to_string(), "5.5.1.0/24");
        assert_eq!(settings.public_addr, Ipv4Addr::new(5, 5, 1, 0));
        assert_eq!(settings.host_switch, DatapathId(1));
        assert_eq!(settings.gateway_switch, DatapathId(2));
    }

    #[test]
    fn test_side_of() {
        let settings = GatewaySettings::default();
        assert_eq!(settings.side_of(Ipv4Addr::new(5, 5, 0, 3)), Some(Side::Inside));
        assert_eq!(settings.side_of(Ipv4Addr::new(5, 5, 1, 4)), Some(Side::Outside));
        assert_eq!(settings.side_of(Ipv4Addr::new(8, 8, 8, 8)), None);
        assert_eq!(settings.port(Side::Inside), 1);
        assert_eq!(settings.port(Side::Outside), 2);
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = GatewayState::default();
        assert!(state.mac_ports.is_empty());
        assert!(state.addresses.is_empty());
        assert!(state.pending.is_empty());
        assert!(state.nat.is_empty());
    }
}
