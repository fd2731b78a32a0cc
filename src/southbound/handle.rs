//! Controller-side handle to one switch connection

use crate::controller::Datapath;
use crate::openflow::{DatapathId, FlowRule, Message, PacketOut, PortDesc, PortNo};
use crate::protocol::MacAddr;
use crate::telemetry::MetricsRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Encoded messages waiting for the connection writer
pub type Outbox = mpsc::UnboundedSender<Vec<u8>>;

/// [`Datapath`] backed by a live OpenFlow connection
///
/// Commands are encoded here and queued to the connection's writer task;
/// once the connection is gone they are dropped.
#[derive(Debug)]
pub struct SwitchHandle {
    id: DatapathId,
    outbox: Outbox,
    next_xid: u32,
    /// Port addresses reported by the switch
    ports: HashMap<PortNo, MacAddr>,
    /// Configured addresses for ports the switch did not describe
    fallback: Arc<HashMap<PortNo, MacAddr>>,
    metrics: Arc<MetricsRegistry>,
}

impl SwitchHandle {
    pub fn new(
        id: DatapathId,
        outbox: Outbox,
        ports: &[PortDesc],
        fallback: Arc<HashMap<PortNo, MacAddr>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        metrics.register_switch(id);
        Self {
            id,
            outbox,
            // Handshake messages use the low xids
            next_xid: 0x100,
            ports: ports.iter().map(|p| (p.port_no, p.hw_addr)).collect(),
            fallback,
            metrics,
        }
    }

    fn queue(&mut self, msg: Message) -> bool {
        let xid = self.next_xid;
        self.next_xid = self.next_xid.wrapping_add(1);

        if self.outbox.send(msg.encode(xid)).is_err() {
            debug!(datapath = %self.id, msg_type = msg.msg_type(), "connection closed, dropping");
            return false;
        }
        trace!(datapath = %self.id, xid, msg_type = msg.msg_type(), "queued");
        true
    }

    pub fn is_connected(&self) -> bool {
        !self.outbox.is_closed()
    }
}

impl Datapath for SwitchHandle {
    fn id(&self) -> DatapathId {
        self.id
    }

    fn install_rule(&mut self, rule: FlowRule) {
        if self.queue(Message::FlowMod(rule)) {
            self.metrics.record_flow_mod(self.id);
        }
    }

    fn send(&mut self, packet: PacketOut) {
        if self.queue(Message::PacketOut(packet)) {
            self.metrics.record_packet_out(self.id);
        }
    }

    fn port_mac(&self, port: PortNo) -> Option<MacAddr> {
        self.ports
            .get(&port)
            .or_else(|| self.fallback.get(&port))
            .copied()
    }
}
