//! MAC learning for the host-facing switch
//!
//! Provides L2 switching driven from the controller:
//! - Source MAC learning on every frame, overwriting earlier bindings
//! - Unicast shortcut rules once a destination is known
//! - Flooding of everything else through the controller
//!
//! Bindings never age out and every source MAC is learned, broadcast and
//! multicast included, so the table only grows.

use super::dispatcher::Event;
use super::flow_table::{self, UNICAST_PRIORITY};
use super::{Datapath, GatewayState};
use crate::Result;
use crate::openflow::{Action, DatapathId, FlowMatch, PacketIn, PacketOut, PacketPayload, PortNo, port};
use crate::protocol::MacAddr;
use crate::protocol::ethernet::Frame;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Result of a L2 forwarding decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2ForwardAction {
    /// Destination learned on this port
    Forward { port: PortNo },
    /// Unknown destination
    Flood,
}

/// (switch, MAC) to port bindings
#[derive(Debug, Default)]
pub struct MacPortTable {
    tables: HashMap<DatapathId, HashMap<MacAddr, PortNo>>,
}

impl MacPortTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `mac` to `port`, returning the previous port if it moved.
    pub fn learn(&mut self, datapath: DatapathId, mac: MacAddr, port: PortNo) -> Option<PortNo> {
        self.tables
            .entry(datapath)
            .or_default()
            .insert(mac, port)
            .filter(|&old| old != port)
    }

    pub fn lookup(&self, datapath: DatapathId, mac: MacAddr) -> Option<PortNo> {
        self.tables.get(&datapath)?.get(&mac).copied()
    }

    pub fn forward_decision(&self, datapath: DatapathId, dst: MacAddr) -> L2ForwardAction {
        match self.lookup(datapath, dst) {
            Some(port) => L2ForwardAction::Forward { port },
            None => L2ForwardAction::Flood,
        }
    }

    /// Total bindings across all switches
    pub fn len(&self) -> usize {
        self.tables.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Learn, then forward or flood one frame from the host switch.
///
/// Returns `None` for a frame too short to carry an Ethernet header.
pub fn process_frame(
    state: &mut GatewayState,
    datapath: &mut dyn Datapath,
    packet_in: &PacketIn,
) -> Result<Option<L2ForwardAction>> {
    let dpid = datapath.id();
    let in_port = packet_in.in_port;

    let frame = match Frame::parse(&packet_in.data) {
        Ok(frame) => frame,
        Err(e) => {
            trace!(datapath = %dpid, in_port, "ignoring frame: {}", e);
            return Ok(None);
        }
    };
    let src = frame.src_mac();
    let dst = frame.dst_mac();

    debug!(datapath = %dpid, %src, %dst, in_port, "packet in");

    if let Some(old) = state.mac_ports.learn(dpid, src, in_port) {
        debug!(datapath = %dpid, mac = %src, old, new = in_port, "MAC moved");
    }

    let action = state.mac_ports.forward_decision(dpid, dst);
    match action {
        L2ForwardAction::Forward { port: out_port } => {
            let actions = vec![Action::output(out_port)];
            flow_table::install_rule(
                datapath,
                UNICAST_PRIORITY,
                FlowMatch::any().in_port(in_port).eth_dst(dst),
                actions.clone(),
                packet_in.buffer_id,
            );
            state.metrics.flows_installed.inc();

            // The switch releases a buffered frame through the new rule
            if packet_in.buffer_id.is_none() {
                datapath.send(PacketOut {
                    in_port,
                    actions,
                    payload: PacketPayload::Data(packet_in.data.clone()),
                });
            }
        }
        L2ForwardAction::Flood => {
            trace!(datapath = %dpid, %dst, "flooding");
            state.metrics.frames_flooded.inc();
            let payload = match packet_in.buffer_id {
                Some(id) => PacketPayload::Buffered(id),
                None => PacketPayload::Data(packet_in.data.clone()),
            };
            datapath.send(PacketOut {
                in_port,
                actions: vec![Action::output(port::FLOOD)],
                payload,
            });
        }
    }

    Ok(Some(action))
}

/// Dispatch-table entry for the host switch
pub fn on_packet_in(
    state: &mut GatewayState,
    datapath: &mut dyn Datapath,
    event: &Event<'_>,
) -> Result<()> {
    if let Event::PacketIn(packet_in) = event {
        process_frame(state, datapath, packet_in)?;
    }
    Ok(())
}
