//! Event routing and the controller loop
//!
//! Switch connections feed [`SwitchEvent`]s into one channel. The
//! [`Controller`] drains it on a single task, so handlers see the
//! [`GatewayState`] one event at a time.

use super::{Datapath, GatewaySettings, GatewayState, classifier, flow_table, learning_switch};
use crate::openflow::{DatapathId, PacketIn};
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Kind of switch event a handler is registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SwitchFeatures,
    PacketIn,
}

/// Event passed to a handler
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// The switch finished its handshake
    SwitchFeatures,
    PacketIn(&'a PacketIn),
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::SwitchFeatures => EventKind::SwitchFeatures,
            Event::PacketIn(_) => EventKind::PacketIn,
        }
    }
}

pub type Handler = fn(&mut GatewayState, &mut dyn Datapath, &Event<'_>) -> Result<()>;

/// (event kind, switch) to handler map
///
/// A handler registered for `None` serves every switch without a handler
/// of its own.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<(EventKind, Option<DatapathId>), Handler>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The gateway layout: every switch gets a table-miss rule, the host
    /// switch learns MACs and the gateway switch runs proxy ARP and NAT.
    pub fn gateway(settings: &GatewaySettings) -> Self {
        let mut table = Self::new();
        table.register(EventKind::SwitchFeatures, None, flow_table::on_switch_features);
        table.register(
            EventKind::PacketIn,
            Some(settings.host_switch),
            learning_switch::on_packet_in,
        );
        table.register(
            EventKind::PacketIn,
            Some(settings.gateway_switch),
            classifier::on_packet_in,
        );
        table
    }

    /// Add or replace a handler
    pub fn register(&mut self, kind: EventKind, datapath: Option<DatapathId>, handler: Handler) {
        self.handlers.insert((kind, datapath), handler);
    }

    pub fn lookup(&self, kind: EventKind, datapath: DatapathId) -> Option<Handler> {
        self.handlers
            .get(&(kind, Some(datapath)))
            .or_else(|| self.handlers.get(&(kind, None)))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Identity of one switch connection, unique for the life of the process
///
/// A switch that reconnects gets a new id, so the end of its old
/// connection can be told apart from the end of the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Message from a switch connection to the controller task
#[derive(Debug)]
pub enum SwitchEvent<D> {
    /// Handshake complete; the controller takes the handle
    Connected { connection: ConnectionId, handle: D },
    PacketIn {
        datapath: DatapathId,
        packet_in: PacketIn,
    },
    /// Sent once by the connection that delivered `Connected`
    Disconnected {
        datapath: DatapathId,
        connection: ConnectionId,
    },
}

impl<D> SwitchEvent<D> {
    /// `Connected` on a fresh connection id
    pub fn connected(handle: D) -> Self {
        SwitchEvent::Connected {
            connection: ConnectionId::next(),
            handle,
        }
    }
}

struct Attached<D> {
    connection: ConnectionId,
    handle: D,
}

/// Owner of all gateway state and every connected switch
pub struct Controller<D> {
    state: GatewayState,
    table: DispatchTable,
    switches: HashMap<DatapathId, Attached<D>>,
}

impl<D: Datapath> Controller<D> {
    pub fn new(state: GatewayState, table: DispatchTable) -> Self {
        Self {
            state,
            table,
            switches: HashMap::new(),
        }
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    pub fn switch(&self, datapath: DatapathId) -> Option<&D> {
        self.switches.get(&datapath).map(|a| &a.handle)
    }

    pub fn switch_mut(&mut self, datapath: DatapathId) -> Option<&mut D> {
        self.switches.get_mut(&datapath).map(|a| &mut a.handle)
    }

    /// Connection currently serving `datapath`
    pub fn connection(&self, datapath: DatapathId) -> Option<ConnectionId> {
        self.switches.get(&datapath).map(|a| a.connection)
    }

    pub fn switch_count(&self) -> usize {
        self.switches.len()
    }

    /// Handle one event to completion
    pub fn handle_event(&mut self, event: SwitchEvent<D>) -> Result<()> {
        match event {
            SwitchEvent::Connected { connection, handle } => {
                let id = handle.id();
                info!(datapath = %id, %connection, "switch connected");
                self.state.metrics.register_switch(id);
                let attached = Attached { connection, handle };
                if let Some(old) = self.switches.insert(id, attached) {
                    warn!(datapath = %id, old = %old.connection, new = %connection, "replaced existing connection");
                }
                self.dispatch(id, &Event::SwitchFeatures)
            }
            SwitchEvent::PacketIn {
                datapath,
                packet_in,
            } => {
                self.state.metrics.record_packet_in(datapath);
                if packet_in.is_truncated() {
                    self.state.metrics.truncated_packet_ins.inc();
                    debug!(
                        datapath = %datapath,
                        captured = packet_in.data.len(),
                        total_len = packet_in.total_len,
                        "packet truncated"
                    );
                }
                self.dispatch(datapath, &Event::PacketIn(&packet_in))
            }
            SwitchEvent::Disconnected {
                datapath,
                connection,
            } => {
                match self.switches.get(&datapath) {
                    Some(current) if current.connection == connection => {
                        self.switches.remove(&datapath);
                        info!(datapath = %datapath, %connection, "switch disconnected");
                    }
                    Some(current) => {
                        debug!(
                            datapath = %datapath,
                            %connection,
                            current = %current.connection,
                            "stale disconnect ignored"
                        );
                    }
                    None => {}
                }
                Ok(())
            }
        }
    }

    fn dispatch(&mut self, datapath: DatapathId, event: &Event<'_>) -> Result<()> {
        let Some(handler) = self.table.lookup(event.kind(), datapath) else {
            trace!(datapath = %datapath, kind = ?event.kind(), "no handler");
            return Ok(());
        };
        let switch = self
            .switches
            .get_mut(&datapath)
            .ok_or_else(|| Error::Protocol(format!("event from unknown switch {}", datapath)))?;

        handler(&mut self.state, &mut switch.handle, event)
    }

    /// Handle one event, logging a failure instead of returning it
    pub fn process(&mut self, event: SwitchEvent<D>) {
        if let Err(e) = self.handle_event(event) {
            self.state.metrics.events_failed.inc();
            warn!("event failed: {}", e);
        }
        self.state.refresh_gauges();
    }

    /// Drain `events` until every sender is gone, logging a metrics
    /// snapshot every `stats_every`.
    pub async fn run(mut self, mut events: mpsc::Receiver<SwitchEvent<D>>, stats_every: Duration) -> Self {
        let mut stats_timer = tokio::time::interval(stats_every);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.process(event),
                    None => break,
                },
                _ = stats_timer.tick() => {
                    debug!(switches = self.switches.len(), "stats: {}", self.state.metrics.snapshot());
                }
            }
        }

        info!("controller stopped");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::{RecordingDatapath, gateway_datapath, host_datapath, packet_in};
    use crate::openflow::port;
    use crate::protocol::MacAddr;
    use crate::protocol::ethernet::FrameBuilder;

    fn controller() -> Controller<RecordingDatapath> {
        let state = GatewayState::default();
        let table = DispatchTable::gateway(&state.settings);
        Controller::new(state, table)
    }

    fn frame(src: u8, dst: u8) -> Vec<u8> {
        FrameBuilder::new()
            .dst_mac(MacAddr([0, 0, 0, 0, 0, dst]))
            .src_mac(MacAddr([0, 0, 0, 0, 0, src]))
            .ethertype(0x0800)
            .payload(&[0u8; 46])
            .build()
    }

    fn noop(_: &mut GatewayState, _: &mut dyn Datapath, _: &Event<'_>) -> Result<()> {
        Ok(())
    }

    fn fail(_: &mut GatewayState, _: &mut dyn Datapath, _: &Event<'_>) -> Result<()> {
        Err(Error::UnknownReplySession { identifier: 1 })
    }

    #[test]
    fn test_lookup_prefers_specific_switch() {
        let mut table = DispatchTable::new();
        table.register(EventKind::PacketIn, None, noop);
        table.register(EventKind::PacketIn, Some(DatapathId(2)), fail);

        let specific = table.lookup(EventKind::PacketIn, DatapathId(2)).unwrap();
        let fallback = table.lookup(EventKind::PacketIn, DatapathId(9)).unwrap();
        let mut state = GatewayState::default();
        let mut dp = host_datapath();
        assert!(specific(&mut state, &mut dp, &Event::SwitchFeatures).is_err());
        assert!(fallback(&mut state, &mut dp, &Event::SwitchFeatures).is_ok());
        assert!(table.lookup(EventKind::SwitchFeatures, DatapathId(2)).is_none());
    }

    #[test]
    fn test_gateway_table() {
        let table = DispatchTable::gateway(&GatewaySettings::default());
        assert_eq!(table.len(), 3);
        assert!(table.lookup(EventKind::PacketIn, DatapathId(1)).is_some());
        assert!(table.lookup(EventKind::PacketIn, DatapathId(2)).is_some());
        assert!(table.lookup(EventKind::PacketIn, DatapathId(3)).is_none());
        assert!(table.lookup(EventKind::SwitchFeatures, DatapathId(3)).is_some());
    }

    #[test]
    fn test_connect_installs_table_miss() {
        let mut ctl = controller();
        ctl.handle_event(SwitchEvent::connected(host_datapath())).unwrap();
        ctl.handle_event(SwitchEvent::connected(gateway_datapath())).unwrap();

        for id in [DatapathId(1), DatapathId(2)] {
            let dp = ctl.switch(id).unwrap();
            assert_eq!(dp.rules.len(), 1);
            assert_eq!(dp.rules[0].priority, 0);
        }
        assert_eq!(ctl.switch_count(), 2);
    }

    #[test]
    fn test_packet_in_routed_by_switch() {
        let mut ctl = controller();
        ctl.handle_event(SwitchEvent::connected(host_datapath())).unwrap();

        ctl.handle_event(SwitchEvent::PacketIn {
            datapath: DatapathId(1),
            packet_in: packet_in(3, None, &frame(1, 2)),
        })
        .unwrap();

        let dp = ctl.switch(DatapathId(1)).unwrap();
        assert_eq!(dp.sent.len(), 1);
        assert_eq!(dp.sent[0].out_ports().collect::<Vec<_>>(), vec![port::FLOOD]);
        assert_eq!(
            ctl.state().mac_ports.lookup(DatapathId(1), MacAddr([0, 0, 0, 0, 0, 1])),
            Some(3)
        );
    }

    #[test]
    fn test_packet_in_from_unhandled_switch_ignored() {
        let mut ctl = controller();
        ctl.handle_event(SwitchEvent::connected(RecordingDatapath::new(DatapathId(5))))
            .unwrap();

        ctl.handle_event(SwitchEvent::PacketIn {
            datapath: DatapathId(5),
            packet_in: packet_in(1, None, &frame(1, 2)),
        })
        .unwrap();

        assert!(ctl.state().mac_ports.is_empty());
    }

    #[test]
    fn test_packet_in_from_unknown_switch_is_error() {
        let mut ctl = controller();
        let err = ctl
            .handle_event(SwitchEvent::PacketIn {
                datapath: DatapathId(1),
                packet_in: packet_in(1, None, &frame(1, 2)),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_failed_event_counted_and_loop_continues() {
        let mut table = DispatchTable::new();
        table.register(EventKind::PacketIn, None, fail);
        let mut ctl = Controller::new(GatewayState::default(), table);
        ctl.process(SwitchEvent::connected(host_datapath()));

        for _ in 0..2 {
            ctl.process(SwitchEvent::PacketIn {
                datapath: DatapathId(1),
                packet_in: packet_in(1, None, &frame(1, 2)),
            });
        }

        assert_eq!(ctl.state().metrics.events_failed.get(), 2);
        assert_eq!(ctl.state().metrics.packet_ins.get(), 2);
    }

    #[test]
    fn test_truncated_packet_in_counted() {
        let mut ctl = controller();
        ctl.process(SwitchEvent::connected(host_datapath()));
        let mut pkt = packet_in(1, Some(4), &frame(1, 2));
        pkt.total_len = 1500;

        ctl.process(SwitchEvent::PacketIn {
            datapath: DatapathId(1),
            packet_in: pkt,
        });

        assert_eq!(ctl.state().metrics.truncated_packet_ins.get(), 1);
        assert_eq!(ctl.state().metrics.events_failed.get(), 0);
    }

    #[test]
    fn test_disconnect_removes_switch() {
        let mut ctl = controller();
        ctl.process(SwitchEvent::Connected {
            connection: ConnectionId(10),
            handle: host_datapath(),
        });
        ctl.process(SwitchEvent::Disconnected {
            datapath: DatapathId(1),
            connection: ConnectionId(10),
        });
        assert_eq!(ctl.switch_count(), 0);
    }

    #[test]
    fn test_stale_disconnect_keeps_reconnected_switch() {
        let mut ctl = controller();
        ctl.process(SwitchEvent::Connected {
            connection: ConnectionId(20),
            handle: gateway_datapath(),
        });
        ctl.process(SwitchEvent::Connected {
            connection: ConnectionId(21),
            handle: gateway_datapath(),
        });

        // The old connection ends after the switch came back
        ctl.process(SwitchEvent::Disconnected {
            datapath: DatapathId(2),
            connection: ConnectionId(20),
        });

        assert_eq!(ctl.connection(DatapathId(2)), Some(ConnectionId(21)));
        ctl.handle_event(SwitchEvent::PacketIn {
            datapath: DatapathId(2),
            packet_in: packet_in(1, None, &frame(1, 2)),
        })
        .unwrap();

        ctl.process(SwitchEvent::Disconnected {
            datapath: DatapathId(2),
            connection: ConnectionId(21),
        });
        assert_eq!(ctl.switch_count(), 0);
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::next(), ConnectionId::next());
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(SwitchEvent::connected(host_datapath())).await.unwrap();
        tx.send(SwitchEvent::PacketIn {
            datapath: DatapathId(1),
            packet_in: packet_in(1, None, &frame(1, 2)),
        })
        .await
        .unwrap();
        drop(tx);

        let ctl = controller().run(rx, Duration::from_secs(60)).await;

        assert_eq!(ctl.state().metrics.packet_ins.get(), 1);
        assert_eq!(ctl.state().metrics.mac_bindings.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
