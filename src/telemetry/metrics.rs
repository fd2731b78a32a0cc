//! Metrics collection for controller activity.
//!
//! Provides thread-safe counters for tracking control-plane events at both
//! the global and per-switch level.

use crate::openflow::DatapathId;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-switch message statistics.
#[derive(Debug, Default)]
pub struct SwitchStats {
    /// PACKET_IN messages received.
    pub packet_ins: Counter,
    /// PACKET_OUT messages sent.
    pub packet_outs: Counter,
    /// FLOW_MOD messages sent.
    pub flow_mods: Counter,
}

impl SwitchStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Global metrics registry for the controller.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    switches: RwLock<BTreeMap<DatapathId, SwitchStats>>,

    // Channel
    /// Messages from a switch that failed to decode and were skipped.
    pub malformed_messages: Counter,

    // Dispatch
    /// PACKET_IN events handled.
    pub packet_ins: Counter,
    /// PACKET_IN events whose data was shorter than the frame.
    pub truncated_packet_ins: Counter,
    /// Events whose handler returned an error.
    pub events_failed: Counter,

    // Learning switch
    /// Frames flooded for lack of a learned port.
    pub frames_flooded: Counter,
    /// Unicast rules installed.
    pub flows_installed: Counter,

    // ARP
    /// Proxy ARP replies sent.
    pub arp_replies_sent: Counter,
    /// Resolution probes broadcast for external hosts.
    pub arp_probes_sent: Counter,

    // NAT
    /// Echo requests translated toward the outside.
    pub nat_outbound: Counter,
    /// Echo replies translated back toward the inside.
    pub nat_inbound: Counter,
    /// Echo requests abandoned because the destination was unresolved.
    pub nat_unresolved: Counter,

    // Table size gauges
    /// Current number of MAC-to-port bindings.
    pub mac_bindings: AtomicU64,
    /// Current number of address table entries.
    pub address_entries: AtomicU64,
    /// Current number of NAT sessions.
    pub nat_sessions: AtomicU64,
}

impl MetricsRegistry {
    /// Creates a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a switch for statistics tracking.
    pub fn register_switch(&self, datapath: DatapathId) {
        if let Ok(mut switches) = self.switches.write() {
            switches.entry(datapath).or_default();
        }
    }

    fn with_switch(&self, datapath: DatapathId, f: impl FnOnce(&SwitchStats)) {
        if let Ok(switches) = self.switches.read() {
            if let Some(stats) = switches.get(&datapath) {
                f(stats);
            }
        }
    }

    pub fn record_packet_in(&self, datapath: DatapathId) {
        self.packet_ins.inc();
        self.with_switch(datapath, |s| s.packet_ins.inc());
    }

    pub fn record_packet_out(&self, datapath: DatapathId) {
        self.with_switch(datapath, |s| s.packet_outs.inc());
    }

    pub fn record_flow_mod(&self, datapath: DatapathId) {
        self.with_switch(datapath, |s| s.flow_mods.inc());
    }

    pub fn set_mac_bindings(&self, size: usize) {
        self.mac_bindings.store(size as u64, Ordering::Relaxed);
    }

    pub fn set_address_entries(&self, size: usize) {
        self.address_entries.store(size as u64, Ordering::Relaxed);
    }

    pub fn set_nat_sessions(&self, size: usize) {
        self.nat_sessions.store(size as u64, Ordering::Relaxed);
    }

    /// Exports all metrics as key-value pairs.
    pub fn export(&self) -> Vec<(String, u64)> {
        let mut result = vec![
            ("malformed_messages".into(), self.malformed_messages.get()),
            ("packet_ins".into(), self.packet_ins.get()),
            ("truncated_packet_ins".into(), self.truncated_packet_ins.get()),
            ("events_failed".into(), self.events_failed.get()),
            ("frames_flooded".into(), self.frames_flooded.get()),
            ("flows_installed".into(), self.flows_installed.get()),
            ("arp_replies_sent".into(), self.arp_replies_sent.get()),
            ("arp_probes_sent".into(), self.arp_probes_sent.get()),
            ("nat_outbound".into(), self.nat_outbound.get()),
            ("nat_inbound".into(), self.nat_inbound.get()),
            ("nat_unresolved".into(), self.nat_unresolved.get()),
            (
                "mac_bindings".into(),
                self.mac_bindings.load(Ordering::Relaxed),
            ),
            (
                "address_entries".into(),
                self.address_entries.load(Ordering::Relaxed),
            ),
            (
                "nat_sessions".into(),
                self.nat_sessions.load(Ordering::Relaxed),
            ),
        ];

        if let Ok(switches) = self.switches.read() {
            for (datapath, stats) in switches.iter() {
                result.extend([
                    (format!("switch{}_packet_ins", datapath), stats.packet_ins.get()),
                    (format!("switch{}_packet_outs", datapath), stats.packet_outs.get()),
                    (format!("switch{}_flow_mods", datapath), stats.flow_mods.get()),
                ]);
            }
        }

        result
    }

    /// One-line rendering of the non-zero metrics, for periodic logging.
    pub fn snapshot(&self) -> String {
        self.export()
            .into_iter()
            .filter(|(_, value)| *value != 0)
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_basic() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.add(10);
        assert_eq!(counter.get(), 11);
    }

    #[test]
    fn test_metrics_registry() {
        let registry = MetricsRegistry::new();

        registry.register_switch(DatapathId(1));
        registry.register_switch(DatapathId(2));

        registry.record_packet_in(DatapathId(1));
        registry.record_packet_in(DatapathId(2));
        registry.record_packet_out(DatapathId(2));
        registry.nat_outbound.inc();
        registry.set_nat_sessions(3);

        let metrics = registry.export();

        assert!(metrics.contains(&("packet_ins".into(), 2)));
        assert!(metrics.contains(&("nat_outbound".into(), 1)));
        assert!(metrics.contains(&("nat_sessions".into(), 3)));
        assert!(metrics.contains(&("switch1_packet_ins".into(), 1)));
        assert!(metrics.contains(&("switch2_packet_outs".into(), 1)));
    }

    #[test]
    fn test_unregistered_switch_only_counts_globally() {
        let registry = MetricsRegistry::new();
        registry.record_packet_in(DatapathId(9));

        let metrics = registry.export();
        assert!(metrics.contains(&("packet_ins".into(), 1)));
        assert!(!metrics.iter().any(|(name, _)| name.starts_with("switch9")));
    }

    #[test]
    fn test_snapshot_skips_zero_values() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.snapshot(), "");

        registry.arp_replies_sent.add(2);
        registry.set_mac_bindings(4);
        assert_eq!(registry.snapshot(), "arp_replies_sent=2 mac_bindings=4");
    }
}
