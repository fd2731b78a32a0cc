//! IP to MAC bindings learned from ARP, and outstanding resolution probes

use crate::protocol::MacAddr;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::Ipv4Addr;
use std::time::Instant;

/// Global IP to MAC table shared by both gateway sides
///
/// Write-once: the first binding seen for an IP is kept for the life of the
/// process, even if the host later answers from a different MAC.
#[derive(Debug, Default)]
pub struct AddressTable {
    entries: HashMap<Ipv4Addr, MacAddr>,
}

impl AddressTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `ip -> mac` unless `ip` is already bound.
    ///
    /// Returns true if a new entry was created.
    pub fn learn(&mut self, ip: Ipv4Addr, mac: MacAddr) -> bool {
        match self.entries.entry(ip) {
            Entry::Vacant(slot) => {
                slot.insert(mac);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.entries.get(&ip).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Ipv4Addr, MacAddr)> + '_ {
        self.entries.iter().map(|(ip, mac)| (*ip, *mac))
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingResolution {
    first_probe: Instant,
    probes: u32,
}

/// Addresses probed with an ARP request and not yet heard from
///
/// Diagnostic only. The packet that triggered a probe has already been
/// dropped and is never replayed.
#[derive(Debug, Default)]
pub struct PendingResolutions {
    pending: HashMap<Ipv4Addr, PendingResolution>,
}

impl PendingResolutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that a probe for `ip` went out. Returns the probe count so far.
    pub fn mark(&mut self, ip: Ipv4Addr) -> u32 {
        let entry = self.pending.entry(ip).or_insert(PendingResolution {
            first_probe: Instant::now(),
            probes: 0,
        });
        entry.probes += 1;
        entry.probes
    }

    /// Clear the marker for `ip`, returning (probes sent, time since first).
    pub fn resolve(&mut self, ip: Ipv4Addr) -> Option<(u32, std::time::Duration)> {
        self.pending
            .remove(&ip)
            .map(|p| (p.probes, p.first_probe.elapsed()))
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.pending.contains_key(&ip)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC_A: MacAddr = MacAddr([0x00, 0x00, 0x00, 0x00, 0x00, 0x0a]);
    const MAC_B: MacAddr = MacAddr([0x00, 0x00, 0x00, 0x00, 0x00, 0x0b]);

    #[test]
    fn test_learn_and_lookup() {
        let mut table = AddressTable::new();
        let ip = Ipv4Addr::new(5, 5, 1, 4);

        assert!(table.is_empty());
        assert!(table.learn(ip, MAC_A));
        assert_eq!(table.lookup(ip), Some(MAC_A));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_first_binding_wins() {
        let mut table = AddressTable::new();
        let ip = Ipv4Addr::new(5, 5, 0, 1);

        assert!(table.learn(ip, MAC_A));
        assert!(!table.learn(ip, MAC_B));
        assert_eq!(table.lookup(ip), Some(MAC_A));
    }

    #[test]
    fn test_lookup_missing() {
        let table = AddressTable::new();
        assert_eq!(table.lookup(Ipv4Addr::new(5, 5, 1, 9)), None);
    }

    #[test]
    fn test_pending_mark_and_resolve() {
        let mut pending = PendingResolutions::new();
        let ip = Ipv4Addr::new(5, 5, 1, 4);

        assert_eq!(pending.mark(ip), 1);
        assert_eq!(pending.mark(ip), 2);
        assert!(pending.contains(ip));
        assert_eq!(pending.len(), 1);

        let (probes, _) = pending.resolve(ip).unwrap();
        assert_eq!(probes, 2);
        assert!(!pending.contains(ip));
        assert!(pending.resolve(ip).is_none());
    }
}
