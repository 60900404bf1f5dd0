use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use serde::Serialize;

use crate::{split_values, Direction, Record, PROTO_DHCP, PROTO_DNS, PROTO_MDNS};

use super::address::is_local_assignable;
use super::connection::{Connection, ConnectionStats};
use super::dns::{DnsTables, NameMap};
use super::geo::GeoLocator;

/// Everything known about one MAC address, from its own point of view.
#[derive(Debug)]
pub struct Device {
    mac: String,
    first_seen: f64,
    last_seen: f64,
    packets: u64,
    tx_bytes: u64,
    rx_bytes: u64,
    tx_packets: u64,
    rx_packets: u64,
    dns_queries: u64,
    dns_replies: u64,
    own_ips: BTreeSet<IpAddr>,
    hostnames: BTreeSet<String>,
    tx_protocols: BTreeSet<String>,
    connections: BTreeMap<IpAddr, Connection>,
    dns: DnsTables,
    mdns: NameMap,
}

/// Device figures at one instant. `last_seen` is relative to the reference
/// time of the query (zero or negative).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStats {
    pub mac: String,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub packets: u64,
    pub dns_queries: u64,
    pub dns_replies: u64,
    pub dns_domains: usize,
    pub connections: usize,
    pub first_seen: f64,
    pub last_seen: f64,
    pub protocols: Vec<String>,
    pub ips: Vec<IpAddr>,
    pub hostnames: Vec<String>,
}

impl Device {
    pub fn new(mac: impl Into<String>) -> Self {
        Device {
            mac: mac.into(),
            first_seen: 0.0,
            last_seen: 0.0,
            packets: 0,
            tx_bytes: 0,
            rx_bytes: 0,
            tx_packets: 0,
            rx_packets: 0,
            dns_queries: 0,
            dns_replies: 0,
            own_ips: BTreeSet::new(),
            hostnames: BTreeSet::new(),
            tx_protocols: BTreeSet::new(),
            connections: BTreeMap::new(),
            dns: DnsTables::default(),
            mdns: NameMap::new(),
        }
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    /// Update the device from a record it is the source or the destination of.
    pub fn inspect(&mut self, record: &Record, geo: &dyn GeoLocator) {
        let direction = Direction::from_mac(record, &self.mac);

        if record.is_protocol(PROTO_DNS) {
            if direction == Some(Direction::Incoming) {
                self.dns_replies += 1;
                self.dns.register_reply(&record.dns);
            } else {
                self.dns_queries += 1;
            }
        } else if record.is_protocol(PROTO_MDNS) {
            if direction == Some(Direction::Outgoing) {
                self.harvest_mdns(record);
            }
        } else if record.is_protocol(PROTO_DHCP)
            && direction == Some(Direction::Outgoing)
            && !record.dhcp_hostname.is_empty()
        {
            self.hostnames.insert(record.dhcp_hostname.clone());
        }

        let peer = match direction {
            Some(Direction::Outgoing) => {
                self.tx_protocols.insert(record.protocol_tag());
                self.tx_bytes += record.frame_len;
                self.tx_packets += 1;
                // Own addresses are local ones; a global source address
                // belongs to whoever is routed through this device.
                if let Some(src) = record.ip_src.filter(|ip| is_local_assignable(*ip)) {
                    self.own_ips.insert(src);
                }
                self.touch(record.timestamp);
                record.ip_dst
            }
            Some(Direction::Incoming) => {
                self.rx_bytes += record.frame_len;
                self.rx_packets += 1;
                record.ip_src
            }
            None => None,
        };

        if let (Some(peer), Some(direction)) = (peer, direction) {
            self.connections
                .entry(peer)
                .or_insert_with(|| Connection::new(peer, record.timestamp, geo))
                .register_packet(record, direction);
        }

        self.packets += 1;
    }

    fn touch(&mut self, timestamp: f64) {
        self.last_seen = timestamp;
        if self.first_seen == 0.0 {
            self.first_seen = timestamp;
        }
    }

    fn harvest_mdns(&mut self, record: &Record) {
        for (key, field) in record.dns.mdns_fields() {
            if field.is_empty() {
                continue;
            }
            self.mdns
                .entry(key.to_string())
                .or_default()
                .extend(split_values(field).map(str::to_string));
        }
    }

    /// Reset counters and connections; identity, addresses, hostnames and DNS
    /// knowledge are kept.
    pub fn clear_statistics(&mut self) {
        self.first_seen = 0.0;
        self.last_seen = 0.0;
        self.packets = 0;
        self.tx_bytes = 0;
        self.rx_bytes = 0;
        self.tx_packets = 0;
        self.rx_packets = 0;
        self.dns_queries = 0;
        self.dns_replies = 0;
        self.tx_protocols.clear();
        self.connections.clear();
    }

    pub fn stats(&self, now: f64) -> DeviceStats {
        DeviceStats {
            mac: self.mac.clone(),
            tx_bytes: self.tx_bytes,
            rx_bytes: self.rx_bytes,
            tx_packets: self.tx_packets,
            rx_packets: self.rx_packets,
            packets: self.packets,
            dns_queries: self.dns_queries,
            dns_replies: self.dns_replies,
            dns_domains: self.dns.unique_domains(),
            connections: self.connections.len(),
            first_seen: self.first_seen,
            last_seen: self.last_seen - now,
            protocols: self.tx_protocols.iter().cloned().collect(),
            ips: self.own_ips.iter().copied().collect(),
            hostnames: self.hostnames.iter().cloned().collect(),
        }
    }

    pub fn connection_stats(
        &self,
        now: f64,
        geo: &dyn GeoLocator,
    ) -> BTreeMap<IpAddr, ConnectionStats> {
        self.connections
            .iter()
            .map(|(peer, conn)| (*peer, conn.stats(now, geo)))
            .collect()
    }

    pub fn connection(&self, peer: &IpAddr) -> Option<&Connection> {
        self.connections.get(peer)
    }

    pub fn dns(&self) -> &DnsTables {
        &self.dns
    }

    pub fn mdns(&self) -> &NameMap {
        &self.mdns
    }

    /// Human readable name of a peer: the domains it was resolved from, or
    /// what kind of address it is.
    pub fn peer_name(&self, peer: &IpAddr) -> Option<String> {
        let conn = self.connections.get(peer)?;
        let name = match self.dns.domains_of(&peer.to_string()) {
            Some(domains) => {
                let mut name = domains.iter().cloned().collect::<Vec<_>>().join(", ");
                if conn.class.private {
                    name.push_str(" (local)");
                }
                name
            }
            None => conn.class.describe().to_string(),
        };
        Some(name)
    }
}
