use std::collections::BTreeSet;
use std::net::IpAddr;

use serde::Serialize;

use crate::util::{TimeWindow, WindowSnapshot};
use crate::{Direction, Record};

use super::address::AddressClass;
use super::geo::GeoLocator;

/// Which of the four graphs of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Graph {
    TxSecond,
    TxMinute,
    RxSecond,
    RxMinute,
}

/// Traffic between one device and one peer address.
#[derive(Debug)]
pub struct Connection {
    pub peer: IpAddr,
    pub class: AddressClass,
    pub first_touch: f64,
    pub last_touch: f64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_protocols: BTreeSet<String>,
    tx_sec: TimeWindow,
    tx_min: TimeWindow,
    rx_sec: TimeWindow,
    rx_min: TimeWindow,
}

/// Connection figures at one instant. `last_seen` is relative to the
/// reference time of the query (zero or negative).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub peer: IpAddr,
    pub class: AddressClass,
    pub country: Option<String>,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub first_seen: f64,
    pub last_seen: f64,
    pub protocols: Vec<String>,
}

impl Connection {
    /// The country lookup starts here; `stats` reads it back once it has
    /// finished.
    pub fn new(peer: IpAddr, timestamp: f64, geo: &dyn GeoLocator) -> Self {
        geo.request(peer);
        Connection {
            peer,
            class: AddressClass::of(peer),
            first_touch: timestamp,
            last_touch: timestamp,
            tx_bytes: 0,
            rx_bytes: 0,
            tx_packets: 0,
            rx_packets: 0,
            tx_protocols: BTreeSet::new(),
            tx_sec: TimeWindow::per_second(timestamp),
            tx_min: TimeWindow::per_minute(timestamp),
            rx_sec: TimeWindow::per_second(timestamp),
            rx_min: TimeWindow::per_minute(timestamp),
        }
    }

    pub fn register_packet(&mut self, record: &Record, direction: Direction) {
        let t = record.timestamp;
        let volume = record.frame_len;
        self.last_touch = t;

        match direction {
            Direction::Outgoing => {
                self.tx_bytes += volume;
                self.tx_packets += 1;
                self.tx_sec.update(t, volume);
                self.tx_min.update(t, volume);
                self.tx_protocols.insert(record.protocol_tag());
            }
            Direction::Incoming => {
                self.rx_bytes += volume;
                self.rx_packets += 1;
                self.rx_sec.update(t, volume);
                self.rx_min.update(t, volume);
            }
        }
    }

    pub fn graph(&self, graph: Graph) -> WindowSnapshot {
        match graph {
            Graph::TxSecond => self.tx_sec.snapshot(),
            Graph::TxMinute => self.tx_min.snapshot(),
            Graph::RxSecond => self.rx_sec.snapshot(),
            Graph::RxMinute => self.rx_min.snapshot(),
        }
    }

    pub fn stats(&self, now: f64, geo: &dyn GeoLocator) -> ConnectionStats {
        ConnectionStats {
            peer: self.peer,
            class: self.class,
            country: geo.country(self.peer),
            tx_bytes: self.tx_bytes,
            rx_bytes: self.rx_bytes,
            tx_packets: self.tx_packets,
            rx_packets: self.rx_packets,
            first_seen: self.first_touch,
            last_seen: self.last_touch - now,
            protocols: self.tx_protocols.iter().cloned().collect(),
        }
    }
}
