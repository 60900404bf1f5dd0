use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use serde::Serialize;

use crate::listener::parser::RecordSink;
use crate::util::WindowSnapshot;
use crate::{ClientHint, Record};

use super::connection::{ConnectionStats, Graph};
use super::device::{Device, DeviceStats};
use super::dns::NameMap;
use super::geo::{GeoLocator, NoGeoLocation};

#[derive(Debug, Default)]
struct Devices {
    devices: HashMap<String, Device>,
    clients: BTreeSet<String>,
    last_seen: f64,
}

/// The whole traffic model: every device seen as a source, and which of them
/// look like clients.
///
/// A single lock guards all devices. Every query copies what it returns out
/// under that lock, so a result always matches one instant of ingestion.
pub struct TrafficAggregator {
    state: Mutex<Devices>,
    geo: Box<dyn GeoLocator>,
    export_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct DeviceExport<'a> {
    mac: &'a str,
    time: f64,
    statistics: DeviceStats,
    connections: Vec<ConnectionStats>,
    ip_to_domains: &'a NameMap,
    domain_to_ips: &'a NameMap,
    cnames: &'a NameMap,
    srv_targets: &'a BTreeMap<String, String>,
    mdns: &'a NameMap,
}

impl Default for TrafficAggregator {
    fn default() -> Self {
        Self::new(Box::new(NoGeoLocation), std::env::temp_dir())
    }
}

impl TrafficAggregator {
    pub fn new(geo: Box<dyn GeoLocator>, export_dir: impl Into<PathBuf>) -> Self {
        TrafficAggregator {
            state: Mutex::new(Devices::default()),
            geo,
            export_dir: export_dir.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Devices> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn process(&self, record: &Record) {
        let mut state = self.lock();
        state.last_seen = record.timestamp;

        if !state.devices.contains_key(&record.eth_src) {
            debug!("New device {}", record.eth_src);
            state
                .devices
                .insert(record.eth_src.clone(), Device::new(record.eth_src.as_str()));
        }

        match record.client_hint {
            Some(ClientHint::DnsQuery) => {
                state.clients.insert(record.eth_src.clone());
            }
            Some(ClientHint::DhcpAck) => {
                state.clients.insert(record.eth_dst.clone());
            }
            None => (),
        }

        let geo = self.geo.as_ref();
        if let Some(src) = state.devices.get_mut(&record.eth_src) {
            src.inspect(record, geo);
        }
        if record.eth_dst != record.eth_src {
            if let Some(dst) = state.devices.get_mut(&record.eth_dst) {
                dst.inspect(record, geo);
            }
        }
    }

    /// Time of the last processed record.
    pub fn last_seen(&self) -> f64 {
        self.lock().last_seen
    }

    pub fn devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.lock().devices.keys().cloned().collect();
        devices.sort();
        devices
    }

    pub fn clients(&self) -> Vec<String> {
        self.lock().clients.iter().cloned().collect()
    }

    fn with_device<T>(&self, mac: &str, f: impl FnOnce(&Device) -> T) -> Option<T> {
        self.lock().devices.get(mac).map(f)
    }

    pub fn device_stats(&self, mac: &str, now: f64) -> Option<DeviceStats> {
        self.with_device(mac, |d| d.stats(now))
    }

    pub fn device_connections(
        &self,
        mac: &str,
        now: f64,
    ) -> Option<BTreeMap<IpAddr, ConnectionStats>> {
        self.with_device(mac, |d| d.connection_stats(now, self.geo.as_ref()))
    }

    /// Address -> domains the device got it from.
    pub fn dns_replies(&self, mac: &str) -> Option<NameMap> {
        self.with_device(mac, |d| d.dns().ip_to_domains.clone())
    }

    pub fn domain_ips(&self, mac: &str) -> Option<NameMap> {
        self.with_device(mac, |d| d.dns().domain_to_ips.clone())
    }

    pub fn cnames(&self, mac: &str) -> Option<NameMap> {
        self.with_device(mac, |d| d.dns().cnames.clone())
    }

    pub fn srv_targets(&self, mac: &str) -> Option<BTreeMap<String, String>> {
        self.with_device(mac, |d| d.dns().srv_targets.clone())
    }

    pub fn mdns(&self, mac: &str) -> Option<NameMap> {
        self.with_device(mac, |d| d.mdns().clone())
    }

    pub fn peer_name(&self, mac: &str, peer: &IpAddr) -> Option<String> {
        self.with_device(mac, |d| d.peer_name(peer)).flatten()
    }

    pub fn graph(&self, mac: &str, peer: &IpAddr, graph: Graph) -> Option<WindowSnapshot> {
        self.with_device(mac, |d| d.connection(peer).map(|c| c.graph(graph)))
            .flatten()
    }

    /// Reset counters and connections of one device. `false` if unknown.
    pub fn clear_statistics(&self, mac: &str) -> bool {
        match self.lock().devices.get_mut(mac) {
            Some(device) => {
                device.clear_statistics();
                true
            }
            None => false,
        }
    }

    /// Forget everything about one device except that it exists.
    pub fn clear_all(&self, mac: &str) -> bool {
        match self.lock().devices.get_mut(mac) {
            Some(device) => {
                *device = Device::new(mac);
                true
            }
            None => false,
        }
    }

    /// Write one device's full state to a JSON file in the export directory.
    /// Best effort: failures are logged and reported as `false`.
    pub fn export_device(&self, mac: &str, now: f64) -> bool {
        let path = self.export_path(mac, now);
        let state = self.lock();
        let Some(device) = state.devices.get(mac) else {
            warn!("Export of unknown device {}", mac);
            return false;
        };
        let export = DeviceExport {
            mac,
            time: now,
            statistics: device.stats(now),
            connections: device
                .connection_stats(now, self.geo.as_ref())
                .into_values()
                .collect(),
            ip_to_domains: &device.dns().ip_to_domains,
            domain_to_ips: &device.dns().domain_to_ips,
            cnames: &device.dns().cnames,
            srv_targets: &device.dns().srv_targets,
            mdns: device.mdns(),
        };
        match write_json(&path, &export) {
            Ok(()) => {
                info!("Exported {} to {}", mac, path.display());
                true
            }
            Err(e) => {
                warn!("Failed to export {} to {}: {}", mac, path.display(), e);
                false
            }
        }
    }

    pub fn export_path(&self, mac: &str, now: f64) -> PathBuf {
        self.export_dir.join(format!(
            "traffic-export-{}-{}.json",
            mac.replace(':', ""),
            now as i64
        ))
    }
}

impl RecordSink for TrafficAggregator {
    fn process(&self, record: &Record) {
        TrafficAggregator::process(self, record);
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}
