use std::collections::HashMap;
use std::net::IpAddr;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use tokio::process::Command;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::config::GeoConfig;

/// Best-effort country lookup for a peer address. Implementations are called
/// with the traffic model locked and must not block.
pub trait GeoLocator: Send + Sync {
    /// Two letter country code, `None` if unknown, pending or failed.
    fn country(&self, addr: IpAddr) -> Option<String>;

    /// Starts resolving `addr` in the background.
    fn request(&self, _addr: IpAddr) {}
}

/// Never knows anything.
#[derive(Debug, Default)]
pub struct NoGeoLocation;

impl GeoLocator for NoGeoLocation {
    fn country(&self, _addr: IpAddr) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Lookup {
    Pending,
    Resolved(Option<String>),
}

type Cache = Arc<Mutex<HashMap<IpAddr, Lookup>>>;

fn lock(cache: &Cache) -> MutexGuard<'_, HashMap<IpAddr, Lookup>> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Asks the `geoiplookup`/`geoiplookup6` tools (GeoIP legacy databases).
///
/// Requests go to a resolver task that runs the tools one at a time and
/// fills a cache; `country` only ever reads that cache. The task ends when
/// the lookup is dropped.
#[derive(Debug)]
pub struct GeoIpLookup {
    cache: Cache,
    requests: UnboundedSender<IpAddr>,
}

impl GeoIpLookup {
    /// Must be called inside a tokio runtime.
    pub fn spawn(v4_command: impl Into<String>, v6_command: impl Into<String>) -> Self {
        let (requests, rx) = unbounded_channel();
        let cache = Cache::default();
        tokio::spawn(resolve(
            rx,
            cache.clone(),
            v4_command.into(),
            v6_command.into(),
        ));
        GeoIpLookup { cache, requests }
    }
}

impl GeoLocator for GeoIpLookup {
    fn country(&self, addr: IpAddr) -> Option<String> {
        match lock(&self.cache).get(&addr) {
            Some(Lookup::Resolved(country)) => country.clone(),
            _ => None,
        }
    }

    fn request(&self, addr: IpAddr) {
        {
            let mut cache = lock(&self.cache);
            if cache.contains_key(&addr) {
                return;
            }
            cache.insert(addr, Lookup::Pending);
        }
        if self.requests.send(addr).is_err() {
            debug!("Geolocation resolver is gone, {} stays unknown", addr);
        }
    }
}

async fn resolve(
    mut requests: UnboundedReceiver<IpAddr>,
    cache: Cache,
    v4_command: String,
    v6_command: String,
) {
    while let Some(addr) = requests.recv().await {
        let command = match addr {
            IpAddr::V4(_) => &v4_command,
            IpAddr::V6(_) => &v6_command,
        };
        let country = run_lookup(command, addr).await;
        lock(&cache).insert(addr, Lookup::Resolved(country));
    }
    debug!("Geolocation resolver stopped");
}

async fn run_lookup(command: &str, addr: IpAddr) -> Option<String> {
    let output = Command::new(command)
        .arg(addr.to_string())
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;
    match output {
        Ok(output) if output.status.success() => {
            parse_country(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            debug!("{} {} exited with {}", command, addr, output.status);
            None
        }
        Err(e) => {
            debug!("Failed to run {}: {}", command, e);
            None
        }
    }
}

/// `GeoIP Country Edition: US, United States` -> `US`.
/// Misses look like `GeoIP Country Edition: IP Address not found`.
fn parse_country(output: &str) -> Option<String> {
    let line = output.lines().next()?;
    let (_, rest) = line.split_once(": ")?;
    let (code, _) = rest.split_once(',')?;
    let code = code.trim();
    (code.len() == 2 && code.chars().all(|c| c.is_ascii_alphanumeric())).then(|| code.to_string())
}

pub fn from_config(config: &GeoConfig) -> Box<dyn GeoLocator> {
    if !config.enabled {
        return Box::new(NoGeoLocation);
    }
    match tokio::runtime::Handle::try_current() {
        Ok(_) => Box::new(GeoIpLookup::spawn(&config.v4_command, &config.v6_command)),
        Err(_) => {
            warn!("Geolocation needs a running runtime, disabled");
            Box::new(NoGeoLocation)
        }
    }
}
