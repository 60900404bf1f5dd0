pub mod address;
pub mod aggregator;
pub mod connection;
pub mod device;
pub mod dns;
pub mod geo;

pub use address::{AddressClass, IpVersion};
pub use aggregator::TrafficAggregator;
pub use connection::{Connection, ConnectionStats, Graph};
pub use device::{Device, DeviceStats};
pub use dns::{DnsTables, NameMap};
pub use geo::{GeoIpLookup, GeoLocator, NoGeoLocation};
