pub mod columns;
mod direction;
mod record;

pub use direction::Direction;
pub use record::{parse_frame_len, parse_timestamp, split_values};
pub use record::ClientHint;
pub use record::DnsFields;
pub use record::Record;
pub use record::RecordError;
pub use record::{PROTO_DHCP, PROTO_DNS, PROTO_MDNS};

#[cfg(test)]
pub(crate) use record::tests::row as test_row;
