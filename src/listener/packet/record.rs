use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use thiserror::Error;

use super::columns::{self, split_row, VALUE_SEPARATOR};

pub const PROTO_DNS: &str = "DNS";
pub const PROTO_MDNS: &str = "MDNS";
pub const PROTO_DHCP: &str = "DHCP";

#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("expected at least {expected} columns, found {found}")]
    ColumnCount { expected: usize, found: usize },
    #[error("invalid timestamp {0:?}")]
    Timestamp(String),
    #[error("invalid frame length {0:?}")]
    FrameLength(String),
}

/// Behavior that marks the sender (or receiver) as an end-user machine.
///
/// Both hints are heuristics taken from the decoder's summary column: a
/// standard query (not a response) is only sent by a resolver client, and a
/// DHCP ACK addressed to a unicast IPv4 address hands that address to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientHint {
    /// Source is a client.
    DnsQuery,
    /// Destination is a client.
    DhcpAck,
}

/// DNS related columns, kept verbatim (multi-valued fields still `|` joined).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DnsFields {
    pub qry_name: String,
    pub cname: String,
    pub a: String,
    pub aaaa: String,
    pub nsec_next_domain: String,
    pub ptr_domain: String,
    pub resp_name: String,
    pub srv_name: String,
    pub srv_proto: String,
    pub srv_service: String,
    pub srv_target: String,
    pub txt: String,
}

impl DnsFields {
    /// Fields announced over mDNS, under the decoder's field names.
    pub fn mdns_fields(&self) -> [(&'static str, &str); 9] {
        [
            ("dns.qry.name", &self.qry_name),
            ("dns.nsec.next_domain_name", &self.nsec_next_domain),
            ("dns.resp.name", &self.resp_name),
            ("dns.ptr.domain_name", &self.ptr_domain),
            ("dns.srv.name", &self.srv_name),
            ("dns.srv.proto", &self.srv_proto),
            ("dns.srv.service", &self.srv_service),
            ("dns.srv.target", &self.srv_target),
            ("dns.txt", &self.txt),
        ]
    }
}

/// One decoded packet, as exported by the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: f64,
    pub eth_src: String,
    pub eth_dst: String,
    pub ip_src: Option<IpAddr>,
    pub ip_dst: Option<IpAddr>,
    pub tcp_src_port: Option<u16>,
    pub tcp_dst_port: Option<u16>,
    pub tcp_stream: Option<u64>,
    pub udp_src_port: Option<u16>,
    pub udp_dst_port: Option<u16>,
    pub udp_stream: Option<u64>,
    pub protocol: String,
    pub dhcp_hostname: String,
    pub dns: DnsFields,
    pub frame_len: u64,
    pub tcp_len: Option<u64>,
    pub info: String,
    pub client_hint: Option<ClientHint>,
}

impl Record {
    pub fn from_line(line: &str) -> Result<Self, RecordError> {
        let row = split_row(line);
        Self::from_row(&row)
    }

    pub fn from_row(row: &[&str]) -> Result<Self, RecordError> {
        // Tabs inside the info text spill into extra columns.
        if row.len() < columns::COLUMNS_EXPECTED {
            return Err(RecordError::ColumnCount {
                expected: columns::COLUMNS_EXPECTED,
                found: row.len(),
            });
        }
        let col = |idx: usize| row[idx].to_string();

        let timestamp = parse_timestamp(row[columns::TIME])?;
        let frame_len = parse_frame_len(row[columns::FRAME_LEN])?;

        let ip_src = pick_address(row[columns::IP_SRC], row[columns::IPV6_SRC]);
        let ip_dst = pick_address(row[columns::IP_DST], row[columns::IPV6_DST]);

        let protocol = col(columns::PROTOCOL);
        let info = row[columns::INFO..].join("\t");
        let client_hint = client_hint(&protocol, &info, first_value(row[columns::IP_DST]));

        Ok(Record {
            timestamp,
            eth_src: col(columns::ETH_SRC),
            eth_dst: col(columns::ETH_DST),
            ip_src,
            ip_dst,
            tcp_src_port: parse_first(row[columns::TCP_SRC_PORT]),
            tcp_dst_port: parse_first(row[columns::TCP_DST_PORT]),
            tcp_stream: parse_first(row[columns::TCP_STREAM]),
            udp_src_port: parse_first(row[columns::UDP_SRC_PORT]),
            udp_dst_port: parse_first(row[columns::UDP_DST_PORT]),
            udp_stream: parse_first(row[columns::UDP_STREAM]),
            protocol,
            dhcp_hostname: col(columns::DHCP_HOSTNAME),
            dns: DnsFields {
                qry_name: col(columns::DNS_QRY_NAME),
                cname: col(columns::DNS_CNAME),
                a: col(columns::DNS_A),
                aaaa: col(columns::DNS_AAAA),
                nsec_next_domain: col(columns::DNS_NSEC_NEXT_DOMAIN),
                ptr_domain: col(columns::DNS_PTR_DOMAIN),
                resp_name: col(columns::DNS_RESP_NAME),
                srv_name: col(columns::DNS_SRV_NAME),
                srv_proto: col(columns::DNS_SRV_PROTO),
                srv_service: col(columns::DNS_SRV_SERVICE),
                srv_target: col(columns::DNS_SRV_TARGET),
                txt: col(columns::DNS_TXT),
            },
            frame_len,
            tcp_len: parse_first(row[columns::TCP_LEN]),
            info,
            client_hint,
        })
    }

    pub fn is_protocol(&self, label: &str) -> bool {
        self.protocol == label
    }

    /// Protocol label with the destination port, `/port` for TCP and `\port` for UDP.
    pub fn protocol_tag(&self) -> String {
        if let Some(port) = self.udp_dst_port {
            format!("{}\\{}", self.protocol, port)
        } else if let Some(port) = self.tcp_dst_port {
            format!("{}/{}", self.protocol, port)
        } else {
            self.protocol.clone()
        }
    }
}

pub fn parse_timestamp(field: &str) -> Result<f64, RecordError> {
    field
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|t| t.is_finite())
        .ok_or_else(|| RecordError::Timestamp(field.to_string()))
}

pub fn parse_frame_len(field: &str) -> Result<u64, RecordError> {
    field
        .trim()
        .parse::<u64>()
        .map_err(|_| RecordError::FrameLength(field.to_string()))
}

/// Splits a multi-valued field, dropping empty entries.
pub fn split_values(field: &str) -> impl Iterator<Item = &str> {
    field.split(VALUE_SEPARATOR).filter(|v| !v.is_empty())
}

// The decoder sometimes writes both addresses of a tunnelled packet into one
// field, `outer|inner`. The first one is the one on the wire.
fn first_value(field: &str) -> &str {
    field.split(VALUE_SEPARATOR).next().unwrap_or("").trim()
}

fn parse_first<T: FromStr>(field: &str) -> Option<T> {
    first_value(field).parse().ok()
}

fn pick_address(v4: &str, v6: &str) -> Option<IpAddr> {
    let field = if v4.is_empty() { v6 } else { v4 };
    parse_first(field)
}

fn client_hint(protocol: &str, info: &str, ipv4_dst: &str) -> Option<ClientHint> {
    match protocol {
        PROTO_DNS if info.starts_with("Standard query 0x") => Some(ClientHint::DnsQuery),
        PROTO_DHCP if info.starts_with("DHCP ACK") => {
            let broadcast = ipv4_dst.parse::<Ipv4Addr>() == Ok(Ipv4Addr::BROADCAST);
            (!broadcast).then_some(ClientHint::DhcpAck)
        }
        _ => None,
    }
}
