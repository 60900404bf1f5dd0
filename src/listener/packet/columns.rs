// Column layout of the tab separated export (`tshark -T fields`). The order is
// fixed; the header row is only checked for its width and its first name.

pub const TIME: usize = 0;
pub const ETH_SRC: usize = 1;
pub const ETH_DST: usize = 2;
pub const IP_SRC: usize = 3;
pub const IP_DST: usize = 4;
pub const IPV6_SRC: usize = 5;
pub const IPV6_DST: usize = 6;
pub const TCP_SRC_PORT: usize = 7;
pub const TCP_DST_PORT: usize = 8;
pub const TCP_STREAM: usize = 9;
pub const UDP_SRC_PORT: usize = 10;
pub const UDP_DST_PORT: usize = 11;
pub const UDP_STREAM: usize = 12;
pub const PROTOCOL: usize = 13;
pub const DHCP_HOSTNAME: usize = 14;
// 15 repeats dns.qry.name; the later slot is the one read.
pub const DNS_CNAME: usize = 16;
pub const DNS_A: usize = 17;
pub const DNS_AAAA: usize = 18;
pub const DNS_NSEC_NEXT_DOMAIN: usize = 19;
pub const DNS_PTR_DOMAIN: usize = 20;
pub const DNS_QRY_NAME: usize = 21;
pub const DNS_RESP_NAME: usize = 22;
pub const DNS_SRV_NAME: usize = 23;
pub const DNS_SRV_PROTO: usize = 24;
pub const DNS_SRV_SERVICE: usize = 25;
pub const DNS_SRV_TARGET: usize = 26;
pub const DNS_TXT: usize = 27;
pub const FRAME_LEN: usize = 28;
pub const TCP_LEN: usize = 29;
pub const INFO: usize = 30;

pub const COLUMNS_EXPECTED: usize = 31;

pub const TIME_HEADER: &str = "frame.time_epoch";

/// Separator tshark uses inside a multi-valued field.
pub const VALUE_SEPARATOR: char = '|';

/// DNS root as printed by the decoder.
pub const DNS_ROOT: &str = "<Root>";

/// Splits a line into its columns, without the line terminator.
pub fn split_row(line: &str) -> Vec<&str> {
    line.trim_end_matches(['\n', '\r']).split('\t').collect()
}
