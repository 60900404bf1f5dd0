use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::Serialize;

// IANA special-purpose registries, the same tables the usual `ipaddress`
// libraries answer `is_private` / `is_reserved` from.
const V4_PRIVATE: [(u32, u8); 14] = [
    (0x0000_0000, 8),  // 0.0.0.0/8
    (0x0A00_0000, 8),  // 10.0.0.0/8
    (0x7F00_0000, 8),  // 127.0.0.0/8
    (0xA9FE_0000, 16), // 169.254.0.0/16
    (0xAC10_0000, 12), // 172.16.0.0/12
    (0xC000_0000, 29), // 192.0.0.0/29
    (0xC000_00AA, 31), // 192.0.0.170/31
    (0xC000_0200, 24), // 192.0.2.0/24
    (0xC0A8_0000, 16), // 192.168.0.0/16
    (0xC612_0000, 15), // 198.18.0.0/15
    (0xC633_6400, 24), // 198.51.100.0/24
    (0xCB00_7100, 24), // 203.0.113.0/24
    (0xF000_0000, 4),  // 240.0.0.0/4
    (0xFFFF_FFFF, 32), // 255.255.255.255/32
];
const V4_SHARED: (u32, u8) = (0x6440_0000, 10); // 100.64.0.0/10
const V4_MULTICAST: (u32, u8) = (0xE000_0000, 4);
const V4_RESERVED: (u32, u8) = (0xF000_0000, 4);

const V6_PRIVATE: [(u128, u8); 10] = [
    (1, 128),                                       // ::1/128
    (0, 128),                                       // ::/128
    (0x0000_0000_0000_0000_0000_FFFF_0000_0000, 96), // ::ffff:0:0/96
    (0x0100_0000_0000_0000_0000_0000_0000_0000, 64), // 100::/64
    (0x2001_0000_0000_0000_0000_0000_0000_0000, 23), // 2001::/23
    (0x2001_0002_0000_0000_0000_0000_0000_0000, 48), // 2001:2::/48
    (0x2001_0DB8_0000_0000_0000_0000_0000_0000, 32), // 2001:db8::/32
    (0x2001_0010_0000_0000_0000_0000_0000_0000, 28), // 2001:10::/28
    (0xFC00_0000_0000_0000_0000_0000_0000_0000, 7),  // fc00::/7
    (0xFE80_0000_0000_0000_0000_0000_0000_0000, 10), // fe80::/10
];
const V6_MULTICAST: (u128, u8) = (0xFF00 << 112, 8);
const V6_RESERVED: [(u128, u8); 15] = [
    (0x0000 << 112, 8),
    (0x0100 << 112, 8),
    (0x0200 << 112, 7),
    (0x0400 << 112, 6),
    (0x0800 << 112, 5),
    (0x1000 << 112, 4),
    (0x4000 << 112, 3),
    (0x6000 << 112, 3),
    (0x8000 << 112, 3),
    (0xA000 << 112, 3),
    (0xC000 << 112, 3),
    (0xE000 << 112, 4),
    (0xF000 << 112, 5),
    (0xF800 << 112, 6),
    (0xFE00 << 112, 9),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IpVersion {
    V4,
    V6,
}

/// What kind of address a peer is, from the address alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddressClass {
    pub version: IpVersion,
    pub global: bool,
    pub private: bool,
    pub multicast: bool,
    pub reserved: bool,
}

impl AddressClass {
    pub fn of(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(ip) => Self::of_v4(ip),
            IpAddr::V6(ip) => Self::of_v6(ip),
        }
    }

    fn of_v4(ip: Ipv4Addr) -> Self {
        let bits = u32::from(ip);
        let private = V4_PRIVATE.iter().any(|net| in_v4(bits, *net));
        AddressClass {
            version: IpVersion::V4,
            global: !private && !in_v4(bits, V4_SHARED),
            private,
            multicast: in_v4(bits, V4_MULTICAST),
            reserved: in_v4(bits, V4_RESERVED),
        }
    }

    fn of_v6(ip: Ipv6Addr) -> Self {
        let bits = u128::from(ip);
        let private = V6_PRIVATE.iter().any(|net| in_v6(bits, *net));
        AddressClass {
            version: IpVersion::V6,
            global: !private,
            private,
            multicast: in_v6(bits, V6_MULTICAST),
            reserved: V6_RESERVED.iter().any(|net| in_v6(bits, *net)),
        }
    }

    /// Short label for peers nothing was resolved for.
    pub fn describe(&self) -> &'static str {
        if self.multicast {
            "Multicast address"
        } else if self.private && self.reserved {
            "Reserved address"
        } else if self.private {
            "Local network address"
        } else if self.global {
            "Global IP address"
        } else {
            "Unknown type of address"
        }
    }
}

/// Private and not the unspecified address; what a device can own.
pub fn is_local_assignable(addr: IpAddr) -> bool {
    !addr.is_unspecified() && AddressClass::of(addr).private
}

fn in_v4(bits: u32, (net, prefix): (u32, u8)) -> bool {
    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    bits & mask == net & mask
}

fn in_v6(bits: u128, (net, prefix): (u128, u8)) -> bool {
    let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
    bits & mask == net & mask
}
