//! Subnet matching for game-server address advertisement.
//!
//! Parses `"a.b.c.d/bits"` CIDR strings or bare hosts (widened to /32 for
//! IPv4 and /128 for IPv6). Matching is a prefix comparison; the ordered
//! first-match policy lives with the caller.

use std::net::IpAddr;

/// An address + prefix length pair used for advertised-IP selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    addr: IpAddr,
    prefix: u8,
}

impl Subnet {
    /// Parse a subnet string.
    ///
    /// Accepted formats:
    /// - `"a.b.c.d/bits"` → CIDR prefix length (0–32)
    /// - `"addr6/bits"` → IPv6 CIDR (0–128)
    /// - bare address → exact host (/32 or /128)
    ///
    /// Returns `None` on invalid input.
    pub fn parse(s: &str) -> Option<Subnet> {
        if let Some((addr_part, bits_part)) = s.split_once('/') {
            let addr: IpAddr = addr_part.parse().ok()?;
            let bits: u8 = bits_part.parse().ok()?;
            let max = if addr.is_ipv4() { 32 } else { 128 };
            if bits > max {
                return None;
            }
            return Some(Subnet { addr, prefix: bits });
        }
        let addr: IpAddr = s.parse().ok()?;
        let prefix = if addr.is_ipv4() { 32 } else { 128 };
        Some(Subnet { addr, prefix })
    }

    /// Returns true if `ip` falls within this subnet. Families never match
    /// each other.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                if self.prefix == 0 {
                    return true;
                }
                let mask = u32::MAX << (32 - u32::from(self.prefix));
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                if self.prefix == 0 {
                    return true;
                }
                let mask = u128::MAX << (128 - u32::from(self.prefix));
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }
}

impl std::fmt::Display for Subnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}
