use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

use crate::error::AddressParseError;

/// A predicate over request source addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressMatcher {
    /// CIDR network.  Stored truncated to its network address.
    Network(IpNet),
    /// Arbitrary address and bitmask, not necessarily a contiguous prefix.
    /// `host` is kept as written: bits outside `mask` make it unmatchable.
    Mask { host: IpAddr, mask: IpAddr },
}

impl AddressMatcher {
    /// Whether `ip` belongs to this matcher.  Addresses of the other family
    /// never match.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match self {
            AddressMatcher::Network(net) => net.contains(&ip),
            AddressMatcher::Mask { host, mask } => match (host, mask, ip) {
                (IpAddr::V4(h), IpAddr::V4(m), IpAddr::V4(a)) => {
                    masked_eq(&h.octets(), &m.octets(), &a.octets())
                }
                (IpAddr::V6(h), IpAddr::V6(m), IpAddr::V6(a)) => {
                    masked_eq(&h.octets(), &m.octets(), &a.octets())
                }
                _ => false,
            },
        }
    }

    /// Sort key for precedence: larger is more specific.
    ///
    /// Mask-form matchers have no meaningful prefix length and all report 0,
    /// so among themselves (and against `/0` networks) they keep load order.
    pub fn specificity(&self) -> u8 {
        match self {
            AddressMatcher::Network(net) => net.prefix_len(),
            AddressMatcher::Mask { .. } => 0,
        }
    }
}

fn masked_eq(host: &[u8], mask: &[u8], addr: &[u8]) -> bool {
    host.iter()
        .zip(mask)
        .zip(addr)
        .all(|((h, m), a)| *h == a & m)
}

impl FromStr for AddressMatcher {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(net) = s.parse::<IpNet>() {
            return Ok(AddressMatcher::Network(net.trunc()));
        }

        let err = |reason: &str| AddressParseError {
            pattern: s.to_string(),
            reason: reason.to_string(),
        };

        let (host, mask) = s.split_once('/').ok_or_else(|| err("missing '/'"))?;
        let host: IpAddr = host.parse().map_err(|_| err("invalid address"))?;
        let mask: IpAddr = mask.parse().map_err(|_| err("invalid mask"))?;
        if host.is_ipv4() != mask.is_ipv4() {
            return Err(err("address and mask are of different families"));
        }
        Ok(AddressMatcher::Mask { host, mask })
    }
}

impl fmt::Display for AddressMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressMatcher::Network(net) => write!(f, "{net}"),
            AddressMatcher::Mask { host, mask } => write!(f, "{host}/{mask}"),
        }
    }
}
