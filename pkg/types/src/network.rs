use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::labels::Labels;

/// An IPv4 CIDR block, e.g. `172.33.4.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subnet {
    /// Network address as a u32, host bits cleared.
    base: u32,
    prefix_len: u8,
}

impl Subnet {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> anyhow::Result<Self> {
        if prefix_len > 32 {
            return Err(anyhow::anyhow!("Invalid prefix length: {}", prefix_len));
        }
        let mask = Self::mask(prefix_len);
        Ok(Self {
            base: u32::from(addr) & mask,
            prefix_len,
        })
    }

    /// The /24 block containing `addr`.
    pub fn block24(addr: Ipv4Addr) -> Self {
        Self {
            base: u32::from(addr) & 0xFFFF_FF00,
            prefix_len: 24,
        }
    }

    fn mask(prefix_len: u8) -> u32 {
        u32::MAX.checked_shl(32 - prefix_len as u32).unwrap_or(0)
    }

    pub fn network_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base)
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Number of addresses covered by the block.
    pub fn size(&self) -> u64 {
        1u64 << (32 - self.prefix_len as u32)
    }

    /// Last address covered by the block, as a u32.
    pub fn last_u32(&self) -> u32 {
        (self.base as u64 + self.size() - 1) as u32
    }

    pub fn first_u32(&self) -> u32 {
        self.base
    }

    /// First usable address, used as the gateway.
    pub fn gateway(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base.saturating_add(1))
    }

    pub fn overlaps(&self, other: &Subnet) -> bool {
        self.first_u32() <= other.last_u32() && other.first_u32() <= self.last_u32()
    }
}

impl FromStr for Subnet {
    type Err = anyhow::Error;

    fn from_str(cidr: &str) -> Result<Self, Self::Err> {
        let (ip_str, prefix_str) = cidr
            .trim()
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("Invalid CIDR format: {}", cidr))?;
        let prefix_len: u8 = prefix_str
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid prefix length: {}", prefix_str))?;
        let addr: Ipv4Addr = ip_str
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid IP: {}", ip_str))?;
        Self::new(addr, prefix_len)
    }
}

impl std::fmt::Display for Subnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network_address(), self.prefix_len)
    }
}

impl Serialize for Subnet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Subnet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A network as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    /// First configured IPAM subnet, if the backend reported a parseable one.
    pub subnet: Option<Subnet>,
    #[serde(default)]
    pub labels: Labels,
}

/// A network the hub created or recovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkHandle {
    pub id: String,
    pub name: String,
    pub subnet: Option<Subnet>,
}

impl From<NetworkInfo> for NetworkHandle {
    fn from(info: NetworkInfo) -> Self {
        Self {
            id: info.id,
            name: info.name,
            subnet: info.subnet,
        }
    }
}
