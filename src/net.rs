//! CIDR addresses as they appear in the configuration file

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An interface address with its prefix length, e.g. `10.5.5.1/24`.
///
/// Host bits are kept as written: this is an address on a network, not the
/// network itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressSpec(IpNet);

impl AddressSpec {
    pub fn new(ip: IpAddr, prefix: u8) -> Result<Self> {
        IpNet::new(ip, prefix)
            .map(Self)
            .map_err(|_| Error::InvalidAddress(format!("{}/{}: prefix out of range", ip, prefix)))
    }

    pub fn ip(&self) -> IpAddr {
        self.0.addr()
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    pub fn network(&self) -> IpNet {
        self.0.trunc()
    }
}

impl FromStr for AddressSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<IpNet>()
            .map(Self)
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", s, e)))
    }
}

impl TryFrom<String> for AddressSpec {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AddressSpec> for String {
    fn from(addr: AddressSpec) -> String {
        addr.to_string()
    }
}

impl fmt::Display for AddressSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
