//! Default external interface detection
//!
//! Finds the interface carrying the default route and its IPv4 address by
//! reading `ip route show` and `ip addr show <iface>`. The first matching
//! line wins in both cases.

use std::net::Ipv4Addr;

use tracing::debug;

use crate::error::{Error, Result};
use crate::exec::{run_checked, CommandRunner};

/// The host's internet-facing interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalInterface {
    pub name: String,
    pub address: Ipv4Addr,
}

/// Interface named by the first `default ... dev <iface>` route.
///
/// Default routes without a `dev` token (e.g. blackhole) are skipped.
pub fn parse_default_interface(routes: &str) -> Result<String> {
    for line in routes.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.first() != Some(&"default") {
            continue;
        }
        if let Some(pair) = fields.windows(2).find(|pair| pair[0] == "dev") {
            return Ok(pair[1].to_string());
        }
    }
    Err(Error::Detection("could not detect default external interface".into()))
}

/// Address from the first `inet a.b.c.d/n ...` line
pub fn parse_inet_address(addrs: &str) -> Result<Ipv4Addr> {
    for line in addrs.lines() {
        let line = line.trim();
        if !line.starts_with("inet ") {
            continue;
        }
        let Some(cidr) = line.split_whitespace().nth(1) else {
            continue;
        };
        let ip = cidr.split('/').next().unwrap_or(cidr);
        return ip
            .parse()
            .map_err(|e| Error::Detection(format!("invalid address {:?}: {}", ip, e)));
    }
    Err(Error::Detection("could not detect external IP address".into()))
}

/// Run the route and address queries and parse their output
pub async fn detect_external_interface(runner: &dyn CommandRunner) -> Result<ExternalInterface> {
    let routes = run_checked(runner, "ip", &["route", "show"])
        .await
        .map_err(|e| Error::Detection(e.to_string()))?;
    let name = parse_default_interface(&routes)?;
    debug!("Default route goes through {}", name);

    let addrs = run_checked(runner, "ip", &["addr", "show", &name])
        .await
        .map_err(|e| Error::Detection(e.to_string()))?;
    let address = parse_inet_address(&addrs)?;

    Ok(ExternalInterface { name, address })
}
