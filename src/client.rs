//! Client configuration files
//!
//! Renders the `wg-quick` style configuration a peer needs to connect to
//! this server.

use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::config::{Config, Peer};
use crate::crypto::Key;
use crate::error::Result;

/// Keepalive that keeps NAT mappings on the client side open
const PERSISTENT_KEEPALIVE_SECS: u16 = 25;

/// Everything needed to render one client's configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub peer: Peer,
    /// Server endpoint, `ip:port` or `hostname:port`
    pub endpoint: Option<String>,
    /// Server public key
    pub public_key: Key,
}

impl ClientConfig {
    /// Look up the named peer in `config`
    pub fn for_peer(config: &Config, name: &str) -> Result<Self> {
        let peer = config.find_peer(name)?;
        Ok(Self {
            peer: peer.clone(),
            endpoint: config.endpoint.clone(),
            public_key: config.private_key.public_key(),
        })
    }
}

/// Names accepted by `client config`, for shell completion. Unnamed peers
/// are skipped and an unreadable record yields no names.
pub fn peer_names(config_path: &Path) -> Vec<String> {
    match Config::read(config_path) {
        Ok(config) => config.peers.into_iter().filter_map(|peer| peer.name).collect(),
        Err(e) => {
            debug!("No peer names to complete: {}", e);
            Vec::new()
        }
    }
}

impl fmt::Display for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[Interface]")?;
        writeln!(f, "PrivateKey = {}", self.peer.private_key)?;
        writeln!(f, "Address = {}", self.peer.address)?;
        writeln!(f)?;
        writeln!(f, "[Peer]")?;
        writeln!(f, "PublicKey = {}", self.public_key)?;
        if let Some(endpoint) = &self.endpoint {
            writeln!(f, "Endpoint = {}", endpoint)?;
        }
        writeln!(f, "AllowedIPs = 0.0.0.0/0")?;
        writeln!(f, "PersistentKeepalive = {}", PERSISTENT_KEEPALIVE_SECS)
    }
}
