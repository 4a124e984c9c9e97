//! wg-manager Configuration
//!
//! The persisted record lives in a single YAML file. On first start the file
//! is synthesized: fresh server key, default port and address, and NAT
//! settings detected from the host's default route.

use std::fs::OpenOptions;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crypto::Key;
use crate::detect::detect_external_interface;
use crate::error::{Error, Result, StepContext};
use crate::exec::CommandRunner;
use crate::net::AddressSpec;

/// Where the configuration is kept
pub const DEFAULT_CONFIG_PATH: &str = "/etc/wireguard/wg-manager.yaml";

/// Default WireGuard listen port
pub const DEFAULT_PORT: u16 = 51820;

/// Server tunnel address used when the record has none
pub const DEFAULT_ADDRESS: &str = "10.5.5.1/24";

/// Owner read/write only
const CONFIG_FILE_MODE: u32 = 0o600;

/// A client allowed to connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    /// Optional friendly name, used to look the peer up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The peer's own private key; its public key is derived from it
    pub private_key: Key,

    /// The peer's tunnel address, also its allowed-IPs range
    pub address: AddressSpec,
}

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Server private key
    #[serde(default)]
    pub private_key: Key,

    /// UDP listen port
    #[serde(default)]
    pub port: u16,

    /// Server tunnel address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<AddressSpec>,

    /// Egress interface for NAT masquerading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_interface: Option<String>,

    /// Configured peers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<Peer>,

    /// Address clients connect to (host:port)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn default_address() -> AddressSpec {
    DEFAULT_ADDRESS.parse().expect("default address is valid CIDR")
}

impl Config {
    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file that must exist
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(Error::from).step("read config file")?;
        Self::from_yaml(&content).step("unmarshal config")
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write the configuration, readable by the owner only
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = self.to_yaml()?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(CONFIG_FILE_MODE);
        }
        let mut file = options.open(path)?;
        // mode() only applies on creation
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(CONFIG_FILE_MODE))?;
        }
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(endpoint) = &self.endpoint {
            let valid = endpoint
                .rsplit_once(':')
                .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(Error::Config(format!("endpoint {:?} is not host:port", endpoint)));
            }
        }
        Ok(())
    }

    /// Sample configuration with fresh keys and one client
    pub fn sample() -> Self {
        Self {
            private_key: Key::generate(),
            port: DEFAULT_PORT,
            address: Some(default_address()),
            nat_interface: Some("eth0".into()),
            peers: vec![Peer {
                name: Some("client".into()),
                private_key: Key::generate(),
                address: "10.5.5.2/32".parse().expect("sample peer address is valid CIDR"),
            }],
            endpoint: None,
        }
    }

    /// Server tunnel address, or the default one
    pub fn interface_address(&self) -> AddressSpec {
        self.address.unwrap_or_else(default_address)
    }

    /// NAT interface, treating an empty name as unset
    pub fn nat_interface(&self) -> Option<&str> {
        self.nat_interface.as_deref().filter(|name| !name.is_empty())
    }

    /// First peer with the given name
    pub fn find_peer(&self, name: &str) -> Result<&Peer> {
        self.peers
            .iter()
            .find(|peer| peer.name.as_deref() == Some(name))
            .ok_or_else(|| Error::PeerNotFound(name.to_string()))
    }
}

/// Loads the configuration, creating it on first start
pub struct ConfigStore {
    path: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            path: path.into(),
            runner,
        }
    }

    /// Read the persisted record, or generate and persist a default one if
    /// the file does not exist. Any other error is fatal.
    pub async fn load(&self) -> Result<Config> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let config = Config::from_yaml(&content).step("unmarshal config")?;
                info!("Loaded configuration from {:?} ({} peers)", self.path, config.peers.len());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.generate().await,
            Err(e) => Err(Error::from(e).step("read config file")),
        }
    }

    async fn generate(&self) -> Result<Config> {
        info!(path = ?self.path, "Generating default configuration");

        let mut config = Config {
            private_key: Key::generate(),
            port: DEFAULT_PORT,
            address: Some(default_address()),
            ..Config::default()
        };
        info!(public_key = %config.private_key.public_key(), "Generated new key");

        if config.nat_interface().is_none() {
            let ext = detect_external_interface(self.runner.as_ref())
                .await
                .step("detect default external interface")?;
            info!(interface = %ext.name, ip = %ext.address, "Detected default external interface");
            config.nat_interface = Some(ext.name);
            config.endpoint = Some(SocketAddr::new(ext.address.into(), config.port).to_string());
        }

        config.save(&self.path).step("write default config")?;
        Ok(config)
    }
}
