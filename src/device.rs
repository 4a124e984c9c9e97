//! WireGuard device configuration
//!
//! Turns the loaded [`Config`] into the key/port/peer set the kernel expects
//! and pushes it in one call.

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::crypto::Key;
use crate::error::{Error, Result};
use crate::net::AddressSpec;

/// One peer as the control plane sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePeer {
    pub public_key: Key,
    pub allowed_ips: Vec<AddressSpec>,
}

/// Device-level WireGuard configuration. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    pub private_key: Option<Key>,
    pub listen_port: Option<u16>,
    pub firewall_mark: Option<u32>,
    pub peers: Vec<DevicePeer>,
}

impl DeviceConfig {
    pub fn from_config(config: &Config) -> Self {
        let mut device = DeviceConfig::default();
        if !config.private_key.is_zero() {
            device.private_key = Some(config.private_key);
        }
        if config.port != 0 {
            device.listen_port = Some(config.port);
            device.firewall_mark = Some(u32::from(config.port));
        }
        device.peers = config
            .peers
            .iter()
            .map(|peer| DevicePeer {
                public_key: peer.private_key.public_key(),
                allowed_ips: vec![peer.address],
            })
            .collect();
        device
    }
}

/// The WireGuard control plane
pub trait DeviceControl: Send + Sync {
    /// Apply `config` to interface `iface` atomically
    fn apply(&self, iface: &str, config: &DeviceConfig) -> Result<()>;
}

/// Applies configuration to a kernel WireGuard device over generic netlink
#[derive(Debug, Clone, Default)]
pub struct KernelDevice;

impl DeviceControl for KernelDevice {
    fn apply(&self, iface: &str, config: &DeviceConfig) -> Result<()> {
        use wireguard_uapi::{set, WgSocket};

        let mut socket = WgSocket::connect().map_err(|e| Error::WireGuard(format!("create client: {}", e)))?;

        let private_key = config.private_key.map(|k| *k.as_bytes());
        let peer_keys: Vec<[u8; 32]> = config.peers.iter().map(|p| *p.public_key.as_bytes()).collect();
        let peer_ips: Vec<Vec<(std::net::IpAddr, u8)>> = config
            .peers
            .iter()
            .map(|p| p.allowed_ips.iter().map(|a| (a.ip(), a.prefix_len())).collect())
            .collect();

        let mut device = set::Device::from_ifname(iface);
        if let Some(key) = &private_key {
            device = device.private_key(key);
        }
        if let Some(port) = config.listen_port {
            device = device.listen_port(port);
        }
        if let Some(mark) = config.firewall_mark {
            device = device.fwmark(mark);
        }
        let peers = peer_keys
            .iter()
            .zip(&peer_ips)
            .map(|(key, ips)| {
                let allowed = ips
                    .iter()
                    .map(|(ip, prefix)| {
                        let mut allowed = set::AllowedIp::from_ipaddr(ip);
                        allowed.cidr_mask = Some(*prefix);
                        allowed
                    })
                    .collect();
                set::Peer::from_public_key(key).allowed_ips(allowed)
            })
            .collect();
        device = device.peers(peers);

        socket
            .set_device(device)
            .map_err(|e| Error::WireGuard(format!("{}: {}", iface, e)))
    }
}

/// Applies the loaded configuration to the live interface
pub struct DeviceConfigurator {
    control: Arc<dyn DeviceControl>,
}

impl DeviceConfigurator {
    pub fn new(control: Arc<dyn DeviceControl>) -> Self {
        Self { control }
    }

    pub fn apply(&self, iface: &str, config: &Config) -> Result<()> {
        let device = DeviceConfig::from_config(config);
        self.control.apply(iface, &device)?;
        info!(
            interface = %iface,
            peers = device.peers.len(),
            listen_port = ?device.listen_port,
            "Device configured"
        );
        Ok(())
    }
}
