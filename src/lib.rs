//! wg-manager - WireGuard server interface manager
//!
//! Keeps a single WireGuard interface alive for the lifetime of the process:
//! creates the link, applies keys and peers from a YAML record, installs the
//! NAT rules that let clients reach the internet, and removes all of it again
//! on shutdown.
//!
//! # Lifecycle
//!
//! 1. Load `/etc/wireguard/wg-manager.yaml`, generating it on first start
//!    (fresh key, port 51820, egress detected from the default route)
//! 2. Create the `wireguard` link, bring it up, give it an address
//! 3. Apply the device configuration through the kernel control plane
//! 4. Add the FORWARD/MASQUERADE rules and enable IPv4 forwarding
//! 5. Wait for SIGINT/SIGTERM, then remove rules and link (best effort)
//!
//! An interface that already exists is reused, which makes restarts and a
//! second concurrent invocation harmless.

pub mod app;
pub mod client;
pub mod config;
pub mod crypto;
pub mod detect;
pub mod device;
pub mod error;
pub mod exec;
pub mod link;
pub mod net;
pub mod routing;
pub mod signal;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{Application, Options};
pub use config::{Config, ConfigStore, Peer};
pub use crypto::Key;
pub use error::{Error, Result};
pub use net::AddressSpec;
