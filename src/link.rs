//! WireGuard link lifecycle
//!
//! Creates the kernel interface, brings it up, gives it an address and
//! removes it again on shutdown. Startup tolerates an interface left behind
//! by another instance; teardown never fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, StepContext};
use crate::net::AddressSpec;

/// Default interface name
pub const DEFAULT_INTERFACE: &str = "wgm0";

/// Default MTU (1500 minus WireGuard's IPv6 overhead)
pub const DEFAULT_MTU: u32 = 1420;

/// Link kind requested from the kernel
pub const WIREGUARD_KIND: &str = "wireguard";

/// Link-management operations, addressed by interface name.
///
/// Implementations report an existing link as [`Error::LinkExists`] and a
/// missing one as [`Error::LinkNotFound`].
#[async_trait]
pub trait LinkManager: Send + Sync {
    async fn create_link(&self, name: &str, kind: &str, mtu: u32) -> Result<()>;

    async fn delete_link(&self, name: &str) -> Result<()>;

    async fn set_link_up(&self, name: &str) -> Result<()>;

    async fn set_link_down(&self, name: &str) -> Result<()>;

    /// Addresses currently assigned to the link
    async fn addresses(&self, name: &str) -> Result<Vec<AddressSpec>>;

    async fn add_address(&self, name: &str, addr: AddressSpec) -> Result<()>;
}

/// Where the interface is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Absent,
    Created,
    Up,
    Addressed,
    Configured,
    Deleted,
}

/// Result of [`Interface::create`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Result of [`Interface::ensure_address`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressOutcome {
    Assigned,
    AlreadyAddressed,
}

/// The managed WireGuard interface
pub struct Interface {
    name: String,
    mtu: u32,
    state: LinkState,
    links: Arc<dyn LinkManager>,
}

impl Interface {
    pub fn new(name: impl Into<String>, mtu: u32, links: Arc<dyn LinkManager>) -> Self {
        Self {
            name: name.into(),
            mtu,
            state: LinkState::Absent,
            links,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Create the link. An existing link means another instance (or an
    /// earlier run) got there first; that is not an error.
    pub async fn create(&mut self) -> Result<CreateOutcome> {
        match self.links.create_link(&self.name, WIREGUARD_KIND, self.mtu).await {
            Ok(()) => {
                info!(interface = %self.name, mtu = self.mtu, "Created wireguard link");
                self.state = LinkState::Created;
                Ok(CreateOutcome::Created)
            }
            Err(e) if e.is_already_exists() => {
                info!(interface = %self.name, "Link already exists, wg-manager already running");
                self.state = LinkState::Created;
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(e).step("add wireguard link"),
        }
    }

    pub async fn bring_up(&mut self) -> Result<()> {
        self.links.set_link_up(&self.name).await?;
        debug!(interface = %self.name, "Link is up");
        self.state = LinkState::Up;
        Ok(())
    }

    /// Assign `addr` unless the link already carries an address. Existing
    /// addresses are never replaced.
    pub async fn ensure_address(&mut self, addr: AddressSpec) -> Result<AddressOutcome> {
        let existing = self.links.addresses(&self.name).await.step("get link addresses")?;
        if let Some(current) = existing.first() {
            info!(interface = %self.name, address = %current, "Link already has address");
            self.state = LinkState::Addressed;
            return Ok(AddressOutcome::AlreadyAddressed);
        }

        self.links
            .add_address(&self.name, addr)
            .await
            .step("add address to link")?;
        info!(interface = %self.name, address = %addr, "Assigned link address");
        self.state = LinkState::Addressed;
        Ok(AddressOutcome::Assigned)
    }

    /// Record that the WireGuard device configuration has been applied
    pub fn mark_configured(&mut self) {
        self.state = LinkState::Configured;
    }

    /// Set the link down and delete it. Best effort: failures are logged.
    ///
    /// Each of the two calls gets `step_timeout`, so a set-down that never
    /// returns still leaves the delete its full budget.
    pub async fn tear_down(&mut self, step_timeout: Duration) {
        match tokio::time::timeout(step_timeout, self.links.set_link_down(&self.name)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_not_found() => {
                debug!(interface = %self.name, "Link already gone, skipping set down");
            }
            Ok(Err(e)) => warn!(interface = %self.name, "set link down: {}", e),
            Err(_) => warn!(interface = %self.name, "set link down: {}", Error::Timeout(step_timeout)),
        }

        match tokio::time::timeout(step_timeout, self.links.delete_link(&self.name)).await {
            Ok(Ok(())) => {
                info!(interface = %self.name, "Deleted wireguard link");
                self.state = LinkState::Deleted;
            }
            Ok(Err(e)) if e.is_not_found() => {
                info!(interface = %self.name, "Link already deleted");
                self.state = LinkState::Deleted;
            }
            Ok(Err(e)) => warn!(interface = %self.name, "delete wireguard link: {}", e),
            Err(_) => warn!(
                interface = %self.name,
                "delete wireguard link: {}",
                Error::Timeout(step_timeout)
            ),
        }
    }
}

/// [`LinkManager`] backed by rtnetlink
pub struct NetlinkManager {
    handle: rtnetlink::Handle,
}

impl NetlinkManager {
    /// Open a netlink connection. Must be called inside a tokio runtime; the
    /// connection task ends when the manager is dropped.
    pub fn new() -> Result<Self> {
        let (connection, handle, _) =
            rtnetlink::new_connection().map_err(|e| Error::Netlink(format!("open rtnl context: {}", e)))?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    async fn index(&self, name: &str) -> Result<u32> {
        let mut links = self.handle.link().get().match_name(name.to_string()).execute();
        match links.try_next().await {
            Ok(Some(link)) => Ok(link.header.index),
            Ok(None) => Err(Error::LinkNotFound(name.to_string())),
            Err(e) => Err(netlink_error(name, e)),
        }
    }
}

/// Map kernel errno values onto the errors callers branch on
fn netlink_error(name: &str, err: rtnetlink::Error) -> Error {
    if let rtnetlink::Error::NetlinkError(msg) = &err {
        match msg.code.map(|code| -code.get()) {
            Some(libc::EEXIST) => return Error::LinkExists(name.to_string()),
            Some(libc::ENODEV) => return Error::LinkNotFound(name.to_string()),
            _ => {}
        }
    }
    Error::Netlink(format!("{}: {}", name, err))
}

#[async_trait]
impl LinkManager for NetlinkManager {
    async fn create_link(&self, name: &str, kind: &str, mtu: u32) -> Result<()> {
        if kind != WIREGUARD_KIND {
            return Err(Error::Netlink(format!("unsupported link kind {}", kind)));
        }
        self.handle
            .link()
            .add()
            .wireguard(name.to_string())
            .execute()
            .await
            .map_err(|e| netlink_error(name, e))?;

        let index = self.index(name).await?;
        self.handle
            .link()
            .set(index)
            .mtu(mtu)
            .execute()
            .await
            .map_err(|e| netlink_error(name, e))
    }

    async fn delete_link(&self, name: &str) -> Result<()> {
        let index = self.index(name).await?;
        self.handle
            .link()
            .del(index)
            .execute()
            .await
            .map_err(|e| netlink_error(name, e))
    }

    async fn set_link_up(&self, name: &str) -> Result<()> {
        let index = self.index(name).await?;
        self.handle
            .link()
            .set(index)
            .up()
            .execute()
            .await
            .map_err(|e| netlink_error(name, e))
    }

    async fn set_link_down(&self, name: &str) -> Result<()> {
        let index = self.index(name).await?;
        self.handle
            .link()
            .set(index)
            .down()
            .execute()
            .await
            .map_err(|e| netlink_error(name, e))
    }

    async fn addresses(&self, name: &str) -> Result<Vec<AddressSpec>> {
        use netlink_packet_route::address::AddressAttribute;

        let index = self.index(name).await?;
        let messages: Vec<_> = self
            .handle
            .address()
            .get()
            .set_link_index_filter(index)
            .execute()
            .try_collect()
            .await
            .map_err(|e| netlink_error(name, e))?;

        let mut addrs = Vec::new();
        for msg in messages {
            let prefix = msg.header.prefix_len;
            for attr in &msg.attributes {
                if let AddressAttribute::Address(ip) = attr {
                    addrs.push(AddressSpec::new(*ip, prefix)?);
                }
            }
        }
        Ok(addrs)
    }

    async fn add_address(&self, name: &str, addr: AddressSpec) -> Result<()> {
        let index = self.index(name).await?;
        self.handle
            .address()
            .add(index, addr.ip(), addr.prefix_len())
            .execute()
            .await
            .map_err(|e| netlink_error(name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeLinks;

    const STEP: Duration = Duration::from_secs(1);

    fn addr(s: &str) -> AddressSpec {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_create_twice_reports_already_exists() {
        let links = Arc::new(FakeLinks::new());
        let mut first = Interface::new("wgm0", DEFAULT_MTU, links.clone());
        assert_eq!(first.create().await.unwrap(), CreateOutcome::Created);

        let mut second = Interface::new("wgm0", DEFAULT_MTU, links.clone());
        assert_eq!(second.create().await.unwrap(), CreateOutcome::AlreadyExists);
        assert_eq!(second.state(), LinkState::Created);
        assert_eq!(links.mtu("wgm0"), Some(DEFAULT_MTU));
    }

    #[tokio::test]
    async fn test_create_failure_is_fatal() {
        let links = Arc::new(FakeLinks::new().failing("create_link"));
        let mut iface = Interface::new("wgm0", DEFAULT_MTU, links);
        let err = iface.create().await.unwrap_err();
        assert!(err.to_string().starts_with("add wireguard link:"));
        assert_eq!(iface.state(), LinkState::Absent);
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let links = Arc::new(FakeLinks::new());
        let mut iface = Interface::new("wgm0", 1400, links.clone());
        assert_eq!(iface.state(), LinkState::Absent);

        iface.create().await.unwrap();
        iface.bring_up().await.unwrap();
        assert_eq!(iface.state(), LinkState::Up);
        assert!(links.is_up("wgm0"));

        iface.ensure_address(addr("10.5.5.1/24")).await.unwrap();
        assert_eq!(iface.state(), LinkState::Addressed);
        iface.mark_configured();
        assert_eq!(iface.state(), LinkState::Configured);

        iface.tear_down(STEP).await;
        assert_eq!(iface.state(), LinkState::Deleted);
        assert!(!links.exists("wgm0"));
    }

    #[tokio::test]
    async fn test_ensure_address_never_overwrites() {
        let links = Arc::new(FakeLinks::new());
        let mut iface = Interface::new("wgm0", DEFAULT_MTU, links.clone());
        iface.create().await.unwrap();

        assert_eq!(
            iface.ensure_address(addr("10.9.9.1/24")).await.unwrap(),
            AddressOutcome::Assigned
        );
        assert_eq!(
            iface.ensure_address(addr("10.5.5.1/24")).await.unwrap(),
            AddressOutcome::AlreadyAddressed
        );
        assert_eq!(links.addresses_of("wgm0"), vec![addr("10.9.9.1/24")]);
    }

    #[tokio::test]
    async fn test_bring_up_failure_is_fatal() {
        let links = Arc::new(FakeLinks::new().failing("set_link_up"));
        let mut iface = Interface::new("wgm0", DEFAULT_MTU, links);
        iface.create().await.unwrap();
        let err = iface.bring_up().await.unwrap_err();
        assert!(matches!(err, Error::Netlink(_)));
        assert_eq!(iface.state(), LinkState::Created);
    }

    #[tokio::test]
    async fn test_tear_down_tolerates_missing_link() {
        let links = Arc::new(FakeLinks::new());
        let mut iface = Interface::new("wgm0", DEFAULT_MTU, links.clone());
        iface.tear_down(STEP).await;
        assert_eq!(iface.state(), LinkState::Deleted);
        assert_eq!(links.calls(), vec!["set_link_down wgm0", "delete_link wgm0"]);
    }

    #[tokio::test]
    async fn test_tear_down_continues_after_set_down_failure() {
        let links = Arc::new(FakeLinks::new().failing("set_link_down"));
        let mut iface = Interface::new("wgm0", DEFAULT_MTU, links.clone());
        iface.create().await.unwrap();
        iface.tear_down(STEP).await;
        assert!(!links.exists("wgm0"));
    }

    #[tokio::test]
    async fn test_tear_down_swallows_delete_failure() {
        let links = Arc::new(FakeLinks::new().failing("delete_link"));
        let mut iface = Interface::new("wgm0", DEFAULT_MTU, links.clone());
        iface.create().await.unwrap();
        iface.tear_down(STEP).await;
        assert_eq!(iface.state(), LinkState::Created);
        assert!(links.exists("wgm0"));
    }

    #[tokio::test]
    async fn test_tear_down_deletes_after_set_down_hangs() {
        let links = Arc::new(FakeLinks::new().hanging("set_link_down"));
        let mut iface = Interface::new("wgm0", DEFAULT_MTU, links.clone());
        iface.create().await.unwrap();
        iface.tear_down(Duration::from_millis(50)).await;
        assert_eq!(iface.state(), LinkState::Deleted);
        assert!(!links.exists("wgm0"));
        assert_eq!(
            links.calls(),
            vec!["create_link wgm0", "set_link_down wgm0", "delete_link wgm0"]
        );
    }
}
