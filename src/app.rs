//! The manager itself: bring the interface up, wait for shutdown, tear it
//! down again.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument, Span};

use crate::config::{Config, ConfigStore, DEFAULT_CONFIG_PATH};
use crate::detect::detect_external_interface;
use crate::device::{DeviceConfigurator, DeviceControl};
use crate::error::{Error, Result, StepContext};
use crate::exec::CommandRunner;
use crate::link::{Interface, LinkManager, DEFAULT_INTERFACE, DEFAULT_MTU};
use crate::routing::RoutingManager;

/// Time budget for each teardown step
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime settings taken from the command line
#[derive(Debug, Clone)]
pub struct Options {
    pub config_path: PathBuf,
    pub interface: String,
    pub mtu: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            interface: DEFAULT_INTERFACE.to_string(),
            mtu: DEFAULT_MTU,
        }
    }
}

/// Owns the interface, its configuration and its routing for one run
pub struct Application {
    store: ConfigStore,
    interface: Interface,
    device: DeviceConfigurator,
    routing: RoutingManager,
    runner: Arc<dyn CommandRunner>,
    teardown_timeout: Duration,
    span: Span,
}

impl Application {
    pub fn new(
        options: Options,
        links: Arc<dyn LinkManager>,
        control: Arc<dyn DeviceControl>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let span = info_span!("wg-manager", interface = %options.interface);
        Self {
            store: ConfigStore::new(options.config_path, runner.clone()),
            interface: Interface::new(options.interface, options.mtu, links),
            device: DeviceConfigurator::new(control),
            routing: RoutingManager::new(runner.clone()),
            runner,
            teardown_timeout: TEARDOWN_TIMEOUT,
            span,
        }
    }

    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// A failure before the wait point is returned as is, with no cleanup.
    /// Once the device is live, teardown always runs and never fails, so a
    /// cancelled run returns `Ok(())`.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let span = self.span.clone();
        self.run_inner(shutdown).instrument(span).await
    }

    async fn run_inner(&mut self, shutdown: CancellationToken) -> Result<()> {
        info!("wg-manager started");

        let config = self.store.load().await.step("load configuration")?;
        let nat_interface = self.nat_interface(&config).await?;

        self.interface.create().await.step("create link")?;
        self.interface.bring_up().await.step("set link up")?;
        self.interface
            .ensure_address(config.interface_address())
            .await
            .step("configure link address")?;

        self.device
            .apply(self.interface.name(), &config)
            .step("configure device")?;
        self.interface.mark_configured();

        self.routing
            .configure(self.interface.name(), &nat_interface)
            .await
            .step("configure routing")?;

        info!("wg-manager running on {}", self.interface.name());
        shutdown.cancelled().await;
        info!("wg-manager stopped");

        self.teardown(&nat_interface).await;
        Ok(())
    }

    /// NAT egress from the record, or detected now if the record has none
    async fn nat_interface(&self, config: &Config) -> Result<String> {
        if let Some(name) = config.nat_interface() {
            return Ok(name.to_string());
        }
        let ext = detect_external_interface(self.runner.as_ref())
            .await
            .step("detect NAT interface")?;
        info!("No natInterface configured, using detected {}", ext.name);
        Ok(ext.name)
    }

    /// Remove routing, then the link. Each step gets its own time budget so
    /// a stuck step cannot keep the next one from running.
    async fn teardown(&mut self, nat_interface: &str) {
        let wg_interface = self.interface.name().to_string();

        if tokio::time::timeout(
            self.teardown_timeout,
            self.routing.deconfigure(&wg_interface, nat_interface),
        )
        .await
        .is_err()
        {
            warn!("deconfigure routing: {}", Error::Timeout(self.teardown_timeout));
        }

        self.interface.tear_down(self.teardown_timeout).await;
    }
}
