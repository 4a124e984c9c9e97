//! NAT routing for the tunnel
//!
//! Lets tunnel traffic reach the internet: forward packets arriving on the
//! WireGuard interface and masquerade them behind the egress interface.
//!
//! The rules are appended, not checked first, so calling
//! [`RoutingManager::configure`] twice duplicates them.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Result, StepContext};
use crate::exec::{run_checked, CommandRunner};

/// Installs and removes the forward and masquerade rules
pub struct RoutingManager {
    runner: Arc<dyn CommandRunner>,
}

impl RoutingManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn iptables(&self, args: &[&str]) -> Result<()> {
        run_checked(self.runner.as_ref(), "iptables", args).await.map(|_| ())
    }

    async fn sysctl(&self, args: &[&str]) -> Result<()> {
        run_checked(self.runner.as_ref(), "sysctl", args).await.map(|_| ())
    }

    /// Append the forward-accept and masquerade rules, then enable IPv4
    /// forwarding. Stops at the first failure; rules already added stay.
    pub async fn configure(&self, wg_interface: &str, nat_interface: &str) -> Result<()> {
        self.iptables(&["-A", "FORWARD", "-i", wg_interface, "-j", "ACCEPT"])
            .await
            .step("configure iptables FORWARD")?;
        self.iptables(&["-t", "nat", "-A", "POSTROUTING", "-o", nat_interface, "-j", "MASQUERADE"])
            .await
            .step("configure iptables POSTROUTING")?;
        self.sysctl(&["-q", "-w", "net.ipv4.ip_forward=1"])
            .await
            .step("configure sysctl net.ipv4.ip_forward")?;

        info!("Routing configured: {} -> {} (NAT)", wg_interface, nat_interface);
        Ok(())
    }

    /// Delete both rules. Best effort: each failure is a warning and the
    /// next rule is still removed. Returns whether both removals succeeded.
    pub async fn deconfigure(&self, wg_interface: &str, nat_interface: &str) -> bool {
        let mut clean = true;

        if let Err(e) = self
            .iptables(&["-D", "FORWARD", "-i", wg_interface, "-j", "ACCEPT"])
            .await
            .step("deconfigure iptables FORWARD")
        {
            warn!("{}", e);
            clean = false;
        }
        if let Err(e) = self
            .iptables(&["-t", "nat", "-D", "POSTROUTING", "-o", nat_interface, "-j", "MASQUERADE"])
            .await
            .step("deconfigure iptables POSTROUTING")
        {
            warn!("{}", e);
            clean = false;
        }

        if clean {
            info!("Routing deconfigured");
        }
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    #[tokio::test]
    async fn test_configure_runs_rules_in_order() {
        let runner = Arc::new(ScriptedRunner::new());
        let routing = RoutingManager::new(runner.clone());

        routing.configure("wgm0", "eth0").await.unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "iptables -A FORWARD -i wgm0 -j ACCEPT",
                "iptables -t nat -A POSTROUTING -o eth0 -j MASQUERADE",
                "sysctl -q -w net.ipv4.ip_forward=1",
            ]
        );
    }

    #[tokio::test]
    async fn test_configure_stops_at_failed_step() {
        let runner = Arc::new(ScriptedRunner::new().fail("iptables -t nat -A POSTROUTING", 2, "No chain/target/match by that name."));
        let routing = RoutingManager::new(runner.clone());

        let err = routing.configure("wgm0", "eth0").await.unwrap_err();
        assert!(err.to_string().starts_with("configure iptables POSTROUTING: "));
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_configure_reports_sysctl_failure() {
        let runner = Arc::new(ScriptedRunner::new().fail("sysctl", 255, "permission denied"));
        let err = RoutingManager::new(runner).configure("wgm0", "eth0").await.unwrap_err();
        assert!(err.to_string().starts_with("configure sysctl net.ipv4.ip_forward: "));
    }

    #[tokio::test]
    async fn test_deconfigure_removes_both_rules() {
        let runner = Arc::new(ScriptedRunner::new());
        let routing = RoutingManager::new(runner.clone());

        assert!(routing.deconfigure("wgm0", "eth0").await);
        assert_eq!(
            runner.calls(),
            vec![
                "iptables -D FORWARD -i wgm0 -j ACCEPT",
                "iptables -t nat -D POSTROUTING -o eth0 -j MASQUERADE",
            ]
        );
    }

    #[tokio::test]
    async fn test_deconfigure_continues_when_rule_missing() {
        let runner = Arc::new(ScriptedRunner::new().fail(
            "iptables -D FORWARD",
            1,
            "iptables: Bad rule (does a matching rule exist in that chain?).",
        ));
        let routing = RoutingManager::new(runner.clone());

        assert!(!routing.deconfigure("wgm0", "eth0").await);
        assert_eq!(runner.calls().len(), 2);
        assert_eq!(runner.calls()[1], "iptables -t nat -D POSTROUTING -o eth0 -j MASQUERADE");
    }
}
