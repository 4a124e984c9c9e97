//! In-memory stand-ins for the host: scripted commands, links, and the
//! WireGuard control plane. Test builds only.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::device::{DeviceConfig, DeviceControl};
use crate::error::{Error, Result};
use crate::exec::{command_line, CommandOutput, CommandRunner};
use crate::link::LinkManager;
use crate::net::AddressSpec;

/// Answers commands from a script keyed by command-line prefix and records
/// every invocation. Unscripted commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    script: Vec<(String, CommandOutput)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, prefix: &str, stdout: &str) -> Self {
        self.script.push((
            prefix.to_string(),
            CommandOutput {
                status: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        ));
        self
    }

    pub fn fail(mut self, prefix: &str, code: i32, stderr: &str) -> Self {
        self.script.push((
            prefix.to_string(),
            CommandOutput {
                status: Some(code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        ));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        self.calls.lock().unwrap().push(line.clone());
        let output = self
            .script
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or(CommandOutput {
                status: Some(0),
                ..Default::default()
            });
        Ok(output)
    }
}

#[derive(Debug, Clone, Default)]
struct FakeLink {
    mtu: u32,
    up: bool,
    addresses: Vec<AddressSpec>,
}

/// Links kept in a map, with optional forced failures per operation
#[derive(Default)]
pub struct FakeLinks {
    links: Mutex<HashMap<String, FakeLink>>,
    failing: Vec<&'static str>,
    hanging: Vec<&'static str>,
    calls: Mutex<Vec<String>>,
}

impl FakeLinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `op` fail with a netlink error
    pub fn failing(mut self, op: &'static str) -> Self {
        self.failing.push(op);
        self
    }

    /// Make every call to `op` wait forever
    pub fn hanging(mut self, op: &'static str) -> Self {
        self.hanging.push(op);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.links.lock().unwrap().contains_key(name)
    }

    pub fn is_up(&self, name: &str) -> bool {
        self.links.lock().unwrap().get(name).map(|l| l.up).unwrap_or(false)
    }

    pub fn mtu(&self, name: &str) -> Option<u32> {
        self.links.lock().unwrap().get(name).map(|l| l.mtu)
    }

    pub fn addresses_of(&self, name: &str) -> Vec<AddressSpec> {
        self.links
            .lock()
            .unwrap()
            .get(name)
            .map(|l| l.addresses.clone())
            .unwrap_or_default()
    }

    fn record(&self, op: &'static str, name: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("{} {}", op, name));
        if self.failing.contains(&op) {
            return Err(Error::Netlink(format!("{}: operation not permitted", name)));
        }
        Ok(())
    }

    fn with_link<T>(&self, name: &str, f: impl FnOnce(&mut FakeLink) -> T) -> Result<T> {
        let mut links = self.links.lock().unwrap();
        let link = links
            .get_mut(name)
            .ok_or_else(|| Error::LinkNotFound(name.to_string()))?;
        Ok(f(link))
    }
}

#[async_trait]
impl LinkManager for FakeLinks {
    async fn create_link(&self, name: &str, _kind: &str, mtu: u32) -> Result<()> {
        self.record("create_link", name)?;
        let mut links = self.links.lock().unwrap();
        if links.contains_key(name) {
            return Err(Error::LinkExists(name.to_string()));
        }
        links.insert(
            name.to_string(),
            FakeLink {
                mtu,
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn delete_link(&self, name: &str) -> Result<()> {
        self.record("delete_link", name)?;
        self.links
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::LinkNotFound(name.to_string()))
    }

    async fn set_link_up(&self, name: &str) -> Result<()> {
        self.record("set_link_up", name)?;
        self.with_link(name, |l| l.up = true)
    }

    async fn set_link_down(&self, name: &str) -> Result<()> {
        self.record("set_link_down", name)?;
        if self.hanging.contains(&"set_link_down") {
            std::future::pending::<()>().await;
        }
        self.with_link(name, |l| l.up = false)
    }

    async fn addresses(&self, name: &str) -> Result<Vec<AddressSpec>> {
        self.record("addresses", name)?;
        self.with_link(name, |l| l.addresses.clone())
    }

    async fn add_address(&self, name: &str, addr: AddressSpec) -> Result<()> {
        self.record("add_address", name)?;
        self.with_link(name, |l| l.addresses.push(addr))
    }
}

/// Records applied device configurations
#[derive(Default)]
pub struct FakeDevice {
    fail: bool,
    applied: Mutex<Vec<(String, DeviceConfig)>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn applied(&self) -> Vec<(String, DeviceConfig)> {
        self.applied.lock().unwrap().clone()
    }
}

impl DeviceControl for FakeDevice {
    fn apply(&self, iface: &str, config: &DeviceConfig) -> Result<()> {
        if self.fail {
            return Err(Error::WireGuard(format!("{}: no such device", iface)));
        }
        self.applied
            .lock()
            .unwrap()
            .push((iface.to_string(), config.clone()));
        Ok(())
    }
}
