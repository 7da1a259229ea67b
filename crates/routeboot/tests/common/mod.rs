//! Common test utilities for integration tests.
//!
//! Provides `TestNamespace` for isolated network namespace testing
//! and the `require_root!` macro for conditional test execution.

use std::net::Ipv4Addr;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

use routeboot::netlink;
use routeboot::{NetlinkHost, Result};

/// Global counter for unique namespace names.
static NAMESPACE_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Generate a unique namespace name for this test.
fn unique_ns_name(prefix: &str) -> String {
    let id = NAMESPACE_COUNTER.fetch_add(1, Ordering::SeqCst);
    let pid = std::process::id();
    format!("rb-test-{}-{}-{}", prefix, pid, id)
}

/// A test network namespace, deleted on drop.
pub struct TestNamespace {
    name: String,
}

impl TestNamespace {
    /// Create a new namespace with a unique name derived from `prefix`.
    pub fn new(prefix: &str) -> Result<Self> {
        let name = unique_ns_name(prefix);

        let status = Command::new("ip")
            .args(["netns", "add", &name])
            .status()
            .map_err(netlink::Error::Io)?;

        if !status.success() {
            return Err(netlink::Error::InvalidMessage(format!(
                "failed to create namespace: {}",
                name
            ))
            .into());
        }

        Ok(Self { name })
    }

    #[allow(dead_code)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A host bound to this namespace, using `rt_tables` as its table file.
    pub fn host(&self, rt_tables: &Path) -> Result<NetlinkHost> {
        NetlinkHost::in_namespace(&self.name, rt_tables)
    }

    /// Run a command in the namespace and return its output.
    pub fn exec(&self, cmd: &str, args: &[&str]) -> Result<String> {
        let output = Command::new("ip")
            .args(["netns", "exec", &self.name, cmd])
            .args(args)
            .output()
            .map_err(netlink::Error::Io)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(netlink::Error::InvalidMessage(format!(
                "command failed: {} {:?}: {}",
                cmd, args, stderr
            ))
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Add a dummy interface, bring it up and give it `addr`.
    pub fn add_dummy(&self, name: &str, addr: &str) -> Result<()> {
        self.exec("ip", &["link", "add", name, "type", "dummy"])?;
        self.exec("ip", &["link", "set", name, "up"])?;
        self.exec("ip", &["addr", "add", addr, "dev", name])?;
        Ok(())
    }

    /// Add a main-table default route.
    pub fn add_default_route(&self, dev: &str, gateway: Ipv4Addr, metric: u32) -> Result<()> {
        self.exec(
            "ip",
            &[
                "route",
                "add",
                "default",
                "via",
                &gateway.to_string(),
                "dev",
                dev,
                "metric",
                &metric.to_string(),
            ],
        )?;
        Ok(())
    }
}

impl Drop for TestNamespace {
    fn drop(&mut self) {
        let _ = Command::new("ip")
            .args(["netns", "del", &self.name])
            .status();
    }
}

/// Check if running as root.
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Skip the test if not running as root.
#[macro_export]
macro_rules! require_root {
    () => {
        if !crate::common::is_root() {
            eprintln!("Skipping test: requires root");
            return Ok(());
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_ns_name() {
        let name1 = unique_ns_name("test");
        let name2 = unique_ns_name("test");
        assert_ne!(name1, name2);
        assert!(name1.starts_with("rb-test-test-"));
    }
}
