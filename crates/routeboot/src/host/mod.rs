//! The host networking capability.
//!
//! Every stage of the pipeline reads and changes host state only through
//! [`HostNetwork`]. [`NetlinkHost`] talks to the kernel; [`MemoryHost`] keeps
//! the same state in memory for tests and simulations.

mod memory;
mod netlink;

pub use memory::{FailPoint, MemoryHost, MemoryInterface, MemoryState};
pub use netlink::NetlinkHost;

use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::intent::{Ipv4Prefix, RuleSelector};
use crate::rt_tables::TableRegistry;

/// A default route in the main table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefaultRoute {
    /// Output interface, if the route has one.
    pub interface: Option<String>,
    pub gateway: Option<Ipv4Addr>,
    pub metric: Option<u32>,
}

/// An IPv4 address configured on an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterfaceAddress {
    pub address: Ipv4Prefix,
    /// Set by the kernel for additional addresses inside an already
    /// configured subnet.
    pub secondary: bool,
}

/// A table lookup rule as found on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyRule {
    /// Source match; `None` means `from all`.
    pub source: Option<Ipv4Prefix>,
    /// Destination match; `None` means any destination.
    pub destination: Option<Ipv4Prefix>,
    pub table_id: u32,
    pub priority: u32,
    /// Further selectors and modifiers (`fwmark 0x1/0xffffffff`,
    /// `iif eth1`, `not`, ...). Empty for a plain prefix rule.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub qualifiers: Vec<String>,
}

impl PolicyRule {
    /// Whether this rule is the one `spec` describes.
    ///
    /// A rule with qualifiers only covers part of the traffic `spec` is
    /// about and never matches. The priority is only compared when `spec`
    /// pins one.
    pub fn matches(&self, spec: &RuleSpec) -> bool {
        let (want_src, want_dst) = match spec.selector {
            RuleSelector::From => (Some(spec.prefix), None),
            RuleSelector::To => (None, Some(spec.prefix)),
        };
        self.table_id == spec.table_id
            && self.source == want_src
            && self.destination == want_dst
            && self.qualifiers.is_empty()
            && spec.priority.is_none_or(|p| p == self.priority)
    }
}

/// A rule to add or remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleSpec {
    pub selector: RuleSelector,
    /// Network prefix the rule matches (host bits cleared).
    pub prefix: Ipv4Prefix,
    pub table_id: u32,
    pub priority: Option<u32>,
}

/// A route as found in a routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRoute {
    pub destination: Ipv4Prefix,
    pub gateway: Option<Ipv4Addr>,
    /// Preferred source address.
    pub source: Option<Ipv4Addr>,
    pub interface: Option<String>,
    pub metric: Option<u32>,
}

impl TableRoute {
    pub fn is_default(&self) -> bool {
        self.destination.prefix_len() == 0
    }

    /// Whether this is the default route `spec` describes.
    pub fn matches(&self, spec: &RouteSpec) -> bool {
        self.is_default()
            && self.gateway == Some(spec.gateway)
            && self.source == Some(spec.source)
            && self.interface.as_deref() == Some(spec.interface.as_str())
    }
}

/// A default route to add to (or remove from) a routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSpec {
    pub gateway: Ipv4Addr,
    pub source: Ipv4Addr,
    pub interface: String,
    pub table_id: u32,
}

/// Read and change host networking state.
#[async_trait]
pub trait HostNetwork: Send + Sync {
    /// IPv4 default routes in the main table, in the order the host reports them.
    async fn default_routes(&self) -> Result<Vec<DefaultRoute>>;

    /// IPv4 addresses on `interface`, in host order.
    async fn addresses(&self, interface: &str) -> Result<Vec<InterfaceAddress>>;

    /// Kernel index of `interface`.
    async fn interface_index(&self, interface: &str) -> Result<u32>;

    /// IPv4 table lookup rules.
    async fn rules(&self) -> Result<Vec<PolicyRule>>;

    /// IPv4 unicast routes in `table_id`.
    async fn routes(&self, table_id: u32) -> Result<Vec<TableRoute>>;

    /// Current routing-table name registry.
    async fn route_tables(&self) -> Result<TableRegistry>;

    async fn add_address(&self, interface: &str, address: Ipv4Prefix) -> Result<()>;

    async fn del_address(&self, interface: &str, address: Ipv4Prefix) -> Result<()>;

    /// Register `(id, name)`; `Ok(false)` if it already was.
    async fn register_table(&self, id: u32, name: &str) -> Result<bool>;

    /// Remove `(id, name)`; `Ok(false)` if it was not registered.
    async fn unregister_table(&self, id: u32, name: &str) -> Result<bool>;

    async fn add_rule(&self, rule: &RuleSpec) -> Result<()>;

    async fn del_rule(&self, rule: &RuleSpec) -> Result<()>;

    /// Add or replace a default route.
    async fn add_route(&self, route: &RouteSpec) -> Result<()>;

    async fn del_route(&self, route: &RouteSpec) -> Result<()>;
}

/// Run a host call, failing with [`Error::Timeout`] if `limit` expires first.
pub(crate) async fn bounded<T>(
    limit: Option<Duration>,
    operation: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| Error::Timeout {
                operation: operation.to_string(),
            })?,
        None => call.await,
    }
}

/// Run blocking file work off the async worker threads.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}
