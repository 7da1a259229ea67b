//! In-memory host with kernel-like semantics and failure injection.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    DefaultRoute, HostNetwork, InterfaceAddress, PolicyRule, RouteSpec, RuleSpec, TableRoute,
};
use crate::error::Result;
use crate::intent::{Ipv4Prefix, RuleSelector};
use crate::netlink;
use crate::netlink::types::route::rt_table;
use crate::rt_tables::TableRegistry;

// errno values the kernel answers with for the same situations.
const EPERM: i32 = 1;
const ENOENT: i32 = 2;
const ESRCH: i32 = 3;
const EEXIST: i32 = 17;
const EADDRNOTAVAIL: i32 = 99;

/// Priority the kernel gives the main-table rule.
const MAIN_RULE_PRIORITY: u32 = 32766;

/// Host calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Query,
    AddAddress,
    DelAddress,
    RegisterTable,
    UnregisterTable,
    AddRule,
    DelRule,
    AddRoute,
    DelRoute,
}

/// An interface and its addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryInterface {
    pub name: String,
    pub index: u32,
    pub addresses: Vec<InterfaceAddress>,
}

/// Everything a [`MemoryHost`] knows. Compare snapshots to assert on state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryState {
    pub interfaces: Vec<MemoryInterface>,
    /// Main-table default routes in host order.
    pub default_routes: Vec<DefaultRoute>,
    pub tables: TableRegistry,
    pub rules: Vec<PolicyRule>,
    /// `(table id, route)` pairs.
    pub routes: Vec<(u32, TableRoute)>,
}

#[derive(Debug, Default)]
struct Inner {
    state: MemoryState,
    failures: HashSet<FailPoint>,
    mutations: usize,
}

/// A fake host for tests and simulations.
///
/// ```ignore
/// let host = MemoryHost::new()
///     .with_interface("eth0", 2, &["10.0.1.5/24"])
///     .with_default_route("eth0", Ipv4Addr::new(10, 0, 1, 1));
/// host.inject_failure(FailPoint::AddRule);
/// ```
#[derive(Debug, Default)]
pub struct MemoryHost {
    inner: Mutex<Inner>,
    delay: Option<Duration>,
}

fn kernel_error(errno: i32, operation: String) -> crate::Error {
    netlink::Error::from_errno(-errno).with_context(operation).into()
}

impl MemoryHost {
    /// An empty host whose table registry holds the iproute2 defaults.
    pub fn new() -> Self {
        Self::from_state(MemoryState {
            tables: TableRegistry::builtin(),
            ..Default::default()
        })
    }

    pub fn from_state(state: MemoryState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                ..Default::default()
            }),
            delay: None,
        }
    }

    /// Copy what the pipeline needs from another host: default routes, the
    /// interfaces they use, the table registry, rules, and routes in `tables`.
    pub async fn capture(host: &(impl HostNetwork + ?Sized), tables: &[u32]) -> Result<Self> {
        let default_routes = host.default_routes().await?;

        let mut interfaces: Vec<MemoryInterface> = Vec::new();
        for name in default_routes.iter().filter_map(|r| r.interface.as_deref()) {
            if interfaces.iter().any(|i| i.name == name) {
                continue;
            }
            interfaces.push(MemoryInterface {
                name: name.to_string(),
                index: host.interface_index(name).await?,
                addresses: host.addresses(name).await?,
            });
        }

        let mut routes = Vec::new();
        for &table in tables {
            routes.extend(host.routes(table).await?.into_iter().map(|r| (table, r)));
        }

        Ok(Self::from_state(MemoryState {
            interfaces,
            default_routes,
            tables: host.route_tables().await?,
            rules: host.rules().await?,
            routes,
        }))
    }

    /// Add an interface with addresses in `a.b.c.d/len` form.
    ///
    /// # Panics
    ///
    /// Panics on a malformed address; this is a test helper.
    pub fn with_interface(self, name: &str, index: u32, addresses: &[&str]) -> Self {
        let addresses = addresses
            .iter()
            .map(|a| InterfaceAddress {
                address: a.parse().unwrap_or_else(|e| panic!("bad address {a}: {e}")),
                secondary: false,
            })
            .collect();
        self.lock().state.interfaces.push(MemoryInterface {
            name: name.to_string(),
            index,
            addresses,
        });
        self
    }

    /// Append a main-table default route.
    pub fn with_default_route(self, interface: &str, gateway: Ipv4Addr) -> Self {
        self.lock().state.default_routes.push(DefaultRoute {
            interface: Some(interface.to_string()),
            gateway: Some(gateway),
            metric: None,
        });
        self
    }

    /// Register a table. An entry clashing with an existing one is ignored.
    pub fn with_table(self, id: u32, name: &str) -> Self {
        let _ = self.lock().state.tables.insert(id, name);
        self
    }

    pub fn with_rule(self, rule: PolicyRule) -> Self {
        self.lock().state.rules.push(rule);
        self
    }

    pub fn with_route(self, table_id: u32, route: TableRoute) -> Self {
        self.lock().state.routes.push((table_id, route));
        self
    }

    /// Sleep this long in every call, to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_on(self, point: FailPoint) -> Self {
        self.inject_failure(point);
        self
    }

    pub fn inject_failure(&self, point: FailPoint) {
        self.lock().failures.insert(point);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> MemoryState {
        self.lock().state.clone()
    }

    /// Number of successful mutations so far.
    pub fn mutations(&self) -> usize {
        self.lock().mutations
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn enter(&self, point: FailPoint, operation: &str) -> Result<MutexGuard<'_, Inner>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let inner = self.lock();
        if inner.failures.contains(&point) {
            return Err(kernel_error(EPERM, format!("{operation} (injected)")));
        }
        Ok(inner)
    }
}

impl MemoryState {
    fn interface(&self, name: &str) -> Result<&MemoryInterface> {
        self.interfaces
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| {
                netlink::Error::InterfaceNotFound {
                    name: name.to_string(),
                }
                .into()
            })
    }

    fn interface_mut(&mut self, name: &str) -> Result<&mut MemoryInterface> {
        self.interfaces
            .iter_mut()
            .find(|i| i.name == name)
            .ok_or_else(|| {
                netlink::Error::InterfaceNotFound {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// The priority the kernel picks for a rule added without one.
    fn next_rule_priority(&self) -> u32 {
        self.rules
            .iter()
            .map(|r| r.priority)
            .filter(|p| *p > 0)
            .min()
            .unwrap_or(MAIN_RULE_PRIORITY)
            .saturating_sub(1)
    }
}

#[async_trait]
impl HostNetwork for MemoryHost {
    async fn default_routes(&self) -> Result<Vec<DefaultRoute>> {
        let inner = self.enter(FailPoint::Query, "dump routes").await?;
        Ok(inner.state.default_routes.clone())
    }

    async fn addresses(&self, interface: &str) -> Result<Vec<InterfaceAddress>> {
        let inner = self.enter(FailPoint::Query, "dump addresses").await?;
        Ok(inner.state.interface(interface)?.addresses.clone())
    }

    async fn interface_index(&self, interface: &str) -> Result<u32> {
        let inner = self.enter(FailPoint::Query, "dump links").await?;
        Ok(inner.state.interface(interface)?.index)
    }

    async fn rules(&self) -> Result<Vec<PolicyRule>> {
        let inner = self.enter(FailPoint::Query, "dump rules").await?;
        Ok(inner.state.rules.clone())
    }

    async fn routes(&self, table_id: u32) -> Result<Vec<TableRoute>> {
        let inner = self.enter(FailPoint::Query, "dump routes").await?;
        let mut routes: Vec<TableRoute> = inner
            .state
            .routes
            .iter()
            .filter(|(t, _)| *t == table_id)
            .map(|(_, r)| r.clone())
            .collect();
        if table_id == rt_table::MAIN {
            routes.extend(inner.state.default_routes.iter().map(|d| TableRoute {
                destination: Ipv4Prefix::clamped(Ipv4Addr::UNSPECIFIED, 0),
                gateway: d.gateway,
                source: None,
                interface: d.interface.clone(),
                metric: d.metric,
            }));
        }
        Ok(routes)
    }

    async fn route_tables(&self) -> Result<TableRegistry> {
        let inner = self.enter(FailPoint::Query, "read rt_tables").await?;
        Ok(inner.state.tables.clone())
    }

    async fn add_address(&self, interface: &str, address: Ipv4Prefix) -> Result<()> {
        let op = format!("add {address} on {interface}");
        let mut inner = self.enter(FailPoint::AddAddress, &op).await?;
        let iface = inner.state.interface_mut(interface)?;
        if iface
            .addresses
            .iter()
            .any(|a| a.address.addr() == address.addr())
        {
            return Err(kernel_error(EEXIST, op));
        }
        let secondary = iface
            .addresses
            .iter()
            .any(|a| a.address.network() == address.network());
        iface.addresses.push(InterfaceAddress { address, secondary });
        inner.mutations += 1;
        Ok(())
    }

    async fn del_address(&self, interface: &str, address: Ipv4Prefix) -> Result<()> {
        let op = format!("delete {address} on {interface}");
        let mut inner = self.enter(FailPoint::DelAddress, &op).await?;
        let iface = inner.state.interface_mut(interface)?;
        let Some(pos) = iface.addresses.iter().position(|a| a.address == address) else {
            return Err(kernel_error(EADDRNOTAVAIL, op));
        };
        iface.addresses.remove(pos);
        inner.mutations += 1;
        Ok(())
    }

    async fn register_table(&self, id: u32, name: &str) -> Result<bool> {
        let mut inner = self
            .enter(FailPoint::RegisterTable, &format!("register table {id} {name}"))
            .await?;
        let added = inner.state.tables.insert(id, name)?;
        if added {
            inner.mutations += 1;
        }
        Ok(added)
    }

    async fn unregister_table(&self, id: u32, name: &str) -> Result<bool> {
        let mut inner = self
            .enter(FailPoint::UnregisterTable, &format!("unregister table {id} {name}"))
            .await?;
        let removed = inner.state.tables.remove(id, name);
        if removed {
            inner.mutations += 1;
        }
        Ok(removed)
    }

    async fn add_rule(&self, rule: &RuleSpec) -> Result<()> {
        let op = format!("add rule lookup {}", rule.table_id);
        let mut inner = self.enter(FailPoint::AddRule, &op).await?;
        if inner.state.rules.iter().any(|r| r.matches(rule)) {
            return Err(kernel_error(EEXIST, op));
        }
        let prefix = Some(rule.prefix.network());
        let (source, destination) = match rule.selector {
            RuleSelector::From => (prefix, None),
            RuleSelector::To => (None, prefix),
        };
        let priority = rule
            .priority
            .unwrap_or_else(|| inner.state.next_rule_priority());
        inner.state.rules.push(PolicyRule {
            source,
            destination,
            table_id: rule.table_id,
            priority,
            qualifiers: Vec::new(),
        });
        inner.state.rules.sort_by_key(|r| r.priority);
        inner.mutations += 1;
        Ok(())
    }

    async fn del_rule(&self, rule: &RuleSpec) -> Result<()> {
        let op = format!("delete rule lookup {}", rule.table_id);
        let mut inner = self.enter(FailPoint::DelRule, &op).await?;
        let Some(pos) = inner.state.rules.iter().position(|r| r.matches(rule)) else {
            return Err(kernel_error(ENOENT, op));
        };
        inner.state.rules.remove(pos);
        inner.mutations += 1;
        Ok(())
    }

    async fn add_route(&self, route: &RouteSpec) -> Result<()> {
        let op = format!("add default route table {}", route.table_id);
        let mut inner = self.enter(FailPoint::AddRoute, &op).await?;
        inner.state.interface(&route.interface)?;
        // Replace semantics: one default route per table.
        inner
            .state
            .routes
            .retain(|(t, r)| !(*t == route.table_id && r.is_default() && r.metric.is_none()));
        inner.state.routes.push((
            route.table_id,
            TableRoute {
                destination: Ipv4Prefix::clamped(Ipv4Addr::UNSPECIFIED, 0),
                gateway: Some(route.gateway),
                source: Some(route.source),
                interface: Some(route.interface.clone()),
                metric: None,
            },
        ));
        inner.mutations += 1;
        Ok(())
    }

    async fn del_route(&self, route: &RouteSpec) -> Result<()> {
        let op = format!("delete default route table {}", route.table_id);
        let mut inner = self.enter(FailPoint::DelRoute, &op).await?;
        let Some(pos) = inner
            .state
            .routes
            .iter()
            .position(|(t, r)| *t == route.table_id && r.matches(route))
        else {
            return Err(kernel_error(ESRCH, op));
        };
        inner.state.routes.remove(pos);
        inner.mutations += 1;
        Ok(())
    }
}
