//! Host capability backed by rtnetlink and the iproute2 table file.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{
    DefaultRoute, HostNetwork, InterfaceAddress, PolicyRule, RouteSpec, RuleSpec, TableRoute,
    blocking,
};
use crate::error::Result;
use crate::intent::{Ipv4Prefix, RuleSelector};
use crate::netlink::types::route::rt_table;
use crate::netlink::{Connection, Ipv4Address, Ipv4Route, RouteMessage, RuleBuilder};
use crate::rt_tables::{self, TableRegistry};

/// The real host, as seen through a netlink connection.
pub struct NetlinkHost {
    conn: Connection,
    rt_tables_path: PathBuf,
}

impl NetlinkHost {
    /// Connect in the current network namespace.
    pub fn new(rt_tables_path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::with_connection(Connection::new()?, rt_tables_path))
    }

    /// Connect inside the named namespace (`ip netns add <name>`).
    pub fn in_namespace(name: &str, rt_tables_path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::with_connection(
            Connection::new_in_namespace(name)?,
            rt_tables_path,
        ))
    }

    pub fn with_connection(conn: Connection, rt_tables_path: impl Into<PathBuf>) -> Self {
        Self {
            conn,
            rt_tables_path: rt_tables_path.into(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn rt_tables_path(&self) -> &Path {
        &self.rt_tables_path
    }

    fn rule_builder(rule: &RuleSpec) -> RuleBuilder {
        let prefix = rule.prefix.network();
        let builder = match rule.selector {
            RuleSelector::From => RuleBuilder::new().from(prefix.addr(), prefix.prefix_len()),
            RuleSelector::To => RuleBuilder::new().to(prefix.addr(), prefix.prefix_len()),
        }
        .table(rule.table_id);
        match rule.priority {
            Some(prio) => builder.priority(prio),
            None => builder,
        }
    }

    async fn route_config(&self, route: &RouteSpec) -> Result<Ipv4Route> {
        let ifindex = self.conn.get_ifindex(&route.interface).await?;
        Ok(Ipv4Route::default_route()
            .gateway(route.gateway)
            .prefsrc(route.source)
            .oif(ifindex)
            .table(route.table_id))
    }
}

fn table_route(route: &RouteMessage, names: &HashMap<u32, String>) -> TableRoute {
    TableRoute {
        destination: prefix_or_any(route.destination(), route.dst_len()),
        gateway: route.gateway(),
        source: route.prefsrc(),
        interface: route.oif().and_then(|idx| names.get(&idx).cloned()),
        metric: route.priority(),
    }
}

fn prefix_or_any(addr: Option<Ipv4Addr>, len: u8) -> Ipv4Prefix {
    Ipv4Prefix::clamped(addr.unwrap_or(Ipv4Addr::UNSPECIFIED), len)
}

fn rule_prefix(addr: Option<Ipv4Addr>, len: u8) -> Option<Ipv4Prefix> {
    (len > 0).then(|| prefix_or_any(addr, len))
}

#[async_trait]
impl HostNetwork for NetlinkHost {
    async fn default_routes(&self) -> Result<Vec<DefaultRoute>> {
        let names = self.conn.get_interface_names().await?;
        let routes = self.conn.get_routes_for_table(rt_table::MAIN).await?;
        Ok(routes
            .iter()
            .filter(|r| r.is_default() && r.is_unicast())
            .map(|r| DefaultRoute {
                interface: r.oif().and_then(|idx| names.get(&idx).cloned()),
                gateway: r.gateway(),
                metric: r.priority(),
            })
            .collect())
    }

    async fn addresses(&self, interface: &str) -> Result<Vec<InterfaceAddress>> {
        let ifindex = self.conn.get_ifindex(interface).await?;
        let addrs = self.conn.get_addresses_by_index(ifindex).await?;
        Ok(addrs
            .iter()
            .filter_map(|a| {
                let addr = a.primary_address()?;
                Some(InterfaceAddress {
                    address: Ipv4Prefix::clamped(addr, a.prefix_len()),
                    secondary: a.is_secondary(),
                })
            })
            .collect())
    }

    async fn interface_index(&self, interface: &str) -> Result<u32> {
        Ok(self.conn.get_ifindex(interface).await?)
    }

    async fn rules(&self) -> Result<Vec<PolicyRule>> {
        let rules = self.conn.get_rules().await?;
        Ok(rules
            .iter()
            .filter(|r| r.is_lookup())
            .map(|r| PolicyRule {
                source: rule_prefix(r.source, r.src_len()),
                destination: rule_prefix(r.destination, r.dst_len()),
                table_id: r.table_id(),
                priority: r.priority,
                qualifiers: r.qualifiers(),
            })
            .collect())
    }

    async fn routes(&self, table_id: u32) -> Result<Vec<TableRoute>> {
        let names = self.conn.get_interface_names().await?;
        let routes = self.conn.get_routes_for_table(table_id).await?;
        Ok(routes
            .iter()
            .filter(|r| r.is_unicast())
            .map(|r| table_route(r, &names))
            .collect())
    }

    async fn route_tables(&self) -> Result<TableRegistry> {
        let path = self.rt_tables_path.clone();
        blocking(move || TableRegistry::load(path)).await
    }

    async fn add_address(&self, interface: &str, address: Ipv4Prefix) -> Result<()> {
        let ifindex = self.conn.get_ifindex(interface).await?;
        self.conn
            .add_address(Ipv4Address::new(ifindex, address.addr(), address.prefix_len()))
            .await?;
        Ok(())
    }

    async fn del_address(&self, interface: &str, address: Ipv4Prefix) -> Result<()> {
        let ifindex = self.conn.get_ifindex(interface).await?;
        self.conn
            .del_address(Ipv4Address::new(ifindex, address.addr(), address.prefix_len()))
            .await?;
        Ok(())
    }

    async fn register_table(&self, id: u32, name: &str) -> Result<bool> {
        let path = self.rt_tables_path.clone();
        let name = name.to_string();
        blocking(move || rt_tables::register(path, id, &name)).await
    }

    async fn unregister_table(&self, id: u32, name: &str) -> Result<bool> {
        let path = self.rt_tables_path.clone();
        let name = name.to_string();
        blocking(move || rt_tables::unregister(path, id, &name)).await
    }

    async fn add_rule(&self, rule: &RuleSpec) -> Result<()> {
        self.conn.add_rule(Self::rule_builder(rule)).await?;
        Ok(())
    }

    async fn del_rule(&self, rule: &RuleSpec) -> Result<()> {
        self.conn.del_rule(Self::rule_builder(rule)).await?;
        Ok(())
    }

    async fn add_route(&self, route: &RouteSpec) -> Result<()> {
        let config = self.route_config(route).await?;
        self.conn.add_route(config).await?;
        Ok(())
    }

    async fn del_route(&self, route: &RouteSpec) -> Result<()> {
        let config = self.route_config(route).await?;
        self.conn.del_route(config).await?;
        Ok(())
    }
}
