//! IPv4 route management.

use std::net::Ipv4Addr;

use super::builder::MessageBuilder;
use super::connection::{Connection, ack_request, replace_request};
use super::error::Result;
use super::message::NlMsgType;
use super::types::AF_INET;
use super::types::route::{RouteProtocol, RouteScope, RouteType, RtMsg, RtaAttr, rt_table};

/// An IPv4 unicast route.
///
/// Routes are installed with create-or-replace semantics: adding a route
/// whose key (table, destination, priority) already exists overwrites its
/// next hop instead of failing.
///
/// ```ignore
/// let route = Ipv4Route::default_route()
///     .gateway(Ipv4Addr::new(10, 0, 1, 1))
///     .prefsrc(Ipv4Addr::new(10, 0, 0, 5))
///     .oif(2)
///     .table(200);
/// conn.add_route(route).await?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Route {
    destination: Ipv4Addr,
    prefix_len: u8,
    gateway: Option<Ipv4Addr>,
    prefsrc: Option<Ipv4Addr>,
    oif: Option<u32>,
    table: u32,
    priority: Option<u32>,
    protocol: RouteProtocol,
}

impl Ipv4Route {
    pub fn new(destination: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            destination,
            prefix_len,
            gateway: None,
            prefsrc: None,
            oif: None,
            table: rt_table::MAIN,
            priority: None,
            protocol: RouteProtocol::Boot,
        }
    }

    /// `0.0.0.0/0`.
    pub fn default_route() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, 0)
    }

    pub fn gateway(mut self, gateway: Ipv4Addr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Preferred source address for locally generated traffic.
    pub fn prefsrc(mut self, src: Ipv4Addr) -> Self {
        self.prefsrc = Some(src);
        self
    }

    pub fn oif(mut self, ifindex: u32) -> Self {
        self.oif = Some(ifindex);
        self
    }

    pub fn table(mut self, table: u32) -> Self {
        self.table = table;
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn protocol(mut self, protocol: RouteProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    fn header(&self) -> RtMsg {
        // Ids that do not fit the u8 header field travel only in RTA_TABLE.
        let table = if self.table > 255 {
            rt_table::UNSPEC as u8
        } else {
            self.table as u8
        };
        RtMsg::new()
            .with_family(AF_INET)
            .with_dst_len(self.prefix_len)
            .with_table(table)
    }

    fn append_attrs(&self, builder: &mut MessageBuilder) {
        if self.prefix_len > 0 {
            builder.append_attr_ipv4(RtaAttr::Dst as u16, self.destination);
        }
        if let Some(gw) = self.gateway {
            builder.append_attr_ipv4(RtaAttr::Gateway as u16, gw);
        }
        if let Some(src) = self.prefsrc {
            builder.append_attr_ipv4(RtaAttr::Prefsrc as u16, src);
        }
        if let Some(oif) = self.oif {
            builder.append_attr_u32(RtaAttr::Oif as u16, oif);
        }
        builder.append_attr_u32(RtaAttr::Table as u16, self.table);
        if let Some(prio) = self.priority {
            builder.append_attr_u32(RtaAttr::Priority as u16, prio);
        }
    }

    /// Build the create-or-replace `RTM_NEWROUTE` request.
    pub fn build(&self) -> MessageBuilder {
        let mut builder = replace_request(NlMsgType::RTM_NEWROUTE);
        let scope = if self.gateway.is_some() {
            RouteScope::Universe
        } else {
            RouteScope::Link
        };
        builder.append(
            &self
                .header()
                .with_protocol(self.protocol)
                .with_scope(scope)
                .with_type(RouteType::Unicast),
        );
        self.append_attrs(&mut builder);
        builder
    }

    /// Build the `RTM_DELROUTE` request.
    pub fn build_delete(&self) -> MessageBuilder {
        let mut builder = ack_request(NlMsgType::RTM_DELROUTE);
        builder.append(&self.header().with_scope(RouteScope::Nowhere));
        self.append_attrs(&mut builder);
        builder
    }
}

impl Connection {
    /// Add or replace a route.
    pub async fn add_route(&self, route: Ipv4Route) -> Result<()> {
        self.request_ack(route.build()).await.map_err(|e| {
            e.with_context(format!(
                "add route {}/{} table {}",
                route.destination, route.prefix_len, route.table
            ))
        })
    }

    /// Delete a route.
    pub async fn del_route(&self, route: Ipv4Route) -> Result<()> {
        self.request_ack(route.build_delete()).await.map_err(|e| {
            e.with_context(format!(
                "delete route {}/{} table {}",
                route.destination, route.prefix_len, route.table
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::message::{NLM_F_EXCL, NLM_F_REPLACE, NLMSG_HDRLEN};
    use crate::netlink::messages::RouteMessage;
    use crate::netlink::parse::FromNetlink;

    #[test]
    fn test_build_default_route_in_large_table() {
        let route = Ipv4Route::default_route()
            .gateway(Ipv4Addr::new(10, 0, 1, 1))
            .prefsrc(Ipv4Addr::new(10, 0, 0, 5))
            .oif(2)
            .table(1000);
        let builder = route.build();
        assert_eq!(builder.flags() & NLM_F_REPLACE, NLM_F_REPLACE);
        assert_eq!(builder.flags() & NLM_F_EXCL, 0);

        let bytes = builder.finish();
        let msg = RouteMessage::from_bytes(&bytes[NLMSG_HDRLEN..]).unwrap();
        assert!(msg.is_default());
        assert!(msg.is_unicast());
        assert_eq!(msg.header.rtm_table, 0);
        assert_eq!(msg.table_id(), 1000);
        assert_eq!(msg.gateway(), Some(Ipv4Addr::new(10, 0, 1, 1)));
        assert_eq!(msg.prefsrc(), Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(msg.oif(), Some(2));
    }

    #[test]
    fn test_build_prefix_route_carries_destination() {
        let route = Ipv4Route::new(Ipv4Addr::new(192, 168, 0, 0), 16).oif(3);
        let bytes = route.build().finish();
        let msg = RouteMessage::from_bytes(&bytes[NLMSG_HDRLEN..]).unwrap();
        assert_eq!(msg.destination(), Some(Ipv4Addr::new(192, 168, 0, 0)));
        assert_eq!(msg.table_id(), rt_table::MAIN);
        assert_eq!(msg.header.rtm_scope, RouteScope::Link as u8);
    }

    #[test]
    fn test_build_delete() {
        let builder = Ipv4Route::default_route().table(200).build_delete();
        assert_eq!(builder.msg_type(), NlMsgType::RTM_DELROUTE);
    }
}
