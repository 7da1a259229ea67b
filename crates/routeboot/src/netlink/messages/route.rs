//! Strongly-typed route message.

use std::net::Ipv4Addr;

use winnow::prelude::*;
use winnow::token::take;
use zerocopy::FromBytes;

use crate::netlink::attr::get;
use crate::netlink::parse::{FromNetlink, PResult, cut, parse_attrs, parse_ipv4};
use crate::netlink::types::AF_INET;
use crate::netlink::types::route::{RouteType, RtMsg, RtaAttr};

/// Attribute IDs for RTA_* constants.
mod attr_ids {
    use super::RtaAttr;

    pub const RTA_DST: u16 = RtaAttr::Dst as u16;
    pub const RTA_OIF: u16 = RtaAttr::Oif as u16;
    pub const RTA_GATEWAY: u16 = RtaAttr::Gateway as u16;
    pub const RTA_PRIORITY: u16 = RtaAttr::Priority as u16;
    pub const RTA_PREFSRC: u16 = RtaAttr::Prefsrc as u16;
    pub const RTA_TABLE: u16 = RtaAttr::Table as u16;
}

/// An IPv4 route as reported by `RTM_GETROUTE`.
#[derive(Debug, Clone, Default)]
pub struct RouteMessage {
    pub(crate) header: RtMsg,
    /// Destination prefix (RTA_DST).
    pub(crate) destination: Option<Ipv4Addr>,
    /// Output interface index (RTA_OIF).
    pub(crate) oif: Option<u32>,
    /// Gateway address (RTA_GATEWAY).
    pub(crate) gateway: Option<Ipv4Addr>,
    /// Priority/metric (RTA_PRIORITY).
    pub(crate) priority: Option<u32>,
    /// Preferred source address (RTA_PREFSRC).
    pub(crate) prefsrc: Option<Ipv4Addr>,
    /// Routing table ID (RTA_TABLE), authoritative over `header.rtm_table`.
    pub(crate) table: Option<u32>,
}

impl RouteMessage {
    pub fn is_ipv4(&self) -> bool {
        self.header.rtm_family == AF_INET
    }

    pub fn dst_len(&self) -> u8 {
        self.header.rtm_dst_len
    }

    pub fn route_type(&self) -> RouteType {
        RouteType::from(self.header.rtm_type)
    }

    /// Get the routing table ID.
    pub fn table_id(&self) -> u32 {
        self.table.unwrap_or(self.header.rtm_table as u32)
    }

    pub fn destination(&self) -> Option<Ipv4Addr> {
        self.destination
    }

    pub fn oif(&self) -> Option<u32> {
        self.oif
    }

    pub fn gateway(&self) -> Option<Ipv4Addr> {
        self.gateway
    }

    pub fn priority(&self) -> Option<u32> {
        self.priority
    }

    pub fn prefsrc(&self) -> Option<Ipv4Addr> {
        self.prefsrc
    }

    /// Check if this is a default route (0.0.0.0/0).
    pub fn is_default(&self) -> bool {
        self.header.rtm_dst_len == 0 && self.destination.is_none_or(|d| d.is_unspecified())
    }

    /// Check if this is an ordinary forwarding route (not local/broadcast/etc.).
    pub fn is_unicast(&self) -> bool {
        self.route_type() == RouteType::Unicast
    }
}

impl FromNetlink for RouteMessage {
    fn write_dump_header(buf: &mut Vec<u8>) {
        buf.extend_from_slice(zerocopy::IntoBytes::as_bytes(
            &RtMsg::new().with_family(AF_INET),
        ));
    }

    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let header_bytes: &[u8] = take(RtMsg::SIZE).parse_next(input)?;
        let header = RtMsg::read_from_bytes(header_bytes).map_err(|_| cut())?;

        let mut msg = RouteMessage {
            header,
            ..Default::default()
        };

        if !msg.is_ipv4() {
            return Ok(msg);
        }

        for (kind, data) in parse_attrs(input)? {
            match kind {
                attr_ids::RTA_DST => msg.destination = parse_ipv4(data),
                attr_ids::RTA_OIF => msg.oif = get::u32_ne(data).ok(),
                attr_ids::RTA_GATEWAY => msg.gateway = parse_ipv4(data),
                attr_ids::RTA_PRIORITY => msg.priority = get::u32_ne(data).ok(),
                attr_ids::RTA_PREFSRC => msg.prefsrc = parse_ipv4(data),
                attr_ids::RTA_TABLE => msg.table = get::u32_ne(data).ok(),
                _ => {}
            }
        }

        Ok(msg)
    }
}
