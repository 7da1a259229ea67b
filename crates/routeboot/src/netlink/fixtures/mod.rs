//! Hand-built kernel responses for parser and framing tests.
//!
//! Payload helpers (`addr_v4`, `route_v4`, `rule_v4`) return the bytes after
//! the netlink header, the way `Connection::dump_typed` hands them to
//! `FromNetlink::from_bytes`. Framing helpers (`ack`, `done`, `error`,
//! `message`) return complete messages.

use zerocopy::IntoBytes;

use super::message::{NLM_F_MULTI, NLMSG_HDRLEN, NlMsgHdr, NlMsgType, nlmsg_align};
use super::types::AF_INET;
use super::types::addr::IfAddrMsg;
use super::types::link::IfInfoMsg;
use super::types::route::{RouteProtocol, RouteScope, RouteType, RtMsg, rt_table};
use super::types::rule::{FibRuleAction, FibRuleHdr};

pub fn push_attr(buf: &mut Vec<u8>, kind: u16, data: &[u8]) {
    let len = 4 + data.len();
    buf.extend_from_slice(&(len as u16).to_ne_bytes());
    buf.extend_from_slice(&kind.to_ne_bytes());
    buf.extend_from_slice(data);
    buf.resize(nlmsg_align(buf.len()), 0);
}

/// Wrap a payload in a netlink header.
pub fn message(seq: u32, msg_type: u16, flags: u16, payload: &[u8]) -> Vec<u8> {
    let mut header = NlMsgHdr::new(msg_type, flags);
    header.nlmsg_len = (NLMSG_HDRLEN + payload.len()) as u32;
    header.nlmsg_seq = seq;
    let mut buf = header.as_bytes().to_vec();
    buf.extend_from_slice(payload);
    buf.resize(nlmsg_align(buf.len()), 0);
    buf
}

/// NLMSG_ERROR carrying `errno` (negative) for request `seq`.
pub fn error(seq: u32, errno: i32) -> Vec<u8> {
    let mut payload = errno.to_ne_bytes().to_vec();
    let mut orig = NlMsgHdr::new(NlMsgType::RTM_NEWROUTE, 0);
    orig.nlmsg_seq = seq;
    payload.extend_from_slice(orig.as_bytes());
    message(seq, NlMsgType::ERROR, 0, &payload)
}

/// Successful ACK for request `seq`.
pub fn ack(seq: u32) -> Vec<u8> {
    error(seq, 0)
}

/// NLMSG_DONE terminating a dump.
pub fn done(seq: u32) -> Vec<u8> {
    message(seq, NlMsgType::DONE, NLM_F_MULTI, &0i32.to_ne_bytes())
}

/// `RTM_NEWADDR` payload for an IPv4 address.
pub fn addr_v4(ifindex: u32, addr: [u8; 4], prefix: u8, flags: u32, label: &str) -> Vec<u8> {
    let header = IfAddrMsg::new()
        .with_family(AF_INET)
        .with_prefixlen(prefix)
        .with_index(ifindex);
    let mut buf = header.as_bytes().to_vec();
    push_attr(&mut buf, 1, &addr); // IFA_ADDRESS
    push_attr(&mut buf, 2, &addr); // IFA_LOCAL
    let mut name = label.as_bytes().to_vec();
    name.push(0);
    push_attr(&mut buf, 3, &name); // IFA_LABEL
    push_attr(&mut buf, 8, &flags.to_ne_bytes()); // IFA_FLAGS
    buf
}

/// `RTM_NEWLINK` payload carrying only an index and a name.
pub fn link(ifindex: u32, name: &str) -> Vec<u8> {
    let mut header = IfInfoMsg::new();
    header.ifi_index = ifindex as i32;
    let mut buf = header.as_bytes().to_vec();
    let mut ifname = name.as_bytes().to_vec();
    ifname.push(0);
    push_attr(&mut buf, 3, &ifname); // IFLA_IFNAME
    buf
}

/// Parameters for [`route_v4`].
#[derive(Debug, Clone, Default)]
pub struct RouteFixture {
    pub destination: Option<([u8; 4], u8)>,
    pub gateway: Option<[u8; 4]>,
    pub prefsrc: Option<[u8; 4]>,
    pub oif: Option<u32>,
    pub table: u32,
    pub priority: Option<u32>,
}

/// `RTM_NEWROUTE` payload for an IPv4 unicast route.
pub fn route_v4(route: RouteFixture) -> Vec<u8> {
    let header_table = if route.table > 255 {
        rt_table::COMPAT as u8
    } else {
        route.table as u8
    };
    let header = RtMsg::new()
        .with_family(AF_INET)
        .with_dst_len(route.destination.map(|(_, len)| len).unwrap_or(0))
        .with_table(header_table)
        .with_protocol(RouteProtocol::Boot)
        .with_scope(RouteScope::Universe)
        .with_type(RouteType::Unicast);
    let mut buf = header.as_bytes().to_vec();
    push_attr(&mut buf, 15, &route.table.to_ne_bytes()); // RTA_TABLE
    if let Some((dst, _)) = route.destination {
        push_attr(&mut buf, 1, &dst); // RTA_DST
    }
    if let Some(prio) = route.priority {
        push_attr(&mut buf, 6, &prio.to_ne_bytes()); // RTA_PRIORITY
    }
    if let Some(src) = route.prefsrc {
        push_attr(&mut buf, 7, &src); // RTA_PREFSRC
    }
    if let Some(gw) = route.gateway {
        push_attr(&mut buf, 5, &gw); // RTA_GATEWAY
    }
    if let Some(oif) = route.oif {
        push_attr(&mut buf, 4, &oif.to_ne_bytes()); // RTA_OIF
    }
    buf
}

/// `RTM_NEWRULE` payload for an IPv4 lookup rule.
pub fn rule_v4(
    src: Option<([u8; 4], u8)>,
    dst: Option<([u8; 4], u8)>,
    table: u32,
    priority: u32,
) -> Vec<u8> {
    let mut header = FibRuleHdr::new().with_family(AF_INET);
    header.src_len = src.map(|(_, len)| len).unwrap_or(0);
    header.dst_len = dst.map(|(_, len)| len).unwrap_or(0);
    header.action = FibRuleAction::ToTbl as u8;
    header.table = if table > 255 {
        rt_table::COMPAT as u8
    } else {
        table as u8
    };
    let mut buf = header.as_bytes().to_vec();
    push_attr(&mut buf, 15, &table.to_ne_bytes()); // FRA_TABLE
    push_attr(&mut buf, 6, &priority.to_ne_bytes()); // FRA_PRIORITY
    if let Some((addr, _)) = src {
        push_attr(&mut buf, 2, &addr); // FRA_SRC
    }
    if let Some((addr, _)) = dst {
        push_attr(&mut buf, 1, &addr); // FRA_DST
    }
    buf
}
