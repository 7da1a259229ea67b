//! Strongly-typed routing rule message.

use std::net::Ipv4Addr;

use winnow::prelude::*;
use winnow::token::take;
use zerocopy::FromBytes;

use crate::netlink::attr::get;
use crate::netlink::parse::{FromNetlink, PResult, cut, parse_attrs, parse_ipv4};
use crate::netlink::types::AF_INET;
use crate::netlink::types::rule::{FibRuleAction, FibRuleHdr, FraAttr};

/// Attribute IDs for FRA_* constants.
mod attr_ids {
    use super::FraAttr;

    pub const FRA_DST: u16 = FraAttr::Dst as u16;
    pub const FRA_SRC: u16 = FraAttr::Src as u16;
    pub const FRA_IIFNAME: u16 = FraAttr::Iifname as u16;
    pub const FRA_PRIORITY: u16 = FraAttr::Priority as u16;
    pub const FRA_FWMARK: u16 = FraAttr::Fwmark as u16;
    pub const FRA_FLOW: u16 = FraAttr::Flow as u16;
    pub const FRA_TUN_ID: u16 = FraAttr::TunId as u16;
    pub const FRA_SUPPRESS_IFGROUP: u16 = FraAttr::SuppressIfgroup as u16;
    pub const FRA_SUPPRESS_PREFIXLEN: u16 = FraAttr::SuppressPrefixlen as u16;
    pub const FRA_TABLE: u16 = FraAttr::Table as u16;
    pub const FRA_FWMASK: u16 = FraAttr::Fwmask as u16;
    pub const FRA_OIFNAME: u16 = FraAttr::Oifname as u16;
    pub const FRA_L3MDEV: u16 = FraAttr::L3mdev as u16;
    pub const FRA_UID_RANGE: u16 = FraAttr::UidRange as u16;
    pub const FRA_IP_PROTO: u16 = FraAttr::IpProto as u16;
    pub const FRA_SPORT_RANGE: u16 = FraAttr::SportRange as u16;
    pub const FRA_DPORT_RANGE: u16 = FraAttr::DportRange as u16;
    pub const FRA_DSCP: u16 = FraAttr::Dscp as u16;
}

/// Keyword `ip rule` prints for a selector or modifier that is only
/// reported as present.
fn extra_keyword(kind: u16) -> Option<&'static str> {
    use attr_ids::*;
    Some(match kind {
        FRA_FLOW => "realms",
        FRA_TUN_ID => "tun_id",
        FRA_SUPPRESS_IFGROUP => "suppress_ifgroup",
        FRA_SUPPRESS_PREFIXLEN => "suppress_prefixlength",
        FRA_L3MDEV => "l3mdev",
        FRA_UID_RANGE => "uidrange",
        FRA_IP_PROTO => "ipproto",
        FRA_SPORT_RANGE => "sport",
        FRA_DPORT_RANGE => "dport",
        FRA_DSCP => "dscp",
        _ => return None,
    })
}

/// An IPv4 policy rule as reported by `RTM_GETRULE`.
#[derive(Debug, Clone, Default)]
pub struct RuleMessage {
    pub header: FibRuleHdr,
    /// Rule priority (FRA_PRIORITY).
    pub priority: u32,
    /// Source prefix (FRA_SRC), length in `header.src_len`.
    pub source: Option<Ipv4Addr>,
    /// Destination prefix (FRA_DST), length in `header.dst_len`.
    pub destination: Option<Ipv4Addr>,
    /// Routing table ID (FRA_TABLE, overrides header.table).
    pub table: u32,
    /// Input interface match (FRA_IIFNAME).
    pub iifname: Option<String>,
    /// Output interface match (FRA_OIFNAME).
    pub oifname: Option<String>,
    pub fwmark: Option<u32>,
    pub fwmask: Option<u32>,
    /// Other selectors and modifiers present, by `ip rule` keyword.
    pub extra: Vec<&'static str>,
}

impl RuleMessage {
    pub fn is_ipv4(&self) -> bool {
        self.header.family == AF_INET
    }

    pub fn src_len(&self) -> u8 {
        self.header.src_len
    }

    pub fn dst_len(&self) -> u8 {
        self.header.dst_len
    }

    pub fn action(&self) -> FibRuleAction {
        FibRuleAction::from(self.header.action)
    }

    /// Check if this is a table lookup rule.
    pub fn is_lookup(&self) -> bool {
        self.action() == FibRuleAction::ToTbl
    }

    pub fn table_id(&self) -> u32 {
        self.table
    }

    /// Everything the rule matches on or modifies beyond its source,
    /// destination, table and priority, in `ip rule` syntax.
    ///
    /// Empty for a plain `from/to PREFIX lookup TABLE` rule.
    pub fn qualifiers(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.header.is_inverted() {
            out.push("not".to_string());
        }
        if self.header.tos != 0 {
            out.push(format!("tos {:#x}", self.header.tos));
        }
        let mark = self.fwmark.unwrap_or(0);
        let mask = self.fwmask.unwrap_or(0);
        if mark != 0 || mask != 0 {
            out.push(format!("fwmark {mark:#x}/{mask:#x}"));
        }
        if let Some(iif) = &self.iifname {
            out.push(format!("iif {iif}"));
        }
        if let Some(oif) = &self.oifname {
            out.push(format!("oif {oif}"));
        }
        out.extend(self.extra.iter().map(|k| k.to_string()));
        out
    }
}

impl FromNetlink for RuleMessage {
    fn write_dump_header(buf: &mut Vec<u8>) {
        buf.extend_from_slice(zerocopy::IntoBytes::as_bytes(
            &FibRuleHdr::new().with_family(AF_INET),
        ));
    }

    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let header_bytes: &[u8] = take(FibRuleHdr::SIZE).parse_next(input)?;
        let header = FibRuleHdr::read_from_bytes(header_bytes).map_err(|_| cut())?;

        let mut msg = RuleMessage {
            table: header.table as u32,
            header,
            ..Default::default()
        };

        if !msg.is_ipv4() {
            return Ok(msg);
        }

        for (kind, data) in parse_attrs(input)? {
            match kind {
                attr_ids::FRA_PRIORITY => {
                    if let Ok(prio) = get::u32_ne(data) {
                        msg.priority = prio;
                    }
                }
                attr_ids::FRA_SRC => msg.source = parse_ipv4(data),
                attr_ids::FRA_DST => msg.destination = parse_ipv4(data),
                attr_ids::FRA_TABLE => {
                    if let Ok(table) = get::u32_ne(data) {
                        msg.table = table;
                    }
                }
                attr_ids::FRA_IIFNAME => {
                    msg.iifname = get::string(data).ok().map(str::to_string)
                }
                attr_ids::FRA_OIFNAME => {
                    msg.oifname = get::string(data).ok().map(str::to_string)
                }
                attr_ids::FRA_FWMARK => msg.fwmark = get::u32_ne(data).ok(),
                attr_ids::FRA_FWMASK => msg.fwmask = get::u32_ne(data).ok(),
                other => msg.extra.extend(extra_keyword(other)),
            }
        }

        Ok(msg)
    }
}
