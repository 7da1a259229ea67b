//! Minimal link message: index and name only.

use winnow::prelude::*;
use winnow::token::take;
use zerocopy::FromBytes;

use crate::netlink::attr::get;
use crate::netlink::parse::{FromNetlink, PResult, cut, parse_attrs};
use crate::netlink::types::link::{IfInfoMsg, IflaAttr};

/// A network interface as reported by `RTM_GETLINK`.
///
/// Names are resolved through netlink rather than sysfs so lookups stay
/// correct on connections opened inside another network namespace.
#[derive(Debug, Clone, Default)]
pub struct LinkMessage {
    pub header: IfInfoMsg,
    /// Interface name (IFLA_IFNAME).
    pub name: Option<String>,
}

impl LinkMessage {
    pub fn ifindex(&self) -> u32 {
        self.header.ifi_index as u32
    }
}

impl FromNetlink for LinkMessage {
    fn write_dump_header(buf: &mut Vec<u8>) {
        buf.extend_from_slice(zerocopy::IntoBytes::as_bytes(&IfInfoMsg::new()));
    }

    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let header_bytes: &[u8] = take(IfInfoMsg::SIZE).parse_next(input)?;
        let header = IfInfoMsg::read_from_bytes(header_bytes).map_err(|_| cut())?;

        let mut msg = LinkMessage {
            header,
            ..Default::default()
        };

        for (kind, data) in parse_attrs(input)? {
            if kind == IflaAttr::Ifname as u16 {
                msg.name = get::string(data).ok().map(String::from);
            }
        }

        Ok(msg)
    }
}
