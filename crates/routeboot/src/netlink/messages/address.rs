//! Strongly-typed address message.

use std::net::Ipv4Addr;

use winnow::prelude::*;
use winnow::token::take;
use zerocopy::FromBytes;

use crate::netlink::attr::get;
use crate::netlink::parse::{FromNetlink, PResult, cut, parse_attrs, parse_ipv4};
use crate::netlink::types::AF_INET;
use crate::netlink::types::addr::{IfAddrMsg, IfaAttr, ifa_flags};

/// Attribute IDs for IFA_* constants.
mod attr_ids {
    use super::IfaAttr;

    pub const IFA_ADDRESS: u16 = IfaAttr::Address as u16;
    pub const IFA_LOCAL: u16 = IfaAttr::Local as u16;
    pub const IFA_LABEL: u16 = IfaAttr::Label as u16;
    pub const IFA_FLAGS: u16 = IfaAttr::Flags as u16;
}

/// An interface address as reported by `RTM_GETADDR`.
///
/// Only IPv4 payloads are decoded; other families keep their header but no
/// addresses.
#[derive(Debug, Clone, Default)]
pub struct AddressMessage {
    pub header: IfAddrMsg,
    /// Peer/prefix address (IFA_ADDRESS).
    pub address: Option<Ipv4Addr>,
    /// Local address (IFA_LOCAL).
    pub local: Option<Ipv4Addr>,
    /// Interface label (IFA_LABEL).
    pub label: Option<String>,
    /// Extended flags (IFA_FLAGS), supersedes `header.ifa_flags`.
    pub flags: Option<u32>,
}

impl AddressMessage {
    pub fn is_ipv4(&self) -> bool {
        self.header.ifa_family == AF_INET
    }

    pub fn prefix_len(&self) -> u8 {
        self.header.ifa_prefixlen
    }

    pub fn ifindex(&self) -> u32 {
        self.header.ifa_index
    }

    /// The address configured on the interface (local, falling back to address).
    pub fn primary_address(&self) -> Option<Ipv4Addr> {
        self.local.or(self.address)
    }

    /// Check if the kernel flagged this address as secondary.
    pub fn is_secondary(&self) -> bool {
        let flags = self.flags.unwrap_or(self.header.ifa_flags as u32);
        flags & ifa_flags::SECONDARY != 0
    }
}

impl FromNetlink for AddressMessage {
    fn write_dump_header(buf: &mut Vec<u8>) {
        buf.extend_from_slice(zerocopy::IntoBytes::as_bytes(
            &IfAddrMsg::new().with_family(AF_INET),
        ));
    }

    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let header_bytes: &[u8] = take(IfAddrMsg::SIZE).parse_next(input)?;
        let header = IfAddrMsg::read_from_bytes(header_bytes).map_err(|_| cut())?;

        let mut msg = AddressMessage {
            header,
            ..Default::default()
        };

        if !msg.is_ipv4() {
            return Ok(msg);
        }

        for (kind, data) in parse_attrs(input)? {
            match kind {
                attr_ids::IFA_ADDRESS => msg.address = parse_ipv4(data),
                attr_ids::IFA_LOCAL => msg.local = parse_ipv4(data),
                attr_ids::IFA_LABEL => msg.label = get::string(data).ok().map(String::from),
                attr_ids::IFA_FLAGS => msg.flags = get::u32_ne(data).ok(),
                _ => {}
            }
        }

        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::fixtures;

    #[test]
    fn test_parse_primary_address() {
        let data = fixtures::addr_v4(2, [10, 0, 1, 5], 24, 0, "eth0");
        let msg = AddressMessage::from_bytes(&data).unwrap();

        assert!(msg.is_ipv4());
        assert_eq!(msg.ifindex(), 2);
        assert_eq!(msg.prefix_len(), 24);
        assert_eq!(msg.primary_address(), Some(Ipv4Addr::new(10, 0, 1, 5)));
        assert_eq!(msg.label.as_deref(), Some("eth0"));
        assert!(!msg.is_secondary());
    }

    #[test]
    fn test_parse_secondary_flag() {
        let data = fixtures::addr_v4(2, [10, 0, 0, 5], 24, ifa_flags::SECONDARY, "eth0");
        let msg = AddressMessage::from_bytes(&data).unwrap();
        assert!(msg.is_secondary());
    }

    #[test]
    fn test_parse_truncated_header() {
        assert!(AddressMessage::from_bytes(&[2, 24, 0]).is_err());
    }
}
