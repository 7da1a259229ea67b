//! IPv4 address management.
//!
//! Addresses are always addressed by interface index; callers resolve names
//! through [`Connection::get_link_by_name`] first so the same code works
//! inside another network namespace.
//!
//! ```ignore
//! let link = conn.get_link_by_name("eth0").await?.unwrap();
//! conn.add_address(Ipv4Address::new(link.ifindex(), "10.0.0.5".parse()?, 24)).await?;
//! ```

use std::net::Ipv4Addr;

use super::builder::MessageBuilder;
use super::connection::{Connection, ack_request, create_request};
use super::error::Result;
use super::message::NlMsgType;
use super::types::AF_INET;
use super::types::addr::{IfAddrMsg, IfaAttr, Scope};

/// An IPv4 address bound to an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Address {
    ifindex: u32,
    address: Ipv4Addr,
    prefix_len: u8,
    label: Option<String>,
}

impl Ipv4Address {
    pub fn new(ifindex: u32, address: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            ifindex,
            address,
            prefix_len,
            label: None,
        }
    }

    /// Set the address label (at most 15 bytes; longer labels are truncated).
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    fn header(&self) -> IfAddrMsg {
        IfAddrMsg::new()
            .with_family(AF_INET)
            .with_prefixlen(self.prefix_len)
            .with_index(self.ifindex)
    }

    /// Build the `RTM_NEWADDR` request. Fails with EEXIST if already present.
    pub fn build(&self) -> MessageBuilder {
        let mut builder = create_request(NlMsgType::RTM_NEWADDR);
        builder.append(&self.header().with_scope(Scope::Universe as u8));
        builder.append_attr_ipv4(IfaAttr::Local as u16, self.address);
        builder.append_attr_ipv4(IfaAttr::Address as u16, self.address);

        if self.prefix_len < 31 {
            builder.append_attr_ipv4(IfaAttr::Broadcast as u16, self.broadcast());
        }

        if let Some(label) = &self.label {
            let mut bytes: Vec<u8> = label.bytes().take(15).collect();
            bytes.push(0);
            builder.append_attr(IfaAttr::Label as u16, &bytes);
        }

        builder
    }

    /// Build the `RTM_DELADDR` request.
    pub fn build_delete(&self) -> MessageBuilder {
        let mut builder = ack_request(NlMsgType::RTM_DELADDR);
        builder.append(&self.header());
        builder.append_attr_ipv4(IfaAttr::Local as u16, self.address);
        builder
    }

    fn broadcast(&self) -> Ipv4Addr {
        let host_mask = u32::MAX.checked_shr(self.prefix_len as u32).unwrap_or(0);
        Ipv4Addr::from(u32::from(self.address) | host_mask)
    }
}

impl Connection {
    /// Add an IPv4 address to an interface.
    pub async fn add_address(&self, config: Ipv4Address) -> Result<()> {
        self.request_ack(config.build()).await.map_err(|e| {
            e.with_context(format!(
                "add {}/{} on ifindex {}",
                config.address, config.prefix_len, config.ifindex
            ))
        })
    }

    /// Remove an IPv4 address from an interface.
    pub async fn del_address(&self, config: Ipv4Address) -> Result<()> {
        self.request_ack(config.build_delete()).await.map_err(|e| {
            e.with_context(format!(
                "delete {}/{} on ifindex {}",
                config.address, config.prefix_len, config.ifindex
            ))
        })
    }
}
