//! IPv4 policy routing rules.

use std::net::Ipv4Addr;

use super::builder::MessageBuilder;
use super::connection::{Connection, ack_request, create_request};
use super::error::Result;
use super::message::NlMsgType;
use super::types::AF_INET;
use super::types::route::rt_table;
use super::types::rule::{FibRuleAction, FibRuleHdr, FraAttr};

/// Builder for a table lookup rule.
///
/// ```ignore
/// // ip rule add from 10.0.0.0/24 lookup 200
/// let rule = RuleBuilder::new()
///     .from(Ipv4Addr::new(10, 0, 0, 0), 24)
///     .table(200);
/// conn.add_rule(rule).await?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleBuilder {
    priority: Option<u32>,
    src: Option<(Ipv4Addr, u8)>,
    dst: Option<(Ipv4Addr, u8)>,
    table: u32,
}

impl Default for RuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleBuilder {
    pub fn new() -> Self {
        Self {
            priority: None,
            src: None,
            dst: None,
            table: rt_table::MAIN,
        }
    }

    /// Match packets by source prefix.
    pub fn from(mut self, addr: Ipv4Addr, len: u8) -> Self {
        self.src = Some((addr, len));
        self
    }

    /// Match packets by destination prefix.
    pub fn to(mut self, addr: Ipv4Addr, len: u8) -> Self {
        self.dst = Some((addr, len));
        self
    }

    pub fn table(mut self, table: u32) -> Self {
        self.table = table;
        self
    }

    /// Set the priority; without one the kernel picks the next free slot
    /// below the main-table rule.
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Build the `RTM_NEWRULE` request. Fails with EEXIST on a duplicate.
    pub fn build(&self) -> MessageBuilder {
        self.build_internal(create_request(NlMsgType::RTM_NEWRULE))
    }

    /// Build the `RTM_DELRULE` request.
    pub fn build_delete(&self) -> MessageBuilder {
        self.build_internal(ack_request(NlMsgType::RTM_DELRULE))
    }

    fn build_internal(&self, mut builder: MessageBuilder) -> MessageBuilder {
        let mut hdr = FibRuleHdr::new().with_family(AF_INET);
        hdr.src_len = self.src.map(|(_, len)| len).unwrap_or(0);
        hdr.dst_len = self.dst.map(|(_, len)| len).unwrap_or(0);
        hdr.action = FibRuleAction::ToTbl as u8;
        hdr.table = if self.table <= 255 {
            self.table as u8
        } else {
            rt_table::UNSPEC as u8
        };
        builder.append(&hdr);

        if let Some(prio) = self.priority {
            builder.append_attr_u32(FraAttr::Priority as u16, prio);
        }
        if let Some((addr, len)) = self.src
            && len > 0
        {
            builder.append_attr_ipv4(FraAttr::Src as u16, addr);
        }
        if let Some((addr, len)) = self.dst
            && len > 0
        {
            builder.append_attr_ipv4(FraAttr::Dst as u16, addr);
        }
        builder.append_attr_u32(FraAttr::Table as u16, self.table);

        builder
    }
}

impl Connection {
    /// Add a policy rule.
    pub async fn add_rule(&self, rule: RuleBuilder) -> Result<()> {
        self.request_ack(rule.build())
            .await
            .map_err(|e| e.with_context(format!("add rule lookup {}", rule.table)))
    }

    /// Delete a policy rule.
    pub async fn del_rule(&self, rule: RuleBuilder) -> Result<()> {
        self.request_ack(rule.build_delete())
            .await
            .map_err(|e| e.with_context(format!("delete rule lookup {}", rule.table)))
    }
}
