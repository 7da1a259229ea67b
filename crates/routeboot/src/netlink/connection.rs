//! High-level rtnetlink connection with request/response handling.

use std::collections::HashMap;
use std::path::Path;

use super::builder::MessageBuilder;
use super::error::{Error, Result};
use super::message::{
    MessageIter, NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REPLACE, NLM_F_REQUEST,
    NLMSG_HDRLEN, NlMsgError, NlMsgType,
};
use super::messages::{AddressMessage, LinkMessage, RouteMessage, RuleMessage};
use super::parse::FromNetlink;
use super::socket::NetlinkSocket;

/// Where iproute2 bind-mounts named network namespaces.
pub const NETNS_RUN_DIR: &str = "/var/run/netns";

/// High-level rtnetlink connection.
pub struct Connection {
    socket: NetlinkSocket,
}

impl Connection {
    /// Open a connection in the current network namespace.
    pub fn new() -> Result<Self> {
        Ok(Self {
            socket: NetlinkSocket::new()?,
        })
    }

    /// Open a connection bound to the network namespace at `ns_path`.
    ///
    /// ```ignore
    /// let conn = Connection::new_in_namespace_path("/var/run/netns/blue")?;
    /// let routes = conn.get_routes().await?;
    /// ```
    pub fn new_in_namespace_path<P: AsRef<Path>>(ns_path: P) -> Result<Self> {
        Ok(Self {
            socket: NetlinkSocket::new_in_namespace_path(ns_path)?,
        })
    }

    /// Open a connection in a named namespace created by `ip netns add`.
    pub fn new_in_namespace(name: &str) -> Result<Self> {
        Self::new_in_namespace_path(Path::new(NETNS_RUN_DIR).join(name))
    }

    /// Send a request that expects an ACK only (no data response).
    pub async fn request_ack(&self, mut builder: MessageBuilder) -> Result<()> {
        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());

        let msg = builder.finish();
        self.socket.send(&msg).await?;

        loop {
            let response = self.socket.recv_msg().await?;
            if process_ack(&response, seq)? {
                return Ok(());
            }
        }
    }

    /// Send a dump request and collect every message up to NLMSG_DONE.
    pub async fn dump(&self, mut builder: MessageBuilder) -> Result<Vec<Vec<u8>>> {
        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());

        let msg = builder.finish();
        self.socket.send(&msg).await?;

        let mut responses = Vec::new();
        loop {
            let data = self.socket.recv_msg().await?;
            if collect_dump(&data, seq, &mut responses)? {
                break;
            }
        }

        Ok(responses)
    }

    /// Send a dump request and parse all responses into typed messages.
    ///
    /// Messages that fail to parse are skipped, matching what `ip` does with
    /// attributes it does not understand.
    pub async fn dump_typed<T: FromNetlink>(&self, msg_type: u16) -> Result<Vec<T>> {
        let mut builder = dump_request(msg_type);

        let mut header_buf = Vec::new();
        T::write_dump_header(&mut header_buf);
        builder.append_bytes(&header_buf);

        let responses = self.dump(builder).await?;
        Ok(parse_all(&responses))
    }

    /// Get all network interfaces.
    pub async fn get_links(&self) -> Result<Vec<LinkMessage>> {
        self.dump_typed(NlMsgType::RTM_GETLINK).await
    }

    /// Look up an interface by name.
    pub async fn get_link_by_name(&self, name: &str) -> Result<Option<LinkMessage>> {
        let links = self.get_links().await?;
        Ok(links.into_iter().find(|l| l.name.as_deref() == Some(name)))
    }

    /// Resolve an interface name to its index.
    pub async fn get_ifindex(&self, name: &str) -> Result<u32> {
        self.get_link_by_name(name)
            .await?
            .map(|l| l.ifindex())
            .ok_or_else(|| Error::InterfaceNotFound {
                name: name.to_string(),
            })
    }

    /// Build a map of interface index to name.
    pub async fn get_interface_names(&self) -> Result<HashMap<u32, String>> {
        let links = self.get_links().await?;
        Ok(links
            .into_iter()
            .filter_map(|l| l.name.clone().map(|n| (l.ifindex(), n)))
            .collect())
    }

    /// Get all IPv4 addresses.
    pub async fn get_addresses(&self) -> Result<Vec<AddressMessage>> {
        let all: Vec<AddressMessage> = self.dump_typed(NlMsgType::RTM_GETADDR).await?;
        Ok(all.into_iter().filter(|a| a.is_ipv4()).collect())
    }

    /// Get IPv4 addresses for a specific interface by index.
    pub async fn get_addresses_by_index(&self, ifindex: u32) -> Result<Vec<AddressMessage>> {
        let addresses = self.get_addresses().await?;
        Ok(addresses
            .into_iter()
            .filter(|a| a.ifindex() == ifindex)
            .collect())
    }

    /// Get all IPv4 routes, in kernel dump order.
    pub async fn get_routes(&self) -> Result<Vec<RouteMessage>> {
        let all: Vec<RouteMessage> = self.dump_typed(NlMsgType::RTM_GETROUTE).await?;
        Ok(all.into_iter().filter(|r| r.is_ipv4()).collect())
    }

    /// Get routes for a specific table.
    pub async fn get_routes_for_table(&self, table_id: u32) -> Result<Vec<RouteMessage>> {
        let routes = self.get_routes().await?;
        Ok(routes
            .into_iter()
            .filter(|r| r.table_id() == table_id)
            .collect())
    }

    /// Get all IPv4 policy rules.
    pub async fn get_rules(&self) -> Result<Vec<RuleMessage>> {
        let all: Vec<RuleMessage> = self.dump_typed(NlMsgType::RTM_GETRULE).await?;
        Ok(all.into_iter().filter(|r| r.is_ipv4()).collect())
    }
}

/// Scan one datagram for the ACK of `expected_seq`.
///
/// Returns `Ok(true)` once the ACK is seen, `Ok(false)` if the datagram held
/// nothing for this request, and the kernel error if the request was refused.
pub(crate) fn process_ack(data: &[u8], expected_seq: u32) -> Result<bool> {
    for result in MessageIter::new(data) {
        let (header, payload) = result?;

        if header.nlmsg_seq != expected_seq {
            continue;
        }

        if header.is_error() {
            let err = NlMsgError::from_bytes(payload)?;
            if !err.is_ack() {
                return Err(Error::from_errno(err.error));
            }
            return Ok(true);
        }
    }

    Ok(false)
}

/// Append the dump messages for `seq` found in one datagram to `out`.
///
/// Returns `Ok(true)` once NLMSG_DONE is reached.
pub(crate) fn collect_dump(data: &[u8], seq: u32, out: &mut Vec<Vec<u8>>) -> Result<bool> {
    for result in MessageIter::new(data) {
        let (header, payload) = result?;

        if header.nlmsg_seq != seq {
            continue;
        }

        if header.is_error() {
            let err = NlMsgError::from_bytes(payload)?;
            if !err.is_ack() {
                return Err(Error::from_errno(err.error));
            }
            continue;
        }

        if header.is_done() {
            return Ok(true);
        }

        let mut msg = Vec::with_capacity(NLMSG_HDRLEN + payload.len());
        msg.extend_from_slice(header.as_bytes());
        msg.extend_from_slice(payload);
        out.push(msg);
    }

    Ok(false)
}

fn parse_all<T: FromNetlink>(responses: &[Vec<u8>]) -> Vec<T> {
    responses
        .iter()
        .filter(|r| r.len() >= NLMSG_HDRLEN)
        .filter_map(|r| T::from_bytes(&r[NLMSG_HDRLEN..]).ok())
        .collect()
}

/// Helper to build a dump request.
pub fn dump_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_DUMP)
}

/// Helper to build a request expecting ACK.
pub fn ack_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(msg_type, NLM_F_REQUEST | NLM_F_ACK)
}

/// Helper to build an exclusive create request (fails with EEXIST).
pub fn create_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(
        msg_type,
        NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
    )
}

/// Helper to build a create-or-replace request.
pub fn replace_request(msg_type: u16) -> MessageBuilder {
    MessageBuilder::new(
        msg_type,
        NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_REPLACE,
    )
}
