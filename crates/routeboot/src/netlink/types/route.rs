//! Route message types.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Route message (struct rtmsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RtMsg {
    /// Address family.
    pub rtm_family: u8,
    /// Destination prefix length.
    pub rtm_dst_len: u8,
    /// Source prefix length.
    pub rtm_src_len: u8,
    /// TOS filter.
    pub rtm_tos: u8,
    /// Routing table ID (RT_TABLE_COMPAT when the id does not fit).
    pub rtm_table: u8,
    /// Routing protocol (RTPROT_*).
    pub rtm_protocol: u8,
    /// Route scope (RT_SCOPE_*).
    pub rtm_scope: u8,
    /// Route type (RTN_*).
    pub rtm_type: u8,
    /// Route flags.
    pub rtm_flags: u32,
}

impl RtMsg {
    /// Size of this structure.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_family(mut self, family: u8) -> Self {
        self.rtm_family = family;
        self
    }

    pub fn with_dst_len(mut self, len: u8) -> Self {
        self.rtm_dst_len = len;
        self
    }

    pub fn with_table(mut self, table: u8) -> Self {
        self.rtm_table = table;
        self
    }

    pub fn with_protocol(mut self, protocol: RouteProtocol) -> Self {
        self.rtm_protocol = protocol as u8;
        self
    }

    pub fn with_scope(mut self, scope: RouteScope) -> Self {
        self.rtm_scope = scope as u8;
        self
    }

    pub fn with_type(mut self, rtype: RouteType) -> Self {
        self.rtm_type = rtype as u8;
        self
    }
}

/// Route attributes (RTA_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RtaAttr {
    Dst = 1,
    Src = 2,
    Oif = 4,
    Gateway = 5,
    Priority = 6,
    Prefsrc = 7,
    Table = 15,
}

/// Route types (RTN_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RouteType {
    Unspec = 0,
    Unicast = 1,
    Local = 2,
    Broadcast = 3,
    Multicast = 5,
    Blackhole = 6,
    Unreachable = 7,
    Prohibit = 8,
}

impl From<u8> for RouteType {
    fn from(val: u8) -> Self {
        match val {
            1 => Self::Unicast,
            2 => Self::Local,
            3 => Self::Broadcast,
            5 => Self::Multicast,
            6 => Self::Blackhole,
            7 => Self::Unreachable,
            8 => Self::Prohibit,
            _ => Self::Unspec,
        }
    }
}

/// Route protocols (RTPROT_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RouteProtocol {
    Unspec = 0,
    Kernel = 2,
    Boot = 3,
    Static = 4,
}

/// Route scope (RT_SCOPE_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RouteScope {
    Universe = 0,
    Link = 253,
    Host = 254,
    Nowhere = 255,
}

/// Well-known routing table ids (RT_TABLE_*).
pub mod rt_table {
    pub const UNSPEC: u32 = 0;
    /// Marker in the one-byte header field when the real id is in RTA_TABLE.
    pub const COMPAT: u32 = 252;
    pub const DEFAULT: u32 = 253;
    pub const MAIN: u32 = 254;
    pub const LOCAL: u32 = 255;
}
