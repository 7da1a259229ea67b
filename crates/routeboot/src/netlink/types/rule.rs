//! Routing rule message types.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// FIB rule header (struct fib_rule_hdr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FibRuleHdr {
    /// Address family.
    pub family: u8,
    /// Destination prefix length.
    pub dst_len: u8,
    /// Source prefix length.
    pub src_len: u8,
    /// TOS.
    pub tos: u8,
    /// Routing table ID (ids above 255 travel in FRA_TABLE).
    pub table: u8,
    pub res1: u8,
    pub res2: u8,
    /// Action (FR_ACT_*).
    pub action: u8,
    /// Flags.
    pub flags: u32,
}

impl FibRuleHdr {
    /// Size of this structure.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_family(mut self, family: u8) -> Self {
        self.family = family;
        self
    }

    /// Whether the rule matches packets that do *not* match its selectors.
    pub fn is_inverted(&self) -> bool {
        self.flags & FIB_RULE_INVERT != 0
    }
}

/// `ip rule add not ...`
pub const FIB_RULE_INVERT: u32 = 0x02;

/// FIB rule attributes (FRA_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FraAttr {
    Dst = 1,
    Src = 2,
    Iifname = 3,
    Priority = 6,
    Fwmark = 10,
    Flow = 11,
    TunId = 12,
    SuppressIfgroup = 13,
    SuppressPrefixlen = 14,
    Table = 15,
    Fwmask = 16,
    Oifname = 17,
    L3mdev = 19,
    UidRange = 20,
    IpProto = 22,
    SportRange = 23,
    DportRange = 24,
    Dscp = 25,
}

/// FIB rule actions (FR_ACT_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FibRuleAction {
    Unspec = 0,
    ToTbl = 1,
    Goto = 2,
    Nop = 3,
    Blackhole = 6,
    Unreachable = 7,
    Prohibit = 8,
}

impl From<u8> for FibRuleAction {
    fn from(val: u8) -> Self {
        match val {
            1 => Self::ToTbl,
            2 => Self::Goto,
            3 => Self::Nop,
            6 => Self::Blackhole,
            7 => Self::Unreachable,
            8 => Self::Prohibit,
            _ => Self::Unspec,
        }
    }
}
