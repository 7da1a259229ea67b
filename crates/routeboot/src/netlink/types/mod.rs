//! Fixed-size rtnetlink family headers and their attribute ids.

pub mod addr;
pub mod link;
pub mod route;
pub mod rule;

/// IPv4 address family as carried in the one-byte family fields.
pub const AF_INET: u8 = libc::AF_INET as u8;
