//! Async rtnetlink client, IPv4 only.
//!
//! Covers exactly the message kinds the engine needs: link lookups, address,
//! route and rule dumps, and their add/delete requests.
//!
//! ```ignore
//! use routeboot::netlink::Connection;
//!
//! let conn = Connection::new()?;
//! for route in conn.get_routes_for_table(254).await? {
//!     if route.is_default() {
//!         println!("default via {:?} oif {:?}", route.gateway(), route.oif());
//!     }
//! }
//! ```

pub mod addr;
pub mod attr;
pub mod builder;
pub mod connection;
pub mod error;
pub mod message;
pub mod messages;
pub mod parse;
pub mod route;
pub mod rule;
pub mod socket;
pub mod types;

#[cfg(test)]
pub(crate) mod fixtures;

pub use addr::Ipv4Address;
pub use builder::MessageBuilder;
pub use connection::Connection;
pub use error::{Error, Result};
pub use messages::{AddressMessage, LinkMessage, RouteMessage, RuleMessage};
pub use parse::FromNetlink;
pub use route::Ipv4Route;
pub use rule::RuleBuilder;
