//! Strongly-typed rtnetlink messages parsed from dump responses.

mod address;
mod link;
mod route;
mod rule;

pub use address::*;
pub use link::*;
pub use route::*;
pub use rule::*;
