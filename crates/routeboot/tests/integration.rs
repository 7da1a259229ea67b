//! Integration test entry point.
//!
//! These tests talk to the real kernel inside throwaway network namespaces
//! and need root:
//!
//! ```bash
//! sudo cargo test -p routeboot --features integration --test integration
//!
//! # Run a single test
//! sudo cargo test -p routeboot --features integration --test integration test_apply_twice
//! ```
//!
//! # Test Organization
//!
//! - `resolve.rs` - default interface discovery
//! - `apply.rs` - applying, re-applying and reverting plans

#[macro_use]
#[path = "common/mod.rs"]
mod common;

#[path = "integration/resolve.rs"]
mod resolve;

#[path = "integration/apply.rs"]
mod apply;
