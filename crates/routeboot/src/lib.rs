//! Declarative, idempotent secondary-route bootstrap for Linux hosts.
//!
//! Given a [`NetworkIntent`] (a secondary address, a destination prefix, a
//! routing table and a gateway), the engine runs four stages:
//!
//! - [`resolve`] finds the interface carrying the first default route;
//! - [`RoutePlan::build`] turns intent and interface into an ordered plan;
//! - [`apply()`] executes the plan, skipping whatever already holds;
//! - [`persist::install`] registers a boot unit that repeats all of it.
//!
//! Every host access goes through [`HostNetwork`]. [`NetlinkHost`] talks
//! rtnetlink; [`MemoryHost`] is an in-memory fake.
//!
//! # Example
//!
//! ```ignore
//! use routeboot::{Engine, EngineConfig, NetlinkHost, NetworkIntent, Systemd};
//!
//! #[tokio::main]
//! async fn main() -> routeboot::Result<()> {
//!     let config = EngineConfig::default();
//!     let host = NetlinkHost::new(&config.rt_tables_path)?;
//!     let engine = Engine::new(host, Systemd::new(&config.unit_dir), config);
//!
//!     let intent = NetworkIntent::load("secondary.yaml")?;
//!     let plan = engine.plan(&intent).await?;
//!     print!("{plan}");
//!
//!     let result = engine.apply(&plan, &engine.apply_options()).await;
//!     println!("{}", result.summary());
//!     Ok(())
//! }
//! ```

pub mod apply;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod intent;
pub mod netlink;
pub mod persist;
pub mod plan;
pub mod resolve;
pub mod rt_tables;

// Re-export common types at crate root for convenience
pub use apply::{AppliedResult, ApplyOptions, OpOutcome, OpRecord, apply, revert, rollback};
pub use config::EngineConfig;
pub use engine::{Engine, RunReport};
pub use error::{Error, Result};
pub use host::{HostNetwork, MemoryHost, NetlinkHost};
pub use intent::{IntentError, IntentFile, Ipv4Prefix, NetworkIntent, RuleSelector};
pub use persist::{BootPolicy, RecordingServiceManager, ServiceManager, Systemd};
pub use plan::{OpKind, Operation, RoutePlan};
pub use resolve::{ResolvedInterface, resolve};
pub use rt_tables::TableRegistry;
