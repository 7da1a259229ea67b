//! Interface resolution: which interface carries the default route.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::host::{HostNetwork, bounded};
use crate::intent::Ipv4Prefix;

/// The host's default interface, derived fresh on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedInterface {
    pub name: String,
    pub index: u32,
    /// First non-secondary IPv4 address, with its prefix length.
    pub primary_address: Ipv4Prefix,
    /// Next hop of the default route, if it has one.
    pub gateway: Option<Ipv4Addr>,
}

impl fmt::Display for ResolvedInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.primary_address)?;
        if let Some(gw) = self.gateway {
            write!(f, " via {gw}")?;
        }
        Ok(())
    }
}

/// Resolve the default interface without a time bound.
pub async fn resolve<H: HostNetwork + ?Sized>(host: &H) -> Result<ResolvedInterface> {
    resolve_with_timeout(host, None).await
}

/// Resolve the default interface, bounding every host query by `timeout`.
///
/// The first IPv4 default route in the main table wins, in the order the
/// host reports them; metrics are not consulted.
pub async fn resolve_with_timeout<H: HostNetwork + ?Sized>(
    host: &H,
    timeout: Option<Duration>,
) -> Result<ResolvedInterface> {
    let routes = bounded(timeout, "default route query", host.default_routes()).await?;
    let first = routes.into_iter().next().ok_or(Error::NoDefaultRoute)?;
    let name = first.interface.ok_or(Error::NoDefaultRoute)?;

    let addresses = bounded(timeout, "address query", host.addresses(&name)).await?;
    let primary = addresses
        .iter()
        .find(|a| !a.secondary)
        .or_else(|| addresses.first())
        .map(|a| a.address)
        .ok_or_else(|| Error::NoPrimaryAddress {
            interface: name.clone(),
        })?;

    let index = bounded(timeout, "link query", host.interface_index(&name)).await?;

    tracing::debug!(interface = %name, index, address = %primary, "resolved default interface");

    Ok(ResolvedInterface {
        name,
        index,
        primary_address: primary,
        gateway: first.gateway,
    })
}
