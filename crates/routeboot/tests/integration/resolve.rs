//! Interface resolution against real routing tables.

use std::net::Ipv4Addr;

use routeboot::{Error, Result, resolve};

use crate::common::TestNamespace;

#[tokio::test]
async fn test_resolve_default_interface() -> Result<()> {
    require_root!();

    let ns = TestNamespace::new("resolve")?;
    ns.add_dummy("dummy0", "10.0.1.5/24")?;
    ns.add_default_route("dummy0", Ipv4Addr::new(10, 0, 1, 1), 100)?;

    let dir = tempfile::tempdir().map_err(routeboot::netlink::Error::Io)?;
    let host = ns.host(&dir.path().join("rt_tables"))?;

    let iface = resolve(&host).await?;
    assert_eq!(iface.name, "dummy0");
    assert_eq!(iface.primary_address.to_string(), "10.0.1.5/24");
    assert_eq!(iface.gateway, Some(Ipv4Addr::new(10, 0, 1, 1)));

    Ok(())
}

#[tokio::test]
async fn test_resolve_first_reported_route() -> Result<()> {
    require_root!();

    let ns = TestNamespace::new("resolve2")?;
    ns.add_dummy("dummy0", "10.0.1.5/24")?;
    ns.add_dummy("dummy1", "10.0.2.5/24")?;
    ns.add_default_route("dummy0", Ipv4Addr::new(10, 0, 1, 1), 100)?;
    ns.add_default_route("dummy1", Ipv4Addr::new(10, 0, 2, 1), 200)?;

    let dir = tempfile::tempdir().map_err(routeboot::netlink::Error::Io)?;
    let host = ns.host(&dir.path().join("rt_tables"))?;

    // The kernel reports routes in metric order; the first one wins.
    let iface = resolve(&host).await?;
    assert_eq!(iface.name, "dummy0");

    Ok(())
}

#[tokio::test]
async fn test_resolve_without_default_route() -> Result<()> {
    require_root!();

    let ns = TestNamespace::new("resolve3")?;
    ns.add_dummy("dummy0", "10.0.1.5/24")?;

    let dir = tempfile::tempdir().map_err(routeboot::netlink::Error::Io)?;
    let host = ns.host(&dir.path().join("rt_tables"))?;

    let err = resolve(&host).await.unwrap_err();
    assert!(matches!(err, Error::NoDefaultRoute));

    Ok(())
}
