//! Applying and reverting plans in a namespace.

use std::net::Ipv4Addr;
use std::path::Path;

use routeboot::{
    ApplyOptions, NetworkIntent, OpOutcome, Result, RoutePlan, TableRegistry, apply, resolve,
    revert,
};

use crate::common::TestNamespace;

fn intent() -> NetworkIntent {
    NetworkIntent::new(
        "10.0.0.5/24".parse().unwrap(),
        "10.0.0.0/24".parse().unwrap(),
        200,
        "secondary",
        Ipv4Addr::new(10, 0, 1, 1),
    )
    .unwrap()
}

fn setup(prefix: &str) -> Result<TestNamespace> {
    let ns = TestNamespace::new(prefix)?;
    ns.add_dummy("eth0", "10.0.1.5/24")?;
    ns.add_default_route("eth0", Ipv4Addr::new(10, 0, 1, 1), 0)?;
    Ok(ns)
}

async fn build(host: &routeboot::NetlinkHost, rt_tables: &Path) -> Result<RoutePlan> {
    let iface = resolve(host).await?;
    let tables = TableRegistry::load(rt_tables)?;
    RoutePlan::build(&intent(), &iface, &tables)
}

#[tokio::test]
async fn test_apply_twice() -> Result<()> {
    require_root!();

    let ns = setup("apply")?;
    let dir = tempfile::tempdir().map_err(routeboot::netlink::Error::Io)?;
    let rt_tables = dir.path().join("rt_tables");
    let host = ns.host(&rt_tables)?;

    let plan = build(&host, &rt_tables).await?;
    let first = apply(&host, &plan, &ApplyOptions::default()).await;
    assert!(first.is_success(), "{}", first.summary());
    assert!(first.outcomes().all(|o| *o == OpOutcome::Applied));

    let plan = build(&host, &rt_tables).await?;
    let second = apply(&host, &plan, &ApplyOptions::default()).await;
    assert!(second.outcomes().all(|o| *o == OpOutcome::AlreadySatisfied));

    let addrs = ns.exec("ip", &["-4", "-o", "addr", "show", "dev", "eth0"])?;
    assert_eq!(addrs.matches("10.0.0.5/24").count(), 1);

    let rules = ns.exec("ip", &["-4", "rule", "show"])?;
    assert_eq!(rules.matches("from 10.0.0.0/24 lookup 200").count(), 1);

    let routes = ns.exec("ip", &["-4", "route", "show", "table", "200"])?;
    assert_eq!(routes.lines().count(), 1);
    assert!(routes.contains("default via 10.0.1.1 dev eth0"));
    assert!(routes.contains("src 10.0.0.5"));

    let table_file = std::fs::read_to_string(&rt_tables).map_err(routeboot::netlink::Error::Io)?;
    assert_eq!(table_file.matches("200\tsecondary").count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_revert_restores_host() -> Result<()> {
    require_root!();

    let ns = setup("revert")?;
    let dir = tempfile::tempdir().map_err(routeboot::netlink::Error::Io)?;
    let rt_tables = dir.path().join("rt_tables");
    let host = ns.host(&rt_tables)?;

    let plan = build(&host, &rt_tables).await?;
    let applied = apply(&host, &plan, &ApplyOptions::default()).await;
    assert!(applied.is_success());

    let reverted = revert(&host, &plan, applied.applied_prefix(), &ApplyOptions::default()).await;
    assert!(reverted.is_success(), "{}", reverted.summary());

    let rules = ns.exec("ip", &["-4", "rule", "show"])?;
    assert!(!rules.contains("lookup 200"));
    let addrs = ns.exec("ip", &["-4", "-o", "addr", "show", "dev", "eth0"])?;
    assert!(!addrs.contains("10.0.0.5"));
    assert!(TableRegistry::load(&rt_tables)?.id_of("secondary").is_none());

    Ok(())
}
