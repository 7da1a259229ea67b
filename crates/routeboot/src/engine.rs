//! The full pipeline: resolve, plan, apply, install.

use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::apply::{self, AppliedResult, ApplyOptions};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::host::{HostNetwork, bounded};
use crate::intent::NetworkIntent;
use crate::persist::{self, InstallReport, InstallSettings, ServiceManager, UninstallReport};
use crate::plan::RoutePlan;
use crate::resolve::{self, ResolvedInterface};

/// A host, a service manager and the settings tying them together.
///
/// ```ignore
/// use routeboot::{Engine, EngineConfig, NetlinkHost, NetworkIntent, Systemd};
///
/// let config = EngineConfig::default();
/// let host = NetlinkHost::new(&config.rt_tables_path)?;
/// let engine = Engine::new(host, Systemd::new(&config.unit_dir), config);
///
/// let intent = NetworkIntent::load("/etc/routeboot/secondary.yaml")?;
/// let report = engine.run(&intent, &engine.apply_options()).await?;
/// println!("{}", report.applied.summary());
/// ```
pub struct Engine<H, S> {
    host: H,
    services: S,
    config: EngineConfig,
    exec_args: Vec<String>,
}

/// What [`Engine::run`] did.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub plan: RoutePlan,
    pub applied: AppliedResult,
    /// `None` if apply did not fully succeed or was a dry run.
    pub install: Option<InstallReport>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.applied.is_success()
    }
}

impl<H: HostNetwork, S: ServiceManager> Engine<H, S> {
    pub fn new(host: H, services: S, config: EngineConfig) -> Self {
        Self {
            host,
            services,
            config,
            exec_args: Vec::new(),
        }
    }

    /// Extra arguments for the boot unit's `apply` command line.
    pub fn with_exec_args(mut self, args: Vec<String>) -> Self {
        self.exec_args = args;
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn services(&self) -> &S {
        &self.services
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Options with the configured per-call timeout and no deadline.
    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            op_timeout: Some(self.config.op_timeout),
            ..Default::default()
        }
    }

    pub fn install_settings(&self) -> InstallSettings {
        InstallSettings {
            state_dir: self.config.state_dir.clone(),
            binary_path: self.config.binary_path.clone(),
            extra_args: self.exec_args.clone(),
            policy: Default::default(),
        }
    }

    pub async fn resolve(&self) -> Result<ResolvedInterface> {
        resolve::resolve_with_timeout(&self.host, Some(self.config.query_timeout)).await
    }

    /// Resolve the interface, snapshot the table registry and build the plan.
    ///
    /// Never mutates the host.
    pub async fn plan(&self, intent: &NetworkIntent) -> Result<RoutePlan> {
        let iface = self.resolve().await?;
        info!(interface = %iface, "resolved default interface");

        let tables = bounded(
            Some(self.config.query_timeout),
            "route table query",
            self.host.route_tables(),
        )
        .await?;
        RoutePlan::build(intent, &iface, &tables)
    }

    pub async fn apply(&self, plan: &RoutePlan, options: &ApplyOptions) -> AppliedResult {
        apply::apply(&self.host, plan, options).await
    }

    pub async fn revert(
        &self,
        plan: &RoutePlan,
        applied_prefix: usize,
        options: &ApplyOptions,
    ) -> AppliedResult {
        apply::revert(&self.host, plan, applied_prefix, options).await
    }

    /// Undo only what `applied` changed.
    pub async fn rollback(&self, applied: &AppliedResult, options: &ApplyOptions) -> AppliedResult {
        apply::rollback(&self.host, applied, options).await
    }

    pub async fn install(&self, plan: &RoutePlan) -> Result<InstallReport> {
        persist::install(&self.services, plan, &self.install_settings()).await
    }

    pub async fn uninstall(&self, table_name: &str) -> Result<UninstallReport> {
        persist::uninstall(&self.services, table_name, &self.install_settings()).await
    }

    /// Run the whole pipeline for `intent`.
    ///
    /// Resolution and plan errors are returned before anything changes.
    /// The boot unit is installed only if every operation succeeded and
    /// this is not a dry run; install errors are returned.
    pub async fn run(&self, intent: &NetworkIntent, options: &ApplyOptions) -> Result<RunReport> {
        let started = Instant::now();
        let plan = self.plan(intent).await?;
        let applied = self.apply(&plan, options).await;
        info!(summary = %applied.summary(), "plan applied");

        let install = if !applied.is_success() {
            warn!(table = intent.table_name(), "apply incomplete, boot unit not installed");
            None
        } else if options.dry_run {
            None
        } else {
            Some(self.install(&plan).await?)
        };

        info!(elapsed_ms = started.elapsed().as_millis() as u64, "run finished");
        Ok(RunReport {
            plan,
            applied,
            install,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::apply::OpOutcome;
    use crate::error::Error;
    use crate::host::{FailPoint, MemoryHost};
    use crate::persist::RecordingServiceManager;

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

    fn engine(host: MemoryHost, dir: &std::path::Path) -> Engine<MemoryHost, RecordingServiceManager> {
        let config = EngineConfig {
            state_dir: dir.to_path_buf(),
            ..Default::default()
        };
        Engine::new(host, RecordingServiceManager::new(), config)
    }

    fn host() -> MemoryHost {
        MemoryHost::new()
            .with_interface("eth0", 2, &["10.0.1.5/24"])
            .with_default_route("eth0", Ipv4Addr::new(10, 0, 1, 1))
    }

    #[tokio::test]
    async fn test_run_installs_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(host(), dir.path());

        let report = engine.run(&intent(), &engine.apply_options()).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.applied.changes_made(), 4);
        let install = report.install.unwrap();
        assert_eq!(install.unit, "routeboot-secondary.service");
        assert!(engine.services().units()[&install.unit].started);
    }

    #[tokio::test]
    async fn test_run_skips_install_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(host().fail_on(FailPoint::AddRule), dir.path());

        let report = engine.run(&intent(), &engine.apply_options()).await.unwrap();
        assert!(!report.is_success());
        assert!(report.install.is_none());
        assert!(engine.services().calls().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let host = host().fail_on(FailPoint::AddRoute);
        let before = host.snapshot();
        let engine = engine(host, dir.path());

        let report = engine.run(&intent(), &engine.apply_options()).await.unwrap();
        assert_eq!(report.applied.changed_operations().count(), 3);

        let rolled = engine.rollback(&report.applied, &engine.apply_options()).await;
        assert!(rolled.is_success());
        assert_eq!(rolled.records().len(), 3);
        assert_eq!(engine.host().snapshot(), before);
    }

    #[tokio::test]
    async fn test_run_dry_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(host(), dir.path());
        let before = engine.host().snapshot();

        let report = engine.run(&intent(), &ApplyOptions::dry_run()).await.unwrap();
        assert!(report.applied.outcomes().all(|o| *o == OpOutcome::Skipped));
        assert!(report.install.is_none());
        assert_eq!(engine.host().snapshot(), before);
    }

    #[tokio::test]
    async fn test_plan_without_default_route() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(MemoryHost::new(), dir.path());
        let err = engine.plan(&intent()).await.unwrap_err();
        assert!(matches!(err, Error::NoDefaultRoute));
        assert_eq!(engine.host().mutations(), 0);
    }

    #[tokio::test]
    async fn test_exec_args_reach_unit() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(host(), dir.path())
            .with_exec_args(vec!["--netns".to_string(), "blue".to_string()]);
        let plan = engine.plan(&intent()).await.unwrap();
        let report = engine.install(&plan).await.unwrap();

        let exec = &engine.services().units()[&report.unit].exec;
        assert_eq!(&exec[exec.len() - 2..], ["--netns", "blue"]);
    }
}
