//! Idempotent, sequential plan application and revert.
//!
//! Each operation is checked against host state before it runs, so applying
//! the same plan twice reports every operation as already satisfied the
//! second time. There is no automatic rollback: on the first failure the
//! remaining operations are left unattempted and the caller may use
//! [`rollback`] to undo just what the pass changed, or [`revert`] with
//! [`AppliedResult::applied_prefix`] to remove the plan's effects whoever
//! put them there.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::host::{HostNetwork, bounded};
use crate::plan::{Operation, RoutePlan};
use crate::rt_tables::Registration;

/// Options for [`apply`] and [`revert`].
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Check every operation but change nothing.
    pub dry_run: bool,
    /// Stop starting new operations once this instant has passed.
    ///
    /// Checked before each operation; an operation already running is
    /// never interrupted by the deadline.
    pub deadline: Option<Instant>,
    /// Bound on each individual host call.
    pub op_timeout: Option<Duration>,
}

impl ApplyOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Default::default()
        }
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// What happened to one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum OpOutcome {
    /// The host was changed.
    Applied,
    /// The host already had the desired state.
    AlreadySatisfied,
    /// Dry run: the operation would have changed the host.
    Skipped,
    /// Not attempted because the deadline passed.
    Cancelled,
    Failed(String),
}

impl OpOutcome {
    fn is_ok(&self) -> bool {
        matches!(self, Self::Applied | Self::AlreadySatisfied)
    }
}

impl fmt::Display for OpOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => f.write_str("applied"),
            Self::AlreadySatisfied => f.write_str("already satisfied"),
            Self::Skipped => f.write_str("skipped (dry run)"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// An operation and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpRecord {
    pub operation: Operation,
    #[serde(flatten)]
    pub outcome: OpOutcome,
}

/// Outcomes of one apply or revert pass, in the order the operations ran.
///
/// Operations after a failure were not attempted and have no record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppliedResult {
    records: Vec<OpRecord>,
}

impl AppliedResult {
    pub fn records(&self) -> &[OpRecord] {
        &self.records
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &OpOutcome> {
        self.records.iter().map(|r| &r.outcome)
    }

    /// Every operation ran and none failed or was cancelled.
    pub fn is_success(&self) -> bool {
        self.records.iter().all(|r| {
            matches!(
                r.outcome,
                OpOutcome::Applied | OpOutcome::AlreadySatisfied | OpOutcome::Skipped
            )
        })
    }

    /// Number of operations that changed (or, in a dry run, would change) the host.
    pub fn changes_made(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, OpOutcome::Applied | OpOutcome::Skipped))
            .count()
    }

    /// Number of leading operations whose effect is in place, suitable for
    /// [`revert`].
    ///
    /// This counts `AlreadySatisfied` records too, so reverting the prefix
    /// also removes state that existed before the pass. Use [`rollback`] to
    /// undo only what the pass itself changed.
    pub fn applied_prefix(&self) -> usize {
        self.records
            .iter()
            .take_while(|r| r.outcome.is_ok())
            .count()
    }

    /// Operations this pass changed the host for, in the order they ran.
    pub fn changed_operations(&self) -> impl DoubleEndedIterator<Item = &Operation> {
        self.records
            .iter()
            .filter(|r| r.outcome == OpOutcome::Applied)
            .map(|r| &r.operation)
    }

    /// The failed record, if any.
    pub fn failure(&self) -> Option<&OpRecord> {
        self.records
            .iter()
            .find(|r| matches!(r.outcome, OpOutcome::Failed(_)))
    }

    /// One line per operation.
    pub fn summary(&self) -> String {
        if self.records.is_empty() {
            return "No operations".to_string();
        }
        self.records
            .iter()
            .map(|r| format!("{:<17} {}", r.outcome.to_string(), r.operation))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Turn a failed or cancelled pass into an error.
    pub fn into_result(self) -> Result<Self> {
        let failed = self.records.iter().find_map(|r| match &r.outcome {
            OpOutcome::Failed(reason) => Some((r.operation.kind(), reason)),
            _ => None,
        });
        if let Some((kind, reason)) = failed {
            return Err(Error::OperationFailed {
                kind: kind.to_string(),
                reason: reason.clone(),
            });
        }
        if let Some(record) = self
            .records
            .iter()
            .find(|r| r.outcome == OpOutcome::Cancelled)
        {
            return Err(Error::Timeout {
                operation: format!("deadline before {}", record.operation.kind()),
            });
        }
        Ok(self)
    }

    fn push(&mut self, operation: &Operation, outcome: OpOutcome) {
        self.records.push(OpRecord {
            operation: operation.clone(),
            outcome,
        });
    }
}

/// Whether the effect of `op` is present on the host.
async fn is_present<H: HostNetwork + ?Sized>(
    host: &H,
    op: &Operation,
    limit: Option<Duration>,
) -> Result<bool> {
    match op {
        Operation::AssignAddress { interface, address } => {
            let addrs = bounded(limit, "address query", host.addresses(interface)).await?;
            Ok(addrs.iter().any(|a| a.address == *address))
        }
        Operation::RegisterTable { id, name } => {
            let tables = bounded(limit, "rt_tables read", host.route_tables()).await?;
            Ok(tables.check(*id, name)? == Registration::Present)
        }
        Operation::AddRule { .. } => {
            let Some(spec) = op.rule_spec() else {
                return Ok(false);
            };
            let rules = bounded(limit, "rule query", host.rules()).await?;
            Ok(rules.iter().any(|r| r.matches(&spec)))
        }
        Operation::AddRoute { table_id, .. } => {
            let Some(spec) = op.route_spec() else {
                return Ok(false);
            };
            let routes = bounded(limit, "route query", host.routes(*table_id)).await?;
            Ok(routes.iter().any(|r| r.matches(&spec)))
        }
    }
}

/// Make the change. `Ok(false)` means someone else made it first.
async fn perform<H: HostNetwork + ?Sized>(
    host: &H,
    op: &Operation,
    limit: Option<Duration>,
) -> Result<bool> {
    let kind = op.kind().to_string();
    match op {
        Operation::AssignAddress { interface, address } => {
            bounded(limit, &kind, host.add_address(interface, *address)).await?;
            Ok(true)
        }
        Operation::RegisterTable { id, name } => {
            bounded(limit, &kind, host.register_table(*id, name)).await
        }
        Operation::AddRule { .. } => match op.rule_spec() {
            Some(spec) => {
                bounded(limit, &kind, host.add_rule(&spec)).await?;
                Ok(true)
            }
            None => Ok(false),
        },
        Operation::AddRoute { .. } => match op.route_spec() {
            Some(spec) => {
                bounded(limit, &kind, host.add_route(&spec)).await?;
                Ok(true)
            }
            None => Ok(false),
        },
    }
}

/// Remove the change. `Ok(false)` means it was already gone.
async fn undo<H: HostNetwork + ?Sized>(
    host: &H,
    op: &Operation,
    limit: Option<Duration>,
) -> Result<bool> {
    let kind = format!("revert {}", op.kind());
    match op {
        Operation::AssignAddress { interface, address } => {
            bounded(limit, &kind, host.del_address(interface, *address)).await?;
            Ok(true)
        }
        Operation::RegisterTable { id, name } => {
            bounded(limit, &kind, host.unregister_table(*id, name)).await
        }
        Operation::AddRule { .. } => {
            let Some(mut spec) = op.rule_spec() else {
                return Ok(false);
            };
            // The kernel treats selectors missing from a delete request as
            // wildcards, so pin the priority of the exact rule to remove.
            if spec.priority.is_none() {
                let rules = bounded(limit, &kind, host.rules()).await?;
                match rules.iter().find(|r| r.matches(&spec)) {
                    Some(rule) => spec.priority = Some(rule.priority),
                    None => return Ok(false),
                }
            }
            bounded(limit, &kind, host.del_rule(&spec)).await?;
            Ok(true)
        }
        Operation::AddRoute { .. } => match op.route_spec() {
            Some(spec) => {
                bounded(limit, &kind, host.del_route(&spec)).await?;
                Ok(true)
            }
            None => Ok(false),
        },
    }
}

/// Apply `plan` to `host`, one operation at a time, in plan order.
pub async fn apply<H: HostNetwork + ?Sized>(
    host: &H,
    plan: &RoutePlan,
    options: &ApplyOptions,
) -> AppliedResult {
    let mut result = AppliedResult::default();
    let limit = options.op_timeout;

    for (i, op) in plan.operations().iter().enumerate() {
        if options.expired() {
            warn!(op = %op, "deadline passed, cancelling remaining operations");
            for rest in &plan.operations()[i..] {
                result.push(rest, OpOutcome::Cancelled);
            }
            break;
        }

        let outcome = match is_present(host, op, limit).await {
            Ok(true) => {
                debug!(op = %op, "already satisfied");
                OpOutcome::AlreadySatisfied
            }
            Ok(false) if options.dry_run => {
                info!(op = %op, "would apply");
                OpOutcome::Skipped
            }
            Ok(false) => match perform(host, op, limit).await {
                Ok(true) => {
                    info!(op = %op, "applied");
                    OpOutcome::Applied
                }
                Ok(false) => {
                    debug!(op = %op, "already satisfied");
                    OpOutcome::AlreadySatisfied
                }
                // Another writer got there between check and change. An
                // existing address may carry a different prefix, so only
                // rules and routes count as satisfied here.
                Err(e)
                    if e.is_already_exists()
                        && !matches!(op, Operation::AssignAddress { .. }) =>
                {
                    debug!(op = %op, "already satisfied");
                    OpOutcome::AlreadySatisfied
                }
                Err(e) => {
                    warn!(op = %op, error = %e, "failed");
                    OpOutcome::Failed(e.to_string())
                }
            },
            Err(e) => {
                warn!(op = %op, error = %e, "precondition check failed");
                OpOutcome::Failed(e.to_string())
            }
        };

        let failed = matches!(outcome, OpOutcome::Failed(_));
        result.push(op, outcome);
        if failed {
            break;
        }
    }

    result
}

/// Undo the first `applied_prefix` operations of `plan`, last one first.
///
/// Removes each operation's effect whether or not this engine created it.
/// An operation whose effect is already gone reports `AlreadySatisfied`.
/// Stops at the first failure. `dry_run` and `deadline` behave as in [`apply`].
pub async fn revert<H: HostNetwork + ?Sized>(
    host: &H,
    plan: &RoutePlan,
    applied_prefix: usize,
    options: &ApplyOptions,
) -> AppliedResult {
    let count = applied_prefix.min(plan.len());
    let ops: Vec<&Operation> = plan.operations()[..count].iter().rev().collect();
    undo_all(host, &ops, options).await
}

/// Undo only the operations `applied` records as changed, last one first.
///
/// State that was already in place before that pass is left alone.
pub async fn rollback<H: HostNetwork + ?Sized>(
    host: &H,
    applied: &AppliedResult,
    options: &ApplyOptions,
) -> AppliedResult {
    let ops: Vec<&Operation> = applied.changed_operations().rev().collect();
    undo_all(host, &ops, options).await
}

async fn undo_all<H: HostNetwork + ?Sized>(
    host: &H,
    ops: &[&Operation],
    options: &ApplyOptions,
) -> AppliedResult {
    let mut result = AppliedResult::default();
    let limit = options.op_timeout;

    for (i, op) in ops.iter().enumerate() {
        if options.expired() {
            warn!(op = %op, "deadline passed, cancelling remaining reverts");
            for rest in &ops[i..] {
                result.push(rest, OpOutcome::Cancelled);
            }
            break;
        }

        let outcome = match is_present(host, op, limit).await {
            Ok(false) => {
                debug!(op = %op, "already absent");
                OpOutcome::AlreadySatisfied
            }
            Ok(true) if options.dry_run => {
                info!(op = %op, "would revert");
                OpOutcome::Skipped
            }
            Ok(true) => match undo(host, op, limit).await {
                Ok(true) => {
                    info!(op = %op, "reverted");
                    OpOutcome::Applied
                }
                Ok(false) => {
                    debug!(op = %op, "already absent");
                    OpOutcome::AlreadySatisfied
                }
                Err(e) if e.is_not_found() => {
                    debug!(op = %op, "already absent");
                    OpOutcome::AlreadySatisfied
                }
                Err(e) => {
                    warn!(op = %op, error = %e, "revert failed");
                    OpOutcome::Failed(e.to_string())
                }
            },
            // A conflicting table entry is not ours to remove.
            Err(e @ (Error::TableConflict { .. } | Error::TableIdConflict { .. })) => {
                debug!(op = %op, reason = %e, "not registered by this intent");
                OpOutcome::AlreadySatisfied
            }
            Err(e) => {
                warn!(op = %op, error = %e, "revert check failed");
                OpOutcome::Failed(e.to_string())
            }
        };

        let failed = matches!(outcome, OpOutcome::Failed(_));
        result.push(op, outcome);
        if failed {
            break;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use async_trait::async_trait;

    use super::*;
    use crate::host::{
        DefaultRoute, FailPoint, HostNetwork as _, InterfaceAddress, MemoryHost, NetlinkHost,
        PolicyRule, RouteSpec, RuleSpec, TableRoute,
    };
    use crate::intent::{Ipv4Prefix, NetworkIntent};
    use crate::resolve::resolve;
    use crate::rt_tables::TableRegistry;

    /// A host whose table registry reads return an out-of-date snapshot, as
    /// when another writer edits the file between check and change.
    struct StaleTables {
        inner: MemoryHost,
        seen: TableRegistry,
    }

    #[async_trait]
    impl HostNetwork for StaleTables {
        async fn default_routes(&self) -> Result<Vec<DefaultRoute>> {
            self.inner.default_routes().await
        }
        async fn addresses(&self, interface: &str) -> Result<Vec<InterfaceAddress>> {
            self.inner.addresses(interface).await
        }
        async fn interface_index(&self, interface: &str) -> Result<u32> {
            self.inner.interface_index(interface).await
        }
        async fn rules(&self) -> Result<Vec<PolicyRule>> {
            self.inner.rules().await
        }
        async fn routes(&self, table_id: u32) -> Result<Vec<TableRoute>> {
            self.inner.routes(table_id).await
        }
        async fn route_tables(&self) -> Result<TableRegistry> {
            Ok(self.seen.clone())
        }
        async fn add_address(&self, interface: &str, address: Ipv4Prefix) -> Result<()> {
            self.inner.add_address(interface, address).await
        }
        async fn del_address(&self, interface: &str, address: Ipv4Prefix) -> Result<()> {
            self.inner.del_address(interface, address).await
        }
        async fn register_table(&self, id: u32, name: &str) -> Result<bool> {
            self.inner.register_table(id, name).await
        }
        async fn unregister_table(&self, id: u32, name: &str) -> Result<bool> {
            self.inner.unregister_table(id, name).await
        }
        async fn add_rule(&self, rule: &RuleSpec) -> Result<()> {
            self.inner.add_rule(rule).await
        }
        async fn del_rule(&self, rule: &RuleSpec) -> Result<()> {
            self.inner.del_rule(rule).await
        }
        async fn add_route(&self, route: &RouteSpec) -> Result<()> {
            self.inner.add_route(route).await
        }
        async fn del_route(&self, route: &RouteSpec) -> Result<()> {
            self.inner.del_route(route).await
        }
    }

    fn host() -> MemoryHost {
        MemoryHost::new()
            .with_interface("eth0", 2, &["10.0.1.5/24"])
            .with_default_route("eth0", Ipv4Addr::new(10, 0, 1, 1))
    }

    async fn plan_for(host: &MemoryHost) -> RoutePlan {
        let intent = NetworkIntent::new(
            "10.0.0.5/24".parse().unwrap(),
            "10.0.0.0/24".parse().unwrap(),
            200,
            "secondary",
            Ipv4Addr::new(10, 0, 1, 1),
        )
        .unwrap();
        let iface = resolve(host).await.unwrap();
        let tables = host.route_tables().await.unwrap();
        RoutePlan::build(&intent, &iface, &tables).unwrap()
    }

    #[tokio::test]
    async fn test_apply_then_reapply() {
        let host = host();
        let plan = plan_for(&host).await;

        let first = apply(&host, &plan, &ApplyOptions::default()).await;
        assert!(first.is_success());
        assert_eq!(first.changes_made(), 4);
        assert!(first.outcomes().all(|o| *o == OpOutcome::Applied));

        let state = host.snapshot();
        let second = apply(&host, &plan, &ApplyOptions::default()).await;
        assert!(second.outcomes().all(|o| *o == OpOutcome::AlreadySatisfied));
        assert_eq!(second.changes_made(), 0);
        assert_eq!(host.snapshot(), state);
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let host = host();
        let plan = plan_for(&host).await;
        let before = host.snapshot();

        let result = apply(&host, &plan, &ApplyOptions::dry_run()).await;
        assert!(result.outcomes().all(|o| *o == OpOutcome::Skipped));
        assert_eq!(result.changes_made(), 4);
        assert!(result.is_success());
        assert_eq!(host.snapshot(), before);
        assert_eq!(host.mutations(), 0);
    }

    #[tokio::test]
    async fn test_failure_stops_and_reports() {
        let host = host().fail_on(FailPoint::AddRule);
        let plan = plan_for(&host).await;

        let result = apply(&host, &plan, &ApplyOptions::default()).await;
        let outcomes: Vec<&OpOutcome> = result.outcomes().collect();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(*outcomes[0], OpOutcome::Applied);
        assert_eq!(*outcomes[1], OpOutcome::Applied);
        assert!(matches!(outcomes[2], OpOutcome::Failed(_)));
        assert_eq!(result.applied_prefix(), 2);
        assert!(host.routes(200).await.unwrap().is_empty());

        let err = result.into_result().unwrap_err();
        assert!(matches!(err, Error::OperationFailed { ref kind, .. } if kind == "AddRule"));
    }

    #[tokio::test]
    async fn test_conflict_at_apply_time_fails() {
        let host = host();
        let plan = plan_for(&host).await;
        // Someone claims the name between planning and applying.
        host.register_table(100, "secondary").await.unwrap();

        let result = apply(&host, &plan, &ApplyOptions::default()).await;
        assert_eq!(result.records().len(), 2);
        assert!(matches!(result.records()[1].outcome, OpOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_expired_deadline_cancels_everything() {
        let host = host();
        let plan = plan_for(&host).await;
        let options = ApplyOptions {
            deadline: Some(Instant::now()),
            ..Default::default()
        };

        let result = apply(&host, &plan, &options).await;
        assert_eq!(result.records().len(), 4);
        assert!(result.outcomes().all(|o| *o == OpOutcome::Cancelled));
        assert!(!result.is_success());
        assert_eq!(host.mutations(), 0);
        assert!(matches!(result.into_result(), Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_op_timeout_is_a_failure() {
        let host = host();
        let plan = plan_for(&host).await;
        let slow = MemoryHost::from_state(host.snapshot()).with_delay(Duration::from_millis(200));
        let options = ApplyOptions {
            op_timeout: Some(Duration::from_millis(10)),
            ..Default::default()
        };

        let result = apply(&slow, &plan, &options).await;
        assert_eq!(result.records().len(), 1);
        assert!(matches!(&result.records()[0].outcome, OpOutcome::Failed(r) if r.contains("timed out")));
    }

    #[tokio::test]
    async fn test_revert_partial_apply() {
        let host = host().fail_on(FailPoint::AddRoute);
        let before = host.snapshot();
        let plan = plan_for(&host).await;

        let applied = apply(&host, &plan, &ApplyOptions::default()).await;
        assert_eq!(applied.applied_prefix(), 3);
        host.clear_failures();

        let reverted = revert(&host, &plan, applied.applied_prefix(), &ApplyOptions::default()).await;
        let kinds: Vec<String> = reverted
            .records()
            .iter()
            .map(|r| r.operation.kind().to_string())
            .collect();
        assert_eq!(kinds, ["AddRule", "RegisterTable", "AssignAddress"]);
        assert!(reverted.outcomes().all(|o| *o == OpOutcome::Applied));
        assert_eq!(host.snapshot(), before);

        let again = revert(&host, &plan, 4, &ApplyOptions::default()).await;
        assert!(again.outcomes().all(|o| *o == OpOutcome::AlreadySatisfied));
    }

    #[tokio::test]
    async fn test_revert_leaves_foreign_table_entry() {
        let host = host();
        let plan = plan_for(&host).await;
        host.register_table(200, "other").await.unwrap();

        let result = revert(&host, &plan, 2, &ApplyOptions::default()).await;
        assert!(result.outcomes().all(|o| *o == OpOutcome::AlreadySatisfied));
        assert_eq!(host.snapshot().tables.name_of(200), Some("other"));
    }

    #[tokio::test]
    async fn test_summary() {
        assert_eq!(AppliedResult::default().summary(), "No operations");

        let host = host();
        let plan = plan_for(&host).await;
        let result = apply(&host, &plan, &ApplyOptions::default()).await;
        let summary = result.summary();
        let first = summary.lines().next().unwrap();
        assert!(first.starts_with("applied"));
        assert!(first.ends_with("AssignAddress(10.0.0.5/24 dev eth0)"));
        assert_eq!(summary.lines().count(), 4);
    }

    #[tokio::test]
    async fn test_table_registered_concurrently_is_satisfied() {
        let host = host();
        let plan = plan_for(&host).await;
        let racy = StaleTables {
            seen: host.snapshot().tables,
            inner: host,
        };
        racy.inner.register_table(200, "secondary").await.unwrap();

        let result = apply(&racy, &plan, &ApplyOptions::default()).await;
        assert!(result.is_success());
        assert_eq!(result.records()[1].outcome, OpOutcome::AlreadySatisfied);
        assert!(
            result
                .changed_operations()
                .all(|op| !matches!(op, Operation::RegisterTable { .. }))
        );
    }

    #[tokio::test]
    async fn test_revert_of_vanished_table_is_satisfied() {
        let host = host();
        let plan = plan_for(&host).await;
        let mut seen = host.snapshot().tables;
        seen.insert(200, "secondary").unwrap();
        let racy = StaleTables { inner: host, seen };

        let result = revert(&racy, &plan, 2, &ApplyOptions::default()).await;
        assert_eq!(result.records()[0].outcome, OpOutcome::AlreadySatisfied);
        assert_eq!(racy.inner.mutations(), 0);
    }

    #[tokio::test]
    async fn test_revert_leaves_drop_in_table_registered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt_tables");
        std::fs::write(&path, "254\tmain\n").unwrap();
        std::fs::create_dir(dir.path().join("rt_tables.d")).unwrap();
        std::fs::write(dir.path().join("rt_tables.d/cloud.conf"), "200 secondary\n").unwrap();

        let plan = plan_for(&host()).await;
        let netlink = NetlinkHost::new(&path).unwrap();
        let result = revert(&netlink, &plan, 2, &ApplyOptions::default()).await;

        assert_eq!(result.records().len(), 1);
        assert!(
            matches!(&result.records()[0].outcome, OpOutcome::Failed(reason) if reason.contains("drop-in"))
        );
        assert!(result.into_result().is_err());
        let tables = TableRegistry::load(&path).unwrap();
        assert_eq!(tables.id_of("secondary"), Some(200));
    }

    #[tokio::test]
    async fn test_rollback_keeps_existing_state() {
        let host = MemoryHost::new()
            .with_interface("eth0", 2, &["10.0.1.5/24", "10.0.0.5/24"])
            .with_default_route("eth0", Ipv4Addr::new(10, 0, 1, 1));
        let before = host.snapshot();
        let plan = plan_for(&host).await;

        let applied = apply(&host, &plan, &ApplyOptions::default()).await;
        assert_eq!(applied.records()[0].outcome, OpOutcome::AlreadySatisfied);
        assert_eq!(applied.changed_operations().count(), 3);

        let rolled = rollback(&host, &applied, &ApplyOptions::default()).await;
        let kinds: Vec<String> = rolled
            .records()
            .iter()
            .map(|r| r.operation.kind().to_string())
            .collect();
        assert_eq!(kinds, ["AddRoute", "AddRule", "RegisterTable"]);
        assert!(rolled.outcomes().all(|o| *o == OpOutcome::Applied));
        assert_eq!(host.snapshot(), before);
    }

    #[tokio::test]
    async fn test_marked_rule_does_not_satisfy_add_rule() {
        let marked = PolicyRule {
            source: Some("10.0.0.0/24".parse().unwrap()),
            destination: None,
            table_id: 200,
            priority: 100,
            qualifiers: vec!["fwmark 0x1/0xffffffff".into()],
        };
        let host = host().with_rule(marked.clone());
        let before = host.snapshot();
        let plan = plan_for(&host).await;

        let applied = apply(&host, &plan, &ApplyOptions::default()).await;
        assert!(applied.is_success());
        assert_eq!(applied.records()[2].outcome, OpOutcome::Applied);
        let rules = host.rules().await.unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().any(|r| r.qualifiers.is_empty() && r.table_id == 200));

        let reverted = revert(&host, &plan, 4, &ApplyOptions::default()).await;
        assert!(reverted.is_success());
        assert_eq!(host.rules().await.unwrap(), [marked]);
        assert_eq!(host.snapshot(), before);
    }
}
