//! Route plan construction.
//!
//! [`RoutePlan::build`] is pure: the table registry snapshot is read by the
//! caller and passed in, so building a plan never touches the host.

use std::fmt;
use std::fmt::Write as _;
use std::net::Ipv4Addr;

use serde::Serialize;

use crate::error::Result;
use crate::host::{RouteSpec, RuleSpec};
use crate::intent::{Ipv4Prefix, NetworkIntent, RuleSelector};
use crate::resolve::ResolvedInterface;
use crate::rt_tables::TableRegistry;

/// The kind of a plan operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OpKind {
    AssignAddress,
    RegisterTable,
    AddRule,
    AddRoute,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AssignAddress => "AssignAddress",
            Self::RegisterTable => "RegisterTable",
            Self::AddRule => "AddRule",
            Self::AddRoute => "AddRoute",
        };
        f.write_str(name)
    }
}

/// One step of a plan, carrying everything needed to check and perform it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Add the secondary address to the default interface.
    AssignAddress {
        interface: String,
        address: Ipv4Prefix,
    },
    /// Name the routing table in the iproute2 registry.
    RegisterTable { id: u32, name: String },
    /// Send traffic matching `prefix` to the table.
    AddRule {
        selector: RuleSelector,
        prefix: Ipv4Prefix,
        table_id: u32,
        table_name: String,
        priority: Option<u32>,
    },
    /// Default route inside the table.
    AddRoute {
        gateway: Ipv4Addr,
        source: Ipv4Addr,
        interface: String,
        table_id: u32,
        table_name: String,
    },
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        match self {
            Self::AssignAddress { .. } => OpKind::AssignAddress,
            Self::RegisterTable { .. } => OpKind::RegisterTable,
            Self::AddRule { .. } => OpKind::AddRule,
            Self::AddRoute { .. } => OpKind::AddRoute,
        }
    }

    /// One-line, `ip`-like description.
    pub fn describe(&self) -> String {
        match self {
            Self::AssignAddress { interface, address } => format!("{address} dev {interface}"),
            Self::RegisterTable { id, name } => format!("table {id} {name}"),
            Self::AddRule {
                selector,
                prefix,
                table_name,
                priority,
                ..
            } => {
                let mut s = format!("{selector} {prefix} lookup {table_name}");
                if let Some(prio) = priority {
                    let _ = write!(s, " priority {prio}");
                }
                s
            }
            Self::AddRoute {
                gateway,
                source,
                interface,
                table_name,
                ..
            } => format!("default via {gateway} src {source} dev {interface} table {table_name}"),
        }
    }

    /// The rule this operation adds, if it is an `AddRule`.
    pub fn rule_spec(&self) -> Option<RuleSpec> {
        match self {
            Self::AddRule {
                selector,
                prefix,
                table_id,
                priority,
                ..
            } => Some(RuleSpec {
                selector: *selector,
                prefix: *prefix,
                table_id: *table_id,
                priority: *priority,
            }),
            _ => None,
        }
    }

    /// The route this operation adds, if it is an `AddRoute`.
    pub fn route_spec(&self) -> Option<RouteSpec> {
        match self {
            Self::AddRoute {
                gateway,
                source,
                interface,
                table_id,
                ..
            } => Some(RouteSpec {
                gateway: *gateway,
                source: *source,
                interface: interface.clone(),
                table_id: *table_id,
            }),
            _ => None,
        }
    }

    /// Guarded shell equivalent; running it twice changes nothing.
    fn script_line(&self) -> String {
        match self {
            Self::AssignAddress { interface, address } => format!(
                "ip -4 addr show dev {interface} | grep -qw 'inet {address}' || ip addr add {address} dev {interface}"
            ),
            Self::RegisterTable { id, name } => format!(
                "grep -Eq '^[[:space:]]*{id}[[:space:]]+{name}([[:space:]]|$)' /etc/iproute2/rt_tables || printf '%s\\t%s\\n' {id} {name} >> /etc/iproute2/rt_tables"
            ),
            Self::AddRule {
                selector,
                prefix,
                table_name,
                priority,
                ..
            } => {
                let prio = priority.map(|p| format!(" priority {p}")).unwrap_or_default();
                format!(
                    "ip rule show | grep -qw '{selector} {prefix} lookup {table_name}' || ip rule add {selector} {prefix} table {table_name}{prio}"
                )
            }
            Self::AddRoute {
                gateway,
                source,
                interface,
                table_name,
                ..
            } => format!(
                "ip route replace default via {gateway} src {source} dev {interface} table {table_name}"
            ),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.describe())
    }
}

/// An ordered list of operations realising one intent on one interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutePlan {
    intent: NetworkIntent,
    interface: ResolvedInterface,
    operations: Vec<Operation>,
}

impl RoutePlan {
    /// Build the plan for `intent` on `iface`.
    ///
    /// Fails with `TableConflict` if `tables` maps the intent's table name to
    /// another id, and with `TableIdConflict` if the id carries another name.
    pub fn build(
        intent: &NetworkIntent,
        iface: &ResolvedInterface,
        tables: &TableRegistry,
    ) -> Result<Self> {
        if let Some(err) = tables.conflict_for(intent.table_id(), intent.table_name()) {
            return Err(err);
        }

        let table_name = intent.table_name().to_string();
        let operations = vec![
            Operation::AssignAddress {
                interface: iface.name.clone(),
                address: intent.secondary_address(),
            },
            Operation::RegisterTable {
                id: intent.table_id(),
                name: table_name.clone(),
            },
            Operation::AddRule {
                selector: intent.rule_selector(),
                prefix: intent.destination_cidr(),
                table_id: intent.table_id(),
                table_name: table_name.clone(),
                priority: intent.rule_priority(),
            },
            Operation::AddRoute {
                gateway: intent.gateway(),
                source: intent.secondary_address().addr(),
                interface: iface.name.clone(),
                table_id: intent.table_id(),
                table_name,
            },
        ];

        Ok(Self {
            intent: intent.clone(),
            interface: iface.clone(),
            operations,
        })
    }

    pub fn intent(&self) -> &NetworkIntent {
        &self.intent
    }

    pub fn interface(&self) -> &ResolvedInterface {
        &self.interface
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Render a re-runnable POSIX shell script of guarded `ip` commands.
    pub fn render_script(&self) -> String {
        let mut script = String::from("#!/bin/sh\n");
        let _ = writeln!(
            script,
            "# routeboot plan for table {} ({}) on {}",
            self.intent.table_name(),
            self.intent.table_id(),
            self.interface.name
        );
        script.push_str("set -e\n");
        for op in &self.operations {
            let _ = writeln!(script, "\n# {op}");
            script.push_str(&op.script_line());
            script.push('\n');
        }
        script
    }
}

impl fmt::Display for RoutePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, op) in self.operations.iter().enumerate() {
            writeln!(f, "{:>2}. {:<14} {}", i + 1, op.kind().to_string(), op.describe())?;
        }
        Ok(())
    }
}
