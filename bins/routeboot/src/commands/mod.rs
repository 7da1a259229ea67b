//! Subcommands and the flags they share.

pub mod apply;
pub mod example;
pub mod install;
pub mod plan;
pub mod resolve;
pub mod revert;
pub mod run;

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{ArgAction, Args};
use routeboot::intent::GatewaySpec;
use routeboot::{
    AppliedResult, ApplyOptions, Engine, EngineConfig, IntentFile, Ipv4Prefix, NetlinkHost,
    NetworkIntent, RuleSelector, Systemd,
};

/// Flags accepted by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// More logging (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Engine config file (YAML).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Work inside this named network namespace.
    #[arg(long, global = true)]
    pub netns: Option<String>,

    /// iproute2 table registry to use instead of the configured one.
    #[arg(long, global = true)]
    pub rt_tables: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(path) = &self.rt_tables {
            config.rt_tables_path = path.clone();
        }
        Ok(config)
    }

    pub fn host(&self, config: &EngineConfig) -> anyhow::Result<NetlinkHost> {
        let host = match &self.netns {
            Some(ns) => NetlinkHost::in_namespace(ns, &config.rt_tables_path)
                .with_context(|| format!("opening namespace {ns}"))?,
            None => NetlinkHost::new(&config.rt_tables_path)?,
        };
        Ok(host)
    }

    /// An engine over the real host and systemd.
    pub fn engine(&self, config: EngineConfig) -> anyhow::Result<Engine<NetlinkHost, Systemd>> {
        let host = self.host(&config)?;
        let systemd = Systemd::new(&config.unit_dir);
        Ok(Engine::new(host, systemd, config).with_exec_args(self.exec_args()))
    }

    /// Global flags the boot unit has to repeat.
    fn exec_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.config {
            args.extend(["--config".to_string(), absolute(path)]);
        }
        if let Some(ns) = &self.netns {
            args.extend(["--netns".to_string(), ns.clone()]);
        }
        if let Some(path) = &self.rt_tables {
            args.extend(["--rt-tables".to_string(), absolute(path)]);
        }
        args
    }
}

fn absolute(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Where the intent comes from: a file, flags, or a file amended by flags.
#[derive(Args, Debug)]
pub struct IntentArgs {
    /// Intent file (YAML, or JSON with a .json extension).
    #[arg(short, long)]
    pub intent: Option<PathBuf>,

    /// Secondary address with prefix, e.g. 10.0.0.5/24.
    #[arg(long)]
    pub secondary: Option<Ipv4Prefix>,

    /// Prefix the policy rule matches.
    #[arg(long)]
    pub destination: Option<Ipv4Prefix>,

    #[arg(long)]
    pub table_id: Option<u32>,

    #[arg(long)]
    pub table_name: Option<String>,

    /// Next hop of the table's default route.
    #[arg(long, conflicts_with = "gateway_subnet")]
    pub gateway: Option<Ipv4Addr>,

    /// Use the first host of this subnet as the gateway.
    #[arg(long)]
    pub gateway_subnet: Option<Ipv4Prefix>,

    /// Match packets from or to the destination prefix.
    #[arg(long)]
    pub rule: Option<RuleSelector>,

    #[arg(long)]
    pub rule_priority: Option<u32>,
}

impl IntentArgs {
    pub fn load(&self) -> anyhow::Result<NetworkIntent> {
        let gateway = match (self.gateway, self.gateway_subnet) {
            (Some(addr), _) => Some(GatewaySpec::Address(addr)),
            (None, Some(subnet)) => Some(GatewaySpec::Subnet { subnet }),
            (None, None) => None,
        };

        let mut file = match &self.intent {
            Some(path) => IntentFile::load(path)
                .with_context(|| format!("loading intent {}", path.display()))?,
            None => IntentFile {
                secondary_address: self
                    .secondary
                    .context("--secondary is required without --intent")?,
                destination_cidr: self
                    .destination
                    .context("--destination is required without --intent")?,
                table_id: self
                    .table_id
                    .context("--table-id is required without --intent")?,
                table_name: self
                    .table_name
                    .clone()
                    .context("--table-name is required without --intent")?,
                gateway: gateway
                    .clone()
                    .context("--gateway or --gateway-subnet is required without --intent")?,
                rule: None,
                rule_priority: None,
            },
        };

        if let Some(v) = self.secondary {
            file.secondary_address = v;
        }
        if let Some(v) = self.destination {
            file.destination_cidr = v;
        }
        if let Some(v) = self.table_id {
            file.table_id = v;
        }
        if let Some(v) = &self.table_name {
            file.table_name = v.clone();
        }
        if let Some(v) = gateway {
            file.gateway = v;
        }
        if self.rule.is_some() {
            file.rule = self.rule;
        }
        if self.rule_priority.is_some() {
            file.rule_priority = self.rule_priority;
        }

        Ok(file.into_intent()?)
    }
}

/// Options for an apply or revert pass from the command line.
pub fn apply_options(
    config: &EngineConfig,
    dry_run: bool,
    deadline_secs: Option<u64>,
) -> anyhow::Result<ApplyOptions> {
    let deadline = match deadline_secs {
        Some(secs) => Some(
            Instant::now()
                .checked_add(Duration::from_secs(secs))
                .with_context(|| format!("--deadline {secs} is out of range"))?,
        ),
        None => None,
    };
    Ok(ApplyOptions {
        dry_run,
        deadline,
        op_timeout: Some(config.op_timeout),
    })
}

/// Print a pass as a table or JSON.
pub fn print_result(result: &AppliedResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        println!("{}", result.summary());
    }
    Ok(())
}
