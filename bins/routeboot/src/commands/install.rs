//! install and uninstall commands - manage the boot unit.

use std::path::PathBuf;

use clap::Args;

use super::{GlobalArgs, IntentArgs};

#[derive(Args)]
pub struct InstallArgs {
    #[command(flatten)]
    pub intent: IntentArgs,

    /// Directory to write the unit file to.
    #[arg(long)]
    pub unit_dir: Option<PathBuf>,

    /// Directory to persist the intent in.
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct UninstallArgs {
    /// Table whose unit to remove.
    #[arg(long)]
    pub table_name: String,

    #[arg(long)]
    pub unit_dir: Option<PathBuf>,

    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

pub async fn run(global: &GlobalArgs, args: InstallArgs) -> anyhow::Result<()> {
    let intent = args.intent.load()?;
    let mut config = global.engine_config()?;
    if let Some(dir) = args.unit_dir {
        config.unit_dir = dir;
    }
    if let Some(dir) = args.state_dir {
        config.state_dir = dir;
    }
    let engine = global.engine(config)?;

    let plan = engine.plan(&intent).await?;
    let report = engine.install(&plan).await?;
    println!(
        "installed {} (intent {}{})",
        report.unit,
        report.intent_path.display(),
        if report.unit_changed { ", unit updated" } else { "" }
    );
    Ok(())
}

pub async fn run_uninstall(global: &GlobalArgs, args: UninstallArgs) -> anyhow::Result<()> {
    let mut config = global.engine_config()?;
    if let Some(dir) = args.unit_dir {
        config.unit_dir = dir;
    }
    if let Some(dir) = args.state_dir {
        config.state_dir = dir;
    }
    let engine = global.engine(config)?;

    let report = engine.uninstall(&args.table_name).await?;
    if report.unit_removed {
        println!("removed {}", report.unit);
    } else {
        println!("{} was not installed", report.unit);
    }
    Ok(())
}
