//! apply command - apply an intent once.

use clap::Args;

use super::{GlobalArgs, IntentArgs, apply_options, print_result};

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub intent: IntentArgs,

    /// Check every operation without changing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Undo what this pass changed if an operation fails.
    #[arg(long, conflicts_with = "dry_run")]
    pub rollback: bool,

    /// Stop starting operations after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Print JSON.
    #[arg(short, long)]
    pub json: bool,
}

pub async fn run(global: &GlobalArgs, args: ApplyArgs) -> anyhow::Result<()> {
    let intent = args.intent.load()?;
    let config = global.engine_config()?;
    let options = apply_options(&config, args.dry_run, args.deadline)?;
    let engine = global.engine(config)?;

    let plan = engine.plan(&intent).await?;
    let result = engine.apply(&plan, &options).await;
    print_result(&result, args.json)?;

    if args.rollback && !result.is_success() {
        let rolled = engine.rollback(&result, &options).await;
        eprintln!("Rolling back:");
        print_result(&rolled, args.json)?;
        rolled.into_result()?;
    }

    result.into_result()?;
    Ok(())
}
