//! revert command - undo an intent.

use clap::Args;

use super::{GlobalArgs, IntentArgs, apply_options, print_result};

#[derive(Args)]
pub struct RevertArgs {
    #[command(flatten)]
    pub intent: IntentArgs,

    /// Undo only the first N operations of the plan (default: all).
    #[arg(long, value_name = "N")]
    pub prefix: Option<usize>,

    /// Check every operation without changing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Print JSON.
    #[arg(short, long)]
    pub json: bool,
}

pub async fn run(global: &GlobalArgs, args: RevertArgs) -> anyhow::Result<()> {
    let intent = args.intent.load()?;
    let config = global.engine_config()?;
    let options = apply_options(&config, args.dry_run, None)?;
    let engine = global.engine(config)?;

    let plan = engine.plan(&intent).await?;
    let prefix = args.prefix.unwrap_or(plan.len());
    let result = engine.revert(&plan, prefix, &options).await;
    print_result(&result, args.json)?;

    result.into_result()?;
    Ok(())
}
