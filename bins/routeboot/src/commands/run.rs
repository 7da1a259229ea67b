//! run command - the whole pipeline.

use clap::Args;

use super::{GlobalArgs, IntentArgs, apply_options};

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub intent: IntentArgs,

    /// Check every operation without changing anything or installing.
    #[arg(long)]
    pub dry_run: bool,

    /// Stop starting operations after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Print JSON.
    #[arg(short, long)]
    pub json: bool,
}

pub async fn run(global: &GlobalArgs, args: RunArgs) -> anyhow::Result<()> {
    let intent = args.intent.load()?;
    let config = global.engine_config()?;
    let options = apply_options(&config, args.dry_run, args.deadline)?;
    let engine = global.engine(config)?;

    let report = engine.run(&intent, &options).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.applied.summary());
        if let Some(install) = &report.install {
            println!("boot unit {}", install.unit);
        }
    }

    report.applied.into_result()?;
    Ok(())
}
