//! plan command - show what an intent would do.

use clap::{Args, ValueEnum};
use routeboot::MemoryHost;
use tracing::info;

use super::{GlobalArgs, IntentArgs, print_result};

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub intent: IntentArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: PlanFormat,

    /// Also apply the plan to an in-memory copy of the host and show the
    /// outcome of each operation.
    #[arg(long)]
    pub simulate: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum PlanFormat {
    Text,
    /// A shell script of guarded `ip` commands.
    Script,
    Json,
}

pub async fn run(global: &GlobalArgs, args: PlanArgs) -> anyhow::Result<()> {
    let intent = args.intent.load()?;
    let engine = global.engine(global.engine_config()?)?;
    let plan = engine.plan(&intent).await?;

    match args.format {
        PlanFormat::Text => {
            println!("interface {}", plan.interface());
            print!("{plan}");
        }
        PlanFormat::Script => print!("{}", plan.render_script()),
        PlanFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
    }

    if args.simulate {
        let copy = MemoryHost::capture(engine.host(), &[intent.table_id()]).await?;
        info!("simulating against a copy of the host");
        let result = routeboot::apply(&copy, &plan, &engine.apply_options()).await;
        println!();
        print_result(&result, matches!(args.format, PlanFormat::Json))?;
    }
    Ok(())
}
