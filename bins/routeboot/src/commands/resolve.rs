//! resolve command - show the default interface.

use clap::Args;

use super::GlobalArgs;

#[derive(Args)]
pub struct ResolveArgs {
    /// Print JSON.
    #[arg(short, long)]
    pub json: bool,
}

pub async fn run(global: &GlobalArgs, args: ResolveArgs) -> anyhow::Result<()> {
    let engine = global.engine(global.engine_config()?)?;
    let iface = engine.resolve().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&iface)?);
    } else {
        println!("interface: {} (index {})", iface.name, iface.index);
        println!("address:   {}", iface.primary_address);
        match iface.gateway {
            Some(gw) => println!("gateway:   {gw}"),
            None => println!("gateway:   none"),
        }
    }
    Ok(())
}
