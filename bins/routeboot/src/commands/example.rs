//! example command - print an example intent file.

use clap::{Args, ValueEnum};
use routeboot::IntentFile;

#[derive(Args)]
pub struct ExampleArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "yaml")]
    pub format: OutputFormat,
}

#[derive(Clone, ValueEnum)]
pub enum OutputFormat {
    Yaml,
    Json,
}

const HEADER: &str = "\
# routeboot intent
#
# Adds secondary_address to the default interface, registers table_name as
# table_id, sends traffic from destination_cidr to that table and gives the
# table a default route via the gateway. The gateway is either an address or
# { subnet: CIDR }, meaning the first host of that subnet.
";

pub fn run(args: ExampleArgs) -> anyhow::Result<()> {
    let example = IntentFile::example();
    match args.format {
        OutputFormat::Yaml => {
            print!("{HEADER}{}", serde_yaml::to_string(&example)?);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&example)?);
        }
    }
    Ok(())
}
