//! routeboot - declarative secondary-route bootstrap.
//!
//! Resolves the default interface, plans and applies a secondary address,
//! routing table, rule and route, and installs a boot unit that repeats it.

mod commands;

use clap::{Parser, Subcommand};

use commands::GlobalArgs;

#[derive(Parser)]
#[command(name = "routeboot", version)]
#[command(about = "Declarative secondary-route bootstrap", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the interface carrying the default route.
    Resolve(commands::resolve::ResolveArgs),

    /// Show the plan for an intent without changing anything.
    Plan(commands::plan::PlanArgs),

    /// Apply an intent to the host.
    Apply(commands::apply::ApplyArgs),

    /// Undo the operations of an intent, last one first.
    Revert(commands::revert::RevertArgs),

    /// Install the boot unit that re-applies an intent.
    Install(commands::install::InstallArgs),

    /// Remove the boot unit for a table.
    Uninstall(commands::install::UninstallArgs),

    /// Resolve, plan, apply and install in one go.
    Run(commands::run::RunArgs),

    /// Print an example intent file.
    Example(commands::example::ExampleArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.global.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Resolve(args) => commands::resolve::run(&cli.global, args).await,
        Command::Plan(args) => commands::plan::run(&cli.global, args).await,
        Command::Apply(args) => commands::apply::run(&cli.global, args).await,
        Command::Revert(args) => commands::revert::run(&cli.global, args).await,
        Command::Install(args) => commands::install::run(&cli.global, args).await,
        Command::Uninstall(args) => commands::install::run_uninstall(&cli.global, args).await,
        Command::Run(args) => commands::run::run(&cli.global, args).await,
        Command::Example(args) => commands::example::run(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
