//! repricer - rewrites prices in HTML as other units

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use repricer::cli::{Cli, Commands, UnitsCommands};
use repricer::error::Result;

mod commands;
mod utils;

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repricer=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        if let Some(hint) = e.hint() {
            eprintln!("\n{}", hint);
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Scanning
        Commands::Scan { file, output, json } => commands::cmd_scan(&file, output, json),
        Commands::Watch { file, output, max_passes } => {
            commands::cmd_watch(&file, output, max_passes)
        }
        Commands::Detect { text, symbol, json } => commands::cmd_detect(&text, symbol, json),

        // Settings
        Commands::Units(UnitsCommands::Show { json }) => commands::cmd_units_show(json),
        Commands::Units(UnitsCommands::Set { name, value }) => commands::cmd_units_set(&name, value),
        Commands::Units(UnitsCommands::Remove { name }) => commands::cmd_units_remove(&name),
        Commands::Replace { state } => commands::cmd_replace(state),
        Commands::Config => commands::cmd_config(),
        Commands::Init { force } => commands::cmd_init(force),

        // Miscellaneous
        Commands::Completions { shell } => commands::cmd_completions(shell),
    }
}
