//! Main entry point for the dual orchestrator CLI.

use anyhow::Result;
use clap::Parser;
use dual_orchestrator::{
    cli::{Cli, Commands},
    demo,
    settings::Settings,
    telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Cli::parse();

    // Load settings
    let settings = Settings::load_from(args.config.as_deref())?;

    // Execute the requested command
    match args.command {
        Commands::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
        Commands::Demo { rounds, compact } => {
            telemetry::init(&settings.logging)?;

            let report = demo::run(settings, rounds).await?;
            let rendered = if compact {
                serde_json::to_string(&report)?
            } else {
                serde_json::to_string_pretty(&report)?
            };
            println!("{}", rendered);
            Ok(())
        }
    }
}
