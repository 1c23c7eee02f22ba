mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{
    config::ConfigArgs, start::StartArgs, token::TokenCommands, types::TypesCommands,
};

#[derive(Parser)]
#[command(author, version, about = "Request workflow server CLI")]
struct Cli {
    /// Path to the configuration file. Defaults to ./.reqflow/config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the reqflow server in the foreground
    Start(StartArgs),
    /// Update system configuration
    Config(ConfigArgs),
    /// Issue access tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// Inspect registered request types
    Types {
        #[command(subcommand)]
        command: TypesCommands,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { config, command } = Cli::parse();

    match command {
        Commands::Start(args) => commands::start::execute(config, args).await?,
        Commands::Config(args) => {
            init_cli_logging();
            commands::config::execute(config, args)?
        }
        Commands::Token { command } => commands::token::execute(config, command)?,
        Commands::Types { command } => commands::types::execute(command)?,
    }

    Ok(())
}

fn init_cli_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
}
