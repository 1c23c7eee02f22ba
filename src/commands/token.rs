use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};

use reqflow::{config::load_or_default, token::TokenManager};

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a signed access token
    Issue(TokenIssueArgs),
    /// Decode and verify a token
    Inspect {
        /// Token value to verify
        token: String,
    },
}

#[derive(Args)]
pub struct TokenIssueArgs {
    /// User id the token acts as
    #[arg(long)]
    pub subject: String,

    /// Permission grant such as `read` or `own:delete_comment`; repeatable
    #[arg(long = "grant")]
    pub grants: Vec<String>,

    /// Lifetime in seconds; 0 issues a token without expiry
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Print the full token record as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

pub fn execute(config_path: Option<PathBuf>, command: TokenCommands) -> Result<()> {
    let (config, _) = load_or_default(config_path)?;
    let manager = TokenManager::new(config.token_manager_config()?)?;

    match command {
        TokenCommands::Issue(args) => {
            let issued = manager.issue(&args.subject, args.grants, args.ttl)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&issued)?);
            } else {
                println!(
                    "token={} subject={} grants={} expires_at={}",
                    issued.token,
                    issued.subject,
                    issued.grants.join(","),
                    issued
                        .expires_at
                        .map(|ts| ts.to_rfc3339())
                        .unwrap_or_else(|| "never".into()),
                );
            }
        }
        TokenCommands::Inspect { token } => {
            let claims = manager.verify(&token)?;
            println!("{}", serde_json::to_string_pretty(&claims)?);
        }
    }

    Ok(())
}
