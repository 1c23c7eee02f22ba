use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use reqflow::config::{ConfigUpdate, load_or_default};

#[derive(Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[arg(long)]
    pub list_page_size: Option<usize>,

    #[arg(long = "page-limit")]
    pub page_limit: Option<usize>,

    /// Make index writes visible to searches immediately
    #[arg(long)]
    pub refresh_on_write: Option<bool>,

    #[arg(long)]
    pub worker_id: Option<u16>,

    #[arg(long)]
    pub issuer: Option<String>,

    #[arg(long)]
    pub audience: Option<String>,

    /// Default token lifetime in seconds; 0 issues tokens without expiry
    #[arg(long)]
    pub token_ttl: Option<u64>,

    /// Replace the token signing secret, invalidating issued tokens
    #[arg(long, default_value_t = false)]
    pub rotate_secret: bool,

    /// Print the resulting configuration
    #[arg(long, default_value_t = false)]
    pub show: bool,
}

pub fn execute(config_path: Option<PathBuf>, args: ConfigArgs) -> Result<()> {
    let (mut config, path) = load_or_default(config_path)?;

    let ConfigArgs {
        port,
        data_dir,
        list_page_size,
        page_limit,
        refresh_on_write,
        worker_id,
        issuer,
        audience,
        token_ttl,
        rotate_secret,
        show,
    } = args;

    config.apply_update(ConfigUpdate {
        port,
        data_dir,
        list_page_size,
        page_limit,
        refresh_on_write,
        snowflake_worker_id: worker_id,
        issuer: normalize(issuer),
        audience: normalize(audience),
        default_ttl_secs: token_ttl,
        rotate_secret,
    });

    config.ensure_data_dir()?;
    config.save(&path)?;
    tracing::info!("Configuration saved to {}", path.display());

    if show {
        let mut redacted = config.clone();
        redacted.auth.secret = "<redacted>".to_string();
        println!("{}", toml::to_string_pretty(&redacted)?);
    }
    Ok(())
}

fn normalize(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
