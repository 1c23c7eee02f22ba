use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use reqflow::{
    config::{ConfigUpdate, load_or_default},
    server,
};

use crate::logging;

#[derive(Args, Clone, Default)]
pub struct StartArgs {
    /// Override the configured server port
    #[arg(long)]
    pub port: Option<u16>,

    /// Override the configured data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

pub async fn execute(config_path: Option<PathBuf>, args: StartArgs) -> Result<()> {
    let (mut config, _) = load_or_default(config_path)?;
    if args.port.is_some() || args.data_dir.is_some() {
        config.apply_update(ConfigUpdate {
            port: args.port,
            data_dir: args.data_dir,
            ..ConfigUpdate::default()
        });
    }
    config.ensure_data_dir()?;
    logging::init(&config.log_dir())?;

    tracing::info!(
        port = config.port,
        data_dir = %config.data_dir.display(),
        "starting reqflow"
    );
    server::run(config).await?;
    Ok(())
}
