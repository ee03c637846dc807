//! `drsnap` binary: rotation against Amazon RDS.

use anyhow::Result;
use clap::Parser;
use drsnap_rotation::aws::AwsRds;
use drsnap_rotation::cli::Cli;
use drsnap_rotation::service::RdsApi;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    tracing::info!("drsnap starting...");

    let config = cli.load_config()?;
    let api: Arc<dyn RdsApi> = Arc::new(AwsRds::from_config(&config).await);
    cli.run(api, config).await
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
