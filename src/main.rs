use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use smsbilld::bootstrap::Server;
use smsbilld::config::Config;
use smsbilld::telemetry::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(name = "smsbilld")]
#[command(author, version, about = "Prepaid SMS billing and dispatch daemon")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Validate config and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first (to get log settings)
    let config = Config::load(&args.config)?;

    let tracing_config = TracingConfig {
        service_name: "smsbilld".to_string(),
        log_level: config.settings.log_level.clone(),
        json_logs: config.settings.json_logs,
    };

    init_tracing(&tracing_config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "starting smsbilld"
    );

    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }

    let server = Server::new(config, args.config).await?;
    server.run().await?;

    Ok(())
}
