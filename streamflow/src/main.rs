mod server;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use streamflow_api::AppState;
use streamflow_core::{bootstrap::load_config, logging};

use server::StreamFlowServer;

#[derive(Parser, Debug)]
#[command(name = "streamflow")]
#[command(about = "StreamFlow IPTV stream relay", long_about = None)]
struct Args {
    /// Path to a YAML config file
    #[arg(long, short)]
    config: Option<String>,

    /// Override the HTTP listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let mut config = load_config(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.http_port = port;
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("StreamFlow relay starting...");
    info!("HTTP address: {}", config.http_address());
    if let Some(public) = config.server.public_base_url.as_deref() {
        info!("Public base URL: {}", public);
    }

    // 3. Build relay state
    let state = AppState::new(config.clone())
        .map_err(|e| anyhow::anyhow!("Failed to initialize relay: {e}"))?;

    // 4. Serve until a shutdown signal arrives
    StreamFlowServer::new(config, state).start().await
}
