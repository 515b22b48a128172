//! k8s-graceful service binary.
//!
//! ```text
//! SIGTERM ─▶ SignalBus ─┬─▶ HealthHandler: probe answers 503 from now on
//!                       └─▶ ShutdownHooks: after grace period
//!                                 └─▶ DrainingClose: terminate connections
//!                                         └─▶ HttpServer close ─▶ exit
//! ```

use std::path::PathBuf;

use clap::Parser;

use k8s_graceful::config::{load_config, ServiceConfig};
use k8s_graceful::http::default_options;
use k8s_graceful::observability::{logging, metrics};
use k8s_graceful::Service;

#[derive(Parser)]
#[command(name = "k8s-graceful")]
#[command(about = "HTTP service with Kubernetes graceful shutdown", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "k8s-graceful starting");

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let service = Service::build(config, default_options()).await?;
    tracing::info!(address = %service.local_addr()?, "Listening for connections");

    service.run().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
