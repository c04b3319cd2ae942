//! Edge routing gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────┐
//!                      │                   EDGE GATEWAY                    │
//!                      │                                                   │
//!   Client Request     │  ┌─────────┐    ┌──────────┐    ┌─────────────┐  │
//!   ───────────────────┼─▶│  http   │───▶│ routing  │───▶│ dispatcher  │  │
//!                      │  │ server  │    │  table   │    │ retry loop  │  │
//!                      │  └─────────┘    └──────────┘    └──────┬──────┘  │
//!                      │                                        │         │
//!                      │              ┌─────────────┐   ┌───────▼──────┐  │
//!                      │              │  circuit    │◀──│load_balancer │  │
//!                      │              │  breakers   │   │  + registry  │  │
//!                      │              └─────────────┘   └───────┬──────┘  │
//!                      │                                        │         │
//!   Client Response    │  ┌─────────┐                   ┌───────▼──────┐  │
//!   ◀──────────────────┼──│response │◀──────────────────│  upstream    │◀─┼── Backend
//!                      │  │ mapping │                   │  client      │  │   Instance
//!                      │  └─────────┘                   └──────────────┘  │
//!                      │                                                   │
//!                      │  health probes · metrics · config reload · admin │
//!                      └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use edge_gateway::config::loader::load_config;
use edge_gateway::config::watcher::ConfigWatcher;
use edge_gateway::lifecycle::{signals::spawn_signal_handler, Shutdown};
use edge_gateway::observability::{logging, metrics};
use edge_gateway::GatewayServer;

#[derive(Parser)]
#[command(name = "edge-gateway")]
#[command(about = "Resilient edge routing gateway", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "GATEWAY_CONFIG", default_value = "config/gateway.toml")]
    config: PathBuf,

    /// Disable hot reload of routes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), gateway = %config.gateway.name, "edge-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        routes = config.routes.len(),
        request_timeout_ms = config.timeouts.request_ms,
        "Configuration loaded"
    );

    if config.observability.exporter_enabled {
        match config.observability.exporter_address.parse() {
            Ok(addr) => {
                let handle = metrics::prometheus_handle();
                tokio::spawn(async move {
                    if let Err(e) = metrics::serve_exporter(addr, handle).await {
                        tracing::error!(error = %e, "Prometheus exporter stopped");
                    }
                });
            }
            Err(_) => tracing::error!(
                exporter_address = %config.observability.exporter_address,
                "Failed to parse exporter address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    // The watcher handle must outlive the server.
    let (updates, _watcher) = if args.no_watch {
        (None, None)
    } else {
        let (watcher, rx) = ConfigWatcher::new(&args.config);
        match watcher.run() {
            Ok(handle) => (Some(rx), Some(handle)),
            Err(e) => {
                tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                (None, None)
            }
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = GatewayServer::new(&config, shutdown);
    server.run(listener, updates).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
