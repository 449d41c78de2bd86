//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! ngrpc demo binary
//!
//! `serve` runs a server exposing health and reflection, registered in etcd
//! when the registry is enabled. `probe` checks that server's health once a
//! second.

use anyhow::Result;
use clap::{Parser, Subcommand};
use ngrpc::{
    init_logging, install_propagator, Client, ClientOptions, NgrpcConfig, Server, ServerOptions,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::{error, info, warn};

const DEMO_NAME: &str = "ngrpc-demo";
const DEMO_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "ngrpc-demo")]
#[command(about = "Example gRPC server and health probe")]
#[command(version = DEMO_VERSION)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "NGRPC_CONFIG_PATH", default_value = "config/ngrpc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server until Ctrl-C or SIGTERM
    Serve {
        /// Override the listen address
        #[arg(long)]
        address: Option<String>,
    },

    /// Check the server's health once per second
    Probe {
        /// Override the target address
        #[arg(long)]
        address: Option<String>,

        /// Health service to check, empty for the whole server
        #[arg(long, default_value = "")]
        service: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).await?;
    init_logging(&config.logging)?;
    install_propagator();

    info!("Starting {} v{}", DEMO_NAME, DEMO_VERSION);

    match cli.command {
        Commands::Serve { address } => serve(&config, address).await,
        Commands::Probe { address, service } => probe(&config, address, service).await,
    }
}

async fn load_config(path: &Path) -> Result<NgrpcConfig> {
    if path.exists() {
        Ok(NgrpcConfig::load(path).await?)
    } else {
        warn!("No configuration at {}, using defaults", path.display());
        Ok(NgrpcConfig::default())
    }
}

async fn serve(config: &NgrpcConfig, address: Option<String>) -> Result<()> {
    let mut options = ServerOptions::from_config(config).await?;
    if let Some(address) = address {
        options = options.with_address(address);
    }

    let mut server = Server::from_options(options);
    server.start().await?;
    info!(
        "{} serving on {}",
        server.name(),
        server.advertise_address().unwrap_or_default()
    );

    shutdown_signal().await;

    server.close().await?;
    info!("{} shutdown completed", DEMO_NAME);
    Ok(())
}

async fn probe(config: &NgrpcConfig, address: Option<String>, service: String) -> Result<()> {
    let mut options = ClientOptions::from_config(config).await?;
    if let Some(address) = address {
        options = options.with_address(address);
    }

    let client = Client::connect(options).await?;
    let health = HealthClient::new(client.conn());
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let request = HealthCheckRequest { service: service.clone() };
                let result = client
                    .call(|| {
                        let mut health = health.clone();
                        let request = request.clone();
                        async move { health.check(request).await }
                    })
                    .await;
                match result {
                    Ok(response) => {
                        info!("{} is {:?}", client.target(), response.into_inner().status())
                    }
                    Err(status) => {
                        error!("Health check against {} failed: {}", client.target(), status)
                    }
                }
            }
        }
    }

    client.close().await?;
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C received, shutting down");
        }
        _ = terminate => {
            info!("SIGTERM received, shutting down");
        }
    }
}
