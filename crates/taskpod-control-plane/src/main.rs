//! TaskPod Control Plane Server
//!
//! Hosts the health and metrics endpoints over the shared run store. Embedding
//! applications build the task and provisioning services from the library.

use std::net::SocketAddr;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use taskpod_control_plane::{http, AppState, Config};

/// TaskPod control plane server.
#[derive(Parser, Debug)]
#[command(name = "taskpod-control-plane", about = "TaskPod task-run control plane")]
struct Args {
    /// HTTP server address
    #[arg(long)]
    http_addr: Option<String>,
}

impl Args {
    fn into_config(self) -> Config {
        let defaults = Config::default();
        Config {
            http_bind_addr: self.http_addr.unwrap_or(defaults.http_bind_addr),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("taskpod=info".parse()?))
        .with_target(true)
        .init();

    let http_addr: SocketAddr = config.http_bind_addr.parse()?;
    let state = AppState::new();

    info!(http_addr = %http_addr, "Starting TaskPod control plane");

    let http_router = http::create_router(state);
    let http_listener = TcpListener::bind(http_addr).await?;
    info!("HTTP server listening on {}", http_addr);

    axum::serve(http_listener, http_router).await?;

    Ok(())
}
