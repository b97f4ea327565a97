//! discover-relay
//!
//! WebSocket signaling relay for peer discovery and offer/answer exchange.
//!
//! Usage:
//!   discover-relay                       # listens on 0.0.0.0:$PORT (default 3000), path /discover
//!   discover-relay --port 8080 --answer-timeout-secs 10
//!   discover-relay --config relay.toml

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;

use discover_relay::config::{load_config, RelayConfig};
use discover_relay::run_relay_server;

#[derive(Parser, Debug)]
#[command(name = "discover-relay")]
#[command(about = "Signaling relay for peer discovery and offer/answer exchange")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Address to bind (default 0.0.0.0)
    #[arg(long)]
    host: Option<IpAddr>,

    /// WebSocket endpoint path (default /discover)
    #[arg(long)]
    path: Option<String>,

    /// Reserved peer id of this relay node (default "discoverer")
    #[arg(long)]
    discoverer_id: Option<String>,

    /// Seconds to wait for the answer to a forwarded offer (0 = wait forever)
    #[arg(long)]
    answer_timeout_secs: Option<u64>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Args {
    fn resolve(self) -> Result<RelayConfig> {
        let mut config = RelayConfig::default();
        if let Some(path) = &self.config {
            config.apply_file(load_config(path)?);
        }

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(path) = self.path {
            config.path = path;
        }
        if let Some(id) = self.discoverer_id {
            config.discoverer_id = id;
        }
        if let Some(secs) = self.answer_timeout_secs {
            config.answer_timeout_secs = secs;
        }

        config
            .validate()
            .map_err(|e| anyhow!("Invalid configuration: {}", e))?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().resolve()?;

    log::info!("Starting signaling relay on {}", config.bind_addr());

    run_relay_server(config).await
}
