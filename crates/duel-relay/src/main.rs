//! Duel relay server.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use duel_relay::config::{Config, LogFormat};
use duel_relay::{logging, Server};

#[derive(Parser, Debug)]
#[command(name = "duel-relay")]
#[command(about = "Relays duel clients to per-session engine processes", long_about = None)]
struct Cli {
    /// TOML config file (overrides DUEL_RELAY_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind all listeners to
    #[arg(long)]
    bind: Option<String>,

    /// Engine protocol TCP port
    #[arg(long)]
    tcp_port: Option<u16>,

    /// Engine protocol WebSocket port
    #[arg(long)]
    ws_port: Option<u16>,

    /// Lobby WebSocket port
    #[arg(long)]
    lobby_port: Option<u16>,

    /// First engine port (inclusive)
    #[arg(long)]
    port_min: Option<u16>,

    /// Last engine port (exclusive)
    #[arg(long)]
    port_max: Option<u16>,

    /// Engine executable
    #[arg(long)]
    engine: Option<PathBuf>,

    /// Engine working directory
    #[arg(long)]
    engine_dir: Option<PathBuf>,

    /// Log filter directive (RUST_LOG still wins)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_parser = ["text", "json"])]
    log_format: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(v) = self.bind {
            config.server.bind_addr = v;
        }
        if let Some(v) = self.tcp_port {
            config.server.tcp_port = v;
        }
        if let Some(v) = self.ws_port {
            config.server.ws_port = v;
        }
        if let Some(v) = self.lobby_port {
            config.server.lobby_port = v;
        }
        if let Some(v) = self.port_min {
            config.ports.min = v;
        }
        if let Some(v) = self.port_max {
            config.ports.max = v;
        }
        if let Some(v) = self.engine {
            config.engine.program = v;
        }
        if let Some(v) = self.engine_dir {
            config.engine.working_dir = v;
        }
        if let Some(v) = self.log_level {
            config.logging.level = v;
        }
        if let Some(v) = self.log_format {
            config.logging.format = v.parse::<LogFormat>().map_err(anyhow::Error::msg)?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config)?;
    config.validate()?;

    logging::init(&config.logging)?;

    info!(
        bind = %config.server.bind_addr,
        tcp_port = config.server.tcp_port,
        ws_port = config.server.ws_port,
        lobby_port = config.server.lobby_port,
        ports = ?(config.ports.min, config.ports.max),
        engine = %config.engine.program.display(),
        "starting duel-relay"
    );

    let server = Server::bind(&config).await?;
    server.run().await
}
