use clap::Parser;
use log::{error, info};
use server::config::{DefaultServer, GatewayConfig};
use server::network::{Server, ServerMessage};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// UDP port to listen on
    #[arg(short, long, default_value = "17091")]
    port: u16,

    /// Directory holding merchants/, servers/ and sessions/
    #[arg(short, long, default_value = "database")]
    database_dir: PathBuf,

    /// JSON file with the default downstream server
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Base URL of the IP reputation service
    #[arg(short, long, default_value = "http://localhost:8080")]
    reputation_url: String,

    /// Skip reputation lookups and treat every address as clean
    #[arg(long)]
    no_reputation: bool,

    /// Override the default server IP from the config file
    #[arg(long)]
    server_ip: Option<String>,

    /// Override the default server port from the config file
    #[arg(long)]
    server_port: Option<u16>,

    /// Override the default merchant name from the config file
    #[arg(long)]
    default_name: Option<String>,

    /// Seconds of silence before a connection is dropped
    #[arg(short, long, default_value = "10")]
    idle_timeout: u64,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut default_server = DefaultServer::load_or_create(&args.config)?;
    if let Some(server_ip) = args.server_ip {
        default_server.server_ip = server_ip;
    }
    if let Some(server_port) = args.server_port {
        default_server.server_port = server_port;
    }
    if let Some(default_name) = args.default_name {
        default_server.default_name = default_name;
    }

    let config = GatewayConfig {
        bind_address: format!("{}:{}", args.host, args.port),
        database_dir: args.database_dir,
        reputation_url: (!args.no_reputation).then_some(args.reputation_url),
        idle_timeout: Duration::from_secs(args.idle_timeout),
        max_connections: args.max_connections,
        default_server,
        ..GatewayConfig::default()
    };

    info!("Starting logon gateway...");
    info!(
        "Default server: {}:{} ({})",
        config.default_server.server_ip,
        config.default_server.server_port,
        config.default_server.default_name
    );
    info!("Database: {}", config.database_dir.display());

    let mut server = Server::new(config).await?;
    let shutdown = server.sender();
    let server_handle = tokio::spawn(async move { server.run().await });

    tokio::select! {
        result = server_handle => {
            match result {
                Ok(Err(e)) => error!("Gateway stopped: {}", e),
                Err(e) => error!("Gateway task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            if let Err(e) = shutdown.send(ServerMessage::Shutdown) {
                error!("Failed to signal shutdown: {}", e);
            }
        }
    }

    Ok(())
}
