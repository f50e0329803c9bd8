//! `tunnel-server` — the DNS tunnel's listening half.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use dns_tunnel::config::TunnelConfig;
use dns_tunnel::Server;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "tunnel-server")]
#[command(version = VERSION)]
#[command(about = "DNS covert-channel file transfer server", long_about = None)]
struct Cli {
    /// UDP address to bind (default port 53 requires root; use a high port for local testing)
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Seconds of client inactivity before a session is reaped
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Optional TOML configuration file; CLI flags override its values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => TunnelConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => TunnelConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(idle) = cli.idle_timeout_secs {
        config.idle_timeout_secs = idle;
    }
    config.validate().map_err(anyhow::Error::msg)?;

    let server = Server::bind(&config).await?;
    server.run().await?;
    Ok(())
}
