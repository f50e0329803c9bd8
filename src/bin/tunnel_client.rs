//! `tunnel-client` — requests a file through the DNS covert channel.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use dns_tunnel::client::{self, Client};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "tunnel-client")]
#[command(version = VERSION)]
#[command(about = "DNS covert-channel file transfer client", long_about = None)]
struct Cli {
    /// File to request, e.g. index.html
    filename: String,

    /// DNS server address, e.g. 127.0.0.1:5353
    #[arg(short, long)]
    server: SocketAddr,

    /// Local UDP port to bind (0 lets the OS choose)
    #[arg(short, long, default_value_t = 0)]
    port: u16,

    /// Retries per query before giving up
    #[arg(long, default_value_t = 10)]
    retries: u32,

    /// Per-query timeout, in seconds
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,

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

    println!("DNS Tunnel Client");
    println!("-----------------");
    println!("requested file: {}", cli.filename);
    println!("dns server: {}", cli.server);

    let session_id = client::generate_session_id();
    println!("session id: {session_id}");
    println!();

    let local_bind: SocketAddr = ([0, 0, 0, 0], cli.port).into();
    let client = Client::connect(
        cli.server,
        local_bind,
        session_id,
        cli.retries,
        Duration::from_secs(cli.timeout_secs),
    )
    .await
    .context("binding local UDP socket")?;

    let start = Instant::now();
    println!("sending GET request for file: {}...", cli.filename);
    let (data, stats) = client
        .run(&cli.filename)
        .await
        .with_context(|| format!("transferring {}", cli.filename))?;
    let elapsed = start.elapsed();

    let output_filename = format!("received_{}", cli.filename);
    std::fs::write(&output_filename, &data)
        .with_context(|| format!("writing {output_filename}"))?;

    println!();
    println!("{}", client::format_summary(&cli.filename, data.len(), &stats, elapsed));

    Ok(())
}
