// nexus-server — Signaling Rendezvous
//
// The single third party two NAT-bound peers need: it introduces them,
// relays their setup metadata, and gets out of the way.

mod server;

use anyhow::Result;
use clap::Parser;

#[derive(Parser)]
#[command(name = "nexus-server")]
#[command(about = "Nexus — signaling rendezvous for peer-to-peer text", long_about = None)]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    server::run(cli.port).await
}
