mod connection;
mod daytime;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use streamcore::StreamEvent;
use tracing::info;

use crate::server::{Registry, Server};

/// Streams a single MP3 file to any number of connecting clients: a time
/// greeting followed by the file body, zero-copy, over a length-prefixed
/// framing protocol.
#[derive(Parser, Debug)]
#[command(name = "streamcore-server")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8060")]
    addr: SocketAddr,

    /// Path to the MP3 file served to every connecting client.
    #[arg(long)]
    mp3: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    // A current-thread runtime keeps the event-loop model single-threaded
    // and cooperative, matching the design; ordinary `tokio::spawn` still
    // works because every future here is `Send`.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let server = Server::bind(args.addr, args.mp3).await?;

    tokio::spawn(housekeeping(server.registry()));

    server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("ctrl-c received");
        })
        .await;

    Ok(())
}

/// Every few seconds, drains every live connection's `StreamEvent` samples
/// and logs a summary. Purely informational, per the design's "housekeeping
/// timer...purely for logging"; carries no protocol weight.
async fn housekeeping(registry: Registry) {
    let mut interval = tokio::time::interval(Duration::from_secs(4));
    loop {
        interval.tick().await;
        let events = registry.drain_metrics();
        if events.is_empty() {
            info!("server alive, no traffic since last tick");
            continue;
        }
        let bytes_sent: usize = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::BytesSent { total } => Some(*total),
                _ => None,
            })
            .sum();
        info!(bytes_sent, samples = events.len(), "server alive");
    }
}
