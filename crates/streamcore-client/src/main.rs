mod audio_sink;
mod connection;
mod mp3_decoder;

use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use streamcore::{audio_format, metrics_channel, AudioPipeline, MetricsConsumer, PcmChannel, StreamEvent};

use crate::audio_sink::CpalSink;
use crate::connection::ClientConnection;
use crate::mp3_decoder::Minimp3Decoder;

/// Connects to a `streamcore-server`, decodes the MP3 it streams, and
/// plays it on the default audio output device.
#[derive(Parser, Debug)]
#[command(name = "streamcore-client")]
struct Args {
    /// Server host to connect to.
    host: String,

    /// Server port.
    #[arg(long, default_value_t = streamcore::DEFAULT_PORT)]
    port: u16,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(args))
}

const PCM_RING_SIZE: usize = 1 << 20;
const PCM_LOW_WATERMARK: usize =
    (audio_format::FRAMES_PER_CALLBACK as usize) * (audio_format::CHANNELS as usize) * audio_format::BYTES_PER_SAMPLE * 2;
const PCM_HIGH_WATERMARK: usize = PCM_RING_SIZE / 2;

async fn run(args: Args) -> anyhow::Result<()> {
    let addr = format!("{}:{}", args.host, args.port);
    let socket = tokio::net::TcpStream::connect(&addr).await?;
    let peer = socket.peer_addr()?;
    info!(%addr, "connected");

    let pcm = PcmChannel::new(PCM_RING_SIZE, PCM_LOW_WATERMARK, PCM_HIGH_WATERMARK)?;
    let pipeline = AudioPipeline::new(Minimp3Decoder::new(), pcm.clone());
    let connection = ClientConnection::new(socket, peer, pipeline)?;

    let (metrics_tx, metrics_rx) = metrics_channel(256);
    let mut sink = CpalSink::new(pcm, connection.wake_sender(), metrics_tx);

    tokio::spawn(housekeeping(metrics_rx));

    tokio::select! {
        result = connection.run(&mut sink) => {
            if let Err(e) = result {
                error!(error = %e, "client connection ended with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received");
        }
    }

    Ok(())
}

/// Drains the audio thread's `StreamEvent` samples every few seconds and
/// logs an underrun summary. Purely informational, matching the design's
/// housekeeping timer; never influences playback.
async fn housekeeping(mut metrics: MetricsConsumer) {
    let mut interval = tokio::time::interval(Duration::from_secs(4));
    loop {
        interval.tick().await;
        let events = metrics.drain();
        if events.is_empty() {
            continue;
        }
        let underrun_bytes: usize = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Underrun { missing_bytes } => Some(*missing_bytes),
                _ => None,
            })
            .sum();
        if underrun_bytes > 0 {
            info!(underrun_bytes, samples = events.len(), "pcm underruns since last tick");
        }
    }
}
