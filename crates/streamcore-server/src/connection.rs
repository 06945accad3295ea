//! Per-connection state machine: greet with the server's time, then hand
//! the MP3 file to the peer as one `MSG_MP3_BODY` envelope whose payload is
//! streamed zero-copy by a [`FileSender`] rather than passed through the
//! write [`Channel`]. A best-effort read side (client type-3 text) runs
//! concurrently on its own task against the same shared socket.

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use streamcore::{
    CancelHandle, Channel, Decoder, Encoder, FileHandle, FileSender, MetricsProducer, StreamEvent,
    TransportError,
};

use crate::daytime;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    SendingTime,
    SendingMp3Envelope,
    SendingMp3Body,
    Done,
}

const WRITE_RING: usize = 1 << 16;
const READ_RING: usize = 1 << 16;

/// One client's session from accept to close. Owns the write channel used
/// for the small envelope messages and the `FileSender` used for the bulk
/// transfer.
pub struct ServerConnection {
    socket: Arc<TcpStream>,
    write: Channel,
    file_sender: FileSender,
    state: State,
    peer: SocketAddr,
    metrics: MetricsProducer,
}

impl ServerConnection {
    pub fn new(
        socket: Arc<TcpStream>,
        mp3_path: &Path,
        peer: SocketAddr,
        metrics: MetricsProducer,
    ) -> io::Result<Self> {
        let write = Channel::new(WRITE_RING, 1, WRITE_RING)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let file = FileHandle::open(mp3_path)?;
        let file_sender = FileSender::new(file);
        Ok(Self {
            socket,
            write,
            file_sender,
            state: State::SendingTime,
            peer,
            metrics,
        })
    }

    /// Cancels the in-flight `FileSender`. The caller is responsible for
    /// closing the socket afterwards (cascading shutdown cancels the sender
    /// first, per the transfer-ordering requirement: a pending `sendfile`
    /// can still hold the socket fd busy on some platforms).
    pub fn cancel_handle(&self) -> CancelHandle {
        self.file_sender.cancel_handle()
    }

    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let body_size = self.file_sender.cursor().total as usize;

        self.state = State::SendingTime;
        let time_text = daytime::now_as_text();
        Encoder::write_time(&time_text, &mut self.write);
        self.drain_write().await?;
        debug!(peer = %self.peer, "sent time envelope");

        self.state = State::SendingMp3Envelope;
        Encoder::write_mp3_header(body_size, &mut self.write);
        self.drain_write().await?;
        debug!(peer = %self.peer, body_size, "sent mp3 envelope");

        self.state = State::SendingMp3Body;
        let peer = self.peer;
        let socket = Arc::clone(&self.socket);
        let metrics = &mut self.metrics;
        let mut last_remaining = body_size as u64;
        let result = self
            .file_sender
            .send(&socket, |remaining| {
                let remaining = remaining as u64;
                let sent_this_chunk = last_remaining.saturating_sub(remaining);
                if sent_this_chunk > 0 {
                    metrics.push(StreamEvent::BytesSent {
                        total: sent_this_chunk as usize,
                    });
                }
                last_remaining = remaining;
                if remaining == 0 {
                    debug!(%peer, "mp3 body fully sent");
                }
            })
            .await;

        match result {
            Ok(()) => {
                self.state = State::Done;
                info!(peer = %self.peer, "connection finished");
                Ok(())
            }
            Err(TransportError::Cancelled) => {
                info!(peer = %self.peer, "connection cancelled mid-transfer");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn drain_write(&mut self) -> Result<(), TransportError> {
        loop {
            let chunk_len = self.write.buffer_ref().filled_size();
            if chunk_len == 0 {
                return Ok(());
            }
            let chunk = self.write.buffer_ref().readable().to_vec();
            match self.socket.try_write(&chunk) {
                Ok(n) => self.write.commit(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.socket.writable().await?;
                }
                Err(e) if is_peer_closed(&e) => return Err(TransportError::PeerClosed),
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }
}

/// Reads from `socket` into a fresh read channel, decoding `MSG_TEXT`
/// frames and logging them, until the peer closes or sends something the
/// decoder rejects. Intended to run as its own task alongside
/// [`ServerConnection::run`] against the same `Arc<TcpStream>`.
pub async fn run_inbound_text(socket: Arc<TcpStream>, peer: SocketAddr) {
    let mut read = match Channel::new(READ_RING, 1, READ_RING) {
        Ok(c) => c,
        Err(e) => {
            warn!(%peer, error = %e, "failed to allocate inbound read channel");
            return;
        }
    };
    let mut decoder = Decoder::new();

    loop {
        if let Err(e) = socket.readable().await {
            debug!(%peer, error = %e, "inbound socket no longer readable");
            return;
        }
        let writable_len = read.buffer_ref().non_filled_size();
        if writable_len == 0 {
            // Client is pushing text faster than we're reading it; drop the
            // connection's text side rather than growing unbounded.
            warn!(%peer, "inbound text channel full, closing read side");
            return;
        }
        let mut scratch = vec![0u8; writable_len];
        match socket.try_read(&mut scratch) {
            Ok(0) => {
                debug!(%peer, "peer closed inbound side");
                return;
            }
            Ok(n) => {
                read.buffer().writable_upto(n).copy_from_slice(&scratch[..n]);
                read.buffer().consume(n);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                debug!(%peer, error = %e, "inbound read error");
                return;
            }
        }

        let result = decoder.pump(
            &mut read,
            |msg_type, a, b| {
                if msg_type == streamcore::MSG_TEXT {
                    let mut text = a.to_vec();
                    text.extend_from_slice(b);
                    info!(%peer, text = %String::from_utf8_lossy(&text), "client text");
                }
            },
            |_channel, _remaining| 0,
        );
        if let Err(e) = result {
            warn!(%peer, error = %e, "inbound decode error, closing read side");
            return;
        }
    }
}

fn is_peer_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionAborted
    )
}
