//! Accept loop and the registry of live connections used to cascade a
//! server-wide shutdown: each connection's `FileSender` is cancelled first,
//! then its task is left to notice and unwind on its own.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use streamcore::{metrics_channel, CancelHandle, MetricsConsumer};

use crate::connection::{self, ServerConnection};

struct LiveConnection {
    cancel: CancelHandle,
    metrics: MetricsConsumer,
}

/// A cloneable handle onto the live-connection registry, used by the
/// housekeeping task to drain every connection's [`streamcore::StreamEvent`]
/// samples without holding up `Server::run`'s accept loop.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<std::collections::HashMap<u64, LiveConnection>>>,
}

impl Registry {
    fn insert(&self, id: u64, cancel: CancelHandle, metrics: MetricsConsumer) {
        self.inner
            .lock()
            .insert(id, LiveConnection { cancel, metrics });
    }

    fn remove(&self, id: u64) {
        self.inner.lock().remove(&id);
    }

    /// Cancels every live connection's `FileSender`. Connections notice on
    /// their next `send` poll and unwind; sockets are closed by their own
    /// tasks when they drop, not by this call.
    fn cancel_all(&self) {
        for (_, conn) in self.inner.lock().drain() {
            conn.cancel.cancel();
        }
    }

    /// Drains every live connection's pending metrics samples. Called by the
    /// periodic housekeeping task; empty when nothing has happened since the
    /// last tick.
    pub fn drain_metrics(&self) -> Vec<streamcore::StreamEvent> {
        let mut out = Vec::new();
        for conn in self.inner.lock().values_mut() {
            out.extend(conn.metrics.drain());
        }
        out
    }
}

pub struct Server {
    listener: TcpListener,
    mp3_path: PathBuf,
    registry: Registry,
    next_id: AtomicU64,
}

impl Server {
    /// A cloneable handle onto this server's live-connection registry, for
    /// a housekeeping task to poll independently of `run`'s accept loop.
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    pub async fn bind(addr: SocketAddr, mp3_path: PathBuf) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, mp3 = %mp3_path.display(), "listening");
        Ok(Self {
            listener,
            mp3_path,
            registry: Registry::default(),
            next_id: AtomicU64::new(0),
        })
    }

    /// Accepts connections until `shutdown` resolves, at which point every
    /// live connection is cancelled and this returns.
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => self.spawn_connection(socket, peer),
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                _ = &mut shutdown => {
                    info!("shutdown signal received, cancelling live connections");
                    self.registry.cancel_all();
                    return;
                }
            }
        }
    }

    fn spawn_connection(&self, socket: TcpStream, peer: SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = self.registry.clone();
        let mp3_path = self.mp3_path.clone();
        let socket = Arc::new(socket);

        let (metrics_tx, metrics_rx) = metrics_channel(64);
        let conn = match ServerConnection::new(Arc::clone(&socket), &mp3_path, peer, metrics_tx) {
            Ok(conn) => conn,
            Err(e) => {
                error!(%peer, error = %e, "failed to open mp3 file for connection");
                return;
            }
        };
        registry.insert(id, conn.cancel_handle(), metrics_rx);

        let read_task: JoinHandle<()> = tokio::spawn(connection::run_inbound_text(
            Arc::clone(&socket),
            peer,
        ));

        tokio::spawn(async move {
            if let Err(e) = conn.run().await {
                warn!(%peer, error = %e, "connection ended with error");
            }
            read_task.abort();
            registry.remove(id);
        });
    }
}
