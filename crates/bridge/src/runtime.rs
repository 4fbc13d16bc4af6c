//! Wires the codec, pending table, registrar and HTTP server together around
//! one framed channel.

use crate::channel::{spawn_writer, PeerSender};
use crate::codec::{Frame, NativeMessageCodec};
use crate::pending::PendingTable;
use crate::port::negotiate_port;
use crate::registration::Registrar;
use crate::server::{router, BridgeState};
use browsermux_core::{BridgeSettings, Paths, Result, KEEPALIVE_COMMAND, REGISTER_COMMAND};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
const HTTP_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct Bridge {
    paths: Paths,
    settings: BridgeSettings,
    pid: u32,
}

impl Bridge {
    pub fn new(paths: Paths, settings: BridgeSettings) -> Self {
        Self {
            paths,
            settings,
            pid: std::process::id(),
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Negotiate a port, start the HTTP server and the channel reader.
    /// Fails before accepting anything if the port range is exhausted.
    pub async fn start<R, W>(self, reader: R, writer: W) -> Result<RunningBridge>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let settings = self.settings;
        let port = negotiate_port(
            &settings.host,
            settings.port_range_start,
            settings.port_range_end,
        )
        .await?;
        let listener = TcpListener::bind((settings.host.as_str(), port)).await?;
        let port = listener.local_addr()?.port();

        let pending = Arc::new(PendingTable::new());
        let (peer, writer_handle) = spawn_writer(writer);
        let registrar = Arc::new(Registrar::new(self.paths, port, self.pid));
        let state = BridgeState::new(pending.clone(), peer.clone(), settings);

        let (shutdown_tx, _) = broadcast::channel::<()>(4);

        let app = router(state.clone());
        let mut http_shutdown_rx = shutdown_tx.subscribe();
        let http_handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = http_shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "HTTP control server failed");
            }
        });

        let reader_handle = tokio::spawn(read_loop(
            reader,
            pending.clone(),
            registrar.clone(),
            peer,
        ));

        info!(port, pid = self.pid, "Bridge listening");

        Ok(RunningBridge {
            port,
            state,
            registrar,
            shutdown_tx,
            http_handle,
            reader_handle,
            writer_handle,
        })
    }
}

pub struct RunningBridge {
    port: u16,
    state: BridgeState,
    registrar: Arc<Registrar>,
    shutdown_tx: broadcast::Sender<()>,
    http_handle: JoinHandle<()>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl RunningBridge {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pending(&self) -> &Arc<PendingTable> {
        &self.state.pending
    }

    pub fn registrar(&self) -> &Arc<Registrar> {
        &self.registrar
    }

    /// Run until `shutdown` resolves or the peer closes the channel. After a
    /// disconnect, in-flight requests are left to reach their deadlines
    /// before the bridge exits. The registry entry is removed either way.
    pub async fn serve_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
            }
            _ = &mut self.reader_handle => {
                info!("Peer closed the channel");
                self.state.mark_peer_disconnected();
                let pending = self.state.pending.clone();
                tokio::select! {
                    _ = wait_drained(&pending) => {
                        debug!("In-flight requests settled");
                    }
                    _ = &mut shutdown => {
                        info!(in_flight = pending.len(), "Shutdown requested while draining");
                    }
                }
            }
        }
        self.shutdown().await
    }

    async fn shutdown(self) -> Result<()> {
        let unregister = self.registrar.unregister();
        let _ = self.shutdown_tx.send(());
        self.reader_handle.abort();

        match tokio::time::timeout(HTTP_SHUTDOWN_GRACE, self.http_handle).await {
            Ok(_) => debug!("HTTP server stopped"),
            Err(_) => warn!("HTTP server did not stop within grace period"),
        }
        drop(self.state);
        if tokio::time::timeout(HTTP_SHUTDOWN_GRACE, self.writer_handle)
            .await
            .is_err()
        {
            warn!("Peer writer did not stop within grace period");
        }

        unregister?;
        info!("Bridge stopped");
        Ok(())
    }
}

async fn wait_drained(pending: &PendingTable) {
    while !pending.is_empty() {
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
}

async fn read_loop<R>(
    reader: R,
    pending: Arc<PendingTable>,
    registrar: Arc<Registrar>,
    peer: PeerSender,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut frames = FramedRead::new(reader, NativeMessageCodec::new());
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(frame) => dispatch_frame(frame, &pending, &registrar, &peer),
            Err(e) => {
                error!(error = %e, "Failed to read from peer channel");
                break;
            }
        }
    }
    debug!("Peer reader finished");
}

/// Route one inbound frame: REGISTER, keepalive, or a reply to a pending id.
pub fn dispatch_frame(
    frame: Frame,
    pending: &PendingTable,
    registrar: &Registrar,
    peer: &PeerSender,
) {
    let message = match frame {
        Frame::Message(m) => m,
        Frame::Malformed { len, error } => {
            warn!(len, error = %error, "Dropping malformed frame from peer");
            return;
        }
    };

    if message.is_command(REGISTER_COMMAND) {
        let reply = registrar.handle(&message);
        if let Err(e) = peer.send(reply) {
            warn!(error = %e, "Could not send registration reply");
        }
        return;
    }

    if message.is_command(KEEPALIVE_COMMAND) {
        registrar.keepalive();
        return;
    }

    if !message.is_response() {
        debug!(command = ?message.command, id = %message.id, "Ignoring command sent by peer");
        return;
    }

    let id = message.id.clone();
    if !pending.resolve(&id, message) {
        warn!(id = %id, "Dropping reply with unrecognized id");
    }
}
