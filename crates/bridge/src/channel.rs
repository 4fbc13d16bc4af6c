//! Ordered writer for the framed stdio channel.
//!
//! All outbound frames funnel through one unbounded queue drained by a single
//! task, so frames hit the stream in the order they were queued.

use crate::codec::NativeMessageCodec;
use browsermux_core::{Error, Message, Result};
use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tracing::{debug, error};

#[derive(Clone)]
pub struct PeerSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl PeerSender {
    pub fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| Error::NotConnected("peer channel writer has stopped".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task. It exits when every [`PeerSender`] is dropped or
/// the underlying stream fails.
pub fn spawn_writer<W>(writer: W) -> (PeerSender, JoinHandle<()>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let handle = tokio::spawn(async move {
        let mut sink = FramedWrite::new(writer, NativeMessageCodec::new());
        while let Some(message) = rx.recv().await {
            let id = message.id.clone();
            if let Err(e) = sink.send(message).await {
                error!(id = %id, error = %e, "Failed to write frame to peer");
                break;
            }
            debug!(id = %id, "Frame written to peer");
        }
        rx.close();
        debug!("Peer writer stopped");
    });
    (PeerSender { tx }, handle)
}
