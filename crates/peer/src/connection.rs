//! Peer side of the framed channel: connect, register, keep alive, serve
//! commands, and reconnect with backoff when the channel drops.

use crate::backoff::Backoff;
use crate::connector::Connector;
use crate::handler::CommandHandler;
use crate::identity::Identity;
use browsermux_bridge::{spawn_writer, Frame, NativeMessageCodec, PeerSender};
use browsermux_core::{Message, Result, KEEPALIVE_COMMAND, REGISTER_COMMAND};
use futures::StreamExt;
use serde_json::Map;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct PeerSettings {
    /// Pause between connecting and sending REGISTER.
    pub register_delay: Duration,
    pub keepalive_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            register_delay: Duration::from_millis(500),
            keepalive_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

/// Identity the bridge assigned in its REGISTER reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRegistration {
    pub profile_id: String,
    pub port: u16,
}

impl PeerRegistration {
    fn from_reply(reply: &Message) -> Option<Self> {
        let result = reply.result.as_ref()?;
        let profile_id = result.get("profileId")?.as_str()?.to_string();
        let port = u16::try_from(result.get("port")?.as_u64()?).ok()?;
        Some(Self { profile_id, port })
    }
}

pub struct PeerConnection {
    connector: Arc<dyn Connector>,
    handler: Arc<dyn CommandHandler>,
    identity: Identity,
    settings: PeerSettings,
    state: watch::Sender<ConnectionState>,
    registration: watch::Sender<Option<PeerRegistration>>,
}

impl PeerConnection {
    pub fn new(
        connector: Arc<dyn Connector>,
        handler: Arc<dyn CommandHandler>,
        identity: Identity,
        settings: PeerSettings,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (registration, _) = watch::channel(None);
        Self {
            connector,
            handler,
            identity,
            settings,
            state,
            registration,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn subscribe_registration(&self) -> watch::Receiver<Option<PeerRegistration>> {
        self.registration.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "Peer connection state changed");
        }
    }

    /// Keep a channel open until `shutdown` fires. Each failed or closed
    /// connection schedules a reconnect; the attempt counter resets once a
    /// connection is established.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut backoff = Backoff::new(self.settings.backoff_base, self.settings.backoff_cap);

        loop {
            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                r = self.connector.connect() => r,
                _ = shutdown.recv() => break,
            };

            match connected {
                Ok(channel) => {
                    backoff.reset();
                    self.set_state(ConnectionState::Connected);
                    info!("Peer channel connected");

                    let (reader, writer, _child) = channel.into_parts();
                    let outcome = tokio::select! {
                        r = self.session(reader, writer) => r,
                        _ = shutdown.recv() => break,
                    };
                    match outcome {
                        Ok(()) => info!("Peer channel closed"),
                        Err(e) => warn!(error = %e, "Peer channel failed"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Peer connect failed");
                }
            }

            self.set_state(ConnectionState::Disconnected);
            self.registration.send_replace(None);

            let delay = backoff.next_delay();
            info!(
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => break,
            }
        }

        self.set_state(ConnectionState::Disconnected);
        self.registration.send_replace(None);
        info!("Peer connection manager stopped");
        Ok(())
    }

    async fn session<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: tokio::io::AsyncRead + Send + Unpin + 'static,
        W: tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let mut frames = FramedRead::new(reader, NativeMessageCodec::new());
        let (out, writer_handle) = spawn_writer(writer);

        let register_at = Instant::now() + self.settings.register_delay;
        let register_timer = sleep_until(register_at);
        tokio::pin!(register_timer);
        let mut register_id: Option<String> = None;

        let period = self.settings.keepalive_interval;
        let mut keepalive = interval_at(register_at + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = &mut register_timer, if register_id.is_none() => {
                    let id = uuid::Uuid::new_v4().to_string();
                    debug!(id = %id, "Sending REGISTER");
                    let message = Message::request(id.clone(), REGISTER_COMMAND, self.identity.register_data());
                    register_id = Some(id);
                    if let Err(e) = out.send(message) {
                        break Err(e);
                    }
                }
                _ = keepalive.tick(), if register_id.is_some() => {
                    let message = Message::request(uuid::Uuid::new_v4().to_string(), KEEPALIVE_COMMAND, Map::new());
                    if let Err(e) = out.send(message) {
                        break Err(e);
                    }
                }
                frame = frames.next() => match frame {
                    None => break Ok(()),
                    Some(Err(e)) => break Err(e.into()),
                    Some(Ok(Frame::Malformed { len, error })) => {
                        warn!(len, error = %error, "Dropping malformed frame from bridge");
                    }
                    Some(Ok(Frame::Message(message))) => {
                        self.on_message(message, register_id.as_deref(), &out);
                    }
                },
            }
        };

        drop(out);
        writer_handle.abort();
        result
    }

    fn on_message(&self, message: Message, register_id: Option<&str>, out: &PeerSender) {
        if message.is_response() {
            if register_id == Some(message.id.as_str()) {
                self.on_register_reply(&message);
            } else {
                debug!(id = %message.id, "Ignoring unsolicited reply");
            }
            return;
        }

        let Some(command) = message.command.clone() else {
            return;
        };
        let id = message.id;
        let data = message.data.unwrap_or_default();
        let handler = self.handler.clone();
        let out = out.clone();
        tokio::spawn(async move {
            let reply = match handler.handle(&command, data).await {
                Ok(result) => Message::success(id, result),
                Err(error) => Message::failure(id, error),
            };
            if let Err(e) = out.send(reply) {
                warn!(command = %command, error = %e, "Could not send reply to bridge");
            }
        });
    }

    fn on_register_reply(&self, reply: &Message) {
        if !reply.is_success() {
            warn!(error = ?reply.error, "Bridge rejected registration");
            return;
        }
        match PeerRegistration::from_reply(reply) {
            Some(registration) => {
                info!(
                    profile_id = %registration.profile_id,
                    port = registration.port,
                    "Registered with bridge"
                );
                self.registration.send_replace(Some(registration));
            }
            None => warn!(result = ?reply.result, "Registration reply missing profileId or port"),
        }
    }
}
