//! Client session.
//!
//! One session per connection: it registers with the hub, sends `READY`,
//! then runs a writer task draining the connection's outbound queue and a
//! reader loop dispatching client commands. Whichever side stops first
//! cancels the other, and the connection is unregistered exactly once on the
//! way out.
//!
//! Liveness: the writer pings every heartbeat interval. The reader drops the
//! connection when neither a pong nor a `HEARTBEAT` arrives within the
//! heartbeat timeout. Every write has its own deadline, so a peer that stops
//! reading cannot hold the writer.

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tether_core::channel::validate_channel_id;
use tether_core::{ConnectionHandle, ConnectionId, OutboundReceiver, PresenceStatus, Realtime, UserId};
use tether_protocol::{codec, ClientCommand, Event, ProtocolError, VoiceSignal, VoiceStateUpdate};
use tether_transport::{Connection, TransportError, WireMessage};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};

/// Per-connection limits and timers.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_frame_size: usize,
    pub outbound_queue_capacity: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub write_timeout: Duration,
}

impl SessionSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_frame_size: config.transport.max_frame_size,
            outbound_queue_capacity: config.limits.outbound_queue_capacity,
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            write_timeout: config.write_timeout(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What the reader does after a frame.
enum Flow {
    Continue,
    Close,
}

/// Drive one authenticated connection until it closes.
pub async fn run<C: Connection>(
    conn: C,
    user_id: UserId,
    core: Arc<Realtime>,
    settings: SessionSettings,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let (handle, outbound) = ConnectionHandle::new(user_id, settings.outbound_queue_capacity);
    let connection_id = handle.id;
    let (mut sink, stream) = conn.split();

    if let Err(e) = core.hub().register(handle).await {
        warn!(connection = %connection_id, error = %e, "Registration failed");
        close_within(&mut sink, settings.write_timeout).await;
        return;
    }
    info!(connection = %connection_id, user = %user_id, "Client connected");

    // READY goes out before the writer drains anything queued by the hub
    let ready = Event::ready(&connection_id.to_string(), &user_id.to_string());
    let sent = match codec::encode(&ready) {
        Ok(text) => send_within(&mut sink, WireMessage::Text(text), settings.write_timeout)
            .await
            .is_ok(),
        Err(e) => {
            error!(connection = %connection_id, error = %e, "Failed to encode READY");
            false
        }
    };

    let closing = CancellationToken::new();
    let writer = tokio::spawn(write_loop(
        sink,
        outbound,
        WriterTimers {
            ping_every: settings.heartbeat_interval,
            write_timeout: settings.write_timeout,
        },
        closing.clone(),
        connection_id,
    ));

    if sent {
        let session = ClientSession {
            connection_id,
            user_id,
            core: Arc::clone(&core),
            settings,
        };
        session.read_loop(stream, &closing).await;
    }
    closing.cancel();

    if let Err(e) = core.hub().unregister(connection_id).await {
        debug!(connection = %connection_id, error = %e, "Hub gone before unregister");
    }
    let _ = writer.await;
    info!(connection = %connection_id, user = %user_id, "Client disconnected");
}

#[derive(Debug, Clone, Copy)]
struct WriterTimers {
    ping_every: Duration,
    write_timeout: Duration,
}

/// Send one message, failing if the transport does not take it in time.
async fn send_within<S>(sink: &mut S, message: WireMessage, limit: Duration) -> Result<(), TransportError>
where
    S: Sink<WireMessage, Error = TransportError> + Unpin,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::SendFailed(format!(
            "write blocked for more than {}ms",
            limit.as_millis()
        ))),
    }
}

/// Best-effort close, bounded by the write deadline.
async fn close_within<S>(sink: &mut S, limit: Duration)
where
    S: Sink<WireMessage, Error = TransportError> + Unpin,
{
    let _ = tokio::time::timeout(limit, async {
        let _ = sink.send(WireMessage::Close).await;
        let _ = sink.close().await;
    })
    .await;
}

/// Forward queued events and pings until cancelled, the queue closes or a
/// write fails or stalls. Always ends by closing the transport.
async fn write_loop<S>(
    mut sink: S,
    mut outbound: OutboundReceiver,
    timers: WriterTimers,
    closing: CancellationToken,
    connection_id: ConnectionId,
) where
    S: Sink<WireMessage, Error = TransportError> + Unpin,
{
    let mut ping = tokio::time::interval_at(Instant::now() + timers.ping_every, timers.ping_every);

    loop {
        let message = tokio::select! {
            biased;
            _ = closing.cancelled() => break,
            payload = outbound.recv() => {
                let Some(payload) = payload else {
                    debug!(connection = %connection_id, "Outbound queue closed");
                    break;
                };
                metrics::record_message(payload.len(), "outbound");
                WireMessage::Text(payload.to_string())
            }
            _ = ping.tick() => WireMessage::Ping(Bytes::new()),
        };

        if let Err(e) = send_within(&mut sink, message, timers.write_timeout).await {
            warn!(connection = %connection_id, error = %e, "Write failed, closing");
            metrics::record_error("write");
            break;
        }
    }

    closing.cancel();
    close_within(&mut sink, timers.write_timeout).await;
}

/// Command handling for one connection.
struct ClientSession {
    connection_id: ConnectionId,
    user_id: UserId,
    core: Arc<Realtime>,
    settings: SessionSettings,
}

impl ClientSession {
    async fn read_loop<S>(&self, mut stream: S, closing: &CancellationToken)
    where
        S: Stream<Item = Result<WireMessage, TransportError>> + Unpin,
    {
        let mut deadline = Instant::now() + self.settings.heartbeat_timeout;

        loop {
            let message = tokio::select! {
                _ = closing.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(connection = %self.connection_id, "Liveness timeout");
                    metrics::record_error("liveness_timeout");
                    break;
                }
                message = stream.next() => message,
            };

            match message {
                Some(Ok(WireMessage::Text(text))) => {
                    let (flow, alive) = self.handle_text(&text).await;
                    if alive {
                        deadline = Instant::now() + self.settings.heartbeat_timeout;
                    }
                    if let Flow::Close = flow {
                        break;
                    }
                }
                Some(Ok(WireMessage::Pong(_))) => {
                    deadline = Instant::now() + self.settings.heartbeat_timeout;
                }
                Some(Ok(WireMessage::Ping(_))) => {}
                Some(Ok(WireMessage::Binary(data))) => {
                    warn!(connection = %self.connection_id, size = data.len(), "Ignoring binary frame");
                }
                Some(Ok(WireMessage::Close)) | None => {
                    debug!(connection = %self.connection_id, "Connection closed by client");
                    break;
                }
                Some(Err(TransportError::FrameTooLarge { size, max })) => {
                    warn!(connection = %self.connection_id, size, max, "Frame too large, closing");
                    metrics::record_error("frame_too_large");
                    break;
                }
                Some(Err(e)) => {
                    warn!(connection = %self.connection_id, error = %e, "Read failed");
                    metrics::record_error("transport");
                    break;
                }
            }
        }
    }

    /// Handle one text frame. The second value reports whether the frame
    /// counts as a liveness signal.
    async fn handle_text(&self, text: &str) -> (Flow, bool) {
        metrics::record_message(text.len(), "inbound");

        let command = match codec::decode_command_with_limit(text, self.settings.max_frame_size) {
            Ok(command) => command,
            Err(ProtocolError::FrameTooLarge(size)) => {
                warn!(connection = %self.connection_id, size, "Frame too large, closing");
                metrics::record_error("frame_too_large");
                return (Flow::Close, false);
            }
            Err(e) => {
                warn!(connection = %self.connection_id, error = %e, "Ignoring malformed command");
                metrics::record_error("protocol");
                return (Flow::Continue, false);
            }
        };

        let started = Instant::now();
        let name = match &command {
            ClientCommand::Unknown(_) => "UNKNOWN".to_string(),
            known => known.name().to_string(),
        };
        let alive = matches!(command, ClientCommand::Heartbeat);
        self.handle_command(command).await;
        metrics::record_command_latency(&name, started.elapsed().as_secs_f64());
        (Flow::Continue, alive)
    }

    async fn handle_command(&self, command: ClientCommand) {
        match command {
            ClientCommand::Subscribe(req) => self.subscribe(&req.channel_id).await,
            ClientCommand::Unsubscribe(req) => {
                if self.core.hub().unsubscribe(self.connection_id, &req.channel_id) {
                    debug!(connection = %self.connection_id, channel = %req.channel_id, "Unsubscribed");
                }
            }
            ClientCommand::TypingStart(req) => {
                if self.may_access(&req.channel_id).await {
                    self.core.presence().set_typing(&req.channel_id, self.user_id).await;
                } else {
                    debug!(connection = %self.connection_id, channel = %req.channel_id, "Typing denied");
                }
            }
            ClientCommand::Heartbeat => {
                let ack = Event::heartbeat_ack(chrono::Utc::now().timestamp_millis());
                self.core.hub().send_to_connection(self.connection_id, &ack);
            }
            ClientCommand::PresenceUpdate(req) => match req.status.parse::<PresenceStatus>() {
                Ok(status) => self.core.presence().publish_presence(self.user_id, status).await,
                Err(e) => {
                    warn!(connection = %self.connection_id, error = %e, "Rejected presence update");
                }
            },
            ClientCommand::VoiceJoin(req) => {
                let result = self
                    .core
                    .voice()
                    .join(self.user_id, &req.channel_id, Some(self.connection_id))
                    .await;
                if let Err(e) = result {
                    warn!(connection = %self.connection_id, channel = %req.channel_id, error = %e, "Voice join failed");
                    self.core
                        .hub()
                        .send_to_connection(self.connection_id, &Event::voice_error(e.to_string()));
                }
            }
            ClientCommand::VoiceLeave(req) => {
                let result = self
                    .core
                    .voice()
                    .leave(self.user_id, &req.channel_id, Some(self.connection_id))
                    .await;
                if let Err(e) = result {
                    debug!(connection = %self.connection_id, channel = %req.channel_id, error = %e, "Voice leave failed");
                }
            }
            ClientCommand::VoiceStateUpdate(req) => self.voice_state_update(req).await,
            ClientCommand::VoiceSignal(req) => self.voice_signal(req),
            ClientCommand::Unknown(kind) => {
                debug!(connection = %self.connection_id, kind = %kind, "Ignoring unknown command");
            }
        }
    }

    /// Subscriptions are never acknowledged; a denial is only logged.
    async fn subscribe(&self, channel_id: &str) {
        if let Err(reason) = validate_channel_id(channel_id) {
            warn!(connection = %self.connection_id, reason, "Invalid channel id");
            return;
        }
        if !self.may_access(channel_id).await {
            warn!(connection = %self.connection_id, channel = %channel_id, "Subscription denied");
            return;
        }
        if self.core.hub().subscribe(self.connection_id, channel_id) {
            metrics::record_subscription();
            debug!(connection = %self.connection_id, channel = %channel_id, "Subscribed");
        }
    }

    /// A channel id is either a channel or a direct conversation. Collaborator
    /// failures deny.
    async fn may_access(&self, channel_id: &str) -> bool {
        let access = self.core.access();
        match access.can_access_channel(channel_id, self.user_id).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => debug!(channel = %channel_id, error = %e, "Channel check failed"),
        }
        match access.can_access_conversation(channel_id, self.user_id).await {
            Ok(allowed) => allowed,
            Err(e) => {
                debug!(channel = %channel_id, error = %e, "Conversation check failed");
                false
            }
        }
    }

    async fn voice_state_update(&self, req: VoiceStateUpdate) {
        let result = self
            .core
            .voice()
            .update_self_state(
                self.user_id,
                &req.channel_id,
                req.is_self_muted,
                req.is_self_deafened,
            )
            .await;
        if let Err(e) = result {
            debug!(connection = %self.connection_id, channel = %req.channel_id, error = %e, "Voice state update failed");
        }
    }

    fn voice_signal(&self, req: VoiceSignal) {
        let Ok(target) = req.target_user_id.parse::<UserId>() else {
            warn!(connection = %self.connection_id, target = %req.target_user_id, "Invalid signal target");
            return;
        };
        self.core.voice().relay_signal(
            self.user_id,
            &req.channel_id,
            target,
            &req.signal_type,
            req.signal,
        );
    }
}
