use crate::backoff::reconnect_delay;
use crate::config::{ClientConfig, SubscribeOptions};
use crate::subscription::{Command, Subscription, SubscriptionItem};
use futures_util::{SinkExt, StreamExt};
use skein_protocol::{decode_server, encode, ClientMessage, ServerMessage, PROTOCOL_VERSION};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Errors surfaced on the client's error channel.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("connect: {0}")]
    Connect(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("server error {code}: {message}")]
    Server { code: String, message: String },
    #[error("heartbeat timeout")]
    HeartbeatTimeout,
    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,
    #[error("client closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// SubscriberClient
// ---------------------------------------------------------------------------

/// Handle to the driver task owning the connection state machine.
///
/// Cheap operations only: subscriptions and closing go through a command
/// channel; events come back per subscription. Non-fatal trouble (reconnects,
/// wire errors) is published on [`SubscriberClient::errors`].
pub struct SubscriberClient {
    commands: mpsc::UnboundedSender<Command>,
    errors: broadcast::Sender<ClientError>,
}

impl SubscriberClient {
    /// Spawn the driver for `url` (e.g. `ws://127.0.0.1:4000/ws/v1/subscribe`).
    ///
    /// Connection is established lazily by the driver; subscriptions made
    /// before it completes are sent as soon as the handshake finishes.
    pub fn connect(url: impl Into<String>, config: ClientConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (errors_tx, _) = broadcast::channel(64);
        tokio::spawn(run_driver(
            url.into(),
            config,
            command_rx,
            command_tx.clone(),
            errors_tx.clone(),
        ));
        SubscriberClient {
            commands: command_tx,
            errors: errors_tx,
        }
    }

    /// Open (or reset) the subscription for a stream, starting after
    /// `options.after_seq`.
    pub async fn subscribe(
        &self,
        stream_id: &str,
        options: SubscribeOptions,
    ) -> Result<Subscription, ClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                stream_id: stream_id.to_owned(),
                after_seq: options.after_seq,
                reply: reply_tx,
            })
            .map_err(|_| ClientError::Closed)?;
        reply_rx.await.map_err(|_| ClientError::Closed)
    }

    /// Error channel; every receiver sees every error from subscription time.
    pub fn errors(&self) -> broadcast::Receiver<ClientError> {
        self.errors.subscribe()
    }

    /// Cancel all subscriptions and stop reconnecting. Terminal.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

// ---------------------------------------------------------------------------
// Per-subscription bookkeeping
// ---------------------------------------------------------------------------

struct SubState {
    /// Highest seq handed to the consumer (starts at the subscribe
    /// after_seq); reconnects resume from here.
    last_confirmed_seq: u64,
    /// False until this connection's replay-end.
    live: bool,
    /// Promotion watermark of the current connection.
    last_replay_seq: u64,
    items: mpsc::Sender<SubscriptionItem>,
}

/// Promotion-window and safety dedup. True when the event should be
/// delivered; updates the confirmed cursor.
fn accept_event(sub: &mut SubState, seq: u64) -> bool {
    if sub.live && seq <= sub.last_replay_seq {
        return false;
    }
    if seq <= sub.last_confirmed_seq {
        return false;
    }
    sub.last_confirmed_seq = seq;
    true
}

fn register_subscription(
    subs: &mut HashMap<String, SubState>,
    stream_id: String,
    after_seq: u64,
    reply: oneshot::Sender<Subscription>,
    command_tx: &mpsc::UnboundedSender<Command>,
    config: &ClientConfig,
) {
    let (items_tx, items_rx) = mpsc::channel(config.subscription_buffer);
    subs.insert(
        stream_id.clone(),
        SubState {
            last_confirmed_seq: after_seq,
            live: false,
            last_replay_seq: 0,
            items: items_tx,
        },
    );
    let _ = reply.send(Subscription::new(stream_id, items_rx, command_tx.clone()));
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

enum SessionEnd {
    Retry,
    Closed,
}

async fn run_driver(
    url: String,
    config: ClientConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    command_tx: mpsc::UnboundedSender<Command>,
    errors: broadcast::Sender<ClientError>,
) {
    let mut subs: HashMap<String, SubState> = HashMap::new();
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::time::timeout(
            config.heartbeat_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await;
        let outcome = match connected {
            Ok(Ok((ws, _response))) => {
                run_session(
                    ws,
                    &config,
                    &mut subs,
                    &mut commands,
                    &command_tx,
                    &errors,
                    &mut attempt,
                )
                .await
            }
            Ok(Err(e)) => {
                let _ = errors.send(ClientError::Connect(e.to_string()));
                SessionEnd::Retry
            }
            Err(_) => {
                let _ = errors.send(ClientError::Connect("connect timed out".to_owned()));
                SessionEnd::Retry
            }
        };

        if matches!(outcome, SessionEnd::Closed) {
            subs.clear();
            return;
        }
        if !config.reconnect {
            debug!("reconnect disabled, ending all subscriptions");
            subs.clear();
            return;
        }
        if let Some(max) = config.max_reconnect_attempts {
            if attempt >= max {
                warn!(attempt, "reconnect attempts exhausted");
                let _ = errors.send(ClientError::ReconnectExhausted);
                subs.clear();
                return;
            }
        }
        let delay = reconnect_delay(attempt, config.base_delay, config.max_delay);
        attempt += 1;
        debug!(?delay, attempt, "waiting before reconnect");
        if !wait_backoff(delay, &mut subs, &mut commands, &command_tx, &config).await {
            subs.clear();
            return;
        }
    }
}

/// Sleep out the backoff while still serving subscribe/cancel commands.
/// False when the client was closed.
async fn wait_backoff(
    delay: std::time::Duration,
    subs: &mut HashMap<String, SubState>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    command_tx: &mpsc::UnboundedSender<Command>,
    config: &ClientConfig,
) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return true,
            cmd = commands.recv() => match cmd {
                None | Some(Command::Close) => return false,
                Some(Command::Subscribe { stream_id, after_seq, reply }) => {
                    register_subscription(subs, stream_id, after_seq, reply, command_tx, config);
                }
                Some(Command::Cancel { stream_id }) => {
                    subs.remove(&stream_id);
                }
            }
        }
    }
}

async fn run_session(
    mut ws: WsStream,
    config: &ClientConfig,
    subs: &mut HashMap<String, SubState>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    command_tx: &mpsc::UnboundedSender<Command>,
    errors: &broadcast::Sender<ClientError>,
    attempt: &mut u32,
) -> SessionEnd {
    // Handshake: hello out, server-hello back.
    let hello = encode(&ClientMessage::Hello {
        version: PROTOCOL_VERSION,
    });
    if ws.send(Message::Text(hello.into())).await.is_err() {
        let _ = errors.send(ClientError::Transport("hello write failed".to_owned()));
        return SessionEnd::Retry;
    }
    let deadline = Instant::now() + config.heartbeat_timeout;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => {
                let _ = errors.send(ClientError::Protocol(
                    "timeout waiting for server-hello".to_owned(),
                ));
                return SessionEnd::Retry;
            }
            Ok(None) => {
                let _ = errors.send(ClientError::Transport(
                    "closed during handshake".to_owned(),
                ));
                return SessionEnd::Retry;
            }
            Ok(Some(Err(e))) => {
                let _ = errors.send(ClientError::Transport(e.to_string()));
                return SessionEnd::Retry;
            }
            Ok(Some(Ok(Message::Text(text)))) => match decode_server(&text) {
                Some(ServerMessage::ServerHello { version }) if version == PROTOCOL_VERSION => {
                    break;
                }
                Some(ServerMessage::ServerHello { version }) => {
                    let _ = errors.send(ClientError::Protocol(format!(
                        "server speaks protocol version {version}"
                    )));
                    return SessionEnd::Retry;
                }
                Some(ServerMessage::Error { code, message }) => {
                    let _ = errors.send(ClientError::Server { code, message });
                    return SessionEnd::Retry;
                }
                _ => {}
            },
            Ok(Some(Ok(Message::Ping(data)))) => {
                let _ = ws.send(Message::Pong(data)).await;
            }
            Ok(Some(Ok(Message::Close(_)))) => {
                let _ = errors.send(ClientError::Transport(
                    "closed during handshake".to_owned(),
                ));
                return SessionEnd::Retry;
            }
            Ok(Some(Ok(_))) => {}
        }
    }

    info!("session established");
    *attempt = 0;

    // Re-issue every subscription from its confirmed cursor.
    for (stream_id, sub) in subs.iter_mut() {
        sub.live = false;
        sub.last_replay_seq = 0;
        let frame = encode(&ClientMessage::Subscribe {
            stream_id: stream_id.clone(),
            after_seq: sub.last_confirmed_seq,
        });
        if ws.send(Message::Text(frame.into())).await.is_err() {
            let _ = errors.send(ClientError::Transport("subscribe write failed".to_owned()));
            return SessionEnd::Retry;
        }
    }

    // Read loop with a rolling heartbeat deadline.
    let mut last_activity = Instant::now();
    loop {
        let idle_deadline = last_activity + config.heartbeat_timeout;
        tokio::select! {
            _ = tokio::time::sleep_until(idle_deadline) => {
                warn!("heartbeat timeout, dropping connection");
                let _ = errors.send(ClientError::HeartbeatTimeout);
                let _ = ws.close(None).await;
                return SessionEnd::Retry;
            }
            cmd = commands.recv() => match cmd {
                None | Some(Command::Close) => {
                    let _ = ws.close(None).await;
                    return SessionEnd::Closed;
                }
                Some(Command::Subscribe { stream_id, after_seq, reply }) => {
                    register_subscription(subs, stream_id.clone(), after_seq, reply, command_tx, config);
                    let frame = encode(&ClientMessage::Subscribe { stream_id, after_seq });
                    if ws.send(Message::Text(frame.into())).await.is_err() {
                        let _ = errors.send(ClientError::Transport("subscribe write failed".to_owned()));
                        return SessionEnd::Retry;
                    }
                }
                Some(Command::Cancel { stream_id }) => {
                    if subs.remove(&stream_id).is_some() {
                        let frame = encode(&ClientMessage::Unsubscribe { stream_id });
                        if ws.send(Message::Text(frame.into())).await.is_err() {
                            let _ = errors.send(ClientError::Transport("unsubscribe write failed".to_owned()));
                            return SessionEnd::Retry;
                        }
                    }
                }
            },
            frame = ws.next() => {
                last_activity = Instant::now();
                match frame {
                    None => {
                        let _ = errors.send(ClientError::Transport("disconnected".to_owned()));
                        return SessionEnd::Retry;
                    }
                    Some(Err(e)) => {
                        let _ = errors.send(ClientError::Transport(e.to_string()));
                        return SessionEnd::Retry;
                    }
                    Some(Ok(Message::Text(text))) => {
                        handle_server_frame(&text, &mut ws, subs, errors).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        let _ = errors.send(ClientError::Transport("closed by peer".to_owned()));
                        return SessionEnd::Retry;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn handle_server_frame(
    text: &str,
    ws: &mut WsStream,
    subs: &mut HashMap<String, SubState>,
    errors: &broadcast::Sender<ClientError>,
) {
    match decode_server(text) {
        Some(ServerMessage::Event { stream_id, event }) => {
            let Some(sub) = subs.get_mut(&stream_id) else {
                // Unknown subscription (e.g. cancelled mid-flight): drop.
                return;
            };
            if !accept_event(sub, event.seq) {
                return;
            }
            if sub.items.send(SubscriptionItem::Event(event)).await.is_err() {
                // Consumer dropped the iterator without cancelling.
                debug!(stream_id = %stream_id, "consumer gone, unsubscribing");
                subs.remove(&stream_id);
                let frame = encode(&ClientMessage::Unsubscribe { stream_id });
                let _ = ws.send(Message::Text(frame.into())).await;
            }
        }
        Some(ServerMessage::ReplayEnd {
            stream_id,
            last_replay_seq,
        }) => {
            let Some(sub) = subs.get_mut(&stream_id) else {
                return;
            };
            sub.live = true;
            sub.last_replay_seq = last_replay_seq;
            sub.last_confirmed_seq = sub.last_confirmed_seq.max(last_replay_seq);
            let marker = SubscriptionItem::Promoted {
                stream_id: stream_id.clone(),
                last_replay_seq,
            };
            if sub.items.send(marker).await.is_err() {
                subs.remove(&stream_id);
                let frame = encode(&ClientMessage::Unsubscribe { stream_id });
                let _ = ws.send(Message::Text(frame.into())).await;
            }
        }
        Some(ServerMessage::Ping {}) => {
            let frame = encode(&ClientMessage::Pong {});
            let _ = ws.send(Message::Text(frame.into())).await;
        }
        Some(ServerMessage::Error { code, message }) => {
            warn!(code = %code, message = %message, "server error frame");
            let _ = errors.send(ClientError::Server { code, message });
        }
        Some(ServerMessage::ServerHello { .. }) => {}
        None => debug!("undecodable server frame"),
    }
}
