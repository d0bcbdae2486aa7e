use crate::frame::{Frame, TransportError};
use crate::hub::FanoutHub;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use skein_protocol::{
    decode_client, encode, error_codes, ClientMessage, ServerMessage, PROTOCOL_VERSION,
};
use skein_store::ReplayOptions;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long connection teardown waits for the writer to flush queued frames
/// before aborting it.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Reasons a background task asks the connection loop to shut down.
enum CloseSignal {
    Overflow,
    WriteFailed,
}

/// Outcome of a non-blocking enqueue onto the outbound queue.
enum Enqueued {
    Sent,
    /// The bounded queue is full — the backpressure contract says close.
    Overflow,
    /// The connection is already going down.
    Gone,
}

fn enqueue(outbound: &mpsc::Sender<Frame>, message: &ServerMessage) -> Enqueued {
    match outbound.try_send(Frame::Text(encode(message))) {
        Ok(()) => Enqueued::Sent,
        Err(mpsc::error::TrySendError::Full(_)) => Enqueued::Overflow,
        Err(mpsc::error::TrySendError::Closed(_)) => Enqueued::Gone,
    }
}

fn enqueue_error(outbound: &mpsc::Sender<Frame>, code: &str, message: &str) -> Enqueued {
    enqueue(
        outbound,
        &ServerMessage::Error {
            code: code.to_owned(),
            message: message.to_owned(),
        },
    )
}

// ---------------------------------------------------------------------------
// Connection driver
// ---------------------------------------------------------------------------

/// Drive one subscriber connection over a generic text-frame transport.
///
/// Performs the versioned hello handshake, then serves subscribe/unsubscribe
/// requests until the peer disconnects, the heartbeat times out, or the
/// outbound queue overflows. Returns when the connection is fully torn down.
pub async fn serve_connection<R, W>(mut reader: R, writer: W, hub: FanoutHub)
where
    R: Stream<Item = Result<Frame, TransportError>> + Unpin,
    W: Sink<Frame, Error = TransportError> + Unpin + Send + 'static,
{
    let conn_id = Uuid::new_v4().to_string();
    let config = hub.config().clone();
    let (outbound_tx, outbound_rx) = mpsc::channel::<Frame>(config.max_buffer_size);
    let (close_tx, mut close_rx) = mpsc::channel::<CloseSignal>(4);

    let writer_task = tokio::spawn(run_writer(writer, outbound_rx, close_tx.clone()));

    // Handshake: the first text frame must be a matching hello.
    if handshake(&mut reader, &outbound_tx, &config.heartbeat_timeout, &conn_id).await {
        info!(conn_id = %conn_id, "connection established");

        let mut subscriptions: HashMap<String, SubscriptionHandle> = HashMap::new();
        let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
        heartbeat.tick().await;
        let mut last_activity = Instant::now();

        loop {
            let idle_deadline = last_activity + config.heartbeat_timeout;
            tokio::select! {
                frame = reader.next() => {
                    last_activity = Instant::now();
                    match frame {
                        Some(Ok(Frame::Text(text))) => {
                            if !handle_client_frame(
                                &text, &conn_id, &hub, &outbound_tx, &close_tx,
                                &mut subscriptions,
                            ) {
                                break;
                            }
                        }
                        Some(Ok(Frame::Ping(data))) => {
                            let _ = outbound_tx.try_send(Frame::Pong(data));
                        }
                        Some(Ok(Frame::Pong(_))) => {}
                        Some(Ok(Frame::Close)) | None => {
                            info!(conn_id = %conn_id, "peer disconnected");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(conn_id = %conn_id, error = %e, "transport error");
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(idle_deadline) => {
                    warn!(conn_id = %conn_id, "heartbeat timeout");
                    break;
                }
                _ = heartbeat.tick() => {
                    if matches!(enqueue(&outbound_tx, &ServerMessage::Ping {}), Enqueued::Overflow) {
                        let _ = enqueue_error(
                            &outbound_tx,
                            error_codes::BUFFER_OVERFLOW,
                            "outbound queue full",
                        );
                        break;
                    }
                }
                Some(signal) = close_rx.recv() => {
                    match signal {
                        CloseSignal::Overflow => {
                            // Best effort: the queue that overflowed is the
                            // one this error frame needs.
                            let _ = enqueue_error(
                                &outbound_tx,
                                error_codes::BUFFER_OVERFLOW,
                                "outbound queue full",
                            );
                            warn!(conn_id = %conn_id, "buffer overflow, closing");
                        }
                        CloseSignal::WriteFailed => {
                            warn!(conn_id = %conn_id, "socket write failed, closing");
                        }
                    }
                    break;
                }
            }
        }

        for (_, handle) in subscriptions {
            handle.cancel();
        }
    }

    // Let the writer flush what was accepted before the close, then stop it.
    drop(outbound_tx);
    drop(close_tx);
    let mut writer_task = writer_task;
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task)
        .await
        .is_err()
    {
        debug!(conn_id = %conn_id, "writer did not drain in time, aborting");
        writer_task.abort();
    }
    info!(conn_id = %conn_id, "connection closed");
}

async fn run_writer<W>(
    mut writer: W,
    mut outbound_rx: mpsc::Receiver<Frame>,
    close_tx: mpsc::Sender<CloseSignal>,
) where
    W: Sink<Frame, Error = TransportError> + Unpin,
{
    while let Some(frame) = outbound_rx.recv().await {
        if writer.send(frame).await.is_err() {
            let _ = close_tx.try_send(CloseSignal::WriteFailed);
            return;
        }
    }
    let _ = writer.close().await;
}

/// Await the opening `hello`. Returns false when the connection must close
/// (mismatched version, malformed opener, timeout, or transport failure).
async fn handshake<R>(
    reader: &mut R,
    outbound: &mpsc::Sender<Frame>,
    timeout: &Duration,
    conn_id: &str,
) -> bool
where
    R: Stream<Item = Result<Frame, TransportError>> + Unpin,
{
    let deadline = Instant::now() + *timeout;
    loop {
        let frame = match tokio::time::timeout_at(deadline, reader.next()).await {
            Ok(frame) => frame,
            Err(_) => {
                warn!(conn_id = %conn_id, "timeout waiting for hello");
                return false;
            }
        };
        match frame {
            Some(Ok(Frame::Text(text))) => {
                return match decode_client(&text) {
                    Some(ClientMessage::Hello { version }) if version == PROTOCOL_VERSION => {
                        enqueue(
                            outbound,
                            &ServerMessage::ServerHello {
                                version: PROTOCOL_VERSION,
                            },
                        );
                        true
                    }
                    Some(ClientMessage::Hello { version }) => {
                        warn!(conn_id = %conn_id, version, "protocol version mismatch");
                        enqueue_error(
                            outbound,
                            error_codes::VERSION_MISMATCH,
                            &format!("server speaks version {PROTOCOL_VERSION}, client sent {version}"),
                        );
                        false
                    }
                    _ => {
                        enqueue_error(outbound, error_codes::INVALID_MESSAGE, "expected hello");
                        false
                    }
                };
            }
            Some(Ok(Frame::Ping(data))) => {
                let _ = outbound.try_send(Frame::Pong(data));
            }
            Some(Ok(Frame::Pong(_))) => {}
            Some(Ok(Frame::Close)) | None => return false,
            Some(Err(e)) => {
                warn!(conn_id = %conn_id, error = %e, "transport error before hello");
                return false;
            }
        }
    }
}

/// Dispatch one post-handshake client frame. Returns false to close the
/// connection.
fn handle_client_frame(
    text: &str,
    conn_id: &str,
    hub: &FanoutHub,
    outbound: &mpsc::Sender<Frame>,
    close_tx: &mpsc::Sender<CloseSignal>,
    subscriptions: &mut HashMap<String, SubscriptionHandle>,
) -> bool {
    match decode_client(text) {
        Some(ClientMessage::Subscribe { stream_id, after_seq }) => {
            debug!(conn_id = %conn_id, stream_id = %stream_id, after_seq, "subscribe");
            // A re-subscribe replaces the old subscription with a fresh
            // replay window.
            if let Some(previous) = subscriptions.remove(&stream_id) {
                previous.cancel();
            }
            let handle = spawn_subscription(SubscriptionParams {
                stream_id: stream_id.clone(),
                after_seq,
                hub: hub.clone(),
                outbound: outbound.clone(),
                close_tx: close_tx.clone(),
            });
            subscriptions.insert(stream_id, handle);
            true
        }
        Some(ClientMessage::Unsubscribe { stream_id }) => {
            debug!(conn_id = %conn_id, stream_id = %stream_id, "unsubscribe");
            match subscriptions.remove(&stream_id) {
                Some(handle) => handle.cancel(),
                None => {
                    enqueue_error(
                        outbound,
                        error_codes::UNKNOWN_STREAM,
                        &format!("no subscription for {stream_id}"),
                    );
                }
            }
            true
        }
        Some(ClientMessage::Pong {}) => true,
        Some(ClientMessage::Hello { .. }) => {
            enqueue_error(outbound, error_codes::INVALID_MESSAGE, "duplicate hello");
            true
        }
        None => {
            enqueue_error(outbound, error_codes::INVALID_MESSAGE, "unrecognized frame");
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Per-subscription replay -> live task
// ---------------------------------------------------------------------------

struct SubscriptionHandle {
    cancel_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl SubscriptionHandle {
    fn cancel(self) {
        let _ = self.cancel_tx.send(true);
        self.task.abort();
    }
}

struct SubscriptionParams {
    stream_id: String,
    after_seq: u64,
    hub: FanoutHub,
    outbound: mpsc::Sender<Frame>,
    close_tx: mpsc::Sender<CloseSignal>,
}

fn spawn_subscription(params: SubscriptionParams) -> SubscriptionHandle {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let task = tokio::spawn(run_subscription(params, cancel_rx));
    SubscriptionHandle { cancel_tx, task }
}

/// Serve one subscription: stream the bounded replay slice, promote with a
/// single `replay-end`, then forward live broadcasts.
///
/// The broadcast receiver is registered BEFORE the head snapshot, so the
/// replay window and the live tail overlap rather than gap; the overlap is
/// removed by the `seq <= last_replay_seq` filter. Store failures drop only
/// this subscription; queue overflow closes the whole connection.
async fn run_subscription(params: SubscriptionParams, mut cancel_rx: watch::Receiver<bool>) {
    let SubscriptionParams {
        stream_id,
        after_seq,
        hub,
        outbound,
        close_tx,
    } = params;

    let broadcast_tx = hub.get_or_create_broadcast(&stream_id).await;
    let mut live_rx = broadcast_tx.subscribe();

    let head = match hub.store().lock().await.head(&stream_id) {
        Ok(head) => head,
        Err(e) => {
            warn!(stream_id = %stream_id, error = %e, "head query failed");
            enqueue_error(&outbound, error_codes::REPLAY_FAILED, "store read failed");
            return;
        }
    };

    // Replay slice (after_seq, head], chunked store reads.
    let chunk_size = hub.config().replay_chunk_size;
    let mut cursor = after_seq;
    while cursor < head {
        let chunk = {
            let store = hub.store().lock().await;
            store.replay(
                &stream_id,
                &ReplayOptions {
                    after_seq: cursor,
                    limit: Some(chunk_size),
                },
            )
        };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(stream_id = %stream_id, error = %e, "replay read failed");
                enqueue_error(&outbound, error_codes::REPLAY_FAILED, "store read failed");
                return;
            }
        };
        if chunk.is_empty() {
            // Stream shrank under us (deleted); promote with what we have.
            break;
        }
        for event in chunk {
            if event.seq > head {
                break;
            }
            cursor = event.seq;
            match enqueue(
                &outbound,
                &ServerMessage::Event {
                    stream_id: stream_id.clone(),
                    event,
                },
            ) {
                Enqueued::Sent => {}
                Enqueued::Overflow => {
                    let _ = close_tx.try_send(CloseSignal::Overflow);
                    return;
                }
                Enqueued::Gone => return,
            }
        }
    }

    match enqueue(
        &outbound,
        &ServerMessage::ReplayEnd {
            stream_id: stream_id.clone(),
            last_replay_seq: head,
        },
    ) {
        Enqueued::Sent => {}
        Enqueued::Overflow => {
            let _ = close_tx.try_send(CloseSignal::Overflow);
            return;
        }
        Enqueued::Gone => return,
    }
    debug!(stream_id = %stream_id, last_replay_seq = head, "subscription live");

    // Live phase. last_sent keeps the outbound seq sequence strictly
    // monotonic even if a producer misbehaves.
    let mut last_sent = head;
    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    return;
                }
            }
            received = live_rx.recv() => match received {
                Ok(event) => {
                    if event.seq <= last_sent {
                        continue;
                    }
                    last_sent = event.seq;
                    match enqueue(
                        &outbound,
                        &ServerMessage::Event {
                            stream_id: stream_id.clone(),
                            event,
                        },
                    ) {
                        Enqueued::Sent => {}
                        Enqueued::Overflow => {
                            let _ = close_tx.try_send(CloseSignal::Overflow);
                            return;
                        }
                        Enqueued::Gone => return,
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(stream_id = %stream_id, skipped, "subscription lagged, closing");
                    let _ = close_tx.try_send(CloseSignal::Overflow);
                    return;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}
