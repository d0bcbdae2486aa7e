//! End-to-end replay -> live handover (axum transport).
//!
//! Pre-populates a stream, subscribes, and broadcasts more events while the
//! replay is still draining. The subscriber must observe every seq exactly
//! once, in order, with a single replay-end between history and tail.

use axum::routing::get;
use axum::Router;
use skein_protocol::{ClientMessage, ServerMessage};
use skein_server::{ws_handler, FanoutConfig, FanoutHub};
use skein_store::EventStore;
use skein_test_utils::{event_values, MockWsClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

async fn start_axum_server(hub: FanoutHub) -> std::net::SocketAddr {
    let app = Router::new()
        .route("/ws/v1/subscribe", get(ws_handler))
        .with_state(hub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind server");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server error");
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    addr
}

async fn append_and_broadcast(
    hub: &FanoutHub,
    store: &Arc<Mutex<EventStore>>,
    stream_id: &str,
    count: u64,
) {
    let stored = store
        .lock()
        .await
        .append(stream_id, &event_values(count))
        .unwrap();
    hub.broadcast(stream_id, &stored).await;
}

#[tokio::test]
async fn replay_live_handover_yields_every_seq_exactly_once() {
    let store = Arc::new(Mutex::new(EventStore::open_in_memory().unwrap()));
    let hub = FanoutHub::new(store.clone(), FanoutConfig::default());
    let addr = start_axum_server(hub.clone()).await;

    // History: seqs 1..=500.
    append_and_broadcast(&hub, &store, "s1", 500).await;

    let url = format!("ws://{addr}/ws/v1/subscribe");
    let mut client = MockWsClient::connect_and_handshake(&url).await.unwrap();
    client
        .send_message(&ClientMessage::Subscribe {
            stream_id: "s1".to_owned(),
            after_seq: 0,
        })
        .await
        .unwrap();

    // Concurrent producer: seqs 501..=1000 in small batches while the
    // replay slice is still going out.
    let producer = {
        let hub = hub.clone();
        let store = store.clone();
        tokio::spawn(async move {
            for _ in 0..10 {
                append_and_broadcast(&hub, &store, "s1", 50).await;
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    };

    let mut seqs: Vec<u64> = Vec::new();
    let mut replay_end: Option<(u64, usize)> = None;
    while seqs.len() < 1000 {
        let frame = tokio::time::timeout(Duration::from_secs(10), client.recv_message())
            .await
            .expect("timed out waiting for events")
            .unwrap();
        match frame {
            ServerMessage::Event { event, .. } => seqs.push(event.seq),
            ServerMessage::ReplayEnd { last_replay_seq, .. } => {
                assert!(replay_end.is_none(), "replay-end must appear exactly once");
                replay_end = Some((last_replay_seq, seqs.len()));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
    producer.await.unwrap();

    // Exactly 1..=1000, strictly increasing: no gaps, no duplicates.
    assert_eq!(seqs, (1..=1000).collect::<Vec<u64>>());

    // The promotion marker sits exactly at its watermark: every event before
    // it has seq <= lastReplaySeq, everything after is the live tail.
    let (last_replay_seq, events_before) = replay_end.expect("replay-end was delivered");
    assert!(last_replay_seq >= 500, "snapshot must cover the pre-populated history");
    assert_eq!(events_before as u64, last_replay_seq);

    client.close().await.unwrap();
}

#[tokio::test]
async fn subscribe_at_head_promotes_without_any_replay() {
    let store = Arc::new(Mutex::new(EventStore::open_in_memory().unwrap()));
    let hub = FanoutHub::new(store.clone(), FanoutConfig::default());
    let addr = start_axum_server(hub.clone()).await;

    append_and_broadcast(&hub, &store, "s1", 7).await;

    let url = format!("ws://{addr}/ws/v1/subscribe");
    let mut client = MockWsClient::connect_and_handshake(&url).await.unwrap();
    client
        .send_message(&ClientMessage::Subscribe {
            stream_id: "s1".to_owned(),
            after_seq: 7,
        })
        .await
        .unwrap();

    let (seqs, last_replay_seq) = client.drain_replay("s1").await.unwrap();
    assert!(seqs.is_empty());
    assert_eq!(last_replay_seq, 7);

    // And the subscription is genuinely live.
    append_and_broadcast(&hub, &store, "s1", 1).await;
    match client.recv_message().await.unwrap() {
        ServerMessage::Event { event, .. } => assert_eq!(event.seq, 8),
        other => panic!("expected live event, got {other:?}"),
    }
}

#[tokio::test]
async fn multiple_subscribers_receive_independent_streams() {
    let store = Arc::new(Mutex::new(EventStore::open_in_memory().unwrap()));
    let hub = FanoutHub::new(store.clone(), FanoutConfig::default());
    let addr = start_axum_server(hub.clone()).await;

    append_and_broadcast(&hub, &store, "a", 3).await;
    append_and_broadcast(&hub, &store, "b", 2).await;

    let url = format!("ws://{addr}/ws/v1/subscribe");
    let mut first = MockWsClient::connect_and_handshake(&url).await.unwrap();
    let mut second = MockWsClient::connect_and_handshake(&url).await.unwrap();

    first
        .send_message(&ClientMessage::Subscribe {
            stream_id: "a".to_owned(),
            after_seq: 0,
        })
        .await
        .unwrap();
    second
        .send_message(&ClientMessage::Subscribe {
            stream_id: "b".to_owned(),
            after_seq: 0,
        })
        .await
        .unwrap();

    let (seqs_a, head_a) = first.drain_replay("a").await.unwrap();
    let (seqs_b, head_b) = second.drain_replay("b").await.unwrap();
    assert_eq!((seqs_a, head_a), (vec![1, 2, 3], 3));
    assert_eq!((seqs_b, head_b), (vec![1, 2], 2));

    // A broadcast on "a" reaches only the "a" subscriber.
    append_and_broadcast(&hub, &store, "a", 1).await;
    match first.recv_message().await.unwrap() {
        ServerMessage::Event { stream_id, event } => {
            assert_eq!(stream_id, "a");
            assert_eq!(event.seq, 4);
        }
        other => panic!("unexpected frame {other:?}"),
    }
}
