//! End-to-end resume: a subscriber rides out a server drop, reconnects, and
//! resumes from its last confirmed seq without duplicates.

use skein_client::{ClientConfig, SubscribeOptions, SubscriberClient, SubscriptionItem};
use skein_server::{FanoutConfig, FanoutHub, FanoutListener};
use skein_store::EventStore;
use skein_test_utils::event_values;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

async fn append_and_broadcast(
    hub: &FanoutHub,
    store: &Arc<Mutex<EventStore>>,
    stream_id: &str,
    count: u64,
) -> Vec<u64> {
    let stored = store
        .lock()
        .await
        .append(stream_id, &event_values(count))
        .unwrap();
    hub.broadcast(stream_id, &stored).await;
    stored.iter().map(|e| e.seq).collect()
}

async fn start_listener(addr: &str, hub: FanoutHub) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = FanoutListener::bind(addr, hub).await.expect("bind listener");
    let local = listener.local_addr().unwrap();
    let task = tokio::spawn(listener.run());
    tokio::time::sleep(Duration::from_millis(20)).await;
    (local, task)
}

async fn next_item(
    subscription: &mut skein_client::Subscription,
) -> Option<SubscriptionItem> {
    tokio::time::timeout(Duration::from_secs(10), subscription.next())
        .await
        .expect("timed out waiting for a subscription item")
}

fn fast_reconnect() -> ClientConfig {
    ClientConfig {
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(500),
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn subscriber_resumes_from_last_confirmed_seq() {
    let store = Arc::new(Mutex::new(EventStore::open_in_memory().unwrap()));
    let hub = FanoutHub::new(store.clone(), FanoutConfig::default());
    let (addr, server_task) = start_listener("127.0.0.1:0", hub.clone()).await;

    // History 1..=5 before the subscriber shows up.
    append_and_broadcast(&hub, &store, "s1", 5).await;

    let client = SubscriberClient::connect(format!("ws://{addr}"), fast_reconnect());
    let mut subscription = client
        .subscribe("s1", SubscribeOptions::default())
        .await
        .unwrap();

    // Replay 1..=5, promotion at 5.
    for expected in 1u64..=5 {
        match next_item(&mut subscription).await.unwrap() {
            SubscriptionItem::Event(event) => assert_eq!(event.seq, expected),
            other => panic!("expected event {expected}, got {other:?}"),
        }
    }
    match next_item(&mut subscription).await.unwrap() {
        SubscriptionItem::Promoted { last_replay_seq, .. } => assert_eq!(last_replay_seq, 5),
        other => panic!("expected promotion, got {other:?}"),
    }

    // Live 6..=10.
    append_and_broadcast(&hub, &store, "s1", 5).await;
    for expected in 6u64..=10 {
        match next_item(&mut subscription).await.unwrap() {
            SubscriptionItem::Event(event) => assert_eq!(event.seq, expected),
            other => panic!("expected event {expected}, got {other:?}"),
        }
    }

    // Server goes away; 11..=13 are appended while the subscriber is blind.
    server_task.abort();
    tokio::time::sleep(Duration::from_millis(50)).await;
    append_and_broadcast(&hub, &store, "s1", 3).await;

    // Server returns on the same address with the same store.
    let (_addr, _server_task) = start_listener(&addr.to_string(), hub.clone()).await;

    // The subscriber resumes after seq 10: replay 11..=13, then promotion.
    let mut resumed: Vec<u64> = Vec::new();
    let mut promotion = None;
    while promotion.is_none() {
        match next_item(&mut subscription).await.unwrap() {
            SubscriptionItem::Event(event) => resumed.push(event.seq),
            SubscriptionItem::Promoted { last_replay_seq, .. } => {
                promotion = Some(last_replay_seq);
            }
        }
    }
    assert_eq!(resumed, vec![11, 12, 13]);
    assert_eq!(promotion, Some(13));

    client.close();
}

#[tokio::test]
async fn promotion_window_duplicates_never_reach_the_consumer() {
    let store = Arc::new(Mutex::new(EventStore::open_in_memory().unwrap()));
    let hub = FanoutHub::new(store.clone(), FanoutConfig::default());
    let (addr, _server_task) = start_listener("127.0.0.1:0", hub.clone()).await;

    append_and_broadcast(&hub, &store, "s1", 3).await;

    let client = SubscriberClient::connect(format!("ws://{addr}"), fast_reconnect());
    let mut subscription = client
        .subscribe("s1", SubscribeOptions::default())
        .await
        .unwrap();

    // Rebroadcast already-stored events right after subscribing: whatever
    // interleaving the server sees, seqs 1..=3 must come through once.
    let dup = store
        .lock()
        .await
        .replay("s1", &skein_store::ReplayOptions::default())
        .unwrap();
    hub.broadcast("s1", &dup).await;
    append_and_broadcast(&hub, &store, "s1", 2).await;

    let mut seqs = Vec::new();
    while seqs.len() < 5 {
        match next_item(&mut subscription).await.unwrap() {
            SubscriptionItem::Event(event) => seqs.push(event.seq),
            SubscriptionItem::Promoted { .. } => {}
        }
    }
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);

    client.close();
}

#[tokio::test]
async fn cancelled_subscription_ends_its_sequence() {
    let store = Arc::new(Mutex::new(EventStore::open_in_memory().unwrap()));
    let hub = FanoutHub::new(store.clone(), FanoutConfig::default());
    let (addr, _server_task) = start_listener("127.0.0.1:0", hub.clone()).await;

    let client = SubscriberClient::connect(format!("ws://{addr}"), fast_reconnect());
    let mut subscription = client
        .subscribe("s1", SubscribeOptions::default())
        .await
        .unwrap();
    match next_item(&mut subscription).await.unwrap() {
        SubscriptionItem::Promoted { last_replay_seq, .. } => assert_eq!(last_replay_seq, 0),
        other => panic!("expected promotion, got {other:?}"),
    }

    subscription.cancel();
    assert_eq!(next_item(&mut subscription).await, None);

    client.close();
}

#[tokio::test]
async fn closing_the_client_ends_every_subscription() {
    let store = Arc::new(Mutex::new(EventStore::open_in_memory().unwrap()));
    let hub = FanoutHub::new(store.clone(), FanoutConfig::default());
    let (addr, _server_task) = start_listener("127.0.0.1:0", hub.clone()).await;

    let client = SubscriberClient::connect(format!("ws://{addr}"), fast_reconnect());
    let mut a = client.subscribe("a", SubscribeOptions::default()).await.unwrap();
    let mut b = client.subscribe("b", SubscribeOptions::default()).await.unwrap();

    // Wait until both are live so close exercises the established path.
    assert!(matches!(
        next_item(&mut a).await.unwrap(),
        SubscriptionItem::Promoted { .. }
    ));
    assert!(matches!(
        next_item(&mut b).await.unwrap(),
        SubscriptionItem::Promoted { .. }
    ));

    client.close();
    assert_eq!(next_item(&mut a).await, None);
    assert_eq!(next_item(&mut b).await, None);

    // A closed client rejects new subscriptions.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client.subscribe("c", SubscribeOptions::default()).await.is_err());
}
