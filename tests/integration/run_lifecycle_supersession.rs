//! End-to-end run lifecycle: a producer streams through the run manager,
//! live subscribers watch the run stream, and commits land in the thread
//! transcript with fork supersession preserving every branch.

use skein_client::{ClientConfig, SubscribeOptions, SubscriberClient, SubscriptionItem};
use skein_core::{Role, RunStatus, SequentialGenerator, StreamEvent};
use skein_engine::{build_context, ContextOptions};
use skein_ledger::{BeginRunOptions, Branch, LedgerStore};
use skein_runtime::{RunManager, RunOutcome};
use skein_server::{FanoutConfig, FanoutHub, FanoutListener};
use skein_store::EventStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

struct Harness {
    ledger: Arc<Mutex<LedgerStore>>,
    manager: RunManager,
    addr: std::net::SocketAddr,
    _server_task: tokio::task::JoinHandle<()>,
}

async fn harness() -> Harness {
    let events = Arc::new(Mutex::new(EventStore::open_in_memory().unwrap()));
    let ledger = Arc::new(Mutex::new(
        LedgerStore::open_in_memory()
            .unwrap()
            .with_id_generator(Box::new(SequentialGenerator::new("run-"))),
    ));
    let hub = FanoutHub::new(events.clone(), FanoutConfig::default());
    let manager = RunManager::new(events, ledger.clone())
        .with_fanout(hub.clone())
        .with_id_generator(Box::new(SequentialGenerator::new("msg-")));

    let listener = FanoutListener::bind("127.0.0.1:0", hub).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_task = tokio::spawn(listener.run());
    tokio::time::sleep(Duration::from_millis(20)).await;

    Harness {
        ledger,
        manager,
        addr,
        _server_task: server_task,
    }
}

fn text(s: &str) -> StreamEvent {
    StreamEvent::TextDelta { delta: s.to_owned() }
}

#[tokio::test]
async fn live_subscriber_follows_a_producing_run() {
    let h = harness().await;
    let run = h
        .manager
        .begin_run(&BeginRunOptions {
            thread_id: "t1".to_owned(),
            fork_from_message_id: None,
        })
        .await
        .unwrap();

    let client = SubscriberClient::connect(format!("ws://{}", h.addr), ClientConfig::default());
    let mut subscription = client
        .subscribe(&run.stream_id, SubscribeOptions::default())
        .await
        .unwrap();
    match tokio::time::timeout(Duration::from_secs(5), subscription.next())
        .await
        .unwrap()
        .unwrap()
    {
        SubscriptionItem::Promoted { last_replay_seq, .. } => assert_eq!(last_replay_seq, 0),
        other => panic!("expected promotion, got {other:?}"),
    }

    // The producer streams; the subscriber sees every event live.
    h.manager
        .append_events(&run.run_id, &[StreamEvent::StepStart, text("hel")])
        .await
        .unwrap();
    h.manager
        .append_events(&run.run_id, &[text("lo"), StreamEvent::StepEnd])
        .await
        .unwrap();

    for expected in 1u64..=4 {
        match tokio::time::timeout(Duration::from_secs(5), subscription.next())
            .await
            .unwrap()
            .unwrap()
        {
            SubscriptionItem::Event(event) => assert_eq!(event.seq, expected),
            other => panic!("expected event {expected}, got {other:?}"),
        }
    }

    let result = h
        .manager
        .finalize_run(&run.run_id, RunOutcome::Committed)
        .await
        .unwrap();
    assert!(result.committed);

    let transcript = h
        .ledger
        .lock()
        .await
        .get_transcript("t1", &Branch::Active)
        .unwrap();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].role, Role::Assistant);

    client.close();
}

#[tokio::test]
async fn competing_fork_commits_preserve_both_branches() {
    let h = harness().await;

    // Seed the thread with a root user turn so the forks have a real parent.
    let root = h
        .manager
        .begin_run(&BeginRunOptions {
            thread_id: "t1".to_owned(),
            fork_from_message_id: None,
        })
        .await
        .unwrap();
    h.manager
        .append_events(&root.run_id, &[text("what is 2+2?"), StreamEvent::StepEnd])
        .await
        .unwrap();
    h.manager
        .finalize_run(&root.run_id, RunOutcome::Committed)
        .await
        .unwrap();
    let root_message_id = h
        .ledger
        .lock()
        .await
        .get_transcript("t1", &Branch::Active)
        .unwrap()[0]
        .id
        .clone();

    // Two generation attempts at the same fork point.
    let fork = BeginRunOptions {
        thread_id: "t1".to_owned(),
        fork_from_message_id: Some(root_message_id.clone()),
    };
    let first = h.manager.begin_run(&fork).await.unwrap();
    h.manager
        .append_events(&first.run_id, &[text("it is 5"), StreamEvent::StepEnd])
        .await
        .unwrap();
    h.manager
        .finalize_run(&first.run_id, RunOutcome::Committed)
        .await
        .unwrap();

    let second = h.manager.begin_run(&fork).await.unwrap();
    h.manager
        .append_events(&second.run_id, &[text("it is 4"), StreamEvent::StepEnd])
        .await
        .unwrap();
    let result = h
        .manager
        .finalize_run(&second.run_id, RunOutcome::Committed)
        .await
        .unwrap();
    assert!(result.committed);
    assert_eq!(result.superseded_run_ids, vec![first.run_id.clone()]);

    let ledger = h.ledger.lock().await;
    let statuses: Vec<RunStatus> = ledger
        .list_runs("t1")
        .unwrap()
        .iter()
        .map(|r| r.status)
        .collect();
    assert_eq!(
        statuses,
        vec![RunStatus::Committed, RunStatus::Superseded, RunStatus::Committed]
    );

    // Both branches live in the tree; the active path takes the newer one.
    let all = ledger.get_transcript("t1", &Branch::All).unwrap();
    assert_eq!(all.len(), 3);
    let active = ledger.get_transcript("t1", &Branch::Active).unwrap();
    assert_eq!(active.len(), 2);
    match &active[1].parts[0] {
        skein_core::CanonicalPart::Text { text } => assert_eq!(text, "it is 4"),
        other => panic!("expected text part, got {other:?}"),
    }

    let tree = ledger.get_thread_tree("t1").unwrap();
    assert_eq!(tree.fork_points.len(), 1);
    assert_eq!(tree.fork_points[0].fork_message_id, root_message_id);
    assert_eq!(tree.fork_points[0].children.len(), 2);
}

#[tokio::test]
async fn context_builder_reads_the_active_branch() {
    let h = harness().await;
    let run = h
        .manager
        .begin_run(&BeginRunOptions {
            thread_id: "t1".to_owned(),
            fork_from_message_id: None,
        })
        .await
        .unwrap();
    h.manager
        .append_events(
            &run.run_id,
            &[
                StreamEvent::Reasoning { text: "easy one".to_owned() },
                text("four"),
                StreamEvent::StepEnd,
            ],
        )
        .await
        .unwrap();
    h.manager
        .finalize_run(&run.run_id, RunOutcome::Committed)
        .await
        .unwrap();

    let ledger = h.ledger.lock().await;
    let context = build_context(
        &ledger,
        "t1",
        &ContextOptions {
            include_reasoning: false,
            ..ContextOptions::default()
        },
    )
    .unwrap();
    assert_eq!(context.provenance.message_count, 1);
    assert_eq!(context.messages[0].parts.len(), 1);
    assert_eq!(context.provenance.thread_id, "t1");
}
