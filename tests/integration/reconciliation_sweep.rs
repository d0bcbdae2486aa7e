//! Reconciliation: abandoned runs are found and force-terminated without
//! touching healthy or terminal runs, and the sweep keeps going past
//! individual failures.

use skein_core::{RunStatus, SequentialGenerator, StreamEvent};
use skein_ledger::{BeginRunOptions, LedgerStore, RecoverAction, StaleRunQuery};
use skein_runtime::{list_stale_runs, recover_all_stale_runs, RunManager, RunOutcome};
use skein_store::EventStore;
use std::sync::Arc;
use tokio::sync::Mutex;

fn setup() -> (Arc<Mutex<LedgerStore>>, RunManager) {
    let events = Arc::new(Mutex::new(EventStore::open_in_memory().unwrap()));
    let ledger = Arc::new(Mutex::new(
        LedgerStore::open_in_memory()
            .unwrap()
            .with_id_generator(Box::new(SequentialGenerator::new("run-"))),
    ));
    let manager = RunManager::new(events, ledger.clone())
        .with_id_generator(Box::new(SequentialGenerator::new("msg-")));
    (ledger, manager)
}

fn everything_stale() -> StaleRunQuery {
    StaleRunQuery {
        thread_id: None,
        older_than_ms: 0,
    }
}

#[tokio::test]
async fn sweep_fails_abandoned_runs_and_spares_the_rest() {
    let (ledger, manager) = setup();

    let abandoned_a = manager
        .begin_run(&BeginRunOptions {
            thread_id: "t1".to_owned(),
            fork_from_message_id: None,
        })
        .await
        .unwrap();
    let abandoned_b = manager
        .begin_run(&BeginRunOptions {
            thread_id: "t2".to_owned(),
            fork_from_message_id: None,
        })
        .await
        .unwrap();
    let committed = manager
        .begin_run(&BeginRunOptions {
            thread_id: "t1".to_owned(),
            fork_from_message_id: None,
        })
        .await
        .unwrap();
    manager
        .append_events(
            &committed.run_id,
            &[StreamEvent::TextDelta { delta: "done".to_owned() }],
        )
        .await
        .unwrap();
    manager
        .finalize_run(&committed.run_id, RunOutcome::Committed)
        .await
        .unwrap();

    let stale = list_stale_runs(&ledger, &everything_stale()).await.unwrap();
    assert_eq!(
        stale.iter().map(|s| s.run.run_id.clone()).collect::<Vec<_>>(),
        vec![abandoned_a.run_id.clone(), abandoned_b.run_id.clone()]
    );

    let sweep = recover_all_stale_runs(&ledger, RecoverAction::Fail, &everything_stale())
        .await
        .unwrap();
    assert_eq!(sweep.recovered.len(), 2);
    assert!(sweep.failed.is_empty());

    let ledger = ledger.lock().await;
    assert_eq!(
        ledger.get_run(&abandoned_a.run_id).unwrap().unwrap().status,
        RunStatus::Failed
    );
    assert_eq!(
        ledger.get_run(&abandoned_b.run_id).unwrap().unwrap().status,
        RunStatus::Failed
    );
    assert_eq!(
        ledger.get_run(&committed.run_id).unwrap().unwrap().status,
        RunStatus::Committed
    );
}

#[tokio::test]
async fn sweep_scoped_to_a_thread_leaves_other_threads_alone() {
    let (ledger, manager) = setup();

    let in_scope = manager
        .begin_run(&BeginRunOptions {
            thread_id: "t1".to_owned(),
            fork_from_message_id: None,
        })
        .await
        .unwrap();
    let out_of_scope = manager
        .begin_run(&BeginRunOptions {
            thread_id: "t2".to_owned(),
            fork_from_message_id: None,
        })
        .await
        .unwrap();

    let sweep = recover_all_stale_runs(
        &ledger,
        RecoverAction::Cancel,
        &StaleRunQuery {
            thread_id: Some("t1".to_owned()),
            older_than_ms: 0,
        },
    )
    .await
    .unwrap();
    assert_eq!(sweep.recovered.len(), 1);

    let ledger = ledger.lock().await;
    assert_eq!(
        ledger.get_run(&in_scope.run_id).unwrap().unwrap().status,
        RunStatus::Cancelled
    );
    assert_eq!(
        ledger.get_run(&out_of_scope.run_id).unwrap().unwrap().status,
        RunStatus::Streaming
    );
}

#[tokio::test]
async fn fresh_runs_are_not_stale_under_the_default_threshold() {
    let (ledger, manager) = setup();
    manager
        .begin_run(&BeginRunOptions {
            thread_id: "t1".to_owned(),
            fork_from_message_id: None,
        })
        .await
        .unwrap();

    let stale = list_stale_runs(&ledger, &StaleRunQuery::default()).await.unwrap();
    assert!(stale.is_empty());

    let sweep = recover_all_stale_runs(&ledger, RecoverAction::Fail, &StaleRunQuery::default())
        .await
        .unwrap();
    assert!(sweep.recovered.is_empty());
    assert!(sweep.failed.is_empty());
}
