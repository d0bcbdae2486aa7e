use crate::error::RunError;
use skein_core::{IdGenerator, RunRecord, StoredEvent, StreamEvent, UlidGenerator};
use skein_engine::{accumulate, AccumulateOptions};
use skein_ledger::{BeginRunOptions, FinalizeResult, FinalizeStatus, LedgerStore, RecoverAction};
use skein_server::FanoutHub;
use skein_store::{EventStore, ReplayOptions};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Requested terminal state for [`RunManager::finalize_run`]. The committed
/// variant derives its messages from the run's own stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Committed,
    Failed,
    Cancelled,
}

/// Coordinates the event store, the ledger, and (optionally) the fan-out hub
/// for the run lifecycle: begin -> activate -> append -> finalize.
pub struct RunManager {
    events: Arc<Mutex<EventStore>>,
    ledger: Arc<Mutex<LedgerStore>>,
    hub: Option<FanoutHub>,
    id_gen: std::sync::Mutex<Box<dyn IdGenerator>>,
}

impl RunManager {
    pub fn new(events: Arc<Mutex<EventStore>>, ledger: Arc<Mutex<LedgerStore>>) -> Self {
        RunManager {
            events,
            ledger,
            hub: None,
            id_gen: std::sync::Mutex::new(Box::new(UlidGenerator::new())),
        }
    }

    /// Broadcast every appended batch through this hub so live subscribers
    /// see events as they are produced.
    pub fn with_fanout(mut self, hub: FanoutHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Replace the message-id generator (deterministic ids in tests).
    pub fn with_id_generator(self, id_gen: Box<dyn IdGenerator>) -> Self {
        *self.id_gen.lock().expect("id generator lock") = id_gen;
        self
    }

    /// Create and activate a run. If activation fails the orphan record is
    /// force-failed on a best-effort basis (the reconciler mops up
    /// otherwise) and the original error propagates.
    pub async fn begin_run(&self, options: &BeginRunOptions) -> Result<RunRecord, RunError> {
        let mut ledger = self.ledger.lock().await;
        let run = ledger.begin_run(options)?;
        match ledger.activate_run(&run.run_id) {
            Ok(active) => {
                info!(run_id = %active.run_id, thread_id = %active.thread_id, "run started");
                Ok(active)
            }
            Err(activate_err) => {
                if let Err(recover_err) = ledger.recover_run(&run.run_id, RecoverAction::Fail) {
                    warn!(
                        run_id = %run.run_id,
                        error = %recover_err,
                        "could not fail orphaned run, leaving it for reconciliation"
                    );
                }
                Err(activate_err.into())
            }
        }
    }

    /// Append producer events to the run's stream and broadcast them. The
    /// run must still be active.
    pub async fn append_events(
        &self,
        run_id: &str,
        events: &[StreamEvent],
    ) -> Result<Vec<StoredEvent<serde_json::Value>>, RunError> {
        let run = self.require_run(run_id).await?;
        if !run.status.is_active() {
            return Err(RunError::InvalidState(format!(
                "run {run_id} is {}, expected an active status",
                run.status.as_str()
            )));
        }

        let values = events
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RunError::InvalidArgument(format!("unserializable event: {e}")))?;
        let stored = self.events.lock().await.append(&run.stream_id, &values)?;

        if let Some(hub) = &self.hub {
            hub.broadcast(&run.stream_id, &stored).await;
        }
        Ok(stored)
    }

    /// Drive the run to a terminal state. For a commit, the run's stream is
    /// replayed through the accumulator and the resulting messages are
    /// committed atomically with the status change.
    pub async fn finalize_run(
        &self,
        run_id: &str,
        outcome: RunOutcome,
    ) -> Result<FinalizeResult, RunError> {
        let run = self.require_run(run_id).await?;

        let status = match outcome {
            RunOutcome::Failed => FinalizeStatus::Failed,
            RunOutcome::Cancelled => FinalizeStatus::Cancelled,
            RunOutcome::Committed => {
                if run.status.is_terminal() {
                    // The ladder in the ledger resolves idempotent replays
                    // and terminal conflicts; no need to re-accumulate.
                    FinalizeStatus::Committed(Vec::new())
                } else {
                    let stored = self
                        .events
                        .lock()
                        .await
                        .replay(&run.stream_id, &ReplayOptions::default())?;
                    let events = decode_stream_events(stored);
                    let mut id_gen = self.id_gen.lock().expect("id generator lock");
                    let messages = accumulate(
                        &events,
                        AccumulateOptions {
                            fork_from_message_id: run.fork_from_message_id.clone(),
                            id_gen: id_gen.as_mut(),
                        },
                    )?;
                    FinalizeStatus::Committed(messages)
                }
            }
        };

        let result = self.ledger.lock().await.finalize_run(run_id, status)?;
        info!(
            run_id = %run_id,
            outcome = ?outcome,
            committed = result.committed,
            superseded = result.superseded_run_ids.len(),
            "run finalized"
        );
        Ok(result)
    }

    /// Delete the thread from the ledger and drop every run stream it owned.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<(), RunError> {
        let stream_ids: Vec<String> = {
            let mut ledger = self.ledger.lock().await;
            let streams = ledger
                .list_runs(thread_id)?
                .into_iter()
                .map(|run| run.stream_id)
                .collect();
            ledger.delete_thread(thread_id)?;
            streams
        };
        let mut events = self.events.lock().await;
        for stream_id in stream_ids {
            events.delete(&stream_id)?;
        }
        info!(thread_id = %thread_id, "thread deleted");
        Ok(())
    }

    async fn require_run(&self, run_id: &str) -> Result<RunRecord, RunError> {
        self.ledger
            .lock()
            .await
            .get_run(run_id)?
            .ok_or_else(|| RunError::NotFound(run_id.to_owned()))
    }
}

/// Deserialize stored payloads into the producer vocabulary, skipping
/// unknown kinds so old readers survive vocabulary extensions.
fn decode_stream_events(
    stored: Vec<StoredEvent<serde_json::Value>>,
) -> Vec<StoredEvent<StreamEvent>> {
    stored
        .into_iter()
        .filter_map(|event| match serde_json::from_value::<StreamEvent>(event.event.clone()) {
            Ok(payload) => Some(event.map(|_| payload)),
            Err(_) => {
                debug!(seq = event.seq, "skipping event of unknown kind");
                None
            }
        })
        .collect()
}
