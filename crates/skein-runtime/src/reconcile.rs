use skein_ledger::{LedgerError, LedgerStore, RecoverAction, RecoverResult, StaleRunInfo, StaleRunQuery};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Outcome of a reconciliation sweep: what was recovered and what failed.
#[derive(Debug, Default)]
pub struct RecoverySweep {
    pub recovered: Vec<RecoverResult>,
    pub failed: Vec<(String, LedgerError)>,
}

/// Active runs past the staleness threshold (default 5 minutes).
pub async fn list_stale_runs(
    ledger: &Arc<Mutex<LedgerStore>>,
    query: &StaleRunQuery,
) -> Result<Vec<StaleRunInfo>, LedgerError> {
    ledger.lock().await.list_stale_runs(query)
}

/// Force-terminate every stale run. Per-run failures are logged and
/// collected; the sweep itself never aborts, so it is safe as a periodic
/// background task.
pub async fn recover_all_stale_runs(
    ledger: &Arc<Mutex<LedgerStore>>,
    action: RecoverAction,
    query: &StaleRunQuery,
) -> Result<RecoverySweep, LedgerError> {
    let stale = list_stale_runs(ledger, query).await?;
    let mut sweep = RecoverySweep::default();

    for info in stale {
        let run_id = info.run.run_id.clone();
        match ledger.lock().await.recover_run(&run_id, action) {
            Ok(result) => {
                info!(
                    run_id = %run_id,
                    age_ms = info.age_ms,
                    new_status = result.new_status.as_str(),
                    "recovered stale run"
                );
                sweep.recovered.push(result);
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "failed to recover stale run");
                sweep.failed.push((run_id, e));
            }
        }
    }
    Ok(sweep)
}
