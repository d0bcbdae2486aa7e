use skein_engine::AccumulateError;
use skein_ledger::LedgerError;
use skein_store::StoreError;
use thiserror::Error;

/// Error type for run orchestration.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("run not found: {0}")]
    NotFound(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("event store: {0}")]
    Store(#[from] StoreError),
    #[error("ledger: {0}")]
    Ledger(LedgerError),
    #[error(transparent)]
    Accumulate(#[from] AccumulateError),
}

// Keep the NotFound/InvalidState kinds visible instead of burying them in a
// generic ledger wrapper.
impl From<LedgerError> for RunError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(id) => RunError::NotFound(id),
            LedgerError::InvalidState(msg) => RunError::InvalidState(msg),
            LedgerError::InvalidArgument(msg) => RunError::InvalidArgument(msg),
            other => RunError::Ledger(other),
        }
    }
}
