use serde::{Deserialize, Serialize};
use skein_core::{CanonicalMessage, RunRecord, RunStatus};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Run creation and finalization
// ---------------------------------------------------------------------------

/// Options for [`crate::LedgerStore::begin_run`].
#[derive(Debug, Clone)]
pub struct BeginRunOptions {
    pub thread_id: String,
    /// Message id this run diverges from; `None` for a thread root run.
    pub fork_from_message_id: Option<String>,
}

/// Target terminal state for [`crate::LedgerStore::finalize_run`].
///
/// Messages travel with the `Committed` variant so a commit can never be
/// issued without them (nor a failure with them).
#[derive(Debug, Clone)]
pub enum FinalizeStatus {
    Committed(Vec<CanonicalMessage>),
    Failed,
    Cancelled,
}

impl FinalizeStatus {
    pub fn target(&self) -> RunStatus {
        match self {
            FinalizeStatus::Committed(_) => RunStatus::Committed,
            FinalizeStatus::Failed => RunStatus::Failed,
            FinalizeStatus::Cancelled => RunStatus::Cancelled,
        }
    }
}

/// Outcome of a finalize call.
///
/// `committed` is true when the requested terminal state is in effect after
/// the call (including the idempotent replay of an identical earlier call);
/// false when a different terminal state already won.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeResult {
    pub committed: bool,
    /// Runs demoted to `superseded` by this commit, in no particular order.
    /// Non-empty at most on the first effective commit at a fork point.
    pub superseded_run_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Transcript resolution
// ---------------------------------------------------------------------------

/// Which path through the thread's message tree to return.
#[derive(Debug, Clone, Default)]
pub enum Branch {
    /// Every message, in insertion-ordinal order.
    All,
    /// The default path: at each fork prefer the most recently inserted
    /// committed child, falling back to the most recently inserted child.
    #[default]
    Active,
    /// Explicit fork choices (fork message id -> child message id). Invalid
    /// or missing entries fall back to the active rule; never an error.
    Selections(HashMap<String, String>),
}

// ---------------------------------------------------------------------------
// Thread tree
// ---------------------------------------------------------------------------

/// One message node of a thread tree view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadTreeNode {
    pub message_id: String,
    pub parent_message_id: Option<String>,
    pub role: String,
    pub run_id: String,
    pub run_status: RunStatus,
}

/// A parent with more than one child, plus which child the active rule picks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkPoint {
    pub fork_message_id: String,
    /// Children in insertion order.
    pub children: Vec<String>,
    pub active_child_id: String,
}

/// Derived tree view of a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadTree {
    pub nodes: Vec<ThreadTreeNode>,
    pub fork_points: Vec<ForkPoint>,
}

// ---------------------------------------------------------------------------
// Stale runs and recovery
// ---------------------------------------------------------------------------

/// Filter for [`crate::LedgerStore::list_stale_runs`].
#[derive(Debug, Clone)]
pub struct StaleRunQuery {
    pub thread_id: Option<String>,
    /// Active runs older than this are considered abandoned.
    pub older_than_ms: u64,
}

impl Default for StaleRunQuery {
    fn default() -> Self {
        StaleRunQuery {
            thread_id: None,
            older_than_ms: 5 * 60 * 1000,
        }
    }
}

/// An active run past the staleness threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleRunInfo {
    pub run: RunRecord,
    pub age_ms: u64,
}

/// How to terminate an abandoned run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverAction {
    Fail,
    Cancel,
}

impl RecoverAction {
    pub fn target(self) -> RunStatus {
        match self {
            RecoverAction::Fail => RunStatus::Failed,
            RecoverAction::Cancel => RunStatus::Cancelled,
        }
    }
}

/// Outcome of a forced recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverResult {
    pub run_id: String,
    pub previous_status: RunStatus,
    pub new_status: RunStatus,
}
