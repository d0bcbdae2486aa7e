use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Run lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a run.
///
/// `created` and `streaming` are the active states; everything else is
/// terminal. Supersession preserves the run's committed messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Created,
    Streaming,
    Committed,
    Failed,
    Cancelled,
    Superseded,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Streaming => "streaming",
            RunStatus::Committed => "committed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(RunStatus::Created),
            "streaming" => Some(RunStatus::Streaming),
            "committed" => Some(RunStatus::Committed),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            "superseded" => Some(RunStatus::Superseded),
            _ => None,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Created | RunStatus::Streaming)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

/// The event stream id owned by a run.
pub fn run_stream_id(run_id: &str) -> String {
    format!("run:{run_id}")
}

/// A run record as held by the ledger store.
///
/// Invariants: `finished_at` is `None` iff the status is active;
/// `message_count` is 0 while active and set at commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: String,
    pub thread_id: String,
    pub stream_id: String,
    pub fork_from_message_id: Option<String>,
    pub status: RunStatus,
    pub created_at: String,
    pub finished_at: Option<String>,
    pub message_count: u32,
}
