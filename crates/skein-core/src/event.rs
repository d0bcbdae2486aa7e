use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// StoredEvent
// ---------------------------------------------------------------------------

/// An event as persisted by the event store.
///
/// `seq` is assigned by the store at append time and is strictly
/// monotonically increasing within a stream, starting at 1. All events of a
/// single append batch share one `timestamp`.
///
/// The payload type is generic: the transport layer moves
/// `StoredEvent<serde_json::Value>` around without interpreting it, while the
/// accumulator works on `StoredEvent<StreamEvent>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent<T> {
    pub seq: u64,
    /// RFC 3339 with millisecond precision.
    pub timestamp: String,
    pub stream_id: String,
    pub event: T,
}

impl<T> StoredEvent<T> {
    /// Map the payload, keeping seq/timestamp/stream identity intact.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StoredEvent<U> {
        StoredEvent {
            seq: self.seq,
            timestamp: self.timestamp,
            stream_id: self.stream_id,
            event: f(self.event),
        }
    }
}

// ---------------------------------------------------------------------------
// StreamEvent: the producer event vocabulary
// ---------------------------------------------------------------------------

/// Fine-grained events emitted by a producer during a run.
///
/// Serialized with a `kind` discriminator:
///
/// ```json
/// { "kind": "text-delta", "delta": "Hel" }
/// { "kind": "tool-call", "toolCallId": "tc-1", "toolName": "search", "input": {} }
/// ```
///
/// The store and transport never interpret these; only the accumulator does.
/// Unknown kinds are tolerated there (skipped with a warning), so producers
/// may extend the vocabulary without breaking older readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    /// Incremental assistant text. Consecutive deltas coalesce into one part.
    TextDelta { delta: String },
    /// A complete reasoning fragment.
    Reasoning { text: String },
    /// The model invoked a tool. Closes the assistant message in progress.
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    /// A tool finished. Emitted as its own `tool` role message.
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: serde_json::Value,
        is_error: bool,
    },
    /// A file produced mid-run (e.g. an image the model generated).
    File {
        mime_type: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Start of a model step.
    StepStart,
    /// End of a model step; flushes any pending text part.
    StepEnd,
    /// Producer-side failure. Terminates accumulation.
    Error { message: String },
}
