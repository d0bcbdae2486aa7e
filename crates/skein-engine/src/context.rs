use skein_core::{CanonicalMessage, CanonicalPart};
use skein_ledger::{Branch, LedgerError, LedgerStore};

// ---------------------------------------------------------------------------
// Context builder
// ---------------------------------------------------------------------------

/// Filter options for [`build_context`].
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Keep only the last N messages after part filtering.
    pub max_messages: Option<usize>,
    pub include_tool_results: bool,
    pub include_reasoning: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        ContextOptions {
            max_messages: None,
            include_tool_results: true,
            include_reasoning: true,
        }
    }
}

/// Where a context window came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextProvenance {
    pub thread_id: String,
    pub message_count: usize,
    pub first_message_id: Option<String>,
    pub last_message_id: Option<String>,
}

/// A filtered transcript view for downstream prompt assembly.
#[derive(Debug, Clone)]
pub struct ContextResult {
    pub messages: Vec<CanonicalMessage>,
    pub provenance: ContextProvenance,
}

/// Fetch the thread's active transcript and shape it for prompting: drop
/// filtered part types, drop messages that end up empty, keep the last
/// `max_messages`. The transcript fetch is the only I/O.
pub fn build_context(
    ledger: &LedgerStore,
    thread_id: &str,
    options: &ContextOptions,
) -> Result<ContextResult, LedgerError> {
    let transcript = ledger.get_transcript(thread_id, &Branch::Active)?;

    let mut messages: Vec<CanonicalMessage> = transcript
        .into_iter()
        .filter_map(|mut message| {
            message.parts.retain(|part| match part {
                CanonicalPart::ToolResult { .. } => options.include_tool_results,
                CanonicalPart::Reasoning { .. } => options.include_reasoning,
                _ => true,
            });
            if message.parts.is_empty() {
                None
            } else {
                Some(message)
            }
        })
        .collect();

    if let Some(max) = options.max_messages {
        if messages.len() > max {
            messages.drain(..messages.len() - max);
        }
    }

    let provenance = ContextProvenance {
        thread_id: thread_id.to_owned(),
        message_count: messages.len(),
        first_message_id: messages.first().map(|m| m.id.clone()),
        last_message_id: messages.last().map(|m| m.id.clone()),
    };
    Ok(ContextResult {
        messages,
        provenance,
    })
}
