use skein_core::{
    CanonicalMessage, CanonicalPart, IdGenerator, MessageMetadata, Role, StoredEvent, StreamEvent,
};
use std::collections::HashMap;
use std::mem;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for [`accumulate`].
pub struct AccumulateOptions<'a> {
    /// Parent of the first emitted message (the run's fork point), or `None`
    /// for a thread root run.
    pub fork_from_message_id: Option<String>,
    /// Message id source. Inject a deterministic generator to get
    /// byte-identical output for identical input.
    pub id_gen: &'a mut dyn IdGenerator,
}

/// A producer-signalled error event ended the stream.
///
/// Messages emitted before the error are carried along so callers can decide
/// what to do with the partial transcript; the message in progress at the
/// time of the error is discarded.
#[derive(Debug, Error)]
#[error("producer error at seq {seq}: {message}")]
pub struct AccumulateError {
    pub seq: u64,
    pub message: String,
    pub flushed: Vec<CanonicalMessage>,
}

// ---------------------------------------------------------------------------
// accumulate
// ---------------------------------------------------------------------------

/// Fold a bounded, replayed event sequence into canonical messages.
///
/// Shape of a typical run: intermediate assistant messages closed by each
/// tool call, one tool message per tool result, and a final assistant message
/// holding whatever text/reasoning/file parts trail the last tool cycle.
///
/// Rules:
/// - text deltas coalesce into a single text part until a step boundary, a
///   tool call, or end-of-stream flushes the part;
/// - a tool call closes the assistant message in progress (tool-call part
///   included) and registers an expectation under its call id;
/// - a tool result emits a `tool` message immediately, matched or not;
/// - reasoning and file events attach to the assistant message in progress;
/// - an error event aborts, surfacing messages already emitted.
///
/// Each message's parent is the previously emitted message of the run; the
/// first one chains to the fork point.
pub fn accumulate(
    events: &[StoredEvent<StreamEvent>],
    options: AccumulateOptions<'_>,
) -> Result<Vec<CanonicalMessage>, AccumulateError> {
    let mut acc = Accumulator {
        messages: Vec::new(),
        parts: Vec::new(),
        text_buf: String::new(),
        pending_calls: HashMap::new(),
        parent: options.fork_from_message_id,
        id_gen: options.id_gen,
    };

    for stored in events {
        match &stored.event {
            StreamEvent::TextDelta { delta } => acc.text_buf.push_str(delta),
            StreamEvent::StepStart | StreamEvent::StepEnd => acc.flush_text(),
            StreamEvent::Reasoning { text } => {
                acc.flush_text();
                acc.parts.push(CanonicalPart::Reasoning { text: text.clone() });
            }
            StreamEvent::File { mime_type, url, name } => {
                acc.flush_text();
                acc.parts.push(CanonicalPart::File {
                    mime_type: mime_type.clone(),
                    url: url.clone(),
                    name: name.clone(),
                });
            }
            StreamEvent::ToolCall {
                tool_call_id,
                tool_name,
                input,
            } => {
                acc.flush_text();
                acc.parts.push(CanonicalPart::ToolCall {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                    input: input.clone(),
                });
                acc.pending_calls
                    .insert(tool_call_id.clone(), tool_name.clone());
                acc.emit(Role::Assistant, &stored.timestamp);
            }
            StreamEvent::ToolResult {
                tool_call_id,
                tool_name,
                output,
                is_error,
            } => {
                // Matched or not, the result becomes its own tool message;
                // an unmatched result just leaves no expectation to consume.
                acc.pending_calls.remove(tool_call_id);
                let part = CanonicalPart::ToolResult {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                    output: output.clone(),
                    is_error: *is_error,
                };
                acc.emit_with_parts(Role::Tool, vec![part], &stored.timestamp);
            }
            StreamEvent::Error { message } => {
                return Err(AccumulateError {
                    seq: stored.seq,
                    message: message.clone(),
                    flushed: acc.messages,
                });
            }
        }
    }

    // End-of-stream: whatever is still buffered becomes the final assistant
    // message.
    acc.flush_text();
    if !acc.parts.is_empty() {
        let timestamp = events
            .last()
            .map(|stored| stored.timestamp.clone())
            .unwrap_or_default();
        acc.emit(Role::Assistant, &timestamp);
    }

    Ok(acc.messages)
}

// ---------------------------------------------------------------------------
// Internal builder state
// ---------------------------------------------------------------------------

struct Accumulator<'a> {
    messages: Vec<CanonicalMessage>,
    /// Parts of the assistant message in progress.
    parts: Vec<CanonicalPart>,
    /// Text deltas not yet flushed into a part.
    text_buf: String,
    /// tool_call_id -> tool_name, awaiting results.
    pending_calls: HashMap<String, String>,
    /// Parent for the next emitted message.
    parent: Option<String>,
    id_gen: &'a mut dyn IdGenerator,
}

impl Accumulator<'_> {
    fn flush_text(&mut self) {
        if !self.text_buf.is_empty() {
            let text = mem::take(&mut self.text_buf);
            self.parts.push(CanonicalPart::Text { text });
        }
    }

    /// Emit the assistant message in progress.
    fn emit(&mut self, role: Role, timestamp: &str) {
        let parts = mem::take(&mut self.parts);
        self.emit_with_parts(role, parts, timestamp);
    }

    fn emit_with_parts(&mut self, role: Role, parts: Vec<CanonicalPart>, timestamp: &str) {
        if parts.is_empty() {
            return;
        }
        let id = self.id_gen.next_id();
        self.messages.push(CanonicalMessage {
            parent_message_id: self.parent.replace(id.clone()),
            id,
            role,
            parts,
            created_at: timestamp.to_owned(),
            metadata: MessageMetadata::default(),
        });
    }
}
