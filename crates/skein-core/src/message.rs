use serde::{Deserialize, Serialize};

/// Current canonical-message metadata schema version.
pub const SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Roles and parts
// ---------------------------------------------------------------------------

/// Who a canonical message is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// One content part of a canonical message.
///
/// ```json
/// { "type": "tool-result", "toolCallId": "tc-1", "toolName": "search",
///   "output": {...}, "isError": false }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum CanonicalPart {
    Text { text: String },
    Reasoning { text: String },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: serde_json::Value,
        is_error: bool,
    },
    File {
        mime_type: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl CanonicalPart {
    /// Discriminator as stored in the parts table `type` column.
    pub fn type_str(&self) -> &'static str {
        match self {
            CanonicalPart::Text { .. } => "text",
            CanonicalPart::Reasoning { .. } => "reasoning",
            CanonicalPart::ToolCall { .. } => "tool-call",
            CanonicalPart::ToolResult { .. } => "tool-result",
            CanonicalPart::File { .. } => "file",
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical messages
// ---------------------------------------------------------------------------

/// Message metadata. `schema_version` is fixed by the writer; everything else
/// is producer-defined and carried opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    pub schema_version: u32,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for MessageMetadata {
    fn default() -> Self {
        MessageMetadata {
            schema_version: SCHEMA_VERSION,
            extra: serde_json::Map::new(),
        }
    }
}

/// An immutable, committed message in a thread's transcript.
///
/// `id` is a ULID, unique per thread. `parent_message_id` links to the
/// preceding message of the producing run (or the run's fork point), forming
/// the thread's message tree. Transcript order is given by the ordinal
/// assigned at commit time, never by id sort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalMessage {
    pub id: String,
    pub parent_message_id: Option<String>,
    pub role: Role,
    /// Non-empty on commit.
    pub parts: Vec<CanonicalPart>,
    /// RFC 3339 with millisecond precision.
    pub created_at: String,
    pub metadata: MessageMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_strings() {
        for role in [Role::User, Role::Assistant, Role::System, Role::Tool] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("robot"), None);
    }

    #[test]
    fn part_type_str_matches_serialized_tag() {
        let part = CanonicalPart::ToolResult {
            tool_call_id: "tc-9".to_owned(),
            tool_name: "calc".to_owned(),
            output: serde_json::json!(42),
            is_error: false,
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], part.type_str());
        assert_eq!(json["isError"], false);
    }

    #[test]
    fn metadata_flattens_extra_fields_beside_schema_version() {
        let mut meta = MessageMetadata::default();
        meta.extra
            .insert("model".to_owned(), serde_json::json!("m-1"));
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["schemaVersion"], SCHEMA_VERSION);
        assert_eq!(json["model"], "m-1");
    }
}
