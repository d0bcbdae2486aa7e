// skein-protocol: subscription wire protocol types and serialization.
//
// One UTF-8 JSON object per WebSocket text frame, discriminated by a
// top-level `type` field. The enum variants map 1:1 to the v1 message kinds.
// Decoding is strict: unknown types or missing required fields yield `None`
// rather than an error the caller could mistake for transport failure.

use serde::{Deserialize, Serialize};
use skein_core::StoredEvent;

/// Protocol version spoken by this crate. Version equality is required at
/// handshake; a mismatch closes the connection with `VERSION_MISMATCH`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Event payload as carried on the wire: opaque JSON assigned by producers.
pub type WireEvent = StoredEvent<serde_json::Value>;

// ---------------------------------------------------------------------------
// Client -> Server messages
// ---------------------------------------------------------------------------

/// All frames a subscriber may send.
///
/// `hello` MUST be the first frame on a connection; any other first frame is
/// answered with `error{INVALID_MESSAGE}` and the connection is closed.
///
/// ```json
/// { "type": "subscribe", "streamId": "run:01ABC", "afterSeq": 17 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Handshake opener. `version` must equal [`PROTOCOL_VERSION`].
    Hello { version: u32 },
    /// Request a subscription delivering events with seq > `after_seq`.
    Subscribe {
        stream_id: String,
        #[serde(default)]
        after_seq: u64,
    },
    /// Drop an active subscription.
    Unsubscribe { stream_id: String },
    /// Heartbeat reply to a server `ping`.
    Pong {},
}

// ---------------------------------------------------------------------------
// Server -> Client messages
// ---------------------------------------------------------------------------

/// All frames the server may send.
///
/// Per subscription the server guarantees: the replay slice, then exactly one
/// `replay-end`, then live events in strictly increasing seq order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Handshake acceptance; sent before any other frame.
    ServerHello { version: u32 },
    /// A single stored event, replayed or live.
    Event {
        stream_id: String,
        event: WireEvent,
    },
    /// Marks the replay -> live promotion for one subscription.
    ReplayEnd {
        stream_id: String,
        last_replay_seq: u64,
    },
    /// Heartbeat probe; clients answer with `pong`.
    Ping {},
    /// Protocol or server-side error. See [`error_codes`].
    Error { code: String, message: String },
}

/// Frozen v1 error codes.
pub mod error_codes {
    pub const VERSION_MISMATCH: &str = "VERSION_MISMATCH";
    pub const UNKNOWN_STREAM: &str = "UNKNOWN_STREAM";
    pub const REPLAY_FAILED: &str = "REPLAY_FAILED";
    pub const BUFFER_OVERFLOW: &str = "BUFFER_OVERFLOW";
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Encode a message for a text frame.
///
/// Serialization of these types only fails on a programmer error (the types
/// contain nothing unserializable), so this panics rather than returning a
/// result every caller would have to thread through.
pub fn encode<M: Serialize>(msg: &M) -> String {
    serde_json::to_string(msg).expect("wire messages always serialize")
}

/// Strictly decode a client frame. `None` on malformed JSON, unknown `type`,
/// or missing required fields.
pub fn decode_client(text: &str) -> Option<ClientMessage> {
    serde_json::from_str(text).ok()
}

/// Strictly decode a server frame. Same policy as [`decode_client`].
pub fn decode_server(text: &str) -> Option<ServerMessage> {
    serde_json::from_str(text).ok()
}
