//! skein: a durable, resumable event transport and transcript ledger for AI
//! agent threads.
//!
//! A thread is the user-visible conversation; each generation attempt is a
//! run that owns an append-only event stream. Events are persisted with
//! per-stream sequence numbers, fanned out to live WebSocket subscribers
//! with a replay-then-live handover, and — on successful termination —
//! accumulated into the thread's immutable canonical transcript.
//!
//! The crates compose bottom-up:
//!
//! - [`store`]: append-only event journal + idempotent projector
//! - [`ledger`]: run lifecycle records and the canonical transcript
//! - [`protocol`]: the subscription wire protocol
//! - [`server`] / [`client`]: fan-out and resilient subscription
//! - [`engine`]: event stream -> canonical messages, transcript -> context
//! - [`runtime`]: run orchestration and stale-run reconciliation

pub use skein_client as client;
pub use skein_engine as engine;
pub use skein_ledger as ledger;
pub use skein_protocol as protocol;
pub use skein_runtime as runtime;
pub use skein_server as server;
pub use skein_store as store;

pub use skein_core::{
    now_rfc3339_millis, run_stream_id, CanonicalMessage, CanonicalPart, IdGenerator,
    MessageMetadata, Role, RunRecord, RunStatus, SequentialGenerator, StoredEvent, StreamEvent,
    UlidGenerator, SCHEMA_VERSION,
};
