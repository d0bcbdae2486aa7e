//! Durable SQLite event store and the projector fold.
//!
//! The store is an append-only journal keyed by (stream_id, seq) with
//! per-stream monotonic sequence numbers assigned at append time. Replay is
//! a range scan in seq order; `head` is the high-water mark. All writes run
//! inside a transaction, so a failed append leaves the stream untouched.
//!
//! # SQLite durability settings
//! Applied at open: WAL, synchronous=FULL, wal_autocheckpoint=1000,
//! foreign_keys=ON. PRAGMA integrity_check runs at open; returns error if it
//! fails.
//!
//! Async callers share a store as `Arc<tokio::sync::Mutex<EventStore>>`; the
//! connection-level exclusivity plus one transaction per append gives the
//! single-writer-per-stream guarantee.

mod projector;
mod store;

pub use projector::Projector;
pub use store::{EventStore, ReplayOptions, StoreError};
