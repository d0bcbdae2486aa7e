//! Transforms between the event stream and the canonical transcript.
//!
//! The accumulator folds a replayed run stream into the ordered,
//! branch-aware canonical messages the ledger commits. The context builder
//! goes the other way: it takes a thread's active transcript and produces a
//! filtered view for downstream prompt assembly.

mod accumulate;
mod context;

pub use accumulate::{accumulate, AccumulateError, AccumulateOptions};
pub use context::{build_context, ContextOptions, ContextProvenance, ContextResult};
