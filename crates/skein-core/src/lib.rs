// skein-core: shared data model for the skein event transport and ledger.
//
// Everything here is plain data: stored events, the producer event
// vocabulary, canonical messages, and run records. No I/O lives in this
// crate; the store, server, client, and runtime crates all build on these
// types.

pub mod event;
pub mod ids;
pub mod message;
pub mod run;
pub mod time;

pub use event::{StoredEvent, StreamEvent};
pub use ids::{IdGenerator, SequentialGenerator, UlidGenerator};
pub use message::{CanonicalMessage, CanonicalPart, MessageMetadata, Role, SCHEMA_VERSION};
pub use run::{run_stream_id, RunRecord, RunStatus};
pub use time::now_rfc3339_millis;
