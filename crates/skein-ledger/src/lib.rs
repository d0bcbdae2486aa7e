//! Run lifecycle ledger and canonical transcript store.
//!
//! The ledger owns run records and the immutable canonical messages that
//! committed runs produce. `finalize_run` is the critical path: supersession
//! of sibling commits at the same fork point, gapless thread ordinals, and
//! message/part inserts all happen inside one SQLite transaction, so a
//! failure leaves the store as if the call never happened.
//!
//! Same durability posture as the event store: WAL, synchronous=FULL, and an
//! integrity check at open.

mod error;
mod store;
mod transcript;
mod types;

pub use error::LedgerError;
pub use store::LedgerStore;
pub use types::{
    BeginRunOptions, Branch, FinalizeResult, FinalizeStatus, ForkPoint, RecoverAction,
    RecoverResult, StaleRunInfo, StaleRunQuery, ThreadTree, ThreadTreeNode,
};
