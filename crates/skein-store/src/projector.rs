use crate::store::{EventStore, ReplayOptions, StoreError};
use serde::de::DeserializeOwned;
use skein_core::StoredEvent;

// ---------------------------------------------------------------------------
// Projector
// ---------------------------------------------------------------------------

/// An idempotent fold of an event stream into derived state.
///
/// The reducer reads the previous state by reference and returns a fresh
/// value; the projector never hands out `&mut` to its state, so a snapshot
/// taken via [`Projector::state`] stays coherent while `apply` runs on a
/// single writer.
///
/// Events with seq ≤ `last_seq` are silently skipped, which makes replaying
/// an overlapping slice a no-op.
pub struct Projector<S, T> {
    initial: S,
    state: S,
    last_seq: u64,
    reducer: Box<dyn Fn(&S, &StoredEvent<T>) -> S + Send>,
}

impl<S: Clone, T> Projector<S, T> {
    pub fn new(
        initial: S,
        reducer: impl Fn(&S, &StoredEvent<T>) -> S + Send + 'static,
    ) -> Self {
        Projector {
            state: initial.clone(),
            initial,
            last_seq: 0,
            reducer: Box::new(reducer),
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Fold a slice of stored events into the state, skipping anything
    /// already applied.
    pub fn apply(&mut self, events: &[StoredEvent<T>]) {
        for event in events {
            if event.seq <= self.last_seq {
                continue;
            }
            self.state = (self.reducer)(&self.state, event);
            self.last_seq = event.seq;
        }
    }

    /// Back to the initial state, ready to re-apply from seq 1.
    pub fn reset(&mut self) {
        self.state = self.initial.clone();
        self.last_seq = 0;
    }
}

impl<S: Clone, T: DeserializeOwned> Projector<S, T> {
    /// Replay everything after `last_seq` from the store and apply it.
    ///
    /// Payloads that fail to deserialize into `T` are skipped; their seq is
    /// still consumed so the projector does not re-read them forever.
    /// Returns the number of events applied.
    pub fn catch_up(&mut self, store: &EventStore, stream_id: &str) -> Result<usize, StoreError> {
        let stored = store.replay(stream_id, &ReplayOptions::after(self.last_seq))?;
        let mut applied = 0;
        for event in stored {
            let seq = event.seq;
            if seq <= self.last_seq {
                continue;
            }
            if let Ok(payload) = serde_json::from_value::<T>(event.event.clone()) {
                let typed = event.map(|_| payload);
                self.state = (self.reducer)(&self.state, &typed);
                applied += 1;
            }
            self.last_seq = seq;
        }
        Ok(applied)
    }
}
