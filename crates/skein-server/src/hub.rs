use crate::config::FanoutConfig;
use skein_protocol::WireEvent;
use skein_store::EventStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

pub(crate) type StreamBroadcast = broadcast::Sender<WireEvent>;

/// Shared fan-out state: the per-stream broadcast registry plus the event
/// store handle subscriptions replay from.
///
/// Cheap to clone; one hub serves any number of connections.
#[derive(Clone)]
pub struct FanoutHub {
    store: Arc<Mutex<EventStore>>,
    registry: Arc<RwLock<HashMap<String, StreamBroadcast>>>,
    config: Arc<FanoutConfig>,
}

impl FanoutHub {
    pub fn new(store: Arc<Mutex<EventStore>>, config: FanoutConfig) -> Self {
        FanoutHub {
            store,
            registry: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
        }
    }

    /// Push a freshly appended batch to every subscription of the stream.
    ///
    /// Subscriptions still replaying buffer these on their broadcast
    /// receiver; live subscriptions forward them directly. No subscribers is
    /// fine — the events are already durable in the store.
    pub async fn broadcast(&self, stream_id: &str, events: &[WireEvent]) {
        let tx = self.get_or_create_broadcast(stream_id).await;
        for event in events {
            let _ = tx.send(event.clone());
        }
    }

    pub fn config(&self) -> &FanoutConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &Arc<Mutex<EventStore>> {
        &self.store
    }

    pub(crate) async fn get_or_create_broadcast(&self, stream_id: &str) -> StreamBroadcast {
        {
            let registry = self.registry.read().await;
            if let Some(tx) = registry.get(stream_id) {
                return tx.clone();
            }
        }
        let mut registry = self.registry.write().await;
        if let Some(tx) = registry.get(stream_id) {
            return tx.clone();
        }
        let (tx, _rx) = broadcast::channel(self.config.max_buffer_size);
        registry.insert(stream_id.to_owned(), tx.clone());
        tx
    }
}
