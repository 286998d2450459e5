//! Tracing observer for store events
//!
//! Logging is not wired into the entity lifecycle. Callers that want a trace
//! of every hook attach this observer to a store instead.

use crate::store::CacheStore;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Spawn a task that logs every event of `store` at debug level.
///
/// The task ends once the store is dropped.
pub fn spawn_event_logger(store: &CacheStore, label: impl Into<String>) -> JoinHandle<()> {
    let mut rx = store.subscribe();
    let label = label.into();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    debug!(
                        store = %label,
                        key = event.key(),
                        entity = %event.entity_id,
                        details = %event.event.details(),
                        "{}",
                        event.name()
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(store = %label, skipped, "Event logger lagged behind");
                }
                Err(RecvError::Closed) => {
                    info!(store = %label, "Store closed, stopping event logger");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{MemoryResource, ProviderChain, SharedFactory};
    use crate::scheduler::ManualScheduler;
    use std::sync::Arc;

    #[tokio::test]
    async fn logger_stops_when_store_is_dropped() {
        let factory = SharedFactory::new(ProviderChain::new(Arc::new(MemoryResource::new())));
        let store = CacheStore::builder(factory)
            .scheduler(Arc::new(ManualScheduler::new()))
            .build();

        let handle = spawn_event_logger(&store, "test");
        store.set("k", serde_json::json!(1)).await.unwrap();
        drop(store);

        handle.await.unwrap();
    }
}
