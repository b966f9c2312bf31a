//! Forwards lifecycle events from the in-process bus to Redis pub/sub.

use std::sync::Arc;
use tessera_core::{EventBus, LifecycleEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::redis::RedisStore;

/// Channels an event is published on.
pub fn relay_channels(prefix: &str, event: &LifecycleEvent) -> Vec<String> {
    let channel = event.event_type.channel().as_str();
    let mut channels = vec![format!("{prefix}events:{channel}")];
    if let Some(workflow_id) = event.workflow_id() {
        channels.push(format!("{prefix}events:{channel}:{workflow_id}"));
    }
    channels
}

/// Background task publishing every bus event to Redis.
pub struct EventRelay {
    handle: tokio::task::JoinHandle<()>,
}

impl EventRelay {
    pub fn start(bus: &EventBus, store: Arc<RedisStore>, prefix: impl Into<String>) -> Self {
        let mut rx = bus.subscribe();
        let prefix = prefix.into();

        let handle = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event relay lagged behind the bus");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(event_id = %event.event_id, error = %e, "Failed to encode event");
                        continue;
                    }
                };

                for channel in relay_channels(&prefix, &event) {
                    if let Err(e) = store.publish(&channel, &payload).await {
                        warn!(channel = %channel, error = %e, "Failed to publish event");
                    }
                }
            }
            debug!("Event relay stopped: bus closed");
        });

        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}
