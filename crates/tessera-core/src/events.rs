//! Lifecycle notifications.
//!
//! Components publish [`LifecycleEvent`]s on an [`EventBus`]; external audit,
//! metrics or relay components subscribe. Publishing never waits for, or
//! requires, a subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::message::Payload;

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentRegistered,
    AgentUnregistered,
    AgentStatusChanged,
    AgentHealthCheckFailed,
    WorkflowStarted,
    WorkflowStepCompleted,
    WorkflowStepFailed,
    WorkflowProgress,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
}

/// Logical channel an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventChannel {
    Agent,
    Workflow,
}

impl EventChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventChannel::Agent => "agent_events",
            EventChannel::Workflow => "workflow_events",
        }
    }
}

impl EventType {
    pub fn channel(&self) -> EventChannel {
        match self {
            EventType::AgentRegistered
            | EventType::AgentUnregistered
            | EventType::AgentStatusChanged
            | EventType::AgentHealthCheckFailed => EventChannel::Agent,
            _ => EventChannel::Workflow,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AgentRegistered => "agent_registered",
            EventType::AgentUnregistered => "agent_unregistered",
            EventType::AgentStatusChanged => "agent_status_changed",
            EventType::AgentHealthCheckFailed => "agent_health_check_failed",
            EventType::WorkflowStarted => "workflow_started",
            EventType::WorkflowStepCompleted => "workflow_step_completed",
            EventType::WorkflowStepFailed => "workflow_step_failed",
            EventType::WorkflowProgress => "workflow_progress",
            EventType::WorkflowCompleted => "workflow_completed",
            EventType::WorkflowFailed => "workflow_failed",
            EventType::WorkflowCancelled => "workflow_cancelled",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope for every lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub event_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Agent id or workflow id the event is about
    pub source: String,
    pub data: Payload,
}

impl LifecycleEvent {
    pub fn new(event_type: EventType, source: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Payload::new(),
            other => {
                let mut map = Payload::new();
                map.insert("value".into(), other);
                map
            }
        };
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            source: source.into(),
            data,
        }
    }

    pub fn agent(event_type: EventType, agent_id: &str, data: Value) -> Self {
        let mut event = Self::new(event_type, agent_id, data);
        event.data.insert("agent_id".into(), json!(agent_id));
        event
    }

    pub fn workflow(event_type: EventType, workflow_id: &str, data: Value) -> Self {
        let mut event = Self::new(event_type, workflow_id, data);
        event.data.insert("workflow_id".into(), json!(workflow_id));
        event
    }

    /// Workflow id for workflow-channel events.
    pub fn workflow_id(&self) -> Option<&str> {
        match self.event_type.channel() {
            EventChannel::Workflow => self.data.get("workflow_id").and_then(Value::as_str),
            EventChannel::Agent => None,
        }
    }
}

/// Fire-and-forget fan-out of lifecycle events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: LifecycleEvent) {
        tracing::trace!(event_type = %event.event_type, source = %event.source, "Emitting lifecycle event");
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(LifecycleEvent::workflow(
            EventType::WorkflowStarted,
            "wf-1",
            json!({"total_steps": 2}),
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::WorkflowStarted);
        assert_eq!(event.workflow_id(), Some("wf-1"));
        assert_eq!(event.data["total_steps"], json!(2));
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.emit(LifecycleEvent::agent(
            EventType::AgentRegistered,
            "a-1",
            Value::Null,
        ));
        assert_eq!(bus.receiver_count(), 0);
    }

    #[test]
    fn test_channels() {
        assert_eq!(
            EventType::AgentHealthCheckFailed.channel().as_str(),
            "agent_events"
        );
        assert_eq!(
            EventType::WorkflowStepFailed.channel().as_str(),
            "workflow_events"
        );
        let event = LifecycleEvent::agent(EventType::AgentRegistered, "a-1", Value::Null);
        assert_eq!(event.workflow_id(), None);
    }
}
