//! Messages and responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::types::{MessageType, Priority};

/// Free-form key/value payload carried by messages, responses and steps.
///
/// Internal consumers should go through the typed views in
/// [`records`](crate::records) instead of reading keys ad hoc.
pub type Payload = serde_json::Map<String, Value>;

/// How a message is resolved to an agent. Exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// Addressed to a specific agent id.
    Direct(&'a str),
    /// Resolved through the capability mapped from the message type.
    ByCapability(MessageType),
}

/// A typed request routed to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub content: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Executor timeout for this message; overrides the router default.
    /// Zero disables the timeout for this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub metadata: Payload,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_max_retries() -> u32 {
    3
}

impl Message {
    /// Create a message with a generated id.
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            message_type,
            content: Payload::new(),
            source_agent_id: None,
            target_agent_id: None,
            workflow_id: None,
            priority: Priority::Normal,
            timeout_secs: None,
            retry_count: 0,
            max_retries: default_max_retries(),
            metadata: Payload::new(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn with_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_content(mut self, content: Payload) -> Self {
        self.content = content;
        self
    }

    /// Set a single content field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.content.insert(key.into(), value.into());
        self
    }

    /// Address the message to a specific agent.
    pub fn to_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.target_agent_id = Some(agent_id.into());
        self
    }

    pub fn from_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.source_agent_id = Some(agent_id.into());
        self
    }

    pub fn in_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Expire the message `ttl` after its creation time.
    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.expires_at = Some(self.created_at + ttl);
        self
    }

    /// The single resolution path for this message.
    pub fn resolution(&self) -> Resolution<'_> {
        match self.target_agent_id.as_deref() {
            Some(agent_id) => Resolution::Direct(agent_id),
            None => Resolution::ByCapability(self.message_type),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at < Utc::now())
    }

    /// Size in bytes of the JSON-encoded content.
    pub fn content_size(&self) -> usize {
        serde_json::to_vec(&self.content)
            .map(|bytes| bytes.len())
            .unwrap_or(usize::MAX)
    }
}

/// Uniform result envelope for every dispatch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub response_id: String,
    pub message_id: String,
    pub success: bool,
    #[serde(default)]
    pub content: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Taxonomy code for runtime failures; agents may use their own codes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,
    #[serde(default)]
    pub metadata: Payload,
    pub created_at: DateTime<Utc>,
}

impl Response {
    fn base(message_id: impl Into<String>, success: bool) -> Self {
        let message_id = message_id.into();
        Self {
            response_id: format!("resp_{message_id}"),
            message_id,
            success,
            content: Payload::new(),
            error: None,
            error_code: None,
            error_details: None,
            processing_time_ms: None,
            metadata: Payload::new(),
            created_at: Utc::now(),
        }
    }

    /// Successful response carrying `content`.
    pub fn success(message_id: impl Into<String>, content: Payload) -> Self {
        let mut response = Self::base(message_id, true);
        response.content = content;
        response
    }

    /// Failed response with a taxonomy code.
    pub fn failure(message_id: impl Into<String>, code: ErrorCode, error: impl Into<String>) -> Self {
        Self::failure_with_code(message_id, code.as_str(), error)
    }

    /// Failed response with an arbitrary (agent-defined) code.
    pub fn failure_with_code(
        message_id: impl Into<String>,
        code: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut response = Self::base(message_id, false);
        response.error = Some(error.into());
        response.error_code = Some(code.into());
        response
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.content.insert(key.into(), value.into());
        self
    }

    pub fn with_error_details(mut self, details: Payload) -> Self {
        self.error_details = Some(details);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_processing_time(mut self, millis: f64) -> Self {
        self.processing_time_ms = Some(millis);
        self
    }

    /// Rebind the response to `message_id`, regenerating the response id.
    pub fn correlate(mut self, message_id: &str) -> Self {
        if self.message_id != message_id {
            self.message_id = message_id.to_string();
            self.response_id = format!("resp_{message_id}");
        }
        self
    }

    /// True when this is a failure carrying `code`.
    pub fn has_error_code(&self, code: ErrorCode) -> bool {
        !self.success && self.error_code.as_deref() == Some(code.as_str())
    }

    /// Parsed taxonomy code, if the response carries one.
    pub fn code(&self) -> Option<ErrorCode> {
        self.error_code.as_deref().and_then(|c| c.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolution_is_exclusive() {
        let msg = Message::new(MessageType::RunTests);
        assert_eq!(
            msg.resolution(),
            Resolution::ByCapability(MessageType::RunTests)
        );

        let msg = msg.to_agent("tester-1");
        assert_eq!(msg.resolution(), Resolution::Direct("tester-1"));
    }

    #[test]
    fn test_expiry() {
        let msg = Message::new(MessageType::Ping);
        assert!(!msg.is_expired());

        let expired = Message::new(MessageType::Ping).with_ttl(chrono::Duration::seconds(-1));
        assert!(expired.is_expired());
    }

    #[test]
    fn test_content_size() {
        let msg = Message::new(MessageType::Request).with_field("k", "v");
        assert_eq!(msg.content_size(), r#"{"k":"v"}"#.len());
    }

    #[test]
    fn test_response_constructors() {
        let ok = Response::success("m-1", Payload::new()).with_field("answer", 42);
        assert!(ok.success);
        assert_eq!(ok.response_id, "resp_m-1");
        assert_eq!(ok.content["answer"], json!(42));

        let err = Response::failure("m-2", ErrorCode::AgentNotFound, "missing");
        assert!(!err.success);
        assert!(err.has_error_code(ErrorCode::AgentNotFound));
        assert_eq!(err.code(), Some(ErrorCode::AgentNotFound));
        assert_eq!(err.error.as_deref(), Some("missing"));
    }

    #[test]
    fn test_correlate() {
        let resp = Response::success("other", Payload::new()).correlate("m-9");
        assert_eq!(resp.message_id, "m-9");
        assert_eq!(resp.response_id, "resp_m-9");
    }

    #[test]
    fn test_message_roundtrip_defaults() {
        let msg: Message = serde_json::from_value(json!({
            "message_id": "m-1",
            "message_type": "generate_code",
            "created_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(msg.max_retries, 3);
        assert_eq!(msg.priority, Priority::Normal);
        assert!(msg.content.is_empty());
    }
}
