//! Events yielded to the consumer of a session stream.

use serde::Serialize;
use serde_json::Value;

use crate::models::session::SessionIdentity;

/// Parsed arguments of a finalized tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolInput {
    /// The argument text was valid JSON.
    Parsed(Value),
    /// The argument text did not parse; kept verbatim.
    Raw(String),
}

impl ToolInput {
    /// Parse argument text, falling back to the raw string.
    #[must_use]
    pub fn from_arguments(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::Parsed(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(raw).map_or_else(|_| Self::Raw(raw.to_owned()), Self::Parsed)
    }

    /// The parsed value, if the arguments were JSON.
    #[must_use]
    pub fn as_parsed(&self) -> Option<&Value> {
        match self {
            Self::Parsed(v) => Some(v),
            Self::Raw(_) => None,
        }
    }

    /// The input as a JSON value; raw text becomes a JSON string.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Parsed(v) => v.clone(),
            Self::Raw(s) => Value::String(s.clone()),
        }
    }
}

/// Observable state of one tool invocation.
///
/// Emitted once per argument fragment with `complete == false`, and once
/// more on finalization with `complete == true` and `input` set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallEvent {
    /// Resolved call identifier.
    pub tool_call_id: String,
    /// Tool name, once any fragment carried it.
    pub tool_name: Option<String>,
    /// Accumulated argument text so far.
    pub raw_arguments: String,
    /// Parsed arguments; set only on the finalized event.
    pub input: Option<ToolInput>,
    /// Whether this is the finalized record for the call.
    pub complete: bool,
    /// Whether the worker wants approval before executing it.
    pub needs_approval: bool,
}

/// Terminal per-turn outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnResult {
    /// Whether the turn succeeded.
    pub success: bool,
    /// Final text, if any.
    pub text: Option<String>,
    /// Opaque error code on failure.
    pub error_code: Option<String>,
    /// Turn duration reported by the worker.
    pub duration_ms: Option<u64>,
    /// Conversation the turn belongs to.
    pub conversation_id: Option<String>,
    /// Why the agent stopped.
    pub stop_reason: Option<String>,
}

/// One event yielded by [`Session::stream`](crate::session::Session::stream).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    /// The worker (re)announced its identity.
    Init(SessionIdentity),
    /// Assistant-visible text.
    AssistantText {
        /// Text content.
        text: String,
        /// Worker message identifier.
        message_id: Option<String>,
    },
    /// Model reasoning text.
    ReasoningText {
        /// Reasoning content.
        text: String,
        /// Worker message identifier.
        message_id: Option<String>,
    },
    /// A tool invocation fragment or its finalized record.
    ToolCall(ToolCallEvent),
    /// Output of an executed tool.
    ToolResult {
        /// Call this result answers.
        tool_call_id: String,
        /// Returned content.
        content: Value,
        /// Whether the tool failed.
        is_error: bool,
    },
    /// Partial content update.
    StreamDelta {
        /// Raw delta payload.
        event: Value,
    },
    /// Terminal per-turn outcome; ends a stream.
    Result(TurnResult),
    /// Out-of-band error detail.
    Error {
        /// Human-readable message.
        message: String,
        /// Run the error belongs to.
        run_id: Option<String>,
        /// Stop reason, if the run stopped.
        stop_reason: Option<String>,
        /// Structured provider detail.
        detail: Option<Value>,
    },
    /// Informational notice of an internal retry.
    Retry {
        /// Attempt number.
        attempt: Option<u32>,
        /// Attempt limit.
        max_attempts: Option<u32>,
        /// Delay before the attempt.
        delay_ms: Option<u64>,
        /// Why the worker retried.
        reason: Option<String>,
        /// Run being retried.
        run_id: Option<String>,
    },
}

impl OutputEvent {
    /// Whether this event ends a turn's stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_))
    }
}
