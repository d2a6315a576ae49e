//! Inbound envelope classification.
//!
//! [`classify`] is pure: it maps one [`Envelope`] to one [`InboundEvent`]
//! and never fails. Envelopes it cannot use become [`InboundEvent::Ignored`]
//! with a reason the pump logs at `debug`.

use serde_json::{Map, Value};

use crate::external::ExternalToolCall;
use crate::models::event::TurnResult;
use crate::models::session::{FeatureFlags, SessionIdentity};
use crate::permission::PermissionRequest;
use crate::protocol::Envelope;

/// One argument fragment of a streamed tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallFragment {
    /// Explicit call id, when this fragment carries one.
    pub tool_call_id: Option<String>,
    /// Position of the call within its message.
    pub index: Option<u64>,
    /// Tool name, when this fragment carries one.
    pub tool_name: Option<String>,
    /// Argument text; cumulative or incremental.
    pub arguments: String,
}

/// Subtypes of a worker-initiated control request.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequestKind {
    /// Tool approval (`can_use_tool`).
    CanUseTool(PermissionRequest),
    /// Host tool execution (`execute_external_tool`).
    ExecuteExternalTool(ExternalToolCall),
    /// A subtype this engine does not implement; answered with an error.
    Unsupported {
        /// The subtype as received.
        subtype: String,
    },
}

/// Typed view of one inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// `system/init`: the worker's identity.
    Init {
        /// Announced identity.
        identity: SessionIdentity,
        /// Feature flags carried by the envelope.
        features: FeatureFlags,
    },
    /// Assistant-visible text.
    AssistantText {
        /// Text content.
        text: String,
        /// Worker message id.
        message_id: Option<String>,
    },
    /// Model reasoning text.
    ReasoningText {
        /// Reasoning content.
        text: String,
        /// Worker message id.
        message_id: Option<String>,
    },
    /// Tool-call fragments, needing execution or approval.
    ToolCall {
        /// Worker message id, shared by every chunk of one message.
        message_id: Option<String>,
        /// Per-chunk sequence number, used to recognise re-delivered envelopes.
        seq_id: Option<u64>,
        /// Fragments in envelope order.
        fragments: Vec<ToolCallFragment>,
        /// `approval_request_message` rather than `tool_call_message`.
        needs_approval: bool,
    },
    /// Output of an executed tool.
    ToolReturn {
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
    /// Worker-initiated control request.
    ControlRequest {
        /// Id the response must echo.
        request_id: String,
        /// What is being asked.
        request: ControlRequestKind,
    },
    /// Response to an engine-initiated control request.
    ControlResponse {
        /// Id of the request being answered.
        request_id: String,
        /// Success payload or error text.
        outcome: std::result::Result<Value, String>,
    },
    /// Terminal per-turn outcome.
    Result(TurnResult),
    /// Out-of-band error.
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
    /// Internal retry notice.
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
    /// Unusable envelope; logged and dropped.
    Ignored {
        /// Why it was dropped.
        reason: String,
    },
}

impl InboundEvent {
    fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }

    /// Whether this event carries tool-call fragments.
    #[must_use]
    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall { .. })
    }
}

/// Classify one inbound envelope.
#[must_use]
pub fn classify(envelope: &Envelope) -> InboundEvent {
    let map = envelope.as_map();
    match envelope.kind() {
        Some("system") => classify_system(map),
        Some("message") => classify_message(map),
        Some("stream_event") => match map.get("event") {
            Some(event) => InboundEvent::StreamDelta {
                event: event.clone(),
            },
            None => InboundEvent::ignored("stream_event without event"),
        },
        Some("control_request") => classify_control_request(map),
        Some("control_response") => classify_control_response(map),
        Some("result") => InboundEvent::Result(turn_result(map)),
        Some("error") => InboundEvent::Error {
            message: str_of(map, "message").unwrap_or_else(|| "unknown error".to_owned()),
            run_id: str_of(map, "run_id"),
            stop_reason: str_of(map, "stop_reason"),
            detail: map.get("api_error").filter(|v| !v.is_null()).cloned(),
        },
        Some("retry") => InboundEvent::Retry {
            attempt: u32_of(map, "attempt"),
            max_attempts: u32_of(map, "max_attempts"),
            delay_ms: map.get("delay_ms").and_then(Value::as_u64),
            reason: str_of(map, "reason"),
            run_id: str_of(map, "run_id"),
        },
        Some(other) => InboundEvent::ignored(format!("unknown envelope type '{other}'")),
        None => InboundEvent::ignored("envelope without type"),
    }
}

fn classify_system(map: &Map<String, Value>) -> InboundEvent {
    match map.get("subtype").and_then(Value::as_str) {
        Some("init") => {}
        Some(other) => return InboundEvent::ignored(format!("unknown system subtype '{other}'")),
        None => return InboundEvent::ignored("system envelope without subtype"),
    }

    let (Some(agent_id), Some(session_id)) = (str_of(map, "agent_id"), str_of(map, "session_id"))
    else {
        return InboundEvent::ignored("init envelope missing agent_id or session_id");
    };

    let tool_names = map
        .get("tools")
        .and_then(Value::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter_map(|tool| match tool {
                    Value::String(name) => Some(name.clone()),
                    Value::Object(def) => def.get("name").and_then(Value::as_str).map(str::to_owned),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    InboundEvent::Init {
        identity: SessionIdentity {
            agent_id,
            session_id,
            conversation_id: str_of(map, "conversation_id"),
            model: str_of(map, "model"),
            tool_names,
        },
        features: feature_flags(map.get("features")),
    }
}

/// Boolean entries of a `features` object; other values are skipped.
#[must_use]
pub fn feature_flags(value: Option<&Value>) -> FeatureFlags {
    value
        .and_then(Value::as_object)
        .map(|features| {
            features
                .iter()
                .filter_map(|(name, flag)| flag.as_bool().map(|on| (name.clone(), on)))
                .collect()
        })
        .unwrap_or_default()
}

fn classify_message(map: &Map<String, Value>) -> InboundEvent {
    let message_id = message_id(map);
    match map.get("message_type").and_then(Value::as_str) {
        Some("assistant_message") => match text_content(map.get("content")) {
            Some(text) => InboundEvent::AssistantText { text, message_id },
            None => InboundEvent::ignored("assistant_message without content"),
        },
        Some("reasoning_message") => {
            match text_content(map.get("reasoning").or_else(|| map.get("content"))) {
                Some(text) => InboundEvent::ReasoningText { text, message_id },
                None => InboundEvent::ignored("reasoning_message without reasoning"),
            }
        }
        Some(kind @ ("tool_call_message" | "approval_request_message")) => {
            let fragments = tool_call_fragments(map);
            if fragments.is_empty() {
                return InboundEvent::ignored(format!("{kind} without tool calls"));
            }
            InboundEvent::ToolCall {
                message_id,
                seq_id: map.get("seq_id").and_then(Value::as_u64),
                fragments,
                needs_approval: kind == "approval_request_message",
            }
        }
        Some("tool_return_message") => {
            let Some(tool_call_id) = str_of(map, "tool_call_id") else {
                return InboundEvent::ignored("tool_return_message without tool_call_id");
            };
            InboundEvent::ToolReturn {
                tool_call_id,
                content: map.get("tool_return").cloned().unwrap_or(Value::Null),
                is_error: map.get("status").and_then(Value::as_str) == Some("error"),
            }
        }
        Some(other) => InboundEvent::ignored(format!("unknown message_type '{other}'")),
        None => InboundEvent::ignored("message without message_type"),
    }
}

fn message_id(map: &Map<String, Value>) -> Option<String> {
    ["id", "uuid", "otid"]
        .iter()
        .find_map(|key| str_of(map, key))
}

/// Text of a `content` field: a string, or the concatenated text parts.
fn text_content(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let text: String = parts
                .iter()
                .filter(|part| part.get("type").and_then(Value::as_str).unwrap_or("text") == "text")
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            Some(text)
        }
        _ => None,
    }
}

fn tool_call_fragments(map: &Map<String, Value>) -> Vec<ToolCallFragment> {
    let calls: Vec<&Value> = match (map.get("tool_calls"), map.get("tool_call")) {
        (Some(Value::Array(calls)), _) if !calls.is_empty() => calls.iter().collect(),
        (_, Some(call)) if call.is_object() => vec![call],
        _ => Vec::new(),
    };

    calls
        .into_iter()
        .filter_map(Value::as_object)
        .map(|call| ToolCallFragment {
            tool_call_id: str_of(call, "tool_call_id")
                .or_else(|| str_of(call, "id"))
                .filter(|id| !id.is_empty()),
            index: call.get("index").and_then(Value::as_u64),
            tool_name: str_of(call, "name").filter(|name| !name.is_empty()),
            arguments: match call.get("arguments") {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            },
        })
        .collect()
}

fn classify_control_request(map: &Map<String, Value>) -> InboundEvent {
    let Some(request_id) = str_of(map, "request_id") else {
        return InboundEvent::ignored("control_request without request_id");
    };
    let Some(request) = map.get("request").and_then(Value::as_object) else {
        return InboundEvent::ignored("control_request without request body");
    };
    let subtype = request.get("subtype").and_then(Value::as_str).unwrap_or_default();
    let input = request.get("input").cloned().unwrap_or_else(|| Value::Object(Map::new()));

    let kind = match subtype {
        "can_use_tool" => {
            let Some(tool_name) = str_of(request, "tool_name") else {
                return InboundEvent::ignored("can_use_tool without tool_name");
            };
            ControlRequestKind::CanUseTool(PermissionRequest {
                tool_name,
                input,
                tool_call_id: str_of(request, "tool_call_id"),
            })
        }
        "execute_external_tool" => {
            let (Some(tool_call_id), Some(tool_name)) =
                (str_of(request, "tool_call_id"), str_of(request, "tool_name"))
            else {
                return InboundEvent::ignored(
                    "execute_external_tool without tool_call_id or tool_name",
                );
            };
            ControlRequestKind::ExecuteExternalTool(ExternalToolCall {
                tool_call_id,
                tool_name,
                input,
            })
        }
        other => ControlRequestKind::Unsupported {
            subtype: other.to_owned(),
        },
    };

    InboundEvent::ControlRequest {
        request_id,
        request: kind,
    }
}

fn classify_control_response(map: &Map<String, Value>) -> InboundEvent {
    let Some(response) = map.get("response").and_then(Value::as_object) else {
        return InboundEvent::ignored("control_response without response body");
    };
    let Some(request_id) = str_of(response, "request_id") else {
        return InboundEvent::ignored("control_response without request_id");
    };

    let outcome = match response.get("subtype").and_then(Value::as_str) {
        Some("success") => Ok(response.get("response").cloned().unwrap_or(Value::Null)),
        Some("error") => Err(str_of(response, "error")
            .unwrap_or_else(|| "control request failed".to_owned())),
        Some(other) => {
            return InboundEvent::ignored(format!("unknown control_response subtype '{other}'"))
        }
        None => return InboundEvent::ignored("control_response without subtype"),
    };

    InboundEvent::ControlResponse {
        request_id,
        outcome,
    }
}

fn turn_result(map: &Map<String, Value>) -> TurnResult {
    let subtype = str_of(map, "subtype");
    let flagged_error = map.get("is_error").and_then(Value::as_bool).unwrap_or(false);
    let success = subtype.as_deref().map_or(!flagged_error, |s| s == "success") && !flagged_error;

    let error_code = if success {
        None
    } else {
        str_of(map, "error").or(subtype).or_else(|| Some("error".to_owned()))
    };

    TurnResult {
        success,
        text: str_of(map, "result"),
        error_code,
        duration_ms: map.get("duration_ms").and_then(Value::as_u64),
        conversation_id: str_of(map, "conversation_id"),
        stop_reason: str_of(map, "stop_reason"),
    }
}

fn str_of(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn u32_of(map: &Map<String, Value>, key: &str) -> Option<u32> {
    map.get(key)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}
