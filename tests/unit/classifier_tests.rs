//! Unit tests for inbound envelope classification.

use serde_json::json;

use agent_duplex::protocol::classifier::{classify, ControlRequestKind, InboundEvent};
use agent_duplex::protocol::Envelope;

fn classify_json(value: serde_json::Value) -> InboundEvent {
    classify(&Envelope::from_value(value).expect("object envelope"))
}

// ── Init ─────────────────────────────────────────────────────────────────────

#[test]
fn init_envelope_yields_identity_and_features() {
    let event = classify_json(json!({
        "type": "system",
        "subtype": "init",
        "agent_id": "agent-1",
        "session_id": "sess-1",
        "conversation_id": "conv-1",
        "model": "gpt-x",
        "tools": ["Bash", {"name": "Read"}],
        "features": {"streaming": true, "memfs": false, "bogus": "yes"}
    }));

    let InboundEvent::Init { identity, features } = event else {
        panic!("expected init, got {event:?}");
    };
    assert_eq!(identity.agent_id, "agent-1");
    assert_eq!(identity.session_id, "sess-1");
    assert_eq!(identity.conversation_id.as_deref(), Some("conv-1"));
    assert_eq!(identity.model.as_deref(), Some("gpt-x"));
    assert_eq!(identity.tool_names, vec!["Bash", "Read"]);
    assert_eq!(features.get("streaming"), Some(&true));
    assert_eq!(features.get("memfs"), Some(&false));
    assert!(!features.contains_key("bogus"), "non-boolean flags are skipped");
}

#[test]
fn init_without_agent_id_is_ignored() {
    let event = classify_json(json!({"type": "system", "subtype": "init", "session_id": "s"}));
    assert!(matches!(event, InboundEvent::Ignored { .. }));
}

// ── Content messages ─────────────────────────────────────────────────────────

#[test]
fn assistant_and_reasoning_messages_are_distinguished() {
    let assistant = classify_json(json!({
        "type": "message", "message_type": "assistant_message", "content": "hi", "id": "m1"
    }));
    assert_eq!(
        assistant,
        InboundEvent::AssistantText {
            text: "hi".into(),
            message_id: Some("m1".into())
        }
    );

    let reasoning = classify_json(json!({
        "type": "message", "message_type": "reasoning_message", "reasoning": "thinking"
    }));
    assert_eq!(
        reasoning,
        InboundEvent::ReasoningText {
            text: "thinking".into(),
            message_id: None
        }
    );
}

#[test]
fn approval_request_message_needs_approval() {
    let event = classify_json(json!({
        "type": "message",
        "message_type": "approval_request_message",
        "tool_call": {"tool_call_id": "c1", "name": "Bash", "arguments": "{}"}
    }));
    let InboundEvent::ToolCall {
        fragments,
        needs_approval,
        ..
    } = event
    else {
        panic!("expected tool call, got {event:?}");
    };
    assert!(needs_approval);
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].tool_call_id.as_deref(), Some("c1"));
    assert_eq!(fragments[0].tool_name.as_deref(), Some("Bash"));
}

/// Chunks of one message share `id`; `seq_id` identifies each chunk.
#[test]
fn tool_call_chunk_carries_message_and_sequence_ids() {
    let event = classify_json(json!({
        "type": "message",
        "message_type": "tool_call_message",
        "id": "msg-1",
        "seq_id": 7,
        "tool_call": {"tool_call_id": "c1", "arguments": "\""}
    }));
    let InboundEvent::ToolCall {
        message_id, seq_id, ..
    } = event
    else {
        panic!("expected tool call, got {event:?}");
    };
    assert_eq!(message_id.as_deref(), Some("msg-1"));
    assert_eq!(seq_id, Some(7));
}

#[test]
fn tool_calls_array_keeps_positions() {
    let event = classify_json(json!({
        "type": "message",
        "message_type": "tool_call_message",
        "tool_calls": [
            {"index": 0, "arguments": "{\"a\""},
            {"index": 1, "tool_call_id": "c2", "arguments": ""}
        ]
    }));
    let InboundEvent::ToolCall {
        fragments,
        needs_approval,
        ..
    } = event
    else {
        panic!("expected tool call, got {event:?}");
    };
    assert!(!needs_approval);
    assert_eq!(fragments[0].index, Some(0));
    assert_eq!(fragments[0].tool_call_id, None);
    assert_eq!(fragments[1].index, Some(1));
}

#[test]
fn tool_call_message_without_calls_is_ignored() {
    let event = classify_json(json!({"type": "message", "message_type": "tool_call_message"}));
    assert!(matches!(event, InboundEvent::Ignored { .. }));
}

#[test]
fn tool_return_reports_error_status() {
    let event = classify_json(json!({
        "type": "message",
        "message_type": "tool_return_message",
        "tool_call_id": "c1",
        "tool_return": "boom",
        "status": "error"
    }));
    assert_eq!(
        event,
        InboundEvent::ToolReturn {
            tool_call_id: "c1".into(),
            content: json!("boom"),
            is_error: true
        }
    );
}

// ── Control traffic ──────────────────────────────────────────────────────────

#[test]
fn can_use_tool_request_is_classified() {
    let event = classify_json(json!({
        "type": "control_request",
        "request_id": "r1",
        "request": {"subtype": "can_use_tool", "tool_name": "Bash", "input": {"command": "ls"}}
    }));
    let InboundEvent::ControlRequest {
        request_id,
        request: ControlRequestKind::CanUseTool(permission),
    } = event
    else {
        panic!("expected can_use_tool, got {event:?}");
    };
    assert_eq!(request_id, "r1");
    assert_eq!(permission.tool_name, "Bash");
    assert_eq!(permission.input["command"], "ls");
}

#[test]
fn execute_external_tool_request_is_classified() {
    let event = classify_json(json!({
        "type": "control_request",
        "request_id": "r2",
        "request": {
            "subtype": "execute_external_tool",
            "tool_call_id": "c9",
            "tool_name": "lookup",
            "input": {"q": 1}
        }
    }));
    assert!(matches!(
        event,
        InboundEvent::ControlRequest {
            request: ControlRequestKind::ExecuteExternalTool(ref call),
            ..
        } if call.tool_call_id == "c9" && call.tool_name == "lookup"
    ));
}

#[test]
fn unknown_control_request_subtype_is_unsupported() {
    let event = classify_json(json!({
        "type": "control_request", "request_id": "r3", "request": {"subtype": "hook_callback"}
    }));
    assert!(matches!(
        event,
        InboundEvent::ControlRequest {
            request: ControlRequestKind::Unsupported { ref subtype },
            ..
        } if subtype == "hook_callback"
    ));
}

#[test]
fn control_responses_map_success_and_error() {
    let ok = classify_json(json!({
        "type": "control_response",
        "response": {"subtype": "success", "request_id": "r1", "response": {"x": 1}}
    }));
    assert_eq!(
        ok,
        InboundEvent::ControlResponse {
            request_id: "r1".into(),
            outcome: Ok(json!({"x": 1}))
        }
    );

    let err = classify_json(json!({
        "type": "control_response",
        "response": {"subtype": "error", "request_id": "r2", "error": "no such conversation"}
    }));
    assert_eq!(
        err,
        InboundEvent::ControlResponse {
            request_id: "r2".into(),
            outcome: Err("no such conversation".into())
        }
    );
}

// ── Terminal and informational ───────────────────────────────────────────────

#[test]
fn successful_result_has_no_error_code() {
    let event = classify_json(json!({
        "type": "result", "subtype": "success", "result": "done", "duration_ms": 42,
        "conversation_id": "conv-1", "stop_reason": "end_turn"
    }));
    let InboundEvent::Result(result) = event else {
        panic!("expected result, got {event:?}");
    };
    assert!(result.success);
    assert_eq!(result.text.as_deref(), Some("done"));
    assert_eq!(result.error_code, None);
    assert_eq!(result.duration_ms, Some(42));
    assert_eq!(result.stop_reason.as_deref(), Some("end_turn"));
}

#[test]
fn error_and_retry_carry_their_fields() {
    let error = classify_json(json!({
        "type": "error", "message": "rate limited", "run_id": "run-1",
        "api_error": {"status": 429}
    }));
    assert!(matches!(
        error,
        InboundEvent::Error { ref message, ref run_id, detail: Some(_), .. }
            if message == "rate limited" && run_id.as_deref() == Some("run-1")
    ));

    let retry = classify_json(json!({
        "type": "retry", "attempt": 2, "max_attempts": 5, "delay_ms": 1000, "reason": "overloaded"
    }));
    assert_eq!(
        retry,
        InboundEvent::Retry {
            attempt: Some(2),
            max_attempts: Some(5),
            delay_ms: Some(1000),
            reason: Some("overloaded".into()),
            run_id: None
        }
    );
}

#[test]
fn unknown_kinds_are_ignored_not_raised() {
    for value in [
        json!({"type": "telemetry"}),
        json!({"no_type": true}),
        json!({"type": "message", "message_type": "hidden_message"}),
        json!({"type": "control_response", "response": {"subtype": "success"}}),
    ] {
        assert!(
            matches!(classify_json(value.clone()), InboundEvent::Ignored { .. }),
            "{value} must be ignored"
        );
    }
}
