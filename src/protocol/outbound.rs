//! Builders for envelopes written to the worker.
//!
//! | Envelope                         | Purpose                               |
//! |----------------------------------|---------------------------------------|
//! | `control_request/initialize`     | Start the session handshake           |
//! | `control_request/register_external_tools` | Announce host tools          |
//! | `control_request/list_messages`  | Fetch one history page                |
//! | `control_request/interrupt`      | Stop the current turn                 |
//! | `control_response` (success)     | Permission decision or tool result    |
//! | `control_response` (error)       | Refuse an unsupported request         |
//! | `user`                           | New turn content                      |

use serde_json::{json, Map, Value};

use crate::external::ExternalTool;
use crate::models::history::{HistoryOrder, HistoryQuery};
use crate::models::message::UserMessage;
use crate::protocol::Envelope;

/// Wrap `request` in a `control_request` envelope.
#[must_use]
pub fn control_request(request_id: &str, request: Value) -> Envelope {
    Envelope::object(json!({
        "type": "control_request",
        "request_id": request_id,
        "request": request,
    }))
}

/// `initialize` control request.
#[must_use]
pub fn initialize(request_id: &str) -> Envelope {
    control_request(request_id, json!({ "subtype": "initialize" }))
}

/// `register_external_tools` control request.
#[must_use]
pub fn register_external_tools(request_id: &str, tools: &[ExternalTool]) -> Envelope {
    control_request(
        request_id,
        json!({ "subtype": "register_external_tools", "tools": tools }),
    )
}

/// `list_messages` control request. Absent options are omitted.
#[must_use]
pub fn list_messages(
    request_id: &str,
    query: &HistoryQuery,
    default_conversation: Option<&str>,
) -> Envelope {
    let mut request = Map::new();
    request.insert("subtype".into(), json!("list_messages"));

    if let Some(conversation) = query.conversation_id.as_deref().or(default_conversation) {
        request.insert("conversation_id".into(), json!(conversation));
    }
    if let Some(before) = &query.before {
        request.insert("before".into(), json!(before));
    }
    if let Some(after) = &query.after {
        request.insert("after".into(), json!(after));
    }
    let order = match query.order {
        HistoryOrder::Asc => "asc",
        HistoryOrder::Desc => "desc",
    };
    request.insert("order".into(), json!(order));
    if let Some(limit) = query.limit {
        request.insert("limit".into(), json!(limit));
    }

    control_request(request_id, Value::Object(request))
}

/// `interrupt` control request.
#[must_use]
pub fn interrupt(request_id: &str) -> Envelope {
    control_request(request_id, json!({ "subtype": "interrupt" }))
}

/// Successful `control_response` answering an inbound request.
#[must_use]
pub fn control_success(request_id: &str, response: Value) -> Envelope {
    Envelope::object(json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": response,
        }
    }))
}

/// Error `control_response` answering an inbound request.
#[must_use]
pub fn control_error(request_id: &str, message: &str) -> Envelope {
    Envelope::object(json!({
        "type": "control_response",
        "response": {
            "subtype": "error",
            "request_id": request_id,
            "error": message,
        }
    }))
}

/// `user` envelope carrying a new turn.
#[must_use]
pub fn user_message(message: &UserMessage) -> Envelope {
    Envelope::object(json!({
        "type": "user",
        "message": { "role": "user", "content": message },
    }))
}
