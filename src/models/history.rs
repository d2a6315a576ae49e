//! Paginated conversation history.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sort order of a history page.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOrder {
    /// Oldest first.
    Asc,
    /// Newest first.
    #[default]
    Desc,
}

/// Pagination options for [`Session::list_history`](crate::session::Session::list_history).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Conversation to page through; defaults to the session's.
    pub conversation_id: Option<String>,
    /// Return items strictly before this cursor.
    pub before: Option<String>,
    /// Return items strictly after this cursor.
    pub after: Option<String>,
    /// Sort order.
    pub order: HistoryOrder,
    /// Maximum number of items.
    pub limit: Option<u32>,
}

/// One page of raw history items.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryPage {
    /// Raw items as the worker returned them.
    pub items: Vec<Value>,
    /// Cursor for the next page, if any.
    pub next_cursor: Option<String>,
    /// Whether more items exist beyond this page.
    pub has_more: bool,
}

impl HistoryPage {
    /// Map a successful `list_messages` control-response payload.
    ///
    /// Accepts `messages` or `items` for the list and `next_cursor` or
    /// `next_before` for the cursor. A missing `has_more` is inferred from
    /// the presence of a cursor.
    #[must_use]
    pub fn from_response(payload: &Value) -> Self {
        let items = payload
            .get("messages")
            .or_else(|| payload.get("items"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let next_cursor = payload
            .get("next_cursor")
            .or_else(|| payload.get("next_before"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let has_more = payload
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or(next_cursor.is_some());

        Self {
            items,
            next_cursor,
            has_more,
        }
    }
}
