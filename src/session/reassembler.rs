//! Reassembly of streamed tool-call fragments.
//!
//! Workers stream a tool call's arguments as a series of fragments. Which
//! call a fragment belongs to is resolved as follows:
//!
//! - an explicit `tool_call_id` names the call; the first fragment bearing it
//!   also binds the fragment's position (`index`) to that id;
//! - a fragment with only a position resolves to the call bound to it;
//! - a fragment with neither resolves to the most recently active call.
//!
//! A fragment whose text extends (or equals) the accumulated text replaces
//! it; any other fragment is appended. This handles both cumulative and
//! incremental streams without knowing which one the worker uses.
//!
//! Every chunk of one message shares its message id and repeated tokens are
//! common, so neither identifies a delivery. Re-delivery is only recognised
//! when the envelope carries a per-chunk `seq_id`.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::models::event::{ToolCallEvent, ToolInput};
use crate::protocol::classifier::ToolCallFragment;

/// Accumulated state of one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToolCall {
    /// Resolved id, or a provisional one until the worker names it.
    pub tool_call_id: String,
    /// Whether `tool_call_id` came from the worker.
    pub id_is_explicit: bool,
    /// Tool name, once known.
    pub tool_name: Option<String>,
    /// Accumulated argument text.
    pub raw_arguments: String,
    /// Whether any fragment asked for approval.
    pub needs_approval: bool,
}

impl PendingToolCall {
    fn merge(&mut self, fragment: &str) {
        if fragment.starts_with(self.raw_arguments.as_str()) {
            fragment.clone_into(&mut self.raw_arguments);
        } else {
            self.raw_arguments.push_str(fragment);
        }
    }

    fn snapshot(&self) -> ToolCallEvent {
        ToolCallEvent {
            tool_call_id: self.tool_call_id.clone(),
            tool_name: self.tool_name.clone(),
            raw_arguments: self.raw_arguments.clone(),
            input: None,
            complete: false,
            needs_approval: self.needs_approval,
        }
    }

    fn finalize(self) -> ToolCallEvent {
        ToolCallEvent {
            input: Some(ToolInput::from_arguments(&self.raw_arguments)),
            tool_call_id: self.tool_call_id,
            tool_name: self.tool_name,
            raw_arguments: self.raw_arguments,
            complete: true,
            needs_approval: self.needs_approval,
        }
    }
}

/// Identity of a delivered fragment, used to recognise re-delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FragmentKey {
    message_id: String,
    seq_id: u64,
    position: String,
}

/// Per-session tool-call reassembly state.
#[derive(Debug, Default)]
pub struct Reassembler {
    calls: Vec<PendingToolCall>,
    by_position: HashMap<u64, usize>,
    active: Option<usize>,
    seen: HashSet<FragmentKey>,
    anonymous: u64,
}

impl Reassembler {
    /// Create an empty reassembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any call is waiting to be finalized.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.calls.is_empty()
    }

    /// Calls awaiting finalization, in first-seen order.
    #[must_use]
    pub fn pending(&self) -> &[PendingToolCall] {
        &self.calls
    }

    /// Fold one fragment in and return the updated call's snapshot.
    ///
    /// Returns `None` when the fragment is a re-delivery of one already
    /// ingested under the same message id, `seq_id` and position. Without a
    /// `seq_id` every fragment is folded in.
    pub fn ingest(
        &mut self,
        message_id: Option<&str>,
        seq_id: Option<u64>,
        fragment: &ToolCallFragment,
        needs_approval: bool,
    ) -> Option<ToolCallEvent> {
        if let Some(seq_id) = seq_id {
            let position = fragment
                .tool_call_id
                .clone()
                .or_else(|| fragment.index.map(|i| format!("#{i}")))
                .unwrap_or_default();
            let key = FragmentKey {
                message_id: message_id.unwrap_or_default().to_owned(),
                seq_id,
                position,
            };
            if !self.seen.insert(key) {
                debug!(?message_id, seq_id, "duplicate tool-call fragment, skipping");
                return None;
            }
        }

        let slot = self.resolve(fragment);
        let call = &mut self.calls[slot];
        if call.tool_name.is_none() {
            call.tool_name.clone_from(&fragment.tool_name);
        }
        call.needs_approval |= needs_approval;
        call.merge(&fragment.arguments);
        self.active = Some(slot);

        Some(self.calls[slot].snapshot())
    }

    /// Find or create the call a fragment belongs to.
    fn resolve(&mut self, fragment: &ToolCallFragment) -> usize {
        if let Some(id) = &fragment.tool_call_id {
            if let Some(slot) = self.calls.iter().position(|c| &c.tool_call_id == id) {
                self.bind_position(fragment.index, slot);
                return slot;
            }
            // A call first seen by position only learns its real id here.
            if let Some(&slot) = fragment.index.and_then(|i| self.by_position.get(&i)) {
                let call = &mut self.calls[slot];
                if !call.id_is_explicit {
                    call.tool_call_id.clone_from(id);
                    call.id_is_explicit = true;
                    return slot;
                }
            }
            let slot = self.open(id.clone(), true);
            self.bind_position(fragment.index, slot);
            return slot;
        }

        if let Some(index) = fragment.index {
            if let Some(&slot) = self.by_position.get(&index) {
                return slot;
            }
            let slot = self.open(format!("#{index}"), false);
            self.bind_position(Some(index), slot);
            return slot;
        }

        if let Some(slot) = self.active {
            return slot;
        }
        self.anonymous += 1;
        let provisional = format!("tool-call-{}", self.anonymous);
        self.open(provisional, false)
    }

    fn open(&mut self, tool_call_id: String, id_is_explicit: bool) -> usize {
        self.calls.push(PendingToolCall {
            tool_call_id,
            id_is_explicit,
            tool_name: None,
            raw_arguments: String::new(),
            needs_approval: false,
        });
        self.calls.len() - 1
    }

    fn bind_position(&mut self, index: Option<u64>, slot: usize) {
        if let Some(index) = index {
            self.by_position.insert(index, slot);
        }
    }

    /// Finalize every pending call, in first-seen order.
    ///
    /// Argument text that does not parse as JSON is kept as a raw string.
    /// Re-delivery tracking survives until [`reset`](Self::reset).
    pub fn finalize(&mut self) -> Vec<ToolCallEvent> {
        self.by_position.clear();
        self.active = None;
        self.calls.drain(..).map(PendingToolCall::finalize).collect()
    }

    /// Finalize pending calls and forget everything seen this turn.
    pub fn reset(&mut self) -> Vec<ToolCallEvent> {
        self.seen.clear();
        self.finalize()
    }
}
