//! Unit tests for tool-call fragment reassembly.

use serde_json::json;

use agent_duplex::models::event::{ToolCallEvent, ToolInput};
use agent_duplex::protocol::classifier::ToolCallFragment;
use agent_duplex::session::reassembler::Reassembler;

fn fragment(id: Option<&str>, index: Option<u64>, name: Option<&str>, args: &str) -> ToolCallFragment {
    ToolCallFragment {
        tool_call_id: id.map(str::to_owned),
        index,
        tool_name: name.map(str::to_owned),
        arguments: args.to_owned(),
    }
}

fn single(finalized: Vec<ToolCallEvent>) -> ToolCallEvent {
    assert_eq!(finalized.len(), 1, "expected exactly one finalized call");
    finalized.into_iter().next().expect("one call")
}

// ── Merge rule ───────────────────────────────────────────────────────────────

/// Cumulative fragments: the final text equals the last fragment.
#[test]
fn cumulative_fragments_replace() {
    let mut r = Reassembler::new();
    for text in ["{\"pa", "{\"path\":", "{\"path\":\"a.rs\"}"] {
        r.ingest(None, None, &fragment(Some("c1"), Some(0), None, text), false);
    }

    let call = single(r.finalize());
    assert_eq!(call.raw_arguments, "{\"path\":\"a.rs\"}");
    assert_eq!(call.input, Some(ToolInput::Parsed(json!({"path": "a.rs"}))));
}

/// Incremental fragments: the final text is the in-order concatenation.
#[test]
fn incremental_fragments_append() {
    let mut r = Reassembler::new();
    for text in ["{\"n\"", ":", "1", "}"] {
        r.ingest(None, None, &fragment(Some("c1"), Some(0), None, text), false);
    }

    let call = single(r.finalize());
    assert_eq!(call.raw_arguments, "{\"n\":1}");
}

/// Identity resolves from the first explicit id; a position-only
/// continuation joins it.
#[test]
fn continuation_without_id_resolves_to_call_at_same_position() {
    let mut r = Reassembler::new();
    r.ingest(
        None,
        None,
        &fragment(Some("call-1"), Some(0), Some("Bash"), "{\"command\":\"echo"),
        false,
    );
    r.ingest(None, None, &fragment(None, Some(0), None, " hi\"}"), false);

    let call = single(r.finalize());
    assert_eq!(call.tool_call_id, "call-1");
    assert_eq!(call.tool_name.as_deref(), Some("Bash"));
    assert_eq!(call.input, Some(ToolInput::Parsed(json!({"command": "echo hi"}))));
    assert!(call.complete);
}

// ── Duplicates ───────────────────────────────────────────────────────────────

/// Re-ingesting an identical cumulative fragment does not duplicate content.
#[test]
fn equal_cumulative_reingest_is_a_replace() {
    let mut r = Reassembler::new();
    let f = fragment(Some("c1"), None, None, "{\"a\":1}");
    r.ingest(None, None, &f, false);
    r.ingest(None, None, &f, false);

    assert_eq!(single(r.finalize()).raw_arguments, "{\"a\":1}");
}

/// A re-delivered envelope (same message id, sequence number and position)
/// is recognised and skipped.
#[test]
fn redelivered_chunk_is_skipped() {
    let mut r = Reassembler::new();
    let first = fragment(Some("c1"), Some(0), None, "{\"a\":");
    let second = fragment(None, Some(0), None, "1}");

    assert!(r.ingest(Some("m1"), Some(1), &first, false).is_some());
    assert!(r.ingest(Some("m1"), Some(2), &second, false).is_some());
    assert!(
        r.ingest(Some("m1"), Some(2), &second, false).is_none(),
        "duplicate must not produce an event"
    );

    assert_eq!(single(r.finalize()).raw_arguments, "{\"a\":1}");
}

/// Chunks of one message repeat tokens like `"`; without a sequence number
/// they are all kept.
#[test]
fn repeated_tokens_in_one_message_are_kept() {
    let mut r = Reassembler::new();
    for text in ["{\"k\":", "\"", "v", "\"", "}"] {
        let chunk = fragment(Some("c1"), Some(0), None, text);
        assert!(r.ingest(Some("msg-1"), None, &chunk, false).is_some());
    }

    let call = single(r.finalize());
    assert_eq!(call.raw_arguments, "{\"k\":\"v\"}");
    assert_eq!(call.input, Some(ToolInput::Parsed(json!({"k": "v"}))));
}

/// Distinct sequence numbers keep repeated tokens too.
#[test]
fn repeated_tokens_with_distinct_seq_ids_are_kept() {
    let mut r = Reassembler::new();
    for (seq, text) in (0u64..).zip(["[", "\"", "x", "\"", "]"]) {
        r.ingest(Some("msg-1"), Some(seq), &fragment(Some("c1"), Some(0), None, text), false);
    }

    assert_eq!(single(r.finalize()).raw_arguments, "[\"x\"]");
}

// ── Events and finalization ──────────────────────────────────────────────────

#[test]
fn every_fragment_yields_a_running_snapshot() {
    let mut r = Reassembler::new();
    let a = r
        .ingest(None, None, &fragment(Some("c1"), None, Some("Read"), "{\"p\""), true)
        .expect("snapshot");
    let b = r
        .ingest(None, None, &fragment(None, None, None, ":1}"), false)
        .expect("snapshot");

    assert!(!a.complete && a.input.is_none());
    assert!(a.needs_approval);
    assert_eq!(b.raw_arguments, "{\"p\":1}");
    assert!(b.needs_approval, "approval flag is sticky");
}

#[test]
fn unparseable_arguments_finalize_as_raw() {
    let mut r = Reassembler::new();
    r.ingest(None, None, &fragment(Some("c1"), None, None, "{\"cut"), false);

    let call = single(r.finalize());
    assert_eq!(call.input, Some(ToolInput::Raw("{\"cut".into())));
}

#[test]
fn empty_arguments_finalize_as_empty_object() {
    let mut r = Reassembler::new();
    r.ingest(None, None, &fragment(Some("c1"), None, Some("Status"), ""), false);

    let call = single(r.finalize());
    assert_eq!(call.input, Some(ToolInput::Parsed(json!({}))));
}

#[test]
fn parallel_calls_finalize_in_first_seen_order() {
    let mut r = Reassembler::new();
    r.ingest(None, None, &fragment(Some("a"), Some(0), None, "{"), false);
    r.ingest(None, None, &fragment(Some("b"), Some(1), None, "{"), false);
    r.ingest(None, None, &fragment(None, Some(1), None, "}"), false);
    r.ingest(None, None, &fragment(None, Some(0), None, "}"), false);

    let ids: Vec<String> = r.finalize().into_iter().map(|c| c.tool_call_id).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(!r.has_pending());
}
