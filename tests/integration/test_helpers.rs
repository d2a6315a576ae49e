//! Shared helpers for session-level integration tests.
//!
//! A [`FakeWorker`] sits on the far end of an in-memory duplex pipe and
//! speaks the worker side of the line protocol, so tests can script exactly
//! which envelopes arrive and in what order.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

use agent_duplex::models::event::OutputEvent;
use agent_duplex::transport::LineTransport;
use agent_duplex::{Session, SessionOptions};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Worker side of an in-memory session.
pub struct FakeWorker {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

/// Build a session wired to a fake worker.
pub fn session_pair(options: SessionOptions) -> (Session, FakeWorker) {
    let (ours, theirs) = tokio::io::duplex(256 * 1024);
    let (our_read, our_write) = tokio::io::split(ours);
    let transport = LineTransport::from_io("test-session", our_read, our_write);
    let session = Session::from_transport(transport, options);

    let (their_read, their_write) = tokio::io::split(theirs);
    let worker = FakeWorker {
        lines: BufReader::new(their_read).lines(),
        writer: their_write,
    };
    (session, worker)
}

impl FakeWorker {
    /// Next envelope written by the session, or `None` on EOF.
    pub async fn try_recv(&mut self) -> Option<Value> {
        let line = tokio::time::timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for the session to write")
            .expect("read from session");
        line.map(|l| serde_json::from_str(&l).expect("session wrote invalid json"))
    }

    /// Next envelope written by the session.
    pub async fn recv(&mut self) -> Value {
        self.try_recv().await.expect("session closed its side")
    }

    /// Next control request; asserts its subtype and returns `(request_id, request)`.
    pub async fn expect_control_request(&mut self, subtype: &str) -> (String, Value) {
        let envelope = self.recv().await;
        assert_eq!(envelope["type"], "control_request", "unexpected envelope {envelope}");
        assert_eq!(envelope["request"]["subtype"], subtype, "unexpected request {envelope}");
        let request_id = envelope["request_id"]
            .as_str()
            .expect("request_id")
            .to_owned();
        (request_id, envelope["request"].clone())
    }

    /// Next control response; returns its `response` object.
    pub async fn expect_control_response(&mut self) -> Value {
        let envelope = self.recv().await;
        assert_eq!(envelope["type"], "control_response", "unexpected envelope {envelope}");
        envelope["response"].clone()
    }

    /// Write one envelope to the session.
    pub async fn send(&mut self, value: Value) {
        let mut line = serde_json::to_string(&value).expect("serialize");
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("write to session");
    }

    /// Answer a control request successfully.
    pub async fn respond(&mut self, request_id: &str, response: Value) {
        self.send(json!({
            "type": "control_response",
            "response": {"subtype": "success", "request_id": request_id, "response": response}
        }))
        .await;
    }

    /// Worker half of the initialize handshake: read the request, announce
    /// identity, then acknowledge.
    pub async fn handshake(&mut self) {
        let (request_id, _) = self.expect_control_request("initialize").await;
        self.send(init_envelope()).await;
        self.respond(&request_id, json!({})).await;
    }

    /// Read the next `user` envelope and return its content.
    pub async fn expect_user(&mut self) -> Value {
        let envelope = self.recv().await;
        assert_eq!(envelope["type"], "user", "unexpected envelope {envelope}");
        assert_eq!(envelope["message"]["role"], "user");
        envelope["message"]["content"].clone()
    }

    /// Close the worker's stdout, as a process exit would.
    pub async fn hang_up(mut self) {
        self.writer.shutdown().await.expect("shutdown");
    }
}

/// A valid `system/init` envelope.
pub fn init_envelope() -> Value {
    json!({
        "type": "system",
        "subtype": "init",
        "agent_id": "agent-1",
        "session_id": "worker-sess-1",
        "conversation_id": "conv-1",
        "model": "test-model",
        "tools": ["Bash", "Read"]
    })
}

/// An assistant text message.
pub fn assistant(text: &str) -> Value {
    json!({"type": "message", "message_type": "assistant_message", "content": text})
}

/// A successful turn result.
pub fn result_ok() -> Value {
    json!({"type": "result", "subtype": "success", "result": "done", "duration_ms": 5})
}

/// Initialize `session` against `worker`.
pub async fn initialize(session: &Session, worker: &mut FakeWorker) {
    let (outcome, ()) = tokio::join!(session.initialize(), worker.handshake());
    outcome.expect("initialize must succeed");
}

/// Consume one turn's stream.
pub async fn collect_turn(session: &Session) -> Vec<OutputEvent> {
    let stream = session.stream().expect("stream");
    tokio::time::timeout(WAIT, stream.collect::<Vec<_>>())
        .await
        .expect("turn did not finish in time")
}

/// Assistant texts in `events`, in order.
pub fn assistant_texts(events: &[OutputEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            OutputEvent::AssistantText { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect()
}
