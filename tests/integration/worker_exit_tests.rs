//! Integration tests against a real worker subprocess that exits early.

#![cfg(unix)]

use std::time::Duration;

use futures_util::StreamExt;

use agent_duplex::models::event::OutputEvent;
use agent_duplex::models::history::HistoryQuery;
use agent_duplex::models::session::SessionState;
use agent_duplex::session::pump::WORKER_EXITED;
use agent_duplex::{AppError, Session, SessionConfig, SessionOptions};

use super::test_helpers::WAIT;

/// Answers initialize, reads one user message, writes one assistant message
/// and exits without a result.
const DIES_MID_TURN: &str = r#"
read -r _init
printf '%s\n' '{"type":"system","subtype":"init","agent_id":"agent-1","session_id":"s-1","conversation_id":"conv-1","tools":[]}'
read -r _user
printf '%s\n' '{"type":"message","message_type":"assistant_message","content":"partial answer"}'
exit 0
"#;

fn shell_config(script: &str) -> SessionConfig {
    let mut config = SessionConfig::from_toml_str(
        "[worker]\ncommand = \"/bin/sh\"\nexit_grace_ms = 200\n",
    )
    .expect("config");
    config.worker.args = vec!["-c".into(), script.into()];
    config
}

async fn wait_for_closed(session: &Session) {
    tokio::time::timeout(WAIT, async {
        while session.state() != SessionState::Closed {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session did not close");
}

/// Output already written is delivered, then a synthetic error and an
/// unsuccessful result end the stream.
#[tokio::test]
async fn worker_exit_mid_turn_terminates_the_stream() {
    let config = shell_config(DIES_MID_TURN);
    let session = Session::connect(&config, SessionOptions::from_config(&config)).expect("spawn");

    let outcome = tokio::time::timeout(WAIT, session.initialize())
        .await
        .expect("initialize timed out")
        .expect("initialize");
    assert_eq!(outcome.identity.agent_id, "agent-1");

    session.send("hello").await.expect("send");
    let events: Vec<OutputEvent> = tokio::time::timeout(
        WAIT,
        session.stream().expect("stream").collect::<Vec<_>>(),
    )
    .await
    .expect("stream did not end");

    assert_eq!(events.len(), 3, "got {events:?}");
    assert!(matches!(&events[0], OutputEvent::AssistantText { text, .. } if text == "partial answer"));
    assert!(matches!(&events[1], OutputEvent::Error { .. }));
    match &events[2] {
        OutputEvent::Result(result) => {
            assert!(!result.success);
            assert_eq!(result.error_code.as_deref(), Some(WORKER_EXITED));
        }
        other => panic!("expected result, got {other:?}"),
    }

    wait_for_closed(&session).await;
    assert!(matches!(
        session.list_history(HistoryQuery::default()).await,
        Err(AppError::SessionClosed(_))
    ));
    session.close().await;
}

#[tokio::test]
async fn worker_exit_before_init_fails_initialize() {
    let config = shell_config("exit 3");
    let session = Session::connect(&config, SessionOptions::from_config(&config)).expect("spawn");

    let outcome = tokio::time::timeout(WAIT, session.initialize())
        .await
        .expect("initialize timed out");

    assert!(matches!(outcome, Err(AppError::Transport(_))), "got {outcome:?}");
    assert_eq!(session.state(), SessionState::Closed);
}
