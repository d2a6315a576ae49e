//! Unit tests for the bounded output buffer.

use std::sync::Arc;
use std::time::Duration;

use agent_duplex::models::event::OutputEvent;
use agent_duplex::session::buffer::OutputBuffer;

fn text(n: usize) -> OutputEvent {
    OutputEvent::AssistantText {
        text: format!("t{n}"),
        message_id: None,
    }
}

/// Pushing K+M items into capacity K keeps the last K in order and counts M
/// drops.
#[test]
fn overflow_drops_oldest_first() {
    let (k, m) = (5, 3);
    let buffer = OutputBuffer::new(k);
    for n in 0..k + m {
        assert!(buffer.push(text(n)));
    }

    assert_eq!(buffer.len(), k);
    assert_eq!(buffer.dropped(), m as u64);

    let drained: Vec<OutputEvent> = std::iter::from_fn(|| buffer.try_pop()).collect();
    let expected: Vec<OutputEvent> = (m..k + m).map(text).collect();
    assert_eq!(drained, expected);
}

#[tokio::test]
async fn waiting_consumer_receives_push_directly() {
    let buffer = Arc::new(OutputBuffer::new(2));

    let consumer = {
        let buffer = Arc::clone(&buffer);
        tokio::spawn(async move { buffer.pop().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    buffer.push(text(1));

    let got = consumer.await.expect("consumer task");
    assert_eq!(got, Some(text(1)));
    assert!(buffer.is_empty(), "handed-off event must bypass the queue");
}

#[tokio::test]
async fn close_wakes_waiting_consumer_with_end() {
    let buffer = Arc::new(OutputBuffer::new(2));

    let consumer = {
        let buffer = Arc::clone(&buffer);
        tokio::spawn(async move { buffer.pop().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    buffer.close();

    assert_eq!(consumer.await.expect("consumer task"), None);
}

#[tokio::test]
async fn close_drains_queued_events_before_end() {
    let buffer = OutputBuffer::new(4);
    buffer.push(text(1));
    buffer.push(text(2));
    buffer.close();

    assert!(!buffer.push(text(3)), "push after close is refused");
    assert_eq!(buffer.pop().await, Some(text(1)));
    assert_eq!(buffer.pop().await, Some(text(2)));
    assert_eq!(buffer.pop().await, None);
    assert_eq!(buffer.pop().await, None, "end is sticky");
}

/// A consumer cancelled after the handoff puts the event back.
#[tokio::test]
async fn cancelled_consumer_does_not_lose_events() {
    let buffer = OutputBuffer::new(4);
    {
        let pop = buffer.pop();
        tokio::pin!(pop);
        let timed_out = tokio::time::timeout(Duration::from_millis(10), &mut pop).await;
        assert!(timed_out.is_err());
        buffer.push(text(7));
    }

    assert_eq!(buffer.pop().await, Some(text(7)));
}

#[test]
fn capacity_is_reported() {
    assert_eq!(OutputBuffer::new(3).capacity(), 3);
    assert_eq!(OutputBuffer::default().capacity(), 100);
}
