//! Worker reader task.
//!
//! Reads newline-delimited JSON from the worker's stdout, decodes each line
//! into an [`Envelope`], and forwards envelopes through a tokio [`mpsc`]
//! channel to whoever reads the transport.
//!
//! The reader is driven by [`FramedRead`] backed by [`LineCodec`], which
//! enforces the per-line limit before any heap allocation for JSON parsing.
//!
//! Malformed lines are logged and skipped. The task ends on EOF, on an I/O
//! error, on cancellation, or when the receiving side is dropped; in every
//! case the sender is dropped, which is what turns a pending
//! [`LineTransport::read`](super::LineTransport::read) into end-of-stream.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::Envelope;
use crate::transport::codec::{Frame, LineCodec};

/// Why the reader task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// The worker closed its stdout.
    Eof,
    /// The underlying stream failed.
    IoError,
    /// The transport was closed.
    Cancelled,
    /// Nobody is reading the transport anymore.
    ReceiverDropped,
}

/// Reader task: decode NDJSON lines from `stdout` into [`Envelope`]s.
pub async fn run_reader<R>(
    session_id: String,
    stdout: R,
    inbound_tx: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
) -> ReaderExit
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, LineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "transport reader: cancellation received, stopping");
                return ReaderExit::Cancelled;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(session_id, "transport reader: EOF detected");
                        return ReaderExit::Eof;
                    }

                    Some(Err(e)) => {
                        warn!(session_id, error = %e, "transport reader: IO error, stopping");
                        return ReaderExit::IoError;
                    }

                    Some(Ok(Frame::Oversized)) => {
                        warn!(session_id, "transport reader: line too long, skipping");
                    }

                    Some(Ok(Frame::InvalidUtf8)) => {
                        warn!(session_id, "transport reader: line is not valid UTF-8, skipping");
                    }

                    Some(Ok(Frame::Line(line))) => match Envelope::parse(&line) {
                        Ok(Some(envelope)) => {
                            if inbound_tx.send(envelope).await.is_err() {
                                debug!(session_id, "transport reader: receiver dropped, stopping");
                                return ReaderExit::ReceiverDropped;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(
                                session_id,
                                error = %e,
                                raw_line = %preview(&line),
                                "transport reader: malformed line, skipping"
                            );
                        }
                    },
                }
            }
        }
    }
}

/// Truncate a raw line for logging.
fn preview(line: &str) -> &str {
    const MAX: usize = 200;
    if line.len() <= MAX {
        return line;
    }
    let mut end = MAX;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}
