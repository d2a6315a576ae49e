//! Worker writer task.
//!
//! Owns the worker's stdin. Receives already-serialised lines from a tokio
//! [`mpsc`] channel and writes each one, followed by `\n`, with a single
//! `write_all` + `flush`. Because exactly one task touches stdin and the
//! channel is FIFO, lines from concurrent callers are never interleaved and
//! leave in the order they were queued.
//!
//! Every frame carries a oneshot acknowledgement so the caller learns whether
//! its line actually reached the pipe.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// One outbound line plus its write acknowledgement.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Serialised JSON without the trailing newline.
    pub line: String,
    /// Resolved once the line was written (or failed to be).
    pub ack: oneshot::Sender<Result<()>>,
}

/// Writer task: serialise queued lines onto `stdin` in order.
///
/// Exits on cancellation, when every sender is dropped, or after the first
/// failed write (the worker has most likely exited). Frames still queued at
/// that point are dropped, which their callers observe as a closed stream.
pub async fn run_writer<W>(
    session_id: String,
    stdin: W,
    mut frame_rx: mpsc::Receiver<OutboundFrame>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send,
{
    let mut stdin = stdin;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "transport writer: cancellation received, stopping");
                break;
            }

            frame = frame_rx.recv() => {
                let Some(OutboundFrame { line, ack }) = frame else {
                    debug!(session_id, "transport writer: frame channel closed, stopping");
                    break;
                };

                let mut bytes = line.into_bytes();
                bytes.push(b'\n');

                let result = match stdin.write_all(&bytes).await {
                    Ok(()) => stdin.flush().await,
                    Err(e) => Err(e),
                };

                match result {
                    Ok(()) => {
                        let _ = ack.send(Ok(()));
                    }
                    Err(e) => {
                        warn!(session_id, error = %e, "transport writer: write to stdin failed");
                        let _ = ack.send(Err(AppError::Transport(format!("write failed: {e}"))));
                        break;
                    }
                }
            }
        }
    }

    // The worker sees EOF on its stdin.
    if let Err(e) = stdin.shutdown().await {
        debug!(session_id, error = %e, "transport writer: stdin shutdown failed");
    }
}
