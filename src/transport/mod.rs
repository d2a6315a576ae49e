//! Line transport: NDJSON over a worker's stdio.
//!
//! A [`LineTransport`] owns one reader task (stdout → decoded envelopes), one
//! writer task (queued lines → stdin) and, for spawned workers, a supervisor
//! that owns the child process.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing with a per-line limit.
//! - `reader`: decodes lines into [`Envelope`]s, skipping malformed ones.
//! - `writer`: the single task allowed to touch stdin.
//! - `spawner`: process spawning with environment isolation and exit supervision.

pub mod codec;
pub mod reader;
pub mod spawner;
pub mod writer;

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::protocol::Envelope;
use crate::transport::spawner::SpawnConfig;
use crate::transport::writer::OutboundFrame;
use crate::{AppError, Result};

/// Capacity of the inbound envelope queue. When full, the reader stops
/// pulling from the pipe until the consumer catches up.
const INBOUND_CAPACITY: usize = 256;

/// Capacity of the outbound line queue.
const OUTBOUND_CAPACITY: usize = 256;

/// Duplex NDJSON channel to one worker.
#[derive(Debug)]
pub struct LineTransport {
    session_id: String,
    outbound: mpsc::Sender<OutboundFrame>,
    inbound: Mutex<mpsc::Receiver<Envelope>>,
    cancel: CancellationToken,
    closed: AtomicBool,
    tasks: TaskTracker,
}

impl LineTransport {
    /// Spawn the worker described by `config` and attach to its stdio.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the worker cannot be spawned.
    pub fn connect(config: &SpawnConfig, session_id: impl Into<String>) -> Result<Self> {
        let session_id = session_id.into();
        let worker = spawner::spawn_worker(config, &session_id)?;

        let transport = Self::from_io(session_id.clone(), worker.stdout, worker.stdin);

        if let Some(stderr) = worker.stderr {
            transport
                .tasks
                .spawn(spawner::forward_stderr(session_id.clone(), stderr));
        }

        let cancel = transport.cancel.clone();
        let grace = config.exit_grace;
        transport.tasks.spawn(async move {
            spawner::supervise(session_id, worker.child, cancel, grace).await;
        });

        Ok(transport)
    }

    /// Attach to an arbitrary reader/writer pair.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_io<R, W>(session_id: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let session_id = session_id.into();
        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        {
            let session_id = session_id.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let exit = reader::run_reader(session_id.clone(), reader, inbound_tx, cancel).await;
                debug!(session_id, ?exit, "transport reader finished");
            });
        }
        tasks.spawn(writer::run_writer(
            session_id.clone(),
            writer,
            outbound_rx,
            cancel.clone(),
        ));

        Self {
            session_id,
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
            cancel,
            closed: AtomicBool::new(false),
            tasks,
        }
    }

    /// Identifier used in log fields.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Write one envelope as a single line.
    ///
    /// Resolves once the line reached the worker's stdin. Lines from
    /// concurrent callers never interleave and leave in call order.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` — the envelope could not be serialised.
    /// - `AppError::Transport("write failed: …")` — the stream is closed or
    ///   the pipe broke.
    pub async fn write(&self, envelope: &Envelope) -> Result<()> {
        if self.is_closed() {
            return Err(stream_closed());
        }

        let line = envelope.to_line()?;
        let (ack, done) = oneshot::channel();
        self.outbound
            .send(OutboundFrame { line, ack })
            .await
            .map_err(|_| stream_closed())?;

        done.await.map_err(|_| stream_closed())?
    }

    /// Next inbound envelope, or `None` once the stream has ended.
    ///
    /// Envelopes already decoded when the worker exits are still delivered;
    /// after an explicit [`close`](Self::close) nothing more is.
    pub async fn read(&self) -> Option<Envelope> {
        if self.is_closed() {
            return None;
        }

        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;

            envelope = inbound.recv() => envelope,
            () = self.cancel.cancelled() => None,
        }
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Begin shutdown without waiting: stop the I/O tasks and signal the
    /// worker to exit. Idempotent and usable from `Drop`.
    pub fn close_now(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(session_id = %self.session_id, "closing transport");
        self.cancel.cancel();
        self.tasks.close();
    }

    /// Shut down and wait for the worker and the I/O tasks to finish.
    /// Idempotent.
    pub async fn close(&self) {
        self.close_now();
        self.tasks.wait().await;
    }
}

impl Drop for LineTransport {
    fn drop(&mut self) {
        self.close_now();
    }
}

fn stream_closed() -> AppError {
    AppError::Transport("write failed: stream closed".into())
}
