//! Session façade.
//!
//! A [`Session`] owns one worker connection and everything scoped to it: the
//! transport, the output buffer, the control channel, the permission engine
//! and the background pump. Nothing is shared between sessions.
//!
//! Lifecycle: `uninitialized → initializing → ready → closed`. Dropping a
//! session performs the same shutdown as [`Session::close`], minus waiting
//! for the worker to exit.

pub mod buffer;
pub mod control;
pub mod pump;
pub mod reassembler;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use futures_util::Stream;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{SessionConfig, DEFAULT_BUFFER_CAPACITY};
use crate::external::{ExternalTool, ExternalToolExecutor};
use crate::models::event::OutputEvent;
use crate::models::history::{HistoryPage, HistoryQuery};
use crate::models::message::UserMessage;
use crate::models::session::{InitOutcome, SessionIdentity, SessionState};
use crate::permission::engine::{PermissionEngine, PermissionPolicy};
use crate::permission::PermissionHandler;
use crate::protocol::classifier::feature_flags;
use crate::protocol::outbound;
use crate::session::buffer::OutputBuffer;
use crate::session::control::ControlChannel;
use crate::session::pump::{run_pump, Dispatcher, Step};
use crate::transport::LineTransport;
use crate::{AppError, Result};

/// Host-side configuration of a session.
#[derive(Clone)]
pub struct SessionOptions {
    /// Output buffer capacity.
    pub buffer_capacity: usize,
    /// Built-in permission policy.
    pub policy: PermissionPolicy,
    /// Optional permission callback.
    pub permission_handler: Option<Arc<dyn PermissionHandler>>,
    /// Tools executed by the host, announced at initialize.
    pub external_tools: Vec<ExternalTool>,
    /// Executor for `external_tools`.
    pub external_executor: Option<Arc<dyn ExternalToolExecutor>>,
    /// Default conversation for history queries.
    pub conversation_id: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            policy: PermissionPolicy::default(),
            permission_handler: None,
            external_tools: Vec::new(),
            external_executor: None,
            conversation_id: None,
        }
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("buffer_capacity", &self.buffer_capacity)
            .field("policy", &self.policy)
            .field("has_permission_handler", &self.permission_handler.is_some())
            .field("external_tools", &self.external_tools.len())
            .field("has_external_executor", &self.external_executor.is_some())
            .field("conversation_id", &self.conversation_id)
            .finish()
    }
}

impl SessionOptions {
    /// Options derived from the `[session]` and `[permissions]` sections.
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            buffer_capacity: config.session.buffer_capacity,
            policy: PermissionPolicy::from_section(&config.permissions),
            conversation_id: config.session.conversation_id.clone(),
            ..Self::default()
        }
    }

    /// Install a permission callback.
    #[must_use]
    pub fn with_permission_handler(mut self, handler: Arc<dyn PermissionHandler>) -> Self {
        self.permission_handler = Some(handler);
        self
    }

    /// Register host-executed tools and their executor.
    #[must_use]
    pub fn with_external_tools(
        mut self,
        tools: Vec<ExternalTool>,
        executor: Arc<dyn ExternalToolExecutor>,
    ) -> Self {
        self.external_tools = tools;
        self.external_executor = Some(executor);
        self
    }
}

/// State shared between the façade and its pump.
pub(crate) struct SessionShared {
    pub(crate) transport: LineTransport,
    pub(crate) buffer: OutputBuffer,
    pub(crate) control: ControlChannel,
    pub(crate) permissions: PermissionEngine,
    pub(crate) executor: Option<Arc<dyn ExternalToolExecutor>>,
    pub(crate) identity: OnceLock<SessionIdentity>,
    pub(crate) turn_active: AtomicBool,
    state: AtomicU8,
}

impl SessionShared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move `from → to`; fails if another transition happened first.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        debug_assert!(from.can_transition_to(to));
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Synchronous shutdown: close, wake consumers and fail waiters.
    /// Idempotent.
    pub(crate) fn shutdown(&self) {
        let previous = SessionState::from_u8(
            self.state
                .swap(SessionState::Closed as u8, Ordering::AcqRel),
        );
        if previous != SessionState::Closed {
            info!(session_id = %self.transport.session_id(), from = %previous, "session closed");
        }
        self.transport.close_now();
        self.buffer.close();
        self.control.fail_all("session closed");
    }
}

/// One conversation with one worker process.
pub struct Session {
    shared: Arc<SessionShared>,
    dispatcher: Mutex<Option<Dispatcher>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    external_tools: Vec<ExternalTool>,
    conversation_id: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.shared.transport.session_id())
            .field("state", &self.state())
            .field("identity", &self.shared.identity.get())
            .finish_non_exhaustive()
    }
}

/// Removes a control waiter when the request it belongs to is abandoned.
struct Registered<'a> {
    control: &'a ControlChannel,
    request_id: &'a str,
}

impl Drop for Registered<'_> {
    fn drop(&mut self) {
        self.control.cancel(self.request_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    /// Spawn the configured worker and attach a session to it.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` — `config` is invalid.
    /// - `AppError::Transport` — the worker could not be spawned.
    pub fn connect(config: &SessionConfig, options: SessionOptions) -> Result<Self> {
        config.validate()?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let transport = LineTransport::connect(&config.spawn_config(), session_id)?;
        Ok(Self::from_transport(transport, options))
    }

    /// Attach a session to an existing transport.
    #[must_use]
    pub fn from_transport(transport: LineTransport, options: SessionOptions) -> Self {
        let shared = Arc::new(SessionShared {
            transport,
            buffer: OutputBuffer::new(options.buffer_capacity),
            control: ControlChannel::new(),
            permissions: PermissionEngine::new(options.policy, options.permission_handler),
            executor: options.external_executor,
            identity: OnceLock::new(),
            turn_active: AtomicBool::new(false),
            state: AtomicU8::new(SessionState::Uninitialized as u8),
        });

        Self {
            dispatcher: Mutex::new(Some(Dispatcher::new(Arc::clone(&shared)))),
            shared,
            pump: Mutex::new(None),
            external_tools: options.external_tools,
            conversation_id: options.conversation_id,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Identity announced by the worker, once initialized.
    #[must_use]
    pub fn identity(&self) -> Option<&SessionIdentity> {
        self.shared.identity.get()
    }

    /// Events evicted from the output buffer so far.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.shared.buffer.dropped()
    }

    /// Control requests still awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.control.outstanding()
    }

    /// Events currently waiting in the output buffer.
    #[must_use]
    pub fn buffered_events(&self) -> usize {
        self.shared.buffer.len()
    }

    /// Perform the initialize handshake.
    ///
    /// Control requests that arrive before the init envelope (tool approvals,
    /// external tool calls) are answered as usual while waiting.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionState` — not in `uninitialized`.
    /// - `AppError::SessionClosed` — the session is or became closed,
    ///   including a [`close`](Self::close) while waiting for the worker.
    /// - `AppError::Transport` — the worker exited or the write failed; the
    ///   session is closed.
    pub async fn initialize(&self) -> Result<InitOutcome> {
        if !self
            .shared
            .transition(SessionState::Uninitialized, SessionState::Initializing)
        {
            return Err(match self.state() {
                SessionState::Closed => AppError::SessionClosed("session closed".into()),
                other => AppError::SessionState(format!(
                    "initialize requires state uninitialized, found {other}"
                )),
            });
        }

        let Some(mut dispatcher) = lock(&self.dispatcher).take() else {
            return Err(AppError::SessionState("session already initialized".into()));
        };
        let session_id = self.shared.transport.session_id().to_owned();
        info!(session_id, "initializing session");

        let init_id = self.shared.control.next_request_id();
        let mut init_reply = self.shared.control.register(&init_id)?;
        if let Err(e) = self.shared.transport.write(&outbound::initialize(&init_id)).await {
            return Err(self.abandon_initialize(e));
        }

        if !self.external_tools.is_empty() {
            // Sent without a waiter; the response is dropped by the pump.
            let request_id = self.shared.control.next_request_id();
            let envelope = outbound::register_external_tools(&request_id, &self.external_tools);
            if let Err(e) = self.shared.transport.write(&envelope).await {
                return Err(self.abandon_initialize(e));
            }
        }

        let (identity, mut features) = loop {
            let Some(envelope) = self.shared.transport.read().await else {
                let closed = self.shared.transport.is_closed();
                dispatcher.finish();
                if closed {
                    return Err(AppError::SessionClosed("session closed during initialize".into()));
                }
                warn!(session_id, "worker exited during initialize");
                return Err(AppError::Transport("worker exited during initialize".into()));
            };
            if let Step::Init { identity, features } = dispatcher.handle(envelope).await {
                break (identity, features);
            }
        };

        // Flags from the initialize response, when it beat the init envelope.
        if let Some(Ok(response)) = init_reply.try_take() {
            for (name, on) in feature_flags(response.get("features")) {
                features.entry(name).or_insert(on);
            }
        }

        if !self
            .shared
            .transition(SessionState::Initializing, SessionState::Ready)
        {
            return Err(AppError::SessionClosed("session closed".into()));
        }

        *lock(&self.pump) = Some(tokio::spawn(run_pump(dispatcher)));
        info!(
            session_id,
            agent_id = %identity.agent_id,
            tools = identity.tool_names.len(),
            "session ready"
        );

        Ok(InitOutcome { identity, features })
    }

    /// Start a turn. Initializes first when needed; does not wait for output.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` — `message` is empty.
    /// - `AppError::SessionState` — initialization is in progress elsewhere.
    /// - `AppError::SessionClosed` — the session is closed.
    /// - any error from [`initialize`](Self::initialize) or the write.
    pub async fn send(&self, message: impl Into<UserMessage>) -> Result<()> {
        let message = message.into();
        if message.is_empty() {
            return Err(AppError::Protocol("user message is empty".into()));
        }

        match self.state() {
            SessionState::Uninitialized => {
                self.initialize().await?;
            }
            SessionState::Initializing => {
                return Err(AppError::SessionState(
                    "send while initializing".into(),
                ))
            }
            SessionState::Closed => return Err(AppError::SessionClosed("session closed".into())),
            SessionState::Ready => {}
        }

        self.shared.turn_active.store(true, Ordering::Release);
        let written = self
            .shared
            .transport
            .write(&outbound::user_message(&message))
            .await;
        if written.is_err() {
            self.shared.turn_active.store(false, Ordering::Release);
        }
        written
    }

    /// Pull events for the current turn.
    ///
    /// The stream ends after yielding a [`OutputEvent::Result`], or when the
    /// session closes. Dropping it leaves the session open; call again for the
    /// next turn.
    ///
    /// # Errors
    ///
    /// `AppError::SessionState` before initialization completed.
    pub fn stream(&self) -> Result<impl Stream<Item = OutputEvent> + Send + '_> {
        match self.state() {
            SessionState::Ready | SessionState::Closed => {}
            other => {
                return Err(AppError::SessionState(format!(
                    "stream requires an initialized session, found {other}"
                )))
            }
        }

        Ok(futures_util::stream::unfold(
            (&self.shared.buffer, false),
            |(buffer, finished)| async move {
                if finished {
                    return None;
                }
                let event = buffer.pop().await?;
                let terminal = event.is_terminal();
                Some((event, (buffer, terminal)))
            },
        ))
    }

    /// Ask the worker to stop the current turn. The turn still ends with a
    /// result event from the worker.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionState` — not ready.
    /// - `AppError::SessionClosed` — closed.
    /// - `AppError::Transport` — the write failed.
    pub async fn abort(&self) -> Result<()> {
        self.require_ready("abort")?;
        let request_id = self.shared.control.next_request_id();
        info!(session_id = %self.shared.transport.session_id(), request_id = %request_id, "interrupting turn");
        self.shared
            .transport
            .write(&outbound::interrupt(&request_id))
            .await
    }

    /// Fetch one page of conversation history.
    ///
    /// Safe to call while a stream is being consumed; the response never
    /// shows up as an output event.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionState` — not ready.
    /// - `AppError::SessionClosed` — closed before the response arrived.
    /// - `AppError::Control` — the worker answered with an error.
    /// - `AppError::Transport` — the request could not be written.
    pub async fn list_history(&self, query: HistoryQuery) -> Result<HistoryPage> {
        self.require_ready("list_history")?;

        let default_conversation = self.conversation_id.as_deref().or_else(|| {
            self.shared
                .identity
                .get()
                .and_then(|identity| identity.conversation_id.as_deref())
        });

        let request_id = self.shared.control.next_request_id();
        let waiter = self.shared.control.register(&request_id)?;
        // Forgets the waiter if this future is dropped or the write fails.
        let _registered = Registered {
            control: &self.shared.control,
            request_id: &request_id,
        };
        let envelope = outbound::list_messages(&request_id, &query, default_conversation);
        self.shared.transport.write(&envelope).await?;

        let response = waiter.wait().await?;
        Ok(HistoryPage::from_response(&response))
    }

    /// Close the session and wait for the worker to exit. Idempotent.
    pub async fn close(&self) {
        self.shutdown_now();
        self.shared.transport.close().await;
    }

    fn shutdown_now(&self) {
        self.shared.shutdown();
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
    }

    /// Shut down after a failed initialize write. A failure caused by a
    /// concurrent [`close`](Self::close) is reported as such.
    fn abandon_initialize(&self, err: AppError) -> AppError {
        let closed = self.shared.transport.is_closed();
        self.shared.shutdown();
        if closed {
            AppError::SessionClosed("session closed during initialize".into())
        } else {
            err
        }
    }

    fn require_ready(&self, operation: &str) -> Result<()> {
        match self.state() {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(AppError::SessionClosed("session closed".into())),
            other => Err(AppError::SessionState(format!(
                "{operation} requires state ready, found {other}"
            ))),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}
