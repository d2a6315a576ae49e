//! Inbound dispatch.
//!
//! [`Dispatcher`] routes one classified envelope at a time: content goes to
//! the output buffer, control responses to their waiters, and worker-initiated
//! control requests to the permission engine or the external tool executor,
//! whose answers are written back before the next envelope is read.
//! `initialize` drives a dispatcher inline until the init envelope arrives;
//! afterwards [`run_pump`] owns it for the rest of the session.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::external::run_external_tool;
use crate::models::event::{OutputEvent, TurnResult};
use crate::models::session::{FeatureFlags, SessionIdentity};
use crate::protocol::classifier::{classify, ControlRequestKind, InboundEvent};
use crate::protocol::{outbound, Envelope};
use crate::session::reassembler::Reassembler;
use crate::session::SessionShared;

/// Error code of the synthetic result emitted when the worker dies mid-turn.
pub const WORKER_EXITED: &str = "worker_exited";

/// What the caller of [`Dispatcher::handle`] needs to know.
#[derive(Debug)]
pub(crate) enum Step {
    /// Keep reading.
    Continue,
    /// The first init envelope arrived.
    Init {
        identity: SessionIdentity,
        features: FeatureFlags,
    },
}

/// Sequential router for inbound envelopes.
pub(crate) struct Dispatcher {
    shared: Arc<SessionShared>,
    reassembler: Reassembler,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        Self {
            shared,
            reassembler: Reassembler::new(),
        }
    }

    fn session_id(&self) -> &str {
        self.shared.transport.session_id()
    }

    fn emit(&self, event: OutputEvent) {
        self.shared.buffer.push(event);
    }

    fn flush_tool_calls(&mut self) {
        for event in self.reassembler.finalize() {
            self.emit(OutputEvent::ToolCall(event));
        }
    }

    /// Route one envelope.
    pub(crate) async fn handle(&mut self, envelope: Envelope) -> Step {
        let event = classify(&envelope);

        // Pending tool calls are complete once other turn content shows up.
        if ends_tool_calls(&event) && self.reassembler.has_pending() {
            self.flush_tool_calls();
        }

        match event {
            InboundEvent::Init { identity, features } => {
                if self.shared.identity.set(identity.clone()).is_ok() {
                    return Step::Init { identity, features };
                }
                debug!(session_id = %self.session_id(), "worker re-announced identity");
                self.emit(OutputEvent::Init(identity));
            }
            InboundEvent::AssistantText { text, message_id } => {
                self.emit(OutputEvent::AssistantText { text, message_id });
            }
            InboundEvent::ReasoningText { text, message_id } => {
                self.emit(OutputEvent::ReasoningText { text, message_id });
            }
            InboundEvent::ToolCall {
                message_id,
                seq_id,
                fragments,
                needs_approval,
            } => {
                for fragment in &fragments {
                    if let Some(event) = self.reassembler.ingest(
                        message_id.as_deref(),
                        seq_id,
                        fragment,
                        needs_approval,
                    ) {
                        self.emit(OutputEvent::ToolCall(event));
                    }
                }
            }
            InboundEvent::ToolReturn {
                tool_call_id,
                content,
                is_error,
            } => {
                self.emit(OutputEvent::ToolResult {
                    tool_call_id,
                    content,
                    is_error,
                });
            }
            InboundEvent::StreamDelta { event } => self.emit(OutputEvent::StreamDelta { event }),
            InboundEvent::ControlRequest {
                request_id,
                request,
            } => self.answer_control_request(&request_id, request).await,
            InboundEvent::ControlResponse {
                request_id,
                outcome,
            } => {
                self.shared.control.resolve(&request_id, outcome);
            }
            InboundEvent::Result(result) => {
                for event in self.reassembler.reset() {
                    self.emit(OutputEvent::ToolCall(event));
                }
                self.shared.turn_active.store(false, Ordering::Release);
                debug!(
                    session_id = %self.session_id(),
                    success = result.success,
                    "turn finished"
                );
                self.emit(OutputEvent::Result(result));
            }
            InboundEvent::Error {
                message,
                run_id,
                stop_reason,
                detail,
            } => {
                warn!(session_id = %self.session_id(), error = %message, "worker reported error");
                self.emit(OutputEvent::Error {
                    message,
                    run_id,
                    stop_reason,
                    detail,
                });
            }
            InboundEvent::Retry {
                attempt,
                max_attempts,
                delay_ms,
                reason,
                run_id,
            } => self.emit(OutputEvent::Retry {
                attempt,
                max_attempts,
                delay_ms,
                reason,
                run_id,
            }),
            InboundEvent::Ignored { reason } => {
                debug!(session_id = %self.session_id(), reason = %reason, "ignoring envelope");
            }
        }

        Step::Continue
    }

    async fn answer_control_request(&self, request_id: &str, request: ControlRequestKind) {
        let reply = match request {
            ControlRequestKind::CanUseTool(permission) => {
                let decision = self.shared.permissions.decide(permission).await;
                outbound::control_success(request_id, decision.to_wire())
            }
            ControlRequestKind::ExecuteExternalTool(call) => {
                let tool_call_id = call.tool_call_id.clone();
                let output = run_external_tool(self.shared.executor.as_deref(), call).await;
                outbound::control_success(request_id, output.to_wire(&tool_call_id))
            }
            ControlRequestKind::Unsupported { subtype } => {
                debug!(request_id, subtype = %subtype, "unsupported control request");
                outbound::control_error(
                    request_id,
                    &format!("unsupported control request subtype '{subtype}'"),
                )
            }
        };

        if let Err(e) = self.shared.transport.write(&reply).await {
            warn!(
                session_id = %self.session_id(),
                request_id,
                error = %e,
                "failed to answer control request"
            );
        }
    }

    /// Wrap up after the transport ended.
    ///
    /// If a turn was in flight and the session was not closed on purpose, the
    /// consumer gets a synthetic error and unsuccessful result so its stream
    /// terminates like a normal turn.
    pub(crate) fn finish(mut self) {
        self.flush_tool_calls();

        let deliberate = self.shared.transport.is_closed();
        if !deliberate && self.shared.turn_active.swap(false, Ordering::AcqRel) {
            self.emit(OutputEvent::Error {
                message: "worker exited before the turn completed".into(),
                run_id: None,
                stop_reason: None,
                detail: None,
            });
            self.emit(OutputEvent::Result(TurnResult {
                success: false,
                text: None,
                error_code: Some(WORKER_EXITED.into()),
                duration_ms: None,
                conversation_id: None,
                stop_reason: None,
            }));
        }

        self.shared.shutdown();
    }
}

/// Whether `event` ends the current run of tool-call fragments.
fn ends_tool_calls(event: &InboundEvent) -> bool {
    !matches!(
        event,
        InboundEvent::ToolCall { .. }
            | InboundEvent::StreamDelta { .. }
            | InboundEvent::ControlResponse { .. }
            | InboundEvent::Retry { .. }
            | InboundEvent::Ignored { .. }
    )
}

/// Pump task: drain the transport until it ends, then shut the session down.
pub(crate) async fn run_pump(mut dispatcher: Dispatcher) {
    let session_id = dispatcher.session_id().to_owned();
    info!(session_id, "session pump started");

    while let Some(envelope) = dispatcher.shared.transport.read().await {
        dispatcher.handle(envelope).await;
    }

    info!(session_id, "transport ended, stopping session pump");
    dispatcher.finish();
}
