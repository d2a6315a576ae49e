//! Permission decision engine.
//!
//! Combines the session's [`PermissionMode`], the per-tool policy sets, and
//! the optional host callback into one decision. Evaluation order:
//!
//! 1. Tool requires human input and no callback is registered → deny.
//! 2. Bypass mode and the tool does not require human input → allow.
//! 3. A callback is registered → its decision, verbatim (errors become deny).
//! 4. Tool is in the auto-allow set → allow.
//! 5. Otherwise → deny.
//!
//! Rule 1 precedes rule 2, so a tool that needs a human is never
//! auto-allowed by bypass mode.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{info, info_span, warn, Instrument};

use crate::config::PermissionSection;
use crate::mode::PermissionMode;
use crate::permission::{PermissionDecision, PermissionHandler, PermissionRequest};

/// Deny message used when nothing could approve the tool.
pub const NO_CALLBACK_MESSAGE: &str = "no callback registered";

/// Outcome of the static part of the policy table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyVerdict {
    /// Allow without consulting anyone.
    Allow,
    /// Deny with the given message.
    Deny(String),
    /// Ask the host callback.
    AskCallback,
}

/// Evaluate the ordered policy rules.
///
/// Pure: the callback itself is not invoked, only whether one exists.
#[must_use]
pub fn evaluate(
    requires_human_input: bool,
    mode: PermissionMode,
    has_callback: bool,
    auto_allowed: bool,
) -> PolicyVerdict {
    if requires_human_input && !has_callback {
        return PolicyVerdict::Deny(NO_CALLBACK_MESSAGE.to_owned());
    }
    if mode.is_bypass() && !requires_human_input {
        return PolicyVerdict::Allow;
    }
    if has_callback {
        return PolicyVerdict::AskCallback;
    }
    if auto_allowed {
        return PolicyVerdict::Allow;
    }
    PolicyVerdict::Deny(NO_CALLBACK_MESSAGE.to_owned())
}

/// Static per-session permission policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionPolicy {
    /// Permission mode.
    pub mode: PermissionMode,
    /// Tools allowed when no callback decides.
    pub auto_allow: HashSet<String>,
    /// Tools that always need a human.
    pub requires_human_input: HashSet<String>,
}

impl PermissionPolicy {
    /// Build from the `[permissions]` config section.
    #[must_use]
    pub fn from_section(section: &PermissionSection) -> Self {
        Self {
            mode: section.mode,
            auto_allow: section.auto_allow.iter().cloned().collect(),
            requires_human_input: section.requires_human_input.iter().cloned().collect(),
        }
    }

    /// Whether `tool_name` needs a human in the loop.
    #[must_use]
    pub fn requires_human_input(&self, tool_name: &str) -> bool {
        self.requires_human_input.contains(tool_name)
    }

    /// Whether `tool_name` is in the auto-allow set.
    #[must_use]
    pub fn is_auto_allowed(&self, tool_name: &str) -> bool {
        self.auto_allow.contains(tool_name)
    }
}

/// Policy plus optional callback; answers every tool-approval request.
#[derive(Clone)]
pub struct PermissionEngine {
    policy: PermissionPolicy,
    handler: Option<Arc<dyn PermissionHandler>>,
}

impl std::fmt::Debug for PermissionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionEngine")
            .field("policy", &self.policy)
            .field("has_callback", &self.handler.is_some())
            .finish()
    }
}

impl PermissionEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(policy: PermissionPolicy, handler: Option<Arc<dyn PermissionHandler>>) -> Self {
        Self { policy, handler }
    }

    /// The static policy.
    #[must_use]
    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    /// Static verdict for `tool_name`.
    #[must_use]
    pub fn verdict(&self, tool_name: &str) -> PolicyVerdict {
        evaluate(
            self.policy.requires_human_input(tool_name),
            self.policy.mode,
            self.handler.is_some(),
            self.policy.is_auto_allowed(tool_name),
        )
    }

    /// Decide `request`. Never fails: callback errors and panics become deny.
    pub async fn decide(&self, request: PermissionRequest) -> PermissionDecision {
        let span = info_span!("permission_evaluate", tool_name = %request.tool_name);
        self.decide_inner(request).instrument(span).await
    }

    async fn decide_inner(&self, request: PermissionRequest) -> PermissionDecision {
        match self.verdict(&request.tool_name) {
            PolicyVerdict::Allow => {
                info!(mode = ?self.policy.mode, "tool allowed by policy");
                PermissionDecision::allow()
            }
            PolicyVerdict::Deny(message) => {
                info!(reason = %message, "tool denied by policy");
                PermissionDecision::deny(message)
            }
            PolicyVerdict::AskCallback => {
                let Some(handler) = self.handler.as_ref() else {
                    return PermissionDecision::deny(NO_CALLBACK_MESSAGE);
                };
                let pending =
                    match std::panic::catch_unwind(AssertUnwindSafe(|| handler.decide(request))) {
                        Ok(pending) => pending,
                        Err(panic) => return denied_by_panic(panic.as_ref()),
                    };
                match AssertUnwindSafe(pending).catch_unwind().await {
                    Ok(Ok(decision)) => {
                        info!(allowed = decision.is_allow(), "tool decided by callback");
                        decision
                    }
                    Ok(Err(err)) => {
                        warn!(error = %err, "permission callback failed, denying");
                        PermissionDecision::deny(err.message())
                    }
                    Err(panic) => denied_by_panic(panic.as_ref()),
                }
            }
        }
    }
}

fn denied_by_panic(payload: &(dyn Any + Send)) -> PermissionDecision {
    let message = panic_message(payload);
    warn!(error = %message, "permission callback panicked, denying");
    PermissionDecision::deny(message)
}

/// Extract a panic payload's message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "callback panicked".to_owned())
}
