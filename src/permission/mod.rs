//! Tool permission decisions.
//!
//! The worker asks the host before running a tool (`can_use_tool` control
//! requests). The [`PermissionHandler`] trait is the host-supplied callback;
//! [`engine::PermissionEngine`] applies the built-in policy around it and
//! always produces an answer.

pub mod engine;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::Result;

/// Decision for one tool-approval request.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionDecision {
    /// Run the tool, optionally with rewritten input or permissions.
    Allow {
        /// Replacement tool input.
        updated_input: Option<Value>,
        /// Permission updates to persist on the worker side.
        updated_permissions: Option<Value>,
    },
    /// Refuse the tool.
    Deny {
        /// Reason surfaced to the agent.
        message: String,
    },
}

impl PermissionDecision {
    /// Plain allow.
    #[must_use]
    pub fn allow() -> Self {
        Self::Allow {
            updated_input: None,
            updated_permissions: None,
        }
    }

    /// Allow with a rewritten input.
    #[must_use]
    pub fn allow_with_input(input: Value) -> Self {
        Self::Allow {
            updated_input: Some(input),
            updated_permissions: None,
        }
    }

    /// Deny with a reason.
    #[must_use]
    pub fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
        }
    }

    /// Whether the tool may run.
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    /// Wire payload of the control response.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Allow {
                updated_input,
                updated_permissions,
            } => {
                let mut body = Map::new();
                body.insert("behavior".into(), json!("allow"));
                if let Some(input) = updated_input {
                    body.insert("updatedInput".into(), input.clone());
                }
                if let Some(perms) = updated_permissions {
                    body.insert("updatedPermissions".into(), perms.clone());
                }
                Value::Object(body)
            }
            Self::Deny { message } => json!({ "behavior": "deny", "message": message }),
        }
    }
}

/// A tool-approval request as seen by the host callback.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    /// Tool the agent wants to run.
    pub tool_name: String,
    /// Proposed tool input.
    pub input: Value,
    /// Call being approved, when the worker reports it.
    pub tool_call_id: Option<String>,
}

/// Host-supplied permission callback.
///
/// Invoked from within the session pump; wire reads pause until it returns,
/// so implementations should answer promptly. An `Err` (or a panic) is
/// converted into a deny carrying the error text.
pub trait PermissionHandler: Send + Sync {
    /// Decide whether the tool in `request` may run.
    ///
    /// # Errors
    ///
    /// Any error is reported to the worker as a deny.
    fn decide(
        &self,
        request: PermissionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<PermissionDecision>> + Send + '_>>;
}

/// Adapter turning a synchronous closure into a [`PermissionHandler`].
pub struct FnPermissionHandler<F>(F);

impl<F> PermissionHandler for FnPermissionHandler<F>
where
    F: Fn(&PermissionRequest) -> Result<PermissionDecision> + Send + Sync,
{
    fn decide(
        &self,
        request: PermissionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<PermissionDecision>> + Send + '_>> {
        Box::pin(async move { (self.0)(&request) })
    }
}

/// Wrap a closure as a shareable permission callback.
#[must_use]
pub fn permission_fn<F>(f: F) -> Arc<dyn PermissionHandler>
where
    F: Fn(&PermissionRequest) -> Result<PermissionDecision> + Send + Sync + 'static,
{
    Arc::new(FnPermissionHandler(f))
}
