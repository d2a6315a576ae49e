//! Host-executed ("external") tools.
//!
//! The host can register tools at initialize time. When the agent calls one,
//! the worker sends an `execute_external_tool` control request and the pump
//! routes it to the session's [`ExternalToolExecutor`]. Every request is
//! answered: executor errors and panics become `is_error` results.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::permission::engine::panic_message;
use crate::Result;

/// Tool definition announced to the worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalTool {
    /// Tool name as the agent sees it.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON schema of the tool input.
    pub parameters: Value,
}

/// One external tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalToolCall {
    /// Call identifier assigned by the worker.
    pub tool_call_id: String,
    /// Tool being invoked.
    pub tool_name: String,
    /// Tool input.
    pub input: Value,
}

/// Result returned to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalToolOutput {
    /// Text content of the result.
    pub text: String,
    /// Whether the tool failed.
    pub is_error: bool,
}

impl ExternalToolOutput {
    /// Successful result.
    #[must_use]
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    /// Failed result.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    /// Wire payload of the control response.
    #[must_use]
    pub fn to_wire(&self, tool_call_id: &str) -> Value {
        json!({
            "tool_call_id": tool_call_id,
            "content": [{ "type": "text", "text": self.text }],
            "is_error": self.is_error,
        })
    }
}

/// Host-supplied executor for external tools.
pub trait ExternalToolExecutor: Send + Sync {
    /// Run `call` and produce its output.
    ///
    /// # Errors
    ///
    /// Any error is reported to the worker as an `is_error` result.
    fn execute(
        &self,
        call: ExternalToolCall,
    ) -> Pin<Box<dyn Future<Output = Result<ExternalToolOutput>> + Send + '_>>;
}

/// Run `call` on `executor`, converting every failure into an error result.
pub async fn run_external_tool(
    executor: Option<&dyn ExternalToolExecutor>,
    call: ExternalToolCall,
) -> ExternalToolOutput {
    let Some(executor) = executor else {
        warn!(tool_name = %call.tool_name, "external tool requested but no executor registered");
        return ExternalToolOutput::error(format!(
            "no executor registered for external tool '{}'",
            call.tool_name
        ));
    };

    let tool_name = call.tool_name.clone();
    let pending = match std::panic::catch_unwind(AssertUnwindSafe(|| executor.execute(call))) {
        Ok(pending) => pending,
        Err(panic) => return ExternalToolOutput::error(panic_message(panic.as_ref())),
    };

    match AssertUnwindSafe(pending).catch_unwind().await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            warn!(tool_name = %tool_name, error = %err, "external tool failed");
            ExternalToolOutput::error(err.message())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(tool_name = %tool_name, error = %message, "external tool panicked");
            ExternalToolOutput::error(message)
        }
    }
}
