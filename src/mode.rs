//! Permission mode — how much the session trusts the worker's tool calls.
//!
//! `PermissionMode` is used as the `--mode` CLI flag value and as the
//! `permissions.mode` config key. It feeds the permission decision engine.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Top-level permission mode for a session.
///
/// Defaults to [`PermissionMode::Default`], which defers every decision to
/// the host callback or the auto-allow list.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Ask the callback; fall back to the auto-allow list.
    #[default]
    Default,
    /// Edit tools are expected to be auto-allowed by the host; otherwise as `Default`.
    AcceptEdits,
    /// Planning mode; otherwise as `Default`.
    Plan,
    /// Allow every tool that does not require human input.
    BypassPermissions,
}

impl PermissionMode {
    /// Whether this mode auto-allows tools that do not need a human.
    #[must_use]
    pub fn is_bypass(self) -> bool {
        matches!(self, Self::BypassPermissions)
    }
}
