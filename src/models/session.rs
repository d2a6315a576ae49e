//! Session state machine and identity.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Lifecycle state of a session.
///
/// States are strictly ordered; `Closed` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    /// Worker attached, no initialize request sent yet.
    Uninitialized = 0,
    /// Initialize request sent; waiting for the init envelope.
    Initializing = 1,
    /// Identity established; turns may be sent.
    Ready = 2,
    /// Terminal.
    Closed = 3,
}

impl SessionState {
    /// Determine whether a lifecycle transition is permitted.
    ///
    /// Any state may close; re-entering `Closed` is permitted so close stays
    /// idempotent.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Initializing)
                | (Self::Initializing, Self::Ready)
                | (_, Self::Closed)
        )
    }

    /// Decode from the `repr(u8)` discriminant.
    #[must_use]
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Uninitialized,
            1 => Self::Initializing,
            2 => Self::Ready,
            _ => Self::Closed,
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Identity announced by the worker's init envelope. Immutable once set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Agent the worker is driving.
    pub agent_id: String,
    /// Worker-side session identifier.
    pub session_id: String,
    /// Conversation the turns are appended to.
    pub conversation_id: Option<String>,
    /// Model handle, if reported.
    pub model: Option<String>,
    /// Names of the tools available to the agent.
    pub tool_names: Vec<String>,
}

/// Feature flags negotiated during initialize.
pub type FeatureFlags = BTreeMap<String, bool>;

/// Result of a successful [`Session::initialize`](crate::session::Session::initialize).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
    /// Identity from the init envelope.
    pub identity: SessionIdentity,
    /// Feature flags from the init envelope and the initialize response.
    pub features: FeatureFlags,
}
