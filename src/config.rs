//! Session configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::mode::PermissionMode;
use crate::transport::spawner::{SpawnConfig, ALLOWED_ENV_VARS};
use crate::{AppError, Result};

/// Default capacity of the per-session output buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Worker process settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Worker binary (e.g., `letta`).
    pub command: String,
    /// Arguments passed to the worker verbatim.
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory the worker starts in; defaults to the current directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Variables inherited from the host environment.
    #[serde(default = "default_inherit_env")]
    pub inherit_env: Vec<String>,
    /// Variables set explicitly for the worker.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Grace period between SIGTERM and kill, and for draining stdout after exit.
    #[serde(default = "default_exit_grace_ms")]
    pub exit_grace_ms: u64,
}

fn default_inherit_env() -> Vec<String> {
    ALLOWED_ENV_VARS.iter().map(|&v| v.to_owned()).collect()
}

fn default_exit_grace_ms() -> u64 {
    2000
}

/// Per-session engine settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionSection {
    /// Output buffer capacity; overflow drops the oldest event.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Conversation used for history queries when none is given.
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            conversation_id: None,
        }
    }
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

/// Built-in permission policy settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PermissionSection {
    /// Permission mode.
    #[serde(default)]
    pub mode: PermissionMode,
    /// Tools allowed without asking when no callback decides.
    #[serde(default)]
    pub auto_allow: Vec<String>,
    /// Tools that always need a human in the loop.
    #[serde(default = "default_requires_human_input")]
    pub requires_human_input: Vec<String>,
}

impl Default for PermissionSection {
    fn default() -> Self {
        Self {
            mode: PermissionMode::default(),
            auto_allow: Vec::new(),
            requires_human_input: default_requires_human_input(),
        }
    }
}

fn default_requires_human_input() -> Vec<String> {
    ["AskUserQuestion", "EnterPlanMode", "ExitPlanMode"]
        .iter()
        .map(|&t| t.to_owned())
        .collect()
}

/// Top-level configuration parsed from a TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Worker process settings.
    pub worker: WorkerConfig,
    /// Engine settings.
    #[serde(default)]
    pub session: SessionSection,
    /// Permission policy.
    #[serde(default)]
    pub permissions: PermissionSection,
}

impl SessionConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the spawner settings for this configuration.
    #[must_use]
    pub fn spawn_config(&self) -> SpawnConfig {
        SpawnConfig {
            command: self.worker.command.clone(),
            args: self.worker.args.clone(),
            working_dir: self.worker.working_dir.clone(),
            inherit_env: self.worker.inherit_env.clone(),
            env: self.worker.env.clone(),
            exit_grace: Duration::from_millis(self.worker.exit_grace_ms),
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.worker.command.trim().is_empty() {
            return Err(AppError::Config("worker.command must not be empty".into()));
        }

        if self.session.buffer_capacity == 0 {
            return Err(AppError::Config(
                "session.buffer_capacity must be greater than zero".into(),
            ));
        }

        if let Some(tool) = self
            .permissions
            .auto_allow
            .iter()
            .find(|t| self.permissions.requires_human_input.contains(t))
        {
            return Err(AppError::Config(format!(
                "tool '{tool}' cannot be both auto-allowed and require human input"
            )));
        }

        Ok(())
    }
}
