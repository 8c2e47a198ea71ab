//! Global configuration parsing, validation, and credential loading.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::models::stage::AgentKind;
use crate::{AppError, Result};

/// Upper bound on clarification questions an agent may be allowed per stage.
pub const MAX_CLARIFICATIONS: u32 = 10;

/// Deadlines (seconds) applied to stage execution; 0 means no deadline.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Wall-clock limit for one stage's agent computation, including any
    /// clarification round-trips.
    #[serde(default)]
    pub stage_seconds: u64,
    /// Limit on waiting for a single clarification reply.
    #[serde(default)]
    pub clarification_seconds: u64,
}

impl TimeoutConfig {
    /// Stage deadline, if configured.
    #[must_use]
    pub fn stage(&self) -> Option<Duration> {
        (self.stage_seconds > 0).then(|| Duration::from_secs(self.stage_seconds))
    }

    /// Clarification reply deadline, if configured.
    #[must_use]
    pub fn clarification(&self) -> Option<Duration> {
        (self.clarification_seconds > 0).then(|| Duration::from_secs(self.clarification_seconds))
    }
}

/// OpenAI-compatible text-generation backend settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LlmConfig {
    /// Base URL of the chat-completions API (e.g. `https://api.openai.com/v1`).
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Default model used by every agent without an override.
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// API key (populated at runtime from `LLM_API_KEY`).
    #[serde(skip)]
    pub api_key: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: String::new(),
        }
    }
}

/// Per-agent overrides.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Model override for this agent.
    pub model: Option<String>,
    /// Number of clarification questions the agent may ask.
    #[serde(default = "default_clarifications")]
    pub clarifications: u32,
}

fn default_clarifications() -> u32 {
    2
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}

fn default_http_host() -> String {
    "127.0.0.1".into()
}

fn default_http_port() -> u16 {
    8000
}

fn default_task() -> String {
    "task".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Root directory holding one sub-directory per task document.
    pub task_dir: PathBuf,
    /// Task name used when a connection does not specify one.
    #[serde(default = "default_task")]
    pub default_task: String,
    /// Interface the HTTP server binds to.
    #[serde(default = "default_http_host")]
    pub http_host: String,
    /// HTTP port for the WebSocket endpoints.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Stage deadlines.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Text-generation backend.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Per-agent settings keyed by agent name (e.g. `feasibility_check`).
    #[serde(default)]
    pub stages: HashMap<String, AgentConfig>,
}

impl GlobalConfig {
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

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the backend API key from the `LLM_API_KEY` environment variable.
    ///
    /// A missing key is not fatal: sessions fail at the first agent call
    /// instead, which keeps `/health` usable without credentials.
    pub fn load_credentials(&mut self) {
        match env::var("LLM_API_KEY") {
            Ok(value) if !value.is_empty() => self.llm.api_key = value,
            Ok(_) => warn!("LLM_API_KEY is empty"),
            Err(_) => warn!("LLM_API_KEY not set; agent calls will be rejected"),
        }
    }

    /// Settings for one agent, falling back to defaults.
    #[must_use]
    pub fn agent(&self, kind: AgentKind) -> AgentConfig {
        self.stages
            .get(kind.config_key())
            .cloned()
            .unwrap_or_else(|| AgentConfig {
                model: None,
                clarifications: default_clarifications(),
            })
    }

    /// Model name for an agent.
    #[must_use]
    pub fn model_for(&self, kind: AgentKind) -> String {
        self.agent(kind).model.unwrap_or_else(|| self.llm.model.clone())
    }

    fn validate(&mut self) -> Result<()> {
        if self.http_host.trim().is_empty() {
            return Err(AppError::Config("http_host must not be empty".into()));
        }

        if self.default_task.trim().is_empty() {
            return Err(AppError::Config("default_task must not be empty".into()));
        }

        for (name, agent) in &self.stages {
            if AgentKind::from_config_key(name).is_none() {
                return Err(AppError::Config(format!("unknown stage agent '{name}'")));
            }
            if agent.clarifications > MAX_CLARIFICATIONS {
                return Err(AppError::Config(format!(
                    "stages.{name}.clarifications must be at most {MAX_CLARIFICATIONS}"
                )));
            }
        }

        let canonical_root = self
            .task_dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("task_dir invalid: {err}")))?;
        self.task_dir = canonical_root;

        Ok(())
    }
}
