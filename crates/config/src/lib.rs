//! Configuration loading, validation, and management for Hearth.
//!
//! Loads configuration from `~/.hearth/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.hearth/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Reasoning engine settings
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    /// Context assembly bounds and scope heuristics
    #[serde(default)]
    pub context: ContextConfig,

    /// Device action retry and conflict settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Portfolio storage
    #[serde(default)]
    pub portfolio: PortfolioConfig,

    /// Known devices and their capabilities
    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceConfig>,

    /// Scheduled routines (cron prompts)
    #[serde(default)]
    pub routines: Vec<RoutineConfig>,

    /// Voice output settings
    #[serde(default)]
    pub voice: VoiceConfig,

    /// Runtime behaviour
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Engine kind; only "ollama" is built in
    #[serde(default = "default_engine")]
    pub engine: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Hard timeout per engine attempt
    #[serde(default = "default_reasoning_timeout_ms")]
    pub timeout_ms: u64,

    /// Total attempts before the engine is reported unavailable
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Persona prompt used ahead of the assembled context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Prompt card file (relative to `~/.hearth/cards/`) replacing `system_prompt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_card: Option<String>,
}

fn default_engine() -> String {
    "ollama".into()
}
fn default_base_url() -> String {
    "http://localhost:11434".into()
}
fn default_model() -> String {
    "gpt-oss:20b".into()
}
fn default_temperature() -> f32 {
    0.5
}
fn default_max_tokens() -> u32 {
    512
}
fn default_reasoning_timeout_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    3
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_ms: default_reasoning_timeout_ms(),
            max_attempts: default_max_attempts(),
            system_prompt: None,
            prompt_card: None,
        }
    }
}

impl ReasoningConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Maps keywords found in an utterance or schedule title to portfolio scopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeRule {
    pub keywords: Vec<String>,
    pub scopes: Vec<String>,
}

impl ScopeRule {
    fn new(keywords: &[&str], scopes: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// K: maximum recent events included
    #[serde(default = "default_recent_events")]
    pub recent_events: usize,

    /// W: how far back recent events may reach
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u64,

    /// Maximum portfolio entries included
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Token budget for the context sections
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Scopes included for every trigger
    #[serde(default = "default_always_scopes")]
    pub always_scopes: Vec<String>,

    #[serde(default = "default_scope_rules")]
    pub scope_rules: Vec<ScopeRule>,
}

fn default_recent_events() -> usize {
    8
}
fn default_window_minutes() -> u64 {
    30
}
fn default_max_entries() -> usize {
    24
}
fn default_token_budget() -> usize {
    1024
}
fn default_always_scopes() -> Vec<String> {
    vec!["presence".into(), "preference".into()]
}
fn default_scope_rules() -> Vec<ScopeRule> {
    vec![
        ScopeRule::new(&["bed", "sleep", "night", "tired", "wake", "morning"], &["routine"]),
        ScopeRule::new(&["light", "lights", "lamp", "dark", "bright"], &["device", "routine"]),
        ScopeRule::new(&["curtain", "curtains", "blind", "blinds"], &["device"]),
        ScopeRule::new(&["fan", "hot", "warm", "cold", "temperature"], &["device"]),
        ScopeRule::new(&["meeting", "calendar", "today", "tomorrow", "appointment"], &["schedule"]),
        ScopeRule::new(&["remember", "last", "again", "usual"], &["interaction", "routine"]),
    ]
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            recent_events: default_recent_events(),
            window_minutes: default_window_minutes(),
            max_entries: default_max_entries(),
            token_budget: default_token_budget(),
            always_scopes: default_always_scopes(),
            scope_rules: default_scope_rules(),
        }
    }
}

impl ContextConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.window_minutes as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Total dispatch attempts per action
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// How long the device layer has to acknowledge one attempt
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// First backoff delay; doubles on each retry
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// How long a lane waits for competing actions before dispatching
    #[serde(default = "default_settle_window_ms")]
    pub settle_window_ms: u64,

    /// Refuse non-user "lights off" while someone is home
    #[serde(default = "default_true")]
    pub presence_guard: bool,
}

fn default_ack_timeout_ms() -> u64 {
    2_000
}
fn default_backoff_base_ms() -> u64 {
    200
}
fn default_backoff_max_ms() -> u64 {
    5_000
}
fn default_settle_window_ms() -> u64 {
    50
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            ack_timeout_ms: default_ack_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            settle_window_ms: default_settle_window_ms(),
            presence_guard: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfig {
    /// "memory" or "file"
    #[serde(default = "default_portfolio_backend")]
    pub backend: String,

    /// Journal path for the file backend (default `~/.hearth/portfolio.jsonl`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Writes below this confidence that replace a more trusted value get flagged
    #[serde(default = "default_low_trust_threshold")]
    pub low_trust_threshold: f32,

    /// Repetitions at the same hour before a habit becomes a routine
    #[serde(default = "default_habit_threshold")]
    pub habit_threshold: u32,
}

fn default_portfolio_backend() -> String {
    "file".into()
}
fn default_low_trust_threshold() -> f32 {
    0.5
}
fn default_habit_threshold() -> u32 {
    3
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            backend: default_portfolio_backend(),
            path: None,
            low_trust_threshold: default_low_trust_threshold(),
            habit_threshold: default_habit_threshold(),
        }
    }
}

impl PortfolioConfig {
    pub fn journal_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => PathBuf::from(p),
            None => AppConfig::config_dir().join("portfolio.jsonl"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    pub name: String,
    /// Allowed target states; empty means any value is accepted
    #[serde(default)]
    pub states: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// "light", "curtain", "fan", ...
    pub kind: String,

    #[serde(default)]
    pub aliases: Vec<String>,

    #[serde(default)]
    pub capabilities: Vec<CapabilityConfig>,
}

fn capability(name: &str, states: &[&str]) -> CapabilityConfig {
    CapabilityConfig {
        name: name.into(),
        states: states.iter().map(|s| s.to_string()).collect(),
    }
}

fn default_devices() -> Vec<DeviceConfig> {
    vec![
        DeviceConfig {
            id: "living-room-light".into(),
            name: "Living room light".into(),
            kind: "light".into(),
            aliases: vec!["lights".into(), "light".into(), "living room light".into()],
            capabilities: vec![
                capability("power", &["on", "off"]),
                capability("brightness", &["low", "medium", "high"]),
            ],
        },
        DeviceConfig {
            id: "bedroom-light".into(),
            name: "Bedroom light".into(),
            kind: "light".into(),
            aliases: vec!["bedroom lights".into(), "bedroom light".into()],
            capabilities: vec![capability("power", &["on", "off"])],
        },
        DeviceConfig {
            id: "living-room-curtains".into(),
            name: "Living room curtains".into(),
            kind: "curtain".into(),
            aliases: vec!["curtains".into(), "blinds".into()],
            capabilities: vec![capability("position", &["open", "closed"])],
        },
        DeviceConfig {
            id: "ceiling-fan".into(),
            name: "Ceiling fan".into(),
            kind: "fan".into(),
            aliases: vec!["fan".into()],
            capabilities: vec![
                capability("power", &["on", "off"]),
                capability("speed", &["low", "medium", "high"]),
            ],
        },
    ]
}

/// Configuration for a scheduled routine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutineConfig {
    /// Unique name for this routine
    pub name: String,

    /// Cron expression (5-field: minute hour dom month dow)
    pub schedule: String,

    /// Instruction handed to reasoning when the routine fires
    pub prompt: String,

    /// Whether this routine is enabled (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Speak replies through the synthesizer
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Utterances that cancel in-flight work
    #[serde(default = "default_stop_phrases")]
    pub stop_phrases: Vec<String>,
}

fn default_stop_phrases() -> Vec<String> {
    vec!["stop".into(), "cancel".into(), "never mind".into(), "nevermind".into()]
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stop_phrases: default_stop_phrases(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Run reasoning for presence changes too
    #[serde(default)]
    pub react_to_presence: bool,

    /// Capacity of the diagnostic broadcast channel
    #[serde(default = "default_diagnostics_capacity")]
    pub diagnostics_capacity: usize,
}

fn default_diagnostics_capacity() -> usize {
    256
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            react_to_presence: false,
            diagnostics_capacity: default_diagnostics_capacity(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.hearth/config.toml).
    ///
    /// Environment overrides:
    /// - `HEARTH_MODEL`
    /// - `HEARTH_OLLAMA_URL`, then `OLLAMA_HOST`
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;

        if let Ok(model) = std::env::var("HEARTH_MODEL") {
            config.reasoning.model = model;
        }

        if let Some(url) = std::env::var("HEARTH_OLLAMA_URL")
            .ok()
            .or_else(|| std::env::var("OLLAMA_HOST").ok())
        {
            config.reasoning.base_url = url;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate and write this configuration to the default path.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Validate and write this configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let write_error = |reason: String| ConfigError::WriteError {
            path: path.to_path_buf(),
            reason,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| write_error(e.to_string()))?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| write_error(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| write_error(e.to_string()))?;
        tracing::debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".hearth")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Resolve the persona prompt: prompt card file, then inline prompt.
    pub fn system_prompt(&self) -> Result<Option<String>, ConfigError> {
        let Some(card) = &self.reasoning.prompt_card else {
            return Ok(self.reasoning.system_prompt.clone());
        };

        let path = {
            let p = PathBuf::from(card);
            if p.is_absolute() {
                p
            } else {
                Self::config_dir().join("cards").join(p)
            }
        };

        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "Loaded prompt card");
        Ok(Some(content))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.reasoning.temperature) {
            return Err(ConfigError::ValidationError(
                "reasoning.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.reasoning.max_attempts == 0 || self.orchestrator.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_attempts must be at least 1".into(),
            ));
        }

        if self.reasoning.timeout_ms == 0 || self.orchestrator.ack_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "reasoning.timeout_ms and orchestrator.ack_timeout_ms must be > 0".into(),
            ));
        }

        if self.runtime.diagnostics_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.diagnostics_capacity must be > 0".into(),
            ));
        }

        if self.context.token_budget == 0 {
            return Err(ConfigError::ValidationError(
                "context.token_budget must be > 0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.portfolio.low_trust_threshold) {
            return Err(ConfigError::ValidationError(
                "portfolio.low_trust_threshold must be between 0.0 and 1.0".into(),
            ));
        }

        if !matches!(self.portfolio.backend.as_str(), "memory" | "file") {
            return Err(ConfigError::ValidationError(format!(
                "unknown portfolio backend '{}'",
                self.portfolio.backend
            )));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                return Err(ConfigError::ValidationError("device id must not be empty".into()));
            }
            if !seen.insert(device.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate device id '{}'",
                    device.id
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            reasoning: ReasoningConfig::default(),
            context: ContextConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            portfolio: PortfolioConfig::default(),
            devices: default_devices(),
            routines: vec![],
            voice: VoiceConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Failed to write config file at {path}: {reason}")]
    WriteError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
