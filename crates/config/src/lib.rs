//! Configuration loading, validation, and management for HealthFlow.
//!
//! Loads configuration from `~/.healthflow/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use healthflow_core::{BackendChoice, FlowKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.healthflow/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Schema-constrained, tool-capable backend
    #[serde(default)]
    pub primary: PrimaryConfig,

    /// Freeform backend used when the caller selects it
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Generation-wide settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Built-in tool settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Durable follow-up job store
    #[serde(default)]
    pub store: StoreConfig,

    /// Follow-up worker settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Notification delivery
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Extra output policy rules, layered on top of each flow's built-in set
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PrimaryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_primary_url")]
    pub api_url: String,

    #[serde(default = "default_primary_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_primary_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_primary_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_temperature() -> f32 {
    0.4
}
fn default_max_tokens() -> u32 {
    2048
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_primary_url(),
            model: default_primary_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl std::fmt::Debug for PrimaryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_fallback_url")]
    pub api_url: String,

    #[serde(default = "default_fallback_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_fallback_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_fallback_model() -> String {
    "gpt-4o-mini".into()
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_fallback_url(),
            model: default_fallback_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl std::fmt::Debug for FallbackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Caller-side timeout; a late answer counts as backend unavailable
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Backend used when a request does not choose one
    #[serde(default)]
    pub default_backend: BackendChoice,

    /// Locale used when a request does not carry one
    #[serde(default = "default_locale")]
    pub default_locale: String,
}

fn default_timeout_secs() -> u64 {
    60
}
fn default_locale() -> String {
    "en".into()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            default_backend: BackendChoice::Primary,
            default_locale: default_locale(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Probability that the simulated scheduler rejects a booking
    #[serde(default = "default_booking_failure_rate")]
    pub booking_failure_rate: f64,

    /// JSON file with directory entries; the built-in sample is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_path: Option<String>,

    /// Maximum characters returned by `fetch_page`
    #[serde(default = "default_fetch_max_chars")]
    pub fetch_max_chars: usize,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_booking_failure_rate() -> f64 {
    0.2
}
fn default_fetch_max_chars() -> usize {
    4000
}
fn default_fetch_timeout_secs() -> u64 {
    10
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            booking_failure_rate: default_booking_failure_rate(),
            directory_path: None,
            fetch_max_chars: default_fetch_max_chars(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file for follow-up jobs; defaults to `~/.healthflow/jobs.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| AppConfig::config_dir().join("jobs.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum jobs claimed per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_poll_interval() -> u64 {
    30
}
fn default_batch_size() -> u32 {
    20
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Routine notifications are POSTed here when set; otherwise logged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    /// Emergency alerts go to a separate endpoint when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_webhook_url: Option<String>,

    /// HMAC-SHA256 key used to sign webhook bodies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
}

impl std::fmt::Debug for NotificationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationConfig")
            .field("webhook_url", &self.webhook_url)
            .field("alert_webhook_url", &self.alert_webhook_url)
            .field("webhook_secret", &redact(&self.webhook_secret))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// An extra policy rule from config.
///
/// `flow` is a flow name or `"*"`; the remaining keys are the rule itself
/// (`type = "list_cap"`, `field = ...`) and are parsed by the policy crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub flow: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(flatten)]
    pub rule: serde_json::Map<String, serde_json::Value>,
}

impl PolicyConfig {
    pub fn applies_to(&self, flow: FlowKind) -> bool {
        self.enabled && (self.flow == "*" || self.flow.parse::<FlowKind>().is_ok_and(|k| k == flow))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.healthflow/config.toml).
    ///
    /// Also checks environment variables:
    /// - `HEALTHFLOW_API_KEY`, then `GEMINI_API_KEY` for the primary backend
    /// - `HEALTHFLOW_FALLBACK_API_KEY`, then `OPENAI_API_KEY` for the fallback backend
    /// - `HEALTHFLOW_MODEL` overrides the primary model
    /// - `HEALTHFLOW_DEFAULT_BACKEND` overrides the default backend
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides using the given lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if self.primary.api_key.is_none() {
            self.primary.api_key = lookup("HEALTHFLOW_API_KEY").or_else(|| lookup("GEMINI_API_KEY"));
        }

        if self.fallback.api_key.is_none() {
            self.fallback.api_key =
                lookup("HEALTHFLOW_FALLBACK_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(model) = lookup("HEALTHFLOW_MODEL") {
            self.primary.model = model;
        }

        if let Some(backend) = lookup("HEALTHFLOW_DEFAULT_BACKEND") {
            self.generation.default_backend = backend
                .parse()
                .map_err(ConfigError::ValidationError)?;
        }

        Ok(())
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

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".healthflow")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, t) in [("primary", self.primary.temperature), ("fallback", self.fallback.temperature)] {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationError(format!(
                    "{name}.temperature must be between 0.0 and 2.0"
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.tools.booking_failure_rate) {
            return Err(ConfigError::ValidationError(
                "tools.booking_failure_rate must be between 0.0 and 1.0".into(),
            ));
        }

        if self.generation.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "generation.timeout_secs must be > 0".into(),
            ));
        }

        if self.scheduler.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.poll_interval_secs must be > 0".into(),
            ));
        }

        for policy in &self.policies {
            if policy.flow != "*" && policy.flow.parse::<FlowKind>().is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "policy targets unknown flow '{}'",
                    policy.flow
                )));
            }
            if !policy.rule.contains_key("type") {
                return Err(ConfigError::ValidationError(format!(
                    "policy for flow '{}' is missing a rule type",
                    policy.flow
                )));
            }
        }

        Ok(())
    }

    /// Check if the primary backend has credentials.
    pub fn has_primary_key(&self) -> bool {
        self.primary.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
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

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
