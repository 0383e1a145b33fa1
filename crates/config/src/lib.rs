//! Configuration loading and validation for Chatbox.
//!
//! Loads configuration from `~/.chatbox/config.toml` with environment
//! variable overrides. Every threshold the budget logic uses lives here
//! with a documented default — none are scattered through the pipeline
//! as literals.

use chatbox_core::inference::GenerationParams;
use chatbox_core::prompt::MarkupFamily;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The root configuration structure.
///
/// Maps directly to `~/.chatbox/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Model and decoding settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Context-window budget policy and thresholds
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Condenser settings
    #[serde(default)]
    pub condenser: CondenserConfig,

    /// Validation-gate settings
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Persistence settings
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted length of a request body's `request` field.
    #[serde(default = "default_max_request_chars")]
    pub max_request_chars: usize,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}
fn default_max_request_chars() -> usize {
    500
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_request_chars: default_max_request_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Preset alias (e.g. "llama3:1b") or path to a local GGUF file.
    #[serde(default = "default_model")]
    pub model: String,

    /// Prompt markup family the model expects.
    #[serde(default = "default_markup")]
    pub markup: MarkupFamily,

    /// Fixed system instruction prepended to every chat prompt.
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,

    /// Decoding parameters for chat generation.
    #[serde(default)]
    pub decoding: GenerationParams,
}

fn default_model() -> String {
    "llama3:1b".into()
}
fn default_markup() -> MarkupFamily {
    MarkupFamily::Llama3
}
fn default_system_instruction() -> String {
    "You are a friendly AI Assistant. Your responses must be helpful, \
     informative, and concise. You can perform various tasks such as: \
     answering questions, translation, summarization. You are incapable of: \
     making phone calls, sending emails, or accessing personal information, \
     user data, real-time information or current events. Aim to convey a \
     friendly, helpful, and informative tone. Be approachable, engaging, \
     and professional. Keep the answer under 40 words and 2 sentences."
        .into()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            markup: default_markup(),
            system_instruction: default_system_instruction(),
            decoding: GenerationParams::default(),
        }
    }
}

/// Which budget-enforcement strategy the pipeline applies.
///
/// The two observed strategies implement the same contract — "keep the
/// assembled prompt under budget" — and are a configuration choice, never
/// hybridized within one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPolicy {
    /// Model-driven condensation of over-budget inputs and outputs.
    Condense,
    /// Greedy word-count truncation: drop the oldest history block while
    /// the assembled prompt exceeds `truncate_word_ceiling`.
    Truncate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_policy")]
    pub policy: BudgetPolicy,

    /// Condense the user turn when its rendered cost is strictly greater
    /// than this. Calibrated against the tokenizer estimator.
    #[serde(default = "default_input_threshold")]
    pub input_threshold: usize,

    /// Condense the response when its cost is strictly greater than this.
    #[serde(default = "default_output_threshold")]
    pub output_threshold: usize,

    /// Word ceiling for the whole assembled prompt under the truncate
    /// policy.
    #[serde(default = "default_word_ceiling")]
    pub truncate_word_ceiling: usize,

    /// How many recent turns to replay as context.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Cost strategy: "tokenizer" (exact) or "words" (approximation).
    #[serde(default = "default_estimator")]
    pub estimator: String,

    /// Abort a generation call after this many seconds. 0 disables the
    /// timeout.
    #[serde(default)]
    pub request_timeout_secs: u64,
}

fn default_policy() -> BudgetPolicy {
    BudgetPolicy::Condense
}
fn default_input_threshold() -> usize {
    64
}
fn default_output_threshold() -> usize {
    32
}
fn default_word_ceiling() -> usize {
    300
}
fn default_history_limit() -> usize {
    5
}
fn default_estimator() -> String {
    "tokenizer".into()
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            input_threshold: default_input_threshold(),
            output_threshold: default_output_threshold(),
            truncate_word_ceiling: default_word_ceiling(),
            history_limit: default_history_limit(),
            estimator: default_estimator(),
            request_timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CondenserConfig {
    /// Target length of condensed text, in words.
    #[serde(default = "default_condense_word_limit")]
    pub word_limit: usize,

    /// Decoding temperature for condensation calls.
    #[serde(default = "default_aux_temperature")]
    pub temperature: f32,
}

fn default_condense_word_limit() -> usize {
    150
}
fn default_aux_temperature() -> f32 {
    0.1
}

impl Default for CondenserConfig {
    fn default() -> Self {
        Self {
            word_limit: default_condense_word_limit(),
            temperature: default_aux_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Gate chat responses through the topical validator.
    #[serde(default)]
    pub enabled: bool,

    /// The topic domain the validator accepts.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Decoding temperature for validation calls.
    #[serde(default = "default_aux_temperature")]
    pub temperature: f32,
}

fn default_topic() -> String {
    "IoT DIY projects".into()
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topic: default_topic(),
            temperature: default_aux_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection string. The table is created if absent at start.
    #[serde(default = "default_database_url")]
    pub url: String,
}

fn default_database_url() -> String {
    "sqlite://chatbox.db".into()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            model: ModelConfig::default(),
            budget: BudgetConfig::default(),
            condenser: CondenserConfig::default(),
            validation: ValidationConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl AppConfig {
    /// Load configuration from the default path (~/.chatbox/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `CHATBOX_MODEL` — model alias or GGUF path
    /// - `CHATBOX_DATABASE_URL` — SQLite connection string
    /// - `CHATBOX_PORT` — server port
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(model) = std::env::var("CHATBOX_MODEL") {
            config.model.model = model;
        }
        if let Ok(url) = std::env::var("CHATBOX_DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(port) = std::env::var("CHATBOX_PORT") {
            config.server.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("CHATBOX_PORT is not a port number: {port}"))
            })?;
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

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatbox")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.model.decoding.temperature;
        if !(0.0..=2.0).contains(&t) {
            return Err(ConfigError::ValidationError(
                "model.decoding.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.budget.history_limit == 0 {
            return Err(ConfigError::ValidationError(
                "budget.history_limit must be at least 1".into(),
            ));
        }

        match self.budget.estimator.as_str() {
            "tokenizer" | "words" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "budget.estimator must be \"tokenizer\" or \"words\", got \"{other}\""
                )));
            }
        }

        if self.budget.policy == BudgetPolicy::Truncate && self.budget.truncate_word_ceiling == 0 {
            return Err(ConfigError::ValidationError(
                "budget.truncate_word_ceiling must be positive under the truncate policy".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for first-run setup).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
