//! Configuration loading. These are the read-only settings the pipeline runs with.
//!
//! Layers, lowest to highest priority:
//! 1. Built-in defaults
//! 2. Config file (`$XDG_CONFIG_HOME/chisel/config.toml` or `--config`)
//! 3. `CHISEL_API_KEY` environment variable (credential only)
//! 4. CLI flags (applied by `main.rs`)
//!
//! The daemon never writes configuration back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Environment variable that overrides `provider.api_key`.
pub const API_KEY_ENV: &str = "CHISEL_API_KEY";

/// Commented default configuration, printed by `chisel config`.
pub const DEFAULT_CONFIG: &str = r#"# Chisel configuration
#
# Location: ~/.config/chisel/config.toml
# Every key is optional; omitted keys use the values shown here.

[hotkey]
# Global shortcut that starts a rephrase of the current selection.
# Modifiers: Shift, Ctrl/Control, Alt, Super. Keys: A-Z, 0-9, F1-F12, named keys.
# The "<ctrl>+<shift>+r" spelling is accepted too.
binding = "Ctrl+Shift+R"

[provider]
# "gemini" or "openrouter"
kind = "gemini"
# Model id; defaults to gemini-2.5-flash / openai/gpt-oss-20b:free
# model = "gemini-2.5-flash"
# Credential. Prefer the CHISEL_API_KEY environment variable.
# api_key = ""
# Override the API base URL (self-hosted gateways, proxies)
# base_url = "https://generativelanguage.googleapis.com"
request_timeout_secs = 30
# Attempts per run; only timeouts and 5xx responses are retried
max_attempts = 2
retry_delay_ms = 500

[transform]
# Instruction sent ahead of the selected text. Use {text} to place the
# selection explicitly; otherwise it is appended after the prompt.
prompt = "Rephrase this text to be more professional and clear:"
temperature = 0.7
# Nucleus sampling; 0 leaves it out of the request
top_p = 0.8
max_output_tokens = 8192
# Selections longer than this (in characters) are refused without a request
max_text_length = 5000

[capture]
# Clipboard polls after the synthetic copy, spaced base_delay_ms * attempt
max_attempts = 3
base_delay_ms = 100
# Empty the clipboard before copying so re-copying identical text is detected
clear_before_copy = true

[processor]
# Bound on the whole transform stage, retries included
transform_timeout_secs = 30
# Hard limit for one run; exceeding it cancels the run and restores the clipboard
run_timeout_secs = 90

[notifications]
enabled = true
# Failures are always shown while notifications are enabled
on_success = true
"#;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Transformation backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Gemini `generateContent`
    #[default]
    Gemini,
    /// OpenRouter (OpenAI-compatible chat completions)
    #[value(name = "openrouter")]
    OpenRouter,
}

impl ProviderKind {
    pub fn id(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenRouter => "openrouter",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-2.5-flash",
            ProviderKind::OpenRouter => "openai/gpt-oss-20b:free",
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hotkey: HotkeyConfig,
    pub provider: ProviderConfig,
    pub transform: TransformConfig,
    pub capture: CaptureConfig,
    pub processor: ProcessorConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    /// Key combination, e.g. "Ctrl+Shift+R".
    pub binding: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            binding: "Ctrl+Shift+R".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Model id; `None` picks the backend default.
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            model: None,
            api_key: None,
            base_url: None,
            request_timeout_secs: 30,
            max_attempts: 2,
            retry_delay_ms: 500,
        }
    }
}

impl ProviderConfig {
    /// Configured model, or the backend's default.
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.kind.default_model())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub prompt: String,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_output_tokens: u32,
    pub max_text_length: usize,
}

impl TransformConfig {
    /// `top_p` as sent to the provider. Zero means "let the provider decide".
    pub fn top_p(&self) -> Option<f32> {
        self.top_p.filter(|p| *p > 0.0)
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            prompt: "Rephrase this text to be more professional and clear:".to_string(),
            temperature: 0.7,
            top_p: Some(0.8),
            max_output_tokens: 8192,
            max_text_length: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub clear_before_copy: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            clear_before_copy: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub transform_timeout_secs: u64,
    pub run_timeout_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            transform_timeout_secs: 30,
            run_timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub on_success: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            on_success: true,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or the default location.
    ///
    /// An explicit path must exist; a missing default file yields the
    /// built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.to_path_buf()));
                }
                Self::from_file(p)?
            }
            None => match default_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => {
                    tracing::info!("no config file found, using defaults");
                    Self::default()
                }
            },
        };

        if let Ok(key) = std::env::var(API_KEY_ENV)
            && !key.trim().is_empty()
        {
            tracing::debug!("api key taken from {API_KEY_ENV}");
            config.provider.api_key = Some(key);
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Check value ranges. Called by `load`, and again after CLI overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.transform;
        if !(0.0..=1.0).contains(&t.temperature) {
            return Err(invalid(format!(
                "transform.temperature must be within 0.0..=1.0, got {}",
                t.temperature
            )));
        }
        if let Some(top_p) = t.top_p
            && !(0.0..=1.0).contains(&top_p)
        {
            return Err(invalid(format!(
                "transform.top_p must be within 0.0..=1.0, got {top_p}"
            )));
        }
        if !(100..=50_000).contains(&t.max_text_length) {
            return Err(invalid(format!(
                "transform.max_text_length must be within 100..=50000, got {}",
                t.max_text_length
            )));
        }
        if t.max_output_tokens == 0 {
            return Err(invalid("transform.max_output_tokens must be positive".into()));
        }
        if t.prompt.trim().is_empty() {
            return Err(invalid("transform.prompt is empty".into()));
        }

        let p = &self.provider;
        if !(5..=120).contains(&p.request_timeout_secs) {
            return Err(invalid(format!(
                "provider.request_timeout_secs must be within 5..=120, got {}",
                p.request_timeout_secs
            )));
        }
        if !(1..=5).contains(&p.max_attempts) {
            return Err(invalid(format!(
                "provider.max_attempts must be within 1..=5, got {}",
                p.max_attempts
            )));
        }
        if let Some(url) = &p.base_url
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            return Err(invalid(format!(
                "provider.base_url must start with http:// or https://, got: {url}"
            )));
        }

        if !(1..=10).contains(&self.capture.max_attempts) {
            return Err(invalid(format!(
                "capture.max_attempts must be within 1..=10, got {}",
                self.capture.max_attempts
            )));
        }
        if self.processor.transform_timeout_secs == 0 || self.processor.run_timeout_secs == 0 {
            return Err(invalid("processor timeouts must be positive".into()));
        }
        if self.hotkey.binding.trim().is_empty() {
            return Err(invalid("hotkey.binding is empty".into()));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::Invalid(msg)
}

/// `$XDG_CONFIG_HOME/chisel/config.toml`.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("chisel").join("config.toml"))
}
