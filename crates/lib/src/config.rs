//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.genie/config.json`) and environment.
//! The trigger words normally come from the environment (`TRIGGER_WORD`, `END_TRIGGER_WORD`);
//! the router refuses to start without both.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Activation and deactivation keywords.
    #[serde(default)]
    pub triggers: TriggersConfig,

    /// Conversational backend settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// WhatsApp bridge settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Delay policy between transport sessions.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Local status endpoint (health and QR challenge).
    #[serde(default)]
    pub status: StatusConfig,
}

/// Trigger keywords. Overridden by TRIGGER_WORD / END_TRIGGER_WORD env.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggersConfig {
    pub word: Option<String>,
    pub end_word: Option<String>,
}

/// Backend base URL and request timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Base URL of the backend (default "http://127.0.0.1:5000"). Overridden by GENIE_BACKEND_URL env.
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    /// Upper bound for a single backend round-trip, in seconds (default 30).
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

/// Bridge sidecar connection and credential storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// WebSocket URL of the WhatsApp bridge (default "ws://127.0.0.1:8787/ws"). Overridden by GENIE_BRIDGE_URL env.
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,

    /// Directory holding the persisted WhatsApp credentials (default ~/.genie/auth). Overridden by GENIE_AUTH_DIR env.
    #[serde(default)]
    pub auth_dir: Option<PathBuf>,

    /// How long an outbound send waits for an open session before giving up, in seconds (default 30).
    #[serde(default = "default_send_wait_secs")]
    pub send_wait_secs: u64,
}

/// Reconnect delays. The first retry after a session that reached `open` is always immediate.
/// With `initialDelayMs` above 0 (default 0, i.e. always immediate), consecutive failures back
/// off from it, doubling up to `maxDelayMs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_initial_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub max_delay_ms: u64,
}

/// Status HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusConfig {
    #[serde(default = "default_status_enabled")]
    pub enabled: bool,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_status_bind")]
    pub bind: String,

    /// Port (default 15152).
    #[serde(default = "default_status_port")]
    pub port: u16,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_backend_timeout_secs() -> u64 {
    30
}

fn default_bridge_url() -> String {
    "ws://127.0.0.1:8787/ws".to_string()
}

fn default_send_wait_secs() -> u64 {
    30
}

fn default_reconnect_initial_ms() -> u64 {
    0
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_status_enabled() -> bool {
    true
}

fn default_status_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_status_port() -> u16 {
    15152
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            timeout_secs: default_backend_timeout_secs(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bridge_url: default_bridge_url(),
            auth_dir: None,
            send_wait_secs: default_send_wait_secs(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_reconnect_initial_ms(),
            max_delay_ms: default_reconnect_max_ms(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: default_status_enabled(),
            bind: default_status_bind(),
            port: default_status_port(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl TransportConfig {
    pub fn send_wait(&self) -> Duration {
        Duration::from_secs(self.send_wait_secs)
    }
}

/// Fatal configuration problems detected at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("trigger word not configured (set TRIGGER_WORD or triggers.word)")]
    MissingTriggerWord,
    #[error("end trigger word not configured (set END_TRIGGER_WORD or triggers.endWord)")]
    MissingEndTriggerWord,
    #[error("trigger word and end trigger word are both {0:?}; they must differ")]
    AmbiguousTriggers(String),
}

/// Validated activation keywords, stored trimmed and lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerWords {
    trigger: String,
    end_trigger: String,
}

impl TriggerWords {
    /// Build from raw values; both must be non-empty after trimming and distinct.
    pub fn new(trigger: Option<&str>, end_trigger: Option<&str>) -> Result<Self, ConfigError> {
        let trigger = normalize_keyword(trigger).ok_or(ConfigError::MissingTriggerWord)?;
        let end_trigger = normalize_keyword(end_trigger).ok_or(ConfigError::MissingEndTriggerWord)?;
        if trigger == end_trigger {
            return Err(ConfigError::AmbiguousTriggers(trigger));
        }
        Ok(Self {
            trigger,
            end_trigger,
        })
    }

    /// Resolve from env (TRIGGER_WORD, END_TRIGGER_WORD) falling back to the config file.
    pub fn resolve(config: &Config) -> Result<Self, ConfigError> {
        let trigger = env_non_empty("TRIGGER_WORD").or_else(|| config.triggers.word.clone());
        let end_trigger =
            env_non_empty("END_TRIGGER_WORD").or_else(|| config.triggers.end_word.clone());
        Self::new(trigger.as_deref(), end_trigger.as_deref())
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    pub fn end_trigger(&self) -> &str {
        &self.end_trigger
    }

    /// Case-insensitive exact match against the activation keyword.
    pub fn is_trigger(&self, text: &str) -> bool {
        text.trim().to_lowercase() == self.trigger
    }

    /// Case-insensitive exact match against the deactivation keyword.
    pub fn is_end_trigger(&self, text: &str) -> bool {
        text.trim().to_lowercase() == self.end_trigger
    }
}

fn normalize_keyword(raw: Option<&str>) -> Option<String> {
    raw.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty())
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Values given on the command line (`genie run --backend/--bridge`). They win over both the
/// environment and the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub backend_url: Option<String>,
    pub bridge_url: Option<String>,
}

fn flag_non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

/// Resolve the backend base URL: command line, then env GENIE_BACKEND_URL, then config.
pub fn resolve_backend_url(config: &Config, overrides: &Overrides) -> String {
    flag_non_empty(overrides.backend_url.as_deref())
        .or_else(|| env_non_empty("GENIE_BACKEND_URL"))
        .unwrap_or_else(|| config.backend.base_url.trim().to_string())
}

/// Resolve the bridge WebSocket URL: command line, then env GENIE_BRIDGE_URL, then config.
pub fn resolve_bridge_url(config: &Config, overrides: &Overrides) -> String {
    flag_non_empty(overrides.bridge_url.as_deref())
        .or_else(|| env_non_empty("GENIE_BRIDGE_URL"))
        .unwrap_or_else(|| config.transport.bridge_url.trim().to_string())
}

/// Resolve the credential directory: env GENIE_AUTH_DIR, then transport.authDir, then ~/.genie/auth.
pub fn resolve_auth_dir(config: &Config) -> PathBuf {
    env_non_empty("GENIE_AUTH_DIR")
        .map(PathBuf::from)
        .or_else(|| {
            config
                .transport
                .auth_dir
                .clone()
                .filter(|p| !p.as_os_str().is_empty())
        })
        .unwrap_or_else(|| genie_home().join("auth"))
}

fn genie_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".genie"))
        .unwrap_or_else(|| PathBuf::from(".genie"))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("GENIE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| genie_home().join("config.json"))
}

/// Load config from the given path, or the default path (or GENIE_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = read_config(&path)?;
    Ok((config, path))
}

fn read_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        return Ok(Config::default());
    }
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing config from {}", path.display()))
}
