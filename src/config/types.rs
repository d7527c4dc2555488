//! Configuration data model.
//!
//! This module holds struct definitions plus default values. Loading and
//! source precedence stay in `config::mod`.

use serde::Deserialize;
use std::time::Duration;

use super::defaults::{
    DEFAULT_API_BASE_URL, DEFAULT_API_TIMEOUT_SECS, DEFAULT_BIND, DEFAULT_COMPACT_THRESHOLD_CHARS,
    DEFAULT_ENDPOINT, DEFAULT_GATE_WAIT_MS, DEFAULT_KEEPALIVE_SECS, DEFAULT_KEEP_RECENT,
    DEFAULT_LOOP_REPEAT_LIMIT, DEFAULT_MAX_ROUNDS, DEFAULT_MODEL_ID,
    DEFAULT_PROCESS_TIMEOUT_SECS,
};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub bridge: BridgeConfig,
    pub chat: ChatConfig,
    pub model: ModelConfig,
}

/// `[server]`: the HTTP protocol surface.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub endpoint: String,
    /// Shared secret expected as `Authorization: Bearer <token>`.
    pub auth_token: Option<String>,
    pub keepalive_secs: u64,
    /// Overrides the `instructions` text returned from `initialize`.
    pub instructions: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.into(),
            endpoint: DEFAULT_ENDPOINT.into(),
            auth_token: None,
            keepalive_secs: DEFAULT_KEEPALIVE_SECS,
            instructions: None,
        }
    }
}

impl ServerConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }
}

/// `[bridge]`: gate and controller-thread limits.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub gate_wait_ms: u64,
    pub process_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            gate_wait_ms: DEFAULT_GATE_WAIT_MS,
            process_timeout_secs: DEFAULT_PROCESS_TIMEOUT_SECS,
        }
    }
}

impl BridgeConfig {
    pub fn gate_wait(&self) -> Duration {
        Duration::from_millis(self.gate_wait_ms)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }
}

/// `[chat]`: conversation loop limits.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    pub max_rounds: usize,
    pub keep_recent: usize,
    pub loop_repeat_limit: usize,
    /// `0` disables compaction.
    pub compact_threshold_chars: usize,
    pub system_prompt: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            keep_recent: DEFAULT_KEEP_RECENT,
            loop_repeat_limit: DEFAULT_LOOP_REPEAT_LIMIT,
            compact_threshold_chars: DEFAULT_COMPACT_THRESHOLD_CHARS,
            system_prompt: None,
        }
    }
}

/// `[model]`: the OpenAI-compatible endpoint used by `docbridge chat`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    #[serde(alias = "api_base_url")]
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    /// Environment variable holding the key when `api_key` is empty.
    pub api_key_env: Option<String>,
    pub temperature: Option<f64>,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.into(),
            model: DEFAULT_MODEL_ID.into(),
            api_key: String::new(),
            api_key_env: None,
            temperature: None,
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}
