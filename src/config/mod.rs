//! Configuration loading from TOML files and environment variables.
//!
//! Config is loaded in this order of precedence (highest wins):
//! 1. Environment variables (`DOCBRIDGE_BIND`, `DOCBRIDGE_MODEL`, ...)
//! 2. TOML file specified via the `--config` CLI flag
//! 3. `./docbridge.toml` in the current directory
//! 4. `$XDG_CONFIG_HOME/docbridge/docbridge.toml` (or
//!    `~/.config/docbridge/docbridge.toml`)
//! 5. Built-in defaults

use crate::error::ConfigError;
use std::fmt;
use std::path::{Path, PathBuf};

mod defaults;
mod types;

use defaults::CONFIG_FILE_NAME;
pub use types::{BridgeConfig, ChatConfig, Config, ModelConfig, ServerConfig};

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Where the active configuration text came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit(PathBuf),
    Local(PathBuf),
    Global(PathBuf),
    BuiltInDefaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit(path) | Self::Local(path) | Self::Global(path) => {
                write!(f, "{}", path.display())
            }
            Self::BuiltInDefaults => f.write_str("built-in defaults"),
        }
    }
}

/// A resolved configuration plus the file it was read from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub source: ConfigSource,
}

/// Load configuration from disk and environment.
///
/// `path_override` is an explicit config file path (from `--config`).
pub fn load_config(path_override: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    load_config_from_sources(
        path_override,
        |path| std::fs::read_to_string(path),
        |name| std::env::var(name).ok(),
        config_root_dir,
    )
}

/// Same as [`load_config`] with every side effect injected.
pub fn load_config_from_sources<FRead, FEnv, FRoot>(
    path_override: Option<&Path>,
    read_file: FRead,
    env_lookup: FEnv,
    config_root: FRoot,
) -> Result<LoadedConfig, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FEnv: Fn(&str) -> Option<String>,
    FRoot: Fn() -> Option<PathBuf>,
{
    let (config_text, source) = read_config_text(path_override, &read_file, &config_root)?;
    let mut config: Config = toml::from_str(&config_text)?;
    resolve_api_key(&mut config, &env_lookup);
    apply_env_overrides(&mut config, &env_lookup)?;
    validate(&config)?;
    Ok(LoadedConfig { config, source })
}

fn read_config_text<FRead, FRoot>(
    path_override: Option<&Path>,
    read_file: &FRead,
    config_root: &FRoot,
) -> Result<(String, ConfigSource), ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FRoot: Fn() -> Option<PathBuf>,
{
    if let Some(path) = path_override {
        let text = read_file(path)?;
        return Ok((text, ConfigSource::Explicit(path.to_path_buf())));
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if let Ok(text) = read_file(&local) {
        return Ok((text, ConfigSource::Local(local)));
    }
    if let Some(dir) = config_root() {
        let global = dir.join("docbridge").join(CONFIG_FILE_NAME);
        if let Ok(text) = read_file(&global) {
            return Ok((text, ConfigSource::Global(global)));
        }
    }

    Ok((String::new(), ConfigSource::BuiltInDefaults))
}

fn resolve_api_key<FEnv>(config: &mut Config, env_lookup: &FEnv)
where
    FEnv: Fn(&str) -> Option<String>,
{
    if !config.model.api_key.trim().is_empty() {
        return;
    }
    if let Some(key) = config
        .model
        .api_key_env
        .as_deref()
        .and_then(|name| normalized_string(env_lookup(name)))
    {
        config.model.api_key = key;
    }
}

fn apply_env_overrides<FEnv>(config: &mut Config, env_lookup: &FEnv) -> Result<(), ConfigError>
where
    FEnv: Fn(&str) -> Option<String>,
{
    let var = |name: &str| normalized_string(env_lookup(name));

    if let Some(bind) = var("DOCBRIDGE_BIND") {
        config.server.bind = bind;
    }
    if let Some(endpoint) = var("DOCBRIDGE_ENDPOINT") {
        config.server.endpoint = endpoint;
    }
    if let Some(token) = var("DOCBRIDGE_AUTH_TOKEN") {
        config.server.auth_token = Some(token);
    }
    if let Some(url) = var("DOCBRIDGE_BASE_URL") {
        config.model.base_url = url;
    }
    if let Some(model) = var("DOCBRIDGE_MODEL") {
        config.model.model = model;
    }
    if let Some(key) = var("DOCBRIDGE_API_KEY") {
        config.model.api_key = key;
    }
    if let Some(wait) = var("DOCBRIDGE_GATE_WAIT_MS") {
        config.bridge.gate_wait_ms = parse_u64("DOCBRIDGE_GATE_WAIT_MS", &wait, "milliseconds")?;
    }
    if let Some(timeout) = var("DOCBRIDGE_PROCESS_TIMEOUT_SECS") {
        let parsed = parse_u64("DOCBRIDGE_PROCESS_TIMEOUT_SECS", &timeout, "seconds")?;
        config.bridge.process_timeout_secs = parsed.max(1);
    }
    Ok(())
}

fn parse_u64(name: &str, value: &str, unit: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "invalid {name} value `{value}`: expected non-negative integer {unit}"
        ))
    })
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let endpoint = config.server.endpoint.as_str();
    if !endpoint.starts_with('/') || endpoint == "/" {
        return Err(ConfigError::Invalid(format!(
            "server.endpoint `{endpoint}` must be an absolute path such as `/mcp`"
        )));
    }
    if endpoint == "/health" {
        return Err(ConfigError::Invalid(
            "server.endpoint may not shadow `/health`".to_string(),
        ));
    }
    if config.server.bind.trim().is_empty() {
        return Err(ConfigError::Invalid("server.bind must not be empty".into()));
    }
    if config.bridge.process_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "bridge.process_timeout_secs must be at least 1".into(),
        ));
    }
    if config.chat.max_rounds == 0 {
        return Err(ConfigError::Invalid("chat.max_rounds must be at least 1".into()));
    }
    Ok(())
}

fn normalized_string(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Root directory for per-user config files.
pub fn config_root_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".config"))
        .or_else(dirs::config_dir)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
