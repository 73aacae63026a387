use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EXAMLENS_DIR_NAME: &str = ".examlens";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_SQLITE_FILE_NAME: &str = "facts.sqlite";
pub const DEFAULT_GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const DEFAULT_INSIGHT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 8_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendKind {
    #[default]
    Graph,
    Sqlite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InsightProviderKind {
    #[default]
    Auto,
    Mock,
    Gemini,
}

impl InsightProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Mock => "mock",
            Self::Gemini => "gemini",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExamlensConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub insights: InsightConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackendKind,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::Graph,
            sqlite_path: default_sqlite_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightConfig {
    #[serde(default)]
    pub provider: InsightProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_key_envs")]
    pub api_key_envs: Vec<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            provider: InsightProviderKind::Auto,
            model: None,
            endpoint: None,
            api_key_envs: default_api_key_envs(),
            max_attempts: DEFAULT_INSIGHT_MAX_ATTEMPTS,
            attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn examlens_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(EXAMLENS_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    examlens_dir(workspace_root).join(CONFIG_FILE_NAME)
}

/// Resolves the SQLite fact database path; relative paths live under `.examlens`.
pub fn sqlite_path(workspace_root: impl AsRef<Path>, store: &StoreConfig) -> PathBuf {
    let configured = PathBuf::from(&store.sqlite_path);
    if configured.is_absolute() {
        configured
    } else {
        examlens_dir(workspace_root).join(configured)
    }
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<ExamlensConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(ExamlensConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: ExamlensConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<ExamlensConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(examlens_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = ExamlensConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

pub fn validate_config(config: &ExamlensConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if config.insights.max_attempts == 0 {
        warnings.push(ConfigWarning {
            code: "insights_max_attempts_zero",
            message: "insights.max_attempts is 0; every subject will record an empty insight"
                .to_owned(),
        });
    }

    if config.insights.attempt_timeout_secs == 0 {
        warnings.push(ConfigWarning {
            code: "insights_attempt_timeout_zero",
            message: "insights.attempt_timeout_secs is 0; every insight attempt will time out"
                .to_owned(),
        });
    }

    if config.insights.provider == InsightProviderKind::Gemini
        && config.insights.api_key_envs.is_empty()
    {
        warnings.push(ConfigWarning {
            code: "insights_missing_key_envs",
            message: "insights.provider is gemini but insights.api_key_envs is empty".to_owned(),
        });
    }

    if config.insights.backoff_base_ms > config.insights.backoff_max_ms {
        warnings.push(ConfigWarning {
            code: "insights_backoff_inverted",
            message: format!(
                "insights.backoff_base_ms ({}) exceeds insights.backoff_max_ms ({})",
                config.insights.backoff_base_ms, config.insights.backoff_max_ms
            ),
        });
    }

    warnings
}

fn default_sqlite_path() -> String {
    DEFAULT_SQLITE_FILE_NAME.to_owned()
}

fn default_api_key_envs() -> Vec<String> {
    vec![DEFAULT_GEMINI_API_KEY_ENV.to_owned()]
}

fn default_max_attempts() -> u32 {
    DEFAULT_INSIGHT_MAX_ATTEMPTS
}

fn default_attempt_timeout_secs() -> u64 {
    DEFAULT_ATTEMPT_TIMEOUT_SECS
}

fn default_backoff_base_ms() -> u64 {
    DEFAULT_BACKOFF_BASE_MS
}

fn default_backoff_max_ms() -> u64 {
    DEFAULT_BACKOFF_MAX_MS
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_config(mut config: ExamlensConfig) -> ExamlensConfig {
    config.insights.model = normalize_optional(config.insights.model.take());
    config.insights.endpoint = normalize_optional(config.insights.endpoint.take());

    let mut api_key_envs = Vec::new();
    for name in config.insights.api_key_envs.drain(..) {
        let name = name.trim();
        if !name.is_empty() && !api_key_envs.iter().any(|existing| existing == name) {
            api_key_envs.push(name.to_owned());
        }
    }
    config.insights.api_key_envs = api_key_envs;

    let sqlite_path = config.store.sqlite_path.trim();
    if sqlite_path.is_empty() {
        config.store.sqlite_path = default_sqlite_path();
    } else {
        config.store.sqlite_path = sqlite_path.to_owned();
    }

    config
}
