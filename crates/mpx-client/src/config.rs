//! Layered configuration system
//!
//! Config is loaded with four layers of precedence (highest wins):
//! 1. Environment variables: `MPX_SDK_BEARER_TOKEN`, `MPX_API_URL`
//! 2. Stored credentials: `~/.mpx/.env`
//! 3. Project-local: `.mpx/config.toml`
//! 4. Global: `~/.mpx/config.toml`

use crate::client::DEFAULT_API_URL;
use crate::credentials::{CredentialStore, TOKEN_VAR};
use crate::poller::{DEFAULT_POLL_DEADLINE, DEFAULT_POLL_INTERVAL};
use crate::request::LlmParams;
use crate::retry::DEFAULT_MAX_ATTEMPTS;
use mpx_core::{MpxError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_URL_VAR: &str = "MPX_API_URL";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendSection {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    /// 0 disables the deadline
    #[serde(default)]
    pub poll_deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmSection {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FanoutSection {
    #[serde(default)]
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<String>,
}

/// Top-level config file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MpxConfigFile {
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub fanout: FanoutSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Resolved configuration with every layer applied
#[derive(Debug, Clone)]
pub struct MpxConfig {
    pub api_url: String,
    pub bearer_token: Option<String>,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_deadline: Option<Duration>,
    pub retry_max_attempts: u32,
    pub retry_backoff: Duration,
    pub llm: LlmParams,
    pub workers: usize,
    pub log_level: String,
}

impl Default for MpxConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            bearer_token: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_deadline: Some(DEFAULT_POLL_DEADLINE),
            retry_max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: Duration::ZERO,
            llm: LlmParams::default(),
            workers: 1,
            log_level: "info".to_string(),
        }
    }
}

impl MpxConfig {
    /// Load config with layered precedence: global < project < credentials < env
    pub fn load() -> Result<Self> {
        let global = Self::global_config_path();
        let project = PathBuf::from(".mpx/config.toml");
        let credentials = CredentialStore::default_location();
        Self::load_layers(
            global.as_deref(),
            Some(project.as_path()),
            credentials.as_ref(),
            |name| std::env::var(name).ok(),
        )
    }

    /// Load config from a specific file path only (for testing)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let file = Self::load_file(path)?;
        Self::resolve(file)
    }

    /// Apply each layer that exists, then environment overrides from `env`
    pub fn load_layers<E>(
        global: Option<&Path>,
        project: Option<&Path>,
        credentials: Option<&CredentialStore>,
        env: E,
    ) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let mut config = MpxConfigFile::default();

        for path in [global, project].into_iter().flatten() {
            if path.exists() {
                let layer = Self::load_file(path)?;
                Self::merge_into(&mut config, layer);
                tracing::debug!(path = %path.display(), "loaded config layer");
            }
        }

        if let Some(store) = credentials {
            if let Some(token) = store.load()? {
                config.backend.bearer_token = Some(token);
            }
        }

        Self::apply_env_overrides(&mut config, env);
        Self::resolve(config)
    }

    /// The bearer token, or a config error explaining how to set one
    pub fn require_token(&self) -> Result<&str> {
        self.bearer_token.as_deref().ok_or_else(|| {
            MpxError::ConfigError(format!(
                "Bearer token not configured. Set {} or run `mpx auth <key>`",
                TOKEN_VAR
            ))
        })
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".mpx").join("config.toml"))
    }

    fn load_file(path: &Path) -> Result<MpxConfigFile> {
        let content = std::fs::read_to_string(path)?;
        let config: MpxConfigFile = toml::from_str(&content).map_err(|e| {
            MpxError::ConfigError(format!("Failed to parse config {}: {}", path.display(), e))
        })?;
        Ok(config)
    }

    fn merge_into(base: &mut MpxConfigFile, overlay: MpxConfigFile) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut base.backend.api_url, overlay.backend.api_url);
        take(&mut base.backend.bearer_token, overlay.backend.bearer_token);
        take(
            &mut base.backend.request_timeout_secs,
            overlay.backend.request_timeout_secs,
        );
        take(
            &mut base.backend.poll_interval_secs,
            overlay.backend.poll_interval_secs,
        );
        take(
            &mut base.backend.poll_deadline_secs,
            overlay.backend.poll_deadline_secs,
        );
        take(&mut base.retry.max_attempts, overlay.retry.max_attempts);
        take(&mut base.retry.backoff_ms, overlay.retry.backoff_ms);
        take(&mut base.llm.model, overlay.llm.model);
        take(&mut base.llm.temperature, overlay.llm.temperature);
        take(&mut base.llm.max_tokens, overlay.llm.max_tokens);
        take(&mut base.fanout.workers, overlay.fanout.workers);
        take(&mut base.logging.level, overlay.logging.level);
    }

    fn apply_env_overrides<E>(config: &mut MpxConfigFile, env: E)
    where
        E: Fn(&str) -> Option<String>,
    {
        if let Some(token) = env(TOKEN_VAR).filter(|t| !t.trim().is_empty()) {
            config.backend.bearer_token = Some(token);
        }
        if let Some(url) = env(API_URL_VAR).filter(|u| !u.trim().is_empty()) {
            config.backend.api_url = Some(url);
        }
    }

    fn resolve(file: MpxConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let retry_max_attempts = file
            .retry
            .max_attempts
            .unwrap_or(defaults.retry_max_attempts);
        if retry_max_attempts == 0 {
            return Err(MpxError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        let workers = file.fanout.workers.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(MpxError::ConfigError(
                "fanout.workers must be at least 1".to_string(),
            ));
        }

        let poll_deadline = match file.backend.poll_deadline_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.poll_deadline,
        };

        Ok(Self {
            api_url: file.backend.api_url.unwrap_or(defaults.api_url),
            bearer_token: file
                .backend
                .bearer_token
                .filter(|t| CredentialStore::is_usable_token(t)),
            request_timeout: file
                .backend
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            poll_interval: file
                .backend
                .poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            poll_deadline,
            retry_max_attempts,
            retry_backoff: file
                .retry
                .backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            llm: LlmParams {
                model: file.llm.model.unwrap_or(defaults.llm.model),
                temperature: file.llm.temperature.unwrap_or(defaults.llm.temperature),
                max_tokens: file.llm.max_tokens.unwrap_or(defaults.llm.max_tokens),
            },
            workers,
            log_level: file.logging.level.unwrap_or(defaults.log_level),
        })
    }
}
