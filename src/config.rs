//! Layered settings: defaults → TOML file → `A2A_*` environment.
//!
//! Nested keys use `__` in the environment, e.g. `A2A_DELEGATION__TARGET_URL`
//! or `A2A_AUTH__TOKEN`. Top-level keys use a single `_`: `A2A_RUNTIME_URL`.

use crate::a2a::auth::BearerToken;
use crate::a2a::dispatch::{DispatchConfig, RetryPolicy};
use crate::a2a::handler::{ReplyMode, DEFAULT_TASK_CAPACITY};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "A2A";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    /// Public base URL advertised in this service's agent card.
    pub runtime_url: Option<String>,
    pub delegation: DelegationSettings,
    pub auth: AuthSettings,
    pub provider: ProviderSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 9000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DelegationSettings {
    pub target_name: String,
    pub target_url: Option<String>,
    pub timeout_secs: u64,
    pub streaming: bool,
    pub retry: RetrySettings,
}

impl Default for DelegationSettings {
    fn default() -> Self {
        Self {
            target_name: "calculator".to_string(),
            target_url: None,
            timeout_secs: 300,
            streaming: true,
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Token required on inbound requests and sent on outbound ones.
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub reply_mode: ReplyMode,
    /// Tasks kept for `tasks/get` and `tasks/cancel`; oldest evicted first.
    pub task_capacity: usize,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            reply_mode: ReplyMode::default(),
            task_capacity: DEFAULT_TASK_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// When set, logs also go to a daily rolling file here.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

/// `~/.a2a-dispatch/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".a2a-dispatch").join("config.toml"))
}

impl Settings {
    /// Load from `path` (required if given, else the optional default file)
    /// and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(path, None)
    }

    /// Like [`Settings::load`], reading the environment from `env` when given.
    pub fn load_from(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path.to_path_buf()).required(true));
            }
            None => {
                if let Some(path) = default_config_path() {
                    builder = builder.add_source(File::from(path).required(false));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.delegation.timeout_secs == 0 {
            return Err(ConfigError::Message(
                "delegation.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.delegation.target_name.trim().is_empty() {
            return Err(ConfigError::Message(
                "delegation.target_name must not be empty".to_string(),
            ));
        }
        if self.provider.task_capacity == 0 {
            return Err(ConfigError::Message(
                "provider.task_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        let retry = &self.delegation.retry;
        DispatchConfig {
            timeout: Duration::from_secs(self.delegation.timeout_secs),
            streaming: self.delegation.streaming,
            retry: RetryPolicy {
                max_retries: retry.max_retries,
                initial_backoff: Duration::from_millis(retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(retry.max_backoff_ms),
            },
        }
    }

    pub fn auth_token(&self) -> Option<BearerToken> {
        self.auth
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(BearerToken::new)
    }

    /// Base URL advertised in the agent card.
    pub fn public_url(&self) -> String {
        match self.runtime_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => format!("http://{}:{}", self.server.bind, self.server.port),
        }
    }
}
