use serde::{Deserialize, Serialize};
use std::{env, fmt, fs, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

/// Deployment profile; selects the built-in defaults.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Dev,
    Test,
    Prod,
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Dev),
            "test" => Ok(Self::Test),
            "prod" | "production" => Ok(Self::Prod),
            other => Err(format!("unknown profile '{other}'")),
        }
    }
}

/// Output format of the tracing subscriber.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Which durable log implementation backs the write path.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogBackend {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for LogBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("unknown durable log backend '{other}'")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; empty allows any origin.
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_credentials: false,
            max_age_seconds: 600,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Header carrying the request id in both directions.
    pub request_id_header: String,
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_id_header: "x-request-id".to_string(),
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DurableLogConfig {
    pub backend: LogBackend,
    /// Topic every message is appended to.
    pub topic: String,
    /// Required when `backend` is `postgres`.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub write_timeout_ms: u64,
    /// Upper bound on a history replay; the replay ends quietly when it lapses.
    pub replay_timeout_ms: u64,
}

impl Default for DurableLogConfig {
    fn default() -> Self {
        Self {
            backend: LogBackend::Memory,
            topic: "chat-messages".to_string(),
            database_url: None,
            max_connections: 10,
            write_timeout_ms: 10_000,
            replay_timeout_ms: 2_000,
        }
    }
}

impl DurableLogConfig {
    #[must_use]
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    #[must_use]
    pub const fn replay_timeout(&self) -> Duration {
        Duration::from_millis(self.replay_timeout_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Most recent messages kept per conversation.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PresenceConfig {
    pub online_ttl_seconds: u64,
    pub heartbeat_seconds: u64,
    pub activity_ttl_seconds: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            online_ttl_seconds: 3_600,
            heartbeat_seconds: 300,
            activity_ttl_seconds: 86_400,
        }
    }
}

impl PresenceConfig {
    #[must_use]
    pub const fn online_ttl(&self) -> Duration {
        Duration::from_secs(self.online_ttl_seconds)
    }

    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_seconds)
    }

    #[must_use]
    pub const fn activity_ttl(&self) -> Duration {
        Duration::from_secs(self.activity_ttl_seconds)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 100,
        }
    }
}

impl HistoryConfig {
    /// Resolves a requested page size: absent means the default, anything
    /// else is clamped to `1..=max_limit`.
    #[must_use]
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LiveConfig {
    /// Bounded queue size of each live connection; a full queue drops frames.
    pub channel_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML configuration: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("failed to parse JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported configuration format. Use 'yaml' or 'json'.")]
    UnsupportedFormat,
    #[error("invalid {var} value '{value}'")]
    InvalidEnv { var: &'static str, value: String },
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// The main configuration structure for the Chatline server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub profile: Profile,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub durable_log: DurableLogConfig,
    pub cache: CacheConfig,
    pub presence: PresenceConfig,
    pub history: HistoryConfig,
    pub live: LiveConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_for_profile(Profile::Dev)
    }
}

impl Config {
    /// Built-in defaults for a deployment profile.
    #[must_use]
    pub fn default_for_profile(profile: Profile) -> Self {
        let logging = match profile {
            Profile::Dev => LoggingConfig {
                level: "debug".to_string(),
                format: LogFormat::Text,
            },
            Profile::Test => LoggingConfig {
                level: "warn".to_string(),
                format: LogFormat::Text,
            },
            Profile::Prod => LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Json,
            },
        };

        Self {
            profile,
            server: ServerConfig::default(),
            logging,
            durable_log: DurableLogConfig::default(),
            cache: CacheConfig::default(),
            presence: PresenceConfig::default(),
            history: HistoryConfig::default(),
            live: LiveConfig::default(),
        }
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// Environment variables only replace values that are still at their
    /// profile default, so an explicit file setting wins over the environment.
    /// `port_override` wins over everything.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or parsed, an
    /// environment variable does not parse, or the result fails validation.
    pub fn load_config(
        config_path: Option<PathBuf>,
        port_override: Option<u16>,
    ) -> Result<Self, ConfigError> {
        let env_profile = match env::var("CHATLINE_PROFILE") {
            Ok(value) => Some(value.parse::<Profile>().map_err(|_| {
                ConfigError::InvalidEnv {
                    var: "CHATLINE_PROFILE",
                    value,
                }
            })?),
            Err(_) => None,
        };

        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default_for_profile(env_profile.unwrap_or_default()),
        };

        let defaults = Self::default_for_profile(config.profile);
        config.apply_env_overrides(&defaults)?;

        if let Some(port) = port_override {
            config.server.port = port;
        }

        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Ok(serde_yml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Err(ConfigError::UnsupportedFormat),
        }
    }

    fn apply_env_overrides(&mut self, defaults: &Self) -> Result<(), ConfigError> {
        override_from_env(
            &mut self.server.host,
            &defaults.server.host,
            "CHATLINE_SERVER_HOST",
        )?;
        override_from_env(
            &mut self.server.port,
            &defaults.server.port,
            "CHATLINE_SERVER_PORT",
        )?;
        override_from_env(
            &mut self.logging.level,
            &defaults.logging.level,
            "CHATLINE_LOG_LEVEL",
        )?;
        override_from_env(
            &mut self.logging.format,
            &defaults.logging.format,
            "CHATLINE_LOG_FORMAT",
        )?;
        override_from_env(
            &mut self.durable_log.backend,
            &defaults.durable_log.backend,
            "CHATLINE_DURABLE_LOG_BACKEND",
        )?;
        override_from_env(
            &mut self.durable_log.topic,
            &defaults.durable_log.topic,
            "CHATLINE_DURABLE_LOG_TOPIC",
        )?;
        if self.durable_log.database_url.is_none() {
            if let Ok(url) = env::var("CHATLINE_DATABASE_URL") {
                self.durable_log.database_url = Some(url);
            }
        }
        override_from_env(
            &mut self.cache.capacity,
            &defaults.cache.capacity,
            "CHATLINE_CACHE_CAPACITY",
        )?;
        override_from_env(
            &mut self.presence.online_ttl_seconds,
            &defaults.presence.online_ttl_seconds,
            "CHATLINE_PRESENCE_TTL_SECONDS",
        )?;
        override_from_env(
            &mut self.presence.heartbeat_seconds,
            &defaults.presence.heartbeat_seconds,
            "CHATLINE_HEARTBEAT_SECONDS",
        )?;
        Ok(())
    }

    /// Validate the complete configuration, collecting every problem found.
    ///
    /// # Errors
    /// Returns the list of validation messages when any check fails.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("Invalid server port. Must be greater than 0.".to_string());
        }
        if self.durable_log.topic.trim().is_empty() {
            errors.push("durable_log.topic must not be empty".to_string());
        }
        if self.durable_log.write_timeout_ms == 0 {
            errors.push("durable_log.write_timeout_ms must be greater than 0".to_string());
        }
        if self.durable_log.replay_timeout_ms == 0 {
            errors.push("durable_log.replay_timeout_ms must be greater than 0".to_string());
        }
        if self.durable_log.backend == LogBackend::Postgres
            && self
                .durable_log
                .database_url
                .as_deref()
                .is_none_or(|url| url.trim().is_empty())
        {
            errors.push("durable_log.database_url is required for the postgres backend".to_string());
        }
        if self.cache.capacity == 0 {
            errors.push("cache.capacity must be greater than 0".to_string());
        }
        if self.presence.online_ttl_seconds == 0 {
            errors.push("presence.online_ttl_seconds must be greater than 0".to_string());
        }
        if self.presence.heartbeat_seconds == 0
            || self.presence.heartbeat_seconds >= self.presence.online_ttl_seconds
        {
            errors.push(
                "presence.heartbeat_seconds must be greater than 0 and shorter than the online TTL"
                    .to_string(),
            );
        }
        if self.history.max_limit == 0 {
            errors.push("history.max_limit must be greater than 0".to_string());
        }
        if self.history.default_limit == 0 || self.history.default_limit > self.history.max_limit {
            errors.push("history.default_limit must be within 1..=history.max_limit".to_string());
        }
        if self.live.channel_capacity == 0 {
            errors.push("live.channel_capacity must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dev => "dev",
            Self::Test => "test",
            Self::Prod => "prod",
        })
    }
}

fn override_from_env<T>(target: &mut T, default: &T, var: &'static str) -> Result<(), ConfigError>
where
    T: FromStr + PartialEq,
{
    if target != default {
        return Ok(());
    }
    if let Ok(value) = env::var(var) {
        *target = value
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { var, value })?;
    }
    Ok(())
}
