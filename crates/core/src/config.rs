use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub model: ModelConfig,
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
    /// How long a connection waits on a locked database before giving up.
    pub busy_timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Knobs for the conversation orchestrator itself.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Delay before the "working on that" acknowledgement when nothing else
    /// has acknowledged the turn yet.
    pub fallback_timeout_ms: u64,
    /// Ring-buffer capacity of the per-session event log.
    pub event_buffer_capacity: usize,
    /// Rolling message-history window fed to the model.
    pub history_limit: usize,
    /// Window within which repeated barge-in signals are dropped.
    pub barge_in_debounce_ms: u64,
    /// Upper bound on model round trips within one turn.
    pub max_tool_iterations: u32,
    /// ZIP verification attempts before the agent suggests escalation.
    pub max_zip_attempts: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub model_provider: Option<ModelProvider>,
    pub model_name: Option<String>,
    pub model_api_key: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub fallback_timeout_ms: Option<u64>,
    pub event_buffer_capacity: Option<usize>,
    pub barge_in_debounce_ms: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://frontdesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
                busy_timeout_ms: 5_000,
            },
            model: ModelConfig {
                provider: ModelProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434/v1".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            session: SessionConfig {
                fallback_timeout_ms: 8_000,
                event_buffer_capacity: 100,
                history_limit: 20,
                barge_in_debounce_ms: 500,
                max_tool_iterations: 4,
                max_zip_attempts: 3,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for ModelProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported model provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    /// Defaults, then an optional `frontdesk.toml` patch, then `FRONTDESK_*`
    /// env overrides, then programmatic overrides, then validation.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("frontdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
            if let Some(busy_timeout_ms) = database.busy_timeout_ms {
                self.database.busy_timeout_ms = busy_timeout_ms;
            }
        }

        if let Some(model) = patch.model {
            if let Some(provider) = model.provider {
                self.model.provider = provider;
            }
            if let Some(api_key_value) = model.api_key {
                self.model.api_key = Some(api_key_value.into());
            }
            if let Some(base_url) = model.base_url {
                self.model.base_url = Some(base_url);
            }
            if let Some(name) = model.model {
                self.model.model = name;
            }
            if let Some(timeout_secs) = model.timeout_secs {
                self.model.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = model.max_retries {
                self.model.max_retries = max_retries;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(session) = patch.session {
            if let Some(fallback_timeout_ms) = session.fallback_timeout_ms {
                self.session.fallback_timeout_ms = fallback_timeout_ms;
            }
            if let Some(event_buffer_capacity) = session.event_buffer_capacity {
                self.session.event_buffer_capacity = event_buffer_capacity;
            }
            if let Some(history_limit) = session.history_limit {
                self.session.history_limit = history_limit;
            }
            if let Some(barge_in_debounce_ms) = session.barge_in_debounce_ms {
                self.session.barge_in_debounce_ms = barge_in_debounce_ms;
            }
            if let Some(max_tool_iterations) = session.max_tool_iterations {
                self.session.max_tool_iterations = max_tool_iterations;
            }
            if let Some(max_zip_attempts) = session.max_zip_attempts {
                self.session.max_zip_attempts = max_zip_attempts;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("FRONTDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FRONTDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("FRONTDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("FRONTDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_DATABASE_BUSY_TIMEOUT_MS") {
            self.database.busy_timeout_ms =
                parse_u64("FRONTDESK_DATABASE_BUSY_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("FRONTDESK_MODEL_PROVIDER") {
            self.model.provider = value.parse()?;
        }
        if let Some(value) = read_env("FRONTDESK_MODEL_API_KEY") {
            self.model.api_key = Some(value.into());
        }
        if let Some(value) = read_env("FRONTDESK_MODEL_BASE_URL") {
            self.model.base_url = Some(value);
        }
        if let Some(value) = read_env("FRONTDESK_MODEL_NAME") {
            self.model.model = value;
        }
        if let Some(value) = read_env("FRONTDESK_MODEL_TIMEOUT_SECS") {
            self.model.timeout_secs = parse_u64("FRONTDESK_MODEL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_MODEL_MAX_RETRIES") {
            self.model.max_retries = parse_u32("FRONTDESK_MODEL_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("FRONTDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("FRONTDESK_SERVER_PORT") {
            self.server.port = parse_u16("FRONTDESK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("FRONTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("FRONTDESK_SESSION_FALLBACK_TIMEOUT_MS") {
            self.session.fallback_timeout_ms =
                parse_u64("FRONTDESK_SESSION_FALLBACK_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_SESSION_EVENT_BUFFER_CAPACITY") {
            self.session.event_buffer_capacity =
                parse_u32("FRONTDESK_SESSION_EVENT_BUFFER_CAPACITY", &value)? as usize;
        }
        if let Some(value) = read_env("FRONTDESK_SESSION_HISTORY_LIMIT") {
            self.session.history_limit =
                parse_u32("FRONTDESK_SESSION_HISTORY_LIMIT", &value)? as usize;
        }
        if let Some(value) = read_env("FRONTDESK_SESSION_BARGE_IN_DEBOUNCE_MS") {
            self.session.barge_in_debounce_ms =
                parse_u64("FRONTDESK_SESSION_BARGE_IN_DEBOUNCE_MS", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_SESSION_MAX_TOOL_ITERATIONS") {
            self.session.max_tool_iterations =
                parse_u32("FRONTDESK_SESSION_MAX_TOOL_ITERATIONS", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_SESSION_MAX_ZIP_ATTEMPTS") {
            self.session.max_zip_attempts =
                parse_u32("FRONTDESK_SESSION_MAX_ZIP_ATTEMPTS", &value)?;
        }

        let log_level =
            read_env("FRONTDESK_LOGGING_LEVEL").or_else(|| read_env("FRONTDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("FRONTDESK_LOGGING_FORMAT").or_else(|| read_env("FRONTDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(model_provider) = overrides.model_provider {
            self.model.provider = model_provider;
        }
        if let Some(model_name) = overrides.model_name {
            self.model.model = model_name;
        }
        if let Some(model_api_key) = overrides.model_api_key {
            self.model.api_key = Some(model_api_key.into());
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(fallback_timeout_ms) = overrides.fallback_timeout_ms {
            self.session.fallback_timeout_ms = fallback_timeout_ms;
        }
        if let Some(event_buffer_capacity) = overrides.event_buffer_capacity {
            self.session.event_buffer_capacity = event_buffer_capacity;
        }
        if let Some(barge_in_debounce_ms) = overrides.barge_in_debounce_ms {
            self.session.barge_in_debounce_ms = barge_in_debounce_ms;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".into()));
        }
        if self.model.model.trim().is_empty() {
            return Err(ConfigError::Validation("model.model must not be empty".into()));
        }
        if self.session.event_buffer_capacity == 0 {
            return Err(ConfigError::Validation(
                "session.event_buffer_capacity must be at least 1".into(),
            ));
        }
        if self.session.history_limit == 0 {
            return Err(ConfigError::Validation(
                "session.history_limit must be at least 1".into(),
            ));
        }
        if self.session.max_tool_iterations == 0 {
            return Err(ConfigError::Validation(
                "session.max_tool_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    model: Option<ModelPatch>,
    server: Option<ServerPatch>,
    session: Option<SessionPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
    busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ModelPatch {
    provider: Option<ModelProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SessionPatch {
    fallback_timeout_ms: Option<u64>,
    event_buffer_capacity: Option<usize>,
    history_limit: Option<usize>,
    barge_in_debounce_ms: Option<u64>,
    max_tool_iterations: Option<u32>,
    max_zip_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    let default = PathBuf::from("frontdesk.toml");
    default.exists().then_some(default)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{AppConfig, ConfigOverrides, LoadOptions, LogFormat, ModelProvider};

    fn load_with(overrides: ConfigOverrides) -> AppConfig {
        AppConfig::load(LoadOptions { overrides, ..LoadOptions::default() })
            .expect("load should succeed")
    }

    #[test]
    fn defaults_cover_the_orchestrator_knobs() {
        let config = load_with(ConfigOverrides::default());
        assert_eq!(config.session.fallback_timeout_ms, 8_000);
        assert_eq!(config.session.event_buffer_capacity, 100);
        assert_eq!(config.session.history_limit, 20);
        assert_eq!(config.session.barge_in_debounce_ms, 500);
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn programmatic_overrides_take_precedence() {
        let config = load_with(ConfigOverrides {
            database_url: Some("sqlite::memory:".to_owned()),
            model_provider: Some(ModelProvider::OpenAi),
            model_name: Some("gpt-4o-mini".to_owned()),
            fallback_timeout_ms: Some(250),
            barge_in_debounce_ms: Some(100),
            ..ConfigOverrides::default()
        });

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.model.provider, ModelProvider::OpenAi);
        assert_eq!(config.model.model, "gpt-4o-mini");
        assert_eq!(config.session.fallback_timeout_ms, 250);
        assert_eq!(config.session.barge_in_debounce_ms, 100);
    }

    #[test]
    fn toml_patch_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "[database]\nbusy_timeout_ms = 250\n\n\
             [session]\nfallback_timeout_ms = 1234\nhistory_limit = 6\n\n\
             [logging]\nformat = \"json\"\n"
        )
        .expect("write patch");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            ..LoadOptions::default()
        })
        .expect("load should succeed");

        assert_eq!(config.database.busy_timeout_ms, 250);
        assert_eq!(config.session.fallback_timeout_ms, 1234);
        assert_eq!(config.session.history_limit, 6);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some("definitely/not/here.toml".into()),
            require_file: true,
            ..LoadOptions::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn zero_buffer_capacity_fails_validation() {
        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                event_buffer_capacity: Some(0),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn provider_strings_parse_case_insensitively() {
        assert_eq!("OpenAI".parse::<ModelProvider>().expect("parses"), ModelProvider::OpenAi);
        assert!("llamacpp".parse::<ModelProvider>().is_err());
    }
}
