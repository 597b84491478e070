use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub signing: SigningConfig,
    pub snapshot_provider: SnapshotProviderConfig,
    pub notifier: NotifierConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SigningConfig {
    /// Base URL links are built against, e.g. `https://sign.example.com`.
    pub public_base_url: String,
    /// Upper bound accepted for the decoded signature image.
    pub max_signature_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct SnapshotProviderConfig {
    /// Document snapshot service of the surrounding CRM. Empty means the
    /// server falls back to its seeded in-memory provider (dev mode).
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct NotifierConfig {
    /// Outcome webhook of the surrounding CRM. Empty disables dispatch.
    pub webhook_url: Option<String>,
    pub bearer_token: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
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
    pub public_base_url: Option<String>,
    pub snapshot_base_url: Option<String>,
    pub notifier_webhook_url: Option<String>,
    pub notifier_bearer_token: Option<String>,
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
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://standsign.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            signing: SigningConfig {
                public_base_url: "http://localhost:8080".to_string(),
                max_signature_bytes: 512 * 1024,
            },
            snapshot_provider: SnapshotProviderConfig { base_url: None, timeout_secs: 10 },
            notifier: NotifierConfig { webhook_url: None, bearer_token: None, timeout_secs: 10 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    signing: Option<SigningPatch>,
    snapshot_provider: Option<SnapshotProviderPatch>,
    notifier: Option<NotifierPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SigningPatch {
    public_base_url: Option<String>,
    max_signature_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotProviderPatch {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NotifierPatch {
    webhook_url: Option<String>,
    bearer_token: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("standsign.toml"));
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

        if let Some(signing) = patch.signing {
            if let Some(public_base_url) = signing.public_base_url {
                self.signing.public_base_url = public_base_url;
            }
            if let Some(max_signature_bytes) = signing.max_signature_bytes {
                self.signing.max_signature_bytes = max_signature_bytes;
            }
        }

        if let Some(snapshot_provider) = patch.snapshot_provider {
            if let Some(base_url) = snapshot_provider.base_url {
                self.snapshot_provider.base_url = Some(base_url);
            }
            if let Some(timeout_secs) = snapshot_provider.timeout_secs {
                self.snapshot_provider.timeout_secs = timeout_secs;
            }
        }

        if let Some(notifier) = patch.notifier {
            if let Some(webhook_url) = notifier.webhook_url {
                self.notifier.webhook_url = Some(webhook_url);
            }
            if let Some(bearer_token_value) = notifier.bearer_token {
                self.notifier.bearer_token = Some(secret_value(bearer_token_value));
            }
            if let Some(timeout_secs) = notifier.timeout_secs {
                self.notifier.timeout_secs = timeout_secs;
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
        if let Some(value) = read_env("STANDSIGN_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("STANDSIGN_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("STANDSIGN_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("STANDSIGN_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("STANDSIGN_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("STANDSIGN_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("STANDSIGN_SERVER_PORT") {
            self.server.port = parse_u16("STANDSIGN_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("STANDSIGN_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("STANDSIGN_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("STANDSIGN_PUBLIC_BASE_URL") {
            self.signing.public_base_url = value;
        }
        if let Some(value) = read_env("STANDSIGN_MAX_SIGNATURE_BYTES") {
            self.signing.max_signature_bytes =
                parse_u32("STANDSIGN_MAX_SIGNATURE_BYTES", &value)? as usize;
        }

        if let Some(value) = read_env("STANDSIGN_SNAPSHOT_BASE_URL") {
            self.snapshot_provider.base_url = Some(value);
        }
        if let Some(value) = read_env("STANDSIGN_SNAPSHOT_TIMEOUT_SECS") {
            self.snapshot_provider.timeout_secs =
                parse_u64("STANDSIGN_SNAPSHOT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("STANDSIGN_NOTIFIER_WEBHOOK_URL") {
            self.notifier.webhook_url = Some(value);
        }
        if let Some(value) = read_env("STANDSIGN_NOTIFIER_BEARER_TOKEN") {
            self.notifier.bearer_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("STANDSIGN_NOTIFIER_TIMEOUT_SECS") {
            self.notifier.timeout_secs = parse_u64("STANDSIGN_NOTIFIER_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("STANDSIGN_LOGGING_LEVEL").or_else(|| read_env("STANDSIGN_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("STANDSIGN_LOGGING_FORMAT").or_else(|| read_env("STANDSIGN_LOG_FORMAT"));
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
        if let Some(public_base_url) = overrides.public_base_url {
            self.signing.public_base_url = public_base_url;
        }
        if let Some(snapshot_base_url) = overrides.snapshot_base_url {
            self.snapshot_provider.base_url = Some(snapshot_base_url);
        }
        if let Some(webhook_url) = overrides.notifier_webhook_url {
            self.notifier.webhook_url = Some(webhook_url);
        }
        if let Some(bearer_token) = overrides.notifier_bearer_token {
            self.notifier.bearer_token = Some(secret_value(bearer_token));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_signing(&self.signing)?;
        validate_provider("snapshot_provider", self.snapshot_provider.timeout_secs)?;
        validate_provider("notifier", self.notifier.timeout_secs)?;
        validate_url_field("snapshot_provider.base_url", self.snapshot_provider.base_url.as_deref())?;
        validate_url_field("notifier.webhook_url", self.notifier.webhook_url.as_deref())?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("standsign.toml"), PathBuf::from("config/standsign.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }
    if server.graceful_shutdown_secs > 600 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be at most 600".to_string(),
        ));
    }
    Ok(())
}

fn validate_signing(signing: &SigningConfig) -> Result<(), ConfigError> {
    let url = signing.public_base_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::Validation(
            "signing.public_base_url must be an http(s) URL".to_string(),
        ));
    }
    if signing.max_signature_bytes == 0 {
        return Err(ConfigError::Validation(
            "signing.max_signature_bytes must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_provider(section: &str, timeout_secs: u64) -> Result<(), ConfigError> {
    if timeout_secs == 0 || timeout_secs > 120 {
        return Err(ConfigError::Validation(format!(
            "{section}.timeout_secs must be in range 1..=120"
        )));
    }
    Ok(())
}

fn validate_url_field(field: &str, value: Option<&str>) -> Result<(), ConfigError> {
    if let Some(url) = value {
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!("{field} must be an http(s) URL")));
        }
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    match logging.level.trim().to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        other => Err(ConfigError::Validation(format!(
            "logging.level `{other}` is not one of trace|debug|info|warn|error"
        ))),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}
