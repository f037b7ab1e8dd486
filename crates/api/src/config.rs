use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    pub export: ExportConfig,
    #[serde(default)]
    pub cloud_storage: CloudStorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Empty means "use the in-memory event log".
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Directory holding finished downloadable files and the staging area.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// How long a terminal job stays observable after its last poll.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// How long the legacy endpoint waits for a fresh job before answering 202.
    #[serde(default = "default_legacy_sync_wait_ms")]
    pub legacy_sync_wait_ms: u64,

    /// Running jobs older than this are reported once by the sweeper.
    #[serde(default = "default_slow_job_threshold_secs")]
    pub slow_job_threshold_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Export window used when the caller omits `from`.
    #[serde(default = "default_range_days")]
    pub default_range_days: i64,
}

impl ExportConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn legacy_sync_wait(&self) -> Duration {
        Duration::from_millis(self.legacy_sync_wait_ms)
    }

    pub fn slow_job_threshold(&self) -> Duration {
        Duration::from_secs(self.slow_job_threshold_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudStorageConfig {
    /// Object store backend: http or memory
    #[serde(default = "default_cloud_provider")]
    pub provider: String,

    /// Base URL of the HTTP object store (required for the http provider)
    #[serde(default)]
    pub endpoint: String,

    /// Bearer token sent with object store requests
    #[serde(default)]
    pub access_token: String,

    #[serde(default = "default_cloud_timeout")]
    pub timeout_secs: u64,
}

impl Default for CloudStorageConfig {
    fn default() -> Self {
        Self {
            provider: default_cloud_provider(),
            endpoint: String::new(),
            access_token: String::new(),
            timeout_secs: default_cloud_timeout(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_body_size() -> usize {
    10_485_760
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    2
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_artifact_dir() -> PathBuf {
    PathBuf::from("data/exports")
}
fn default_retention_secs() -> u64 {
    86_400
}
fn default_legacy_sync_wait_ms() -> u64 {
    100
}
fn default_slow_job_threshold_secs() -> u64 {
    300
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_range_days() -> i64 {
    domain::models::export::DEFAULT_EXPORT_RANGE_DAYS
}
fn default_cloud_provider() -> String {
    "memory".to_string()
}
fn default_cloud_timeout() -> u64 {
    60
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with AUDIT__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("AUDIT").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// Builds the config from embedded defaults so tests do not depend on
    /// the working directory.
    #[cfg(test)]
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "0.0.0.0"
            port = 8080
            request_timeout_secs = 30

            [database]
            url = ""
            max_connections = 20
            min_connections = 2

            [logging]
            level = "info"
            format = "json"

            [export]
            artifact_dir = "data/exports"
            retention_secs = 86400
            legacy_sync_wait_ms = 100
            slow_job_threshold_secs = 300
            sweep_interval_secs = 60
            default_range_days = 30

            [cloud_storage]
            provider = "memory"
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        Ok(cfg)
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if !self.database.url.is_empty()
            && self.database.min_connections > self.database.max_connections
        {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(ConfigValidationError::InvalidValue(format!(
                "logging.format must be json or pretty, got '{}'",
                self.logging.format
            )));
        }

        if self.export.retention_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "export.retention_secs must be positive".to_string(),
            ));
        }

        if self.export.sweep_interval_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "export.sweep_interval_secs must be positive".to_string(),
            ));
        }

        if self.export.default_range_days <= 0 {
            return Err(ConfigValidationError::InvalidValue(
                "export.default_range_days must be positive".to_string(),
            ));
        }

        match self.cloud_storage.provider.as_str() {
            "memory" => {}
            "http" => {
                if self.cloud_storage.endpoint.is_empty() {
                    return Err(ConfigValidationError::MissingRequired(
                        "AUDIT__CLOUD_STORAGE__ENDPOINT must be set for the http provider"
                            .to_string(),
                    ));
                }
            }
            other => {
                return Err(ConfigValidationError::InvalidValue(format!(
                    "Unknown cloud storage provider '{}'",
                    other
                )));
            }
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }

    /// Whether events are read from PostgreSQL rather than the in-memory log.
    pub fn uses_database(&self) -> bool {
        !self.database.url.is_empty()
    }
}

impl From<&DatabaseConfig> for persistence::db::DatabaseConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connect_timeout_secs: config.connect_timeout_secs,
            idle_timeout_secs: config.idle_timeout_secs,
        }
    }
}
