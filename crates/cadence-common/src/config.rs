//! Configuration for Cadence

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::settings::SendSettings;

/// Environment variable prefix for overrides, e.g. `CADENCE__API__PORT=9090`
pub const ENV_PREFIX: &str = "CADENCE";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Outbound SMTP configuration
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Orchestration engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Send settings used when `engine.settings_source = "config"`
    #[serde(default)]
    pub sending: SendSettings,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname, used as the Message-ID domain
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// Storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseBackend {
    #[default]
    Postgres,
    /// Process-local store; state is lost on restart
    Memory,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,

    /// Database URL (for postgres)
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Run embedded migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::default(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            run_migrations: true,
        }
    }
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

/// Outbound SMTP relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Relay host
    #[serde(default = "default_smtp_host")]
    pub host: String,

    /// Relay port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Implicit TLS (usually port 465)
    #[serde(default)]
    pub use_tls: bool,

    /// STARTTLS upgrade (usually port 587)
    #[serde(default)]
    pub use_starttls: bool,

    /// Timeout for a single delivery in seconds
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,

    /// Base URL of the sent-mail archive; the Message-ID is appended to form
    /// a permalink
    pub permalink_base_url: Option<String>,

    /// Log messages instead of delivering them
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: None,
            password: None,
            use_tls: false,
            use_starttls: false,
            timeout_secs: default_smtp_timeout(),
            permalink_base_url: None,
            dry_run: false,
        }
    }
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_smtp_timeout() -> u64 {
    30
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Allowed CORS origins; empty means any
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// How follow-up ticks are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    /// Durable rows in the `jobs` table, polled by a worker
    #[default]
    Jobs,
    /// Timers inside the server process
    InProcess,
}

/// Where send settings are read from on every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsSource {
    /// The `[sending]` section of this file
    #[default]
    Config,
    /// The `send_settings` table
    Database,
}

/// Orchestration engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// A sending campaign whose next tick is overdue by this much is stale
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Upper bound on drafts produced by one snapshot
    #[serde(default = "default_max_drafts")]
    pub max_drafts: usize,

    /// Re-check suppression before each send, not only at snapshot time
    #[serde(default)]
    pub recheck_suppression: bool,

    #[serde(default)]
    pub scheduler: SchedulerKind,

    /// Poll interval of the job worker
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// At most one campaign may be sending at any time
    #[serde(default = "default_true")]
    pub single_global_slot: bool,

    #[serde(default)]
    pub settings_source: SettingsSource,

    /// Base URL for unsubscribe links rendered into messages
    #[serde(default = "default_unsubscribe_base_url")]
    pub unsubscribe_base_url: String,

    /// Key for signing unsubscribe tokens
    #[serde(default)]
    pub unsubscribe_secret: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            max_drafts: default_max_drafts(),
            recheck_suppression: false,
            scheduler: SchedulerKind::default(),
            poll_interval_secs: default_poll_interval_secs(),
            single_global_slot: true,
            settings_source: SettingsSource::default(),
            unsubscribe_base_url: default_unsubscribe_base_url(),
            unsubscribe_secret: String::new(),
        }
    }
}

fn default_stale_after_secs() -> u64 {
    900
}

fn default_max_drafts() -> usize {
    5000
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_unsubscribe_base_url() -> String {
    "http://localhost:8080/unsubscribe".to_string()
}

impl Config {
    /// Load configuration from a specific file, with environment overrides
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        Self::build(Some(path))
    }

    /// Load configuration from the first default location that exists,
    /// with environment overrides
    pub fn load() -> crate::Result<Self> {
        let paths = [
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/cadence/config.toml"),
        ];

        let found = paths.iter().find(|p| p.exists());
        if found.is_none() {
            tracing::warn!("No configuration file found, using defaults and environment");
        }
        Self::build(found.map(PathBuf::as_path))
    }

    fn build(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.database.backend == DatabaseBackend::Postgres && self.database.url.is_none() {
            return Err(crate::Error::Config(
                "database.url is required for the postgres backend".to_string(),
            ));
        }
        if self.engine.stale_after_secs == 0 {
            return Err(crate::Error::Config(
                "engine.stale_after_secs must be positive".to_string(),
            ));
        }
        self.sending
            .validate()
            .map_err(|e| crate::Error::Config(e.to_string()))
    }
}
