//! Configuration for the `rpt` runtime.
//!
//! [`RptArgs`] is the raw command-line/environment surface; every flag can
//! also be set through its `RPT_*` environment variable. [`RptArgs::into_config`]
//! validates it into a typed [`RptConfig`]. Any validation failure is fatal
//! at startup, before a listener is bound or a database is contacted.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use crate::logging::LogFormat;

/// Default `PostgreSQL` port.
pub const DEFAULT_PORT: u16 = 5432;

/// Errors raised while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid host {0:?}: expected <engine>:<hostname>")]
    InvalidHost(String),
    #[error("unsupported database engine {0:?}")]
    UnsupportedEngine(String),
    #[error("invalid port {0:?}: expected an integer between 1 and 65535")]
    InvalidPort(String),
    #[error("invalid SSL mode {0:?}: expected disable, require, verify-ca or verify-full")]
    InvalidSslMode(String),
    #[error("missing required value: {0}")]
    Missing(&'static str),
    #[error("queue capacity must be greater than zero")]
    ZeroQueueCapacity,
}

// ---------------------------------------------------------------------------
// Endpoint configuration
// ---------------------------------------------------------------------------

/// Database engine named by the host prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Postgres,
}

impl FromStr for Engine {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(Self::Postgres),
            other => Err(ConfigError::UnsupportedEngine(other.to_string())),
        }
    }
}

/// Transport security mode for a database connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    #[default]
    Disable,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
        }
    }
}

impl FromStr for SslMode {
    type Err = ConfigError;

    /// Parses an SSL mode. An empty string selects the default (`disable`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "disable" => Ok(Self::Disable),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            other => Err(ConfigError::InvalidSslMode(other.to_string())),
        }
    }
}

/// Connection settings for one database endpoint.
///
/// No `Default` impl because host and user have no sensible defaults.
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub engine: Engine,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub ssl_mode: SslMode,
    /// Database to connect to; `None` uses the server's default.
    pub database: Option<String>,
}

impl EndpointConfig {
    /// Builds an endpoint from raw string values.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for a malformed host value, an unsupported
    /// engine, a bad port, a bad SSL mode, or an empty user.
    pub fn from_raw(
        host: &str,
        port: &str,
        user: &str,
        password: &str,
        ssl_mode: &str,
    ) -> Result<Self, ConfigError> {
        let (engine, host) = parse_host(host)?;
        if user.is_empty() {
            return Err(ConfigError::Missing("user"));
        }
        Ok(Self {
            engine,
            host,
            port: parse_port(port)?,
            user: user.to_string(),
            password: password.to_string(),
            ssl_mode: ssl_mode.parse()?,
            database: None,
        })
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("ssl_mode", &self.ssl_mode)
            .field("database", &self.database)
            .finish()
    }
}

/// Splits `<engine>:<hostname>` into its parts.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidHost`] when either part is missing and
/// [`ConfigError::UnsupportedEngine`] for an unknown engine.
pub fn parse_host(raw: &str) -> Result<(Engine, String), ConfigError> {
    match raw.split_once(':') {
        Some((engine, host)) if !engine.is_empty() && !host.is_empty() => {
            Ok((engine.parse()?, host.to_string()))
        }
        _ => Err(ConfigError::InvalidHost(raw.to_string())),
    }
}

/// Parses a port, defaulting to 5432 when empty.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidPort`] unless the value is in 1..=65535.
pub fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    if raw.is_empty() {
        return Ok(DEFAULT_PORT);
    }
    match raw.parse::<u16>() {
        Ok(0) | Err(_) => Err(ConfigError::InvalidPort(raw.to_string())),
        Ok(port) => Ok(port),
    }
}

// ---------------------------------------------------------------------------
// API configuration
// ---------------------------------------------------------------------------

/// HTTP control surface configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Path prefix for every route, e.g. `/api`. Empty mounts at the root.
    pub base_path: String,
    /// Listen address. A bare `:port` listens on all interfaces.
    pub listen_addr: String,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_path: "/api".to_string(),
            listen_addr: ":5000".to_string(),
            cors_origins: vec!["*".to_string()],
            max_body_bytes: 1_048_576, // 1 MiB
        }
    }
}

impl ApiConfig {
    /// Builds API settings from raw values, applying defaults to empty ones.
    #[must_use]
    pub fn from_raw(base_path: &str, listen_addr: &str) -> Self {
        let defaults = Self::default();
        Self {
            base_path: if base_path.is_empty() {
                defaults.base_path
            } else {
                normalize_base_path(base_path)
            },
            listen_addr: if listen_addr.is_empty() {
                defaults.listen_addr
            } else {
                listen_addr.to_string()
            },
            ..defaults
        }
    }

    /// Address in a form `TcpListener::bind` accepts.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        if self.listen_addr.starts_with(':') {
            format!("0.0.0.0{}", self.listen_addr)
        } else {
            self.listen_addr.clone()
        }
    }
}

/// Ensures a single leading `/` and no trailing `/`. `/` becomes empty.
#[must_use]
pub fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Accepts `true`, `TRUE` and `1` as enabled.
#[must_use]
pub fn parse_flag(raw: &str) -> bool {
    raw.eq_ignore_ascii_case("true") || raw == "1"
}

// ---------------------------------------------------------------------------
// Runtime configuration
// ---------------------------------------------------------------------------

/// Queue sizing and shutdown timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Bounded capacity of the submission queue.
    pub queue_capacity: usize,
    /// Bounded capacity of the state-change channel.
    pub state_capacity: usize,
    /// Delay between a close request and stopping the listener, letting
    /// in-flight responses complete.
    pub close_grace: Duration,
    /// Maximum time to wait for the HTTP listener to stop.
    pub listener_stop_timeout: Duration,
    /// Maximum time to wait for in-flight submissions before closing the queue.
    pub submission_drain_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 50,
            state_capacity: 3,
            close_grace: Duration::from_secs(3),
            listener_stop_timeout: Duration::from_secs(5),
            submission_drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Fully validated configuration.
#[derive(Debug, Clone)]
pub struct RptConfig {
    pub primary: EndpointConfig,
    pub secondary: EndpointConfig,
    /// Dataset to seed into the primary at startup.
    pub seed_file: Option<PathBuf>,
    /// `None` disables the HTTP control surface.
    pub api: Option<ApiConfig>,
    pub runtime: RuntimeConfig,
    /// Prometheus pull endpoint address.
    pub metrics_listen_addr: Option<SocketAddr>,
}

// ---------------------------------------------------------------------------
// Command line / environment
// ---------------------------------------------------------------------------

/// Command-line and environment surface of the `rpt` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "rpt", version, about = "Queue and run database operations against a primary/secondary pair")]
pub struct RptArgs {
    /// Primary host as `<engine>:<hostname>`, e.g. `postgres:db1.internal`.
    #[arg(long, env = "RPT_PRIMARY_HOST")]
    pub primary_host: String,
    #[arg(long, env = "RPT_PRIMARY_PORT", default_value = "")]
    pub primary_port: String,
    #[arg(long, env = "RPT_PRIMARY_USER", default_value = "")]
    pub primary_user: String,
    #[arg(long, env = "RPT_PRIMARY_PASS", default_value = "", hide_env_values = true)]
    pub primary_pass: String,
    #[arg(long, env = "RPT_PRIMARY_SSLMODE", default_value = "")]
    pub primary_sslmode: String,

    /// Secondary host; when unset the secondary mirrors the primary.
    #[arg(long, env = "RPT_SECONDARY_HOST")]
    pub secondary_host: Option<String>,
    #[arg(long, env = "RPT_SECONDARY_PORT", default_value = "")]
    pub secondary_port: String,
    #[arg(long, env = "RPT_SECONDARY_USER", default_value = "")]
    pub secondary_user: String,
    #[arg(long, env = "RPT_SECONDARY_PASS", default_value = "", hide_env_values = true)]
    pub secondary_pass: String,
    #[arg(long, env = "RPT_SECONDARY_SSLMODE", default_value = "")]
    pub secondary_sslmode: String,

    /// Dataset file seeded into the primary at startup.
    #[arg(long, env = "RPT_SEED_FILE")]
    pub seed_file: Option<PathBuf>,

    /// Enable the HTTP control surface (`true`/`1`).
    #[arg(long, env = "RPT_API", default_value = "false")]
    pub api: String,
    #[arg(long, env = "RPT_API_BASEPATH", default_value = "/api")]
    pub api_base_path: String,
    #[arg(long, env = "RPT_API_LISTEN_ADDR", default_value = ":5000")]
    pub api_listen_addr: String,

    #[arg(long, env = "RPT_QUEUE_CAPACITY", default_value_t = 50)]
    pub queue_capacity: usize,
    #[arg(long, env = "RPT_CLOSE_GRACE_MS", default_value_t = 3000)]
    pub close_grace_ms: u64,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "RPT_METRICS_LISTEN_ADDR")]
    pub metrics_listen_addr: Option<SocketAddr>,

    #[arg(long, env = "RPT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl RptArgs {
    /// Validates the raw arguments.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] encountered.
    pub fn into_config(self) -> Result<RptConfig, ConfigError> {
        let primary = EndpointConfig::from_raw(
            &self.primary_host,
            &self.primary_port,
            &self.primary_user,
            &self.primary_pass,
            &self.primary_sslmode,
        )?;

        let secondary = match self.secondary_host.as_deref() {
            Some(host) if !host.is_empty() => EndpointConfig::from_raw(
                host,
                &self.secondary_port,
                &self.secondary_user,
                &self.secondary_pass,
                &self.secondary_sslmode,
            )?,
            _ => primary.clone(),
        };

        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }

        let api = parse_flag(&self.api)
            .then(|| ApiConfig::from_raw(&self.api_base_path, &self.api_listen_addr));

        Ok(RptConfig {
            primary,
            secondary,
            seed_file: self.seed_file.filter(|path| !path.as_os_str().is_empty()),
            api,
            runtime: RuntimeConfig {
                queue_capacity: self.queue_capacity,
                close_grace: Duration::from_millis(self.close_grace_ms),
                ..RuntimeConfig::default()
            },
            metrics_listen_addr: self.metrics_listen_addr,
        })
    }
}
