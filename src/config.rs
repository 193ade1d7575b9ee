use crate::query::funnel::DEFAULT_FUNNEL_WINDOW_SECS;
use crate::query::journey::DEFAULT_MAX_STEPS;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Application configuration loaded from environment variables or TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// DuckDB database file holding the `events` table. None = in-memory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Dashboard origin for CORS restrictions on stats routes.
    /// If not set, any origin may read the stats API.
    #[serde(default)]
    pub dashboard_origin: Option<String>,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: 30).
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Longest time a visitor may take from the first to the last funnel step.
    #[serde(default = "default_funnel_window_secs")]
    pub funnel_window_secs: u64,
    /// Pages kept per session in the journey report.
    #[serde(default = "default_journey_max_steps")]
    pub journey_max_steps: u64,
    /// `"json"` for JSON log lines, anything else for the human format.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8000
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

const fn default_funnel_window_secs() -> u64 {
    DEFAULT_FUNNEL_WINDOW_SECS
}

const fn default_journey_max_steps() -> u64 {
    DEFAULT_MAX_STEPS
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_path: None,
            dashboard_origin: None,
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            funnel_window_secs: default_funnel_window_secs(),
            journey_max_steps: default_journey_max_steps(),
            log_format: default_log_format(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(val) = std::env::var(name) {
        match val.parse() {
            Ok(v) => *target = v,
            Err(_) => tracing::warn!(var = name, value = %val, "Ignoring unparsable override"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults.
    ///
    /// Environment variables override file values:
    /// - `BA_HOST` → host
    /// - `BA_PORT` → port
    /// - `BA_DATABASE_PATH` → database_path
    /// - `BA_DASHBOARD_ORIGIN` → dashboard_origin
    /// - `BA_REQUEST_TIMEOUT` → request_timeout_secs
    /// - `BA_SHUTDOWN_TIMEOUT` → shutdown_timeout_secs
    /// - `BA_FUNNEL_WINDOW` → funnel_window_secs
    /// - `BA_JOURNEY_MAX_STEPS` → journey_max_steps
    /// - `BA_LOG_FORMAT` → log_format
    pub fn load(config_path: Option<&Path>) -> Self {
        let mut config =
            config_path.map_or_else(Self::default, |path| match std::fs::read_to_string(path) {
                Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                    tracing::warn!("Failed to parse config file: {e}, using defaults");
                    Self::default()
                }),
                Err(e) => {
                    tracing::warn!("Failed to read config file: {e}, using defaults");
                    Self::default()
                }
            });

        if let Ok(host) = std::env::var("BA_HOST") {
            config.host = host;
        }
        env_parse("BA_PORT", &mut config.port);
        if let Ok(path) = std::env::var("BA_DATABASE_PATH") {
            config.database_path = Some(PathBuf::from(path));
        }
        if let Ok(origin) = std::env::var("BA_DASHBOARD_ORIGIN") {
            config.dashboard_origin = Some(origin);
        }
        env_parse("BA_REQUEST_TIMEOUT", &mut config.request_timeout_secs);
        env_parse("BA_SHUTDOWN_TIMEOUT", &mut config.shutdown_timeout_secs);
        env_parse("BA_FUNNEL_WINDOW", &mut config.funnel_window_secs);
        env_parse("BA_JOURNEY_MAX_STEPS", &mut config.journey_max_steps);
        if let Ok(format) = std::env::var("BA_LOG_FORMAT") {
            config.log_format = format;
        }

        config
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}
