//! Configuration management

use serde::{Deserialize, Serialize};
use wfxrs_core::{Error, PageLimits, Result};

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database URL
    pub database_url: String,

    /// Management listener (actor WFX)
    pub north_addr: String,

    /// Client listener (actor CLIENT)
    pub south_addr: String,

    /// Page size used when a list request carries no limit
    pub default_page_size: i64,

    /// Upper bound for requested page sizes
    pub max_page_size: i64,

    /// Undelivered events kept per event stream subscriber
    pub event_queue_capacity: usize,

    /// Interval between keep-alive comments on idle event streams
    pub keep_alive_secs: u64,

    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:data/wfx.db".to_string(),
            north_addr: "0.0.0.0:8081".to_string(),
            south_addr: "0.0.0.0:8080".to_string(),
            default_page_size: 10,
            max_page_size: 1000,
            event_queue_capacity: 256,
            keep_alive_secs: 15,
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Load configuration from file or environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config = if let Some(p) = path {
            Self::load_from_file(p)?
        } else {
            Self::load_from_env()?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from configuration file
    fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from environment variables
    fn load_from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        Ok(Config {
            database_url: var("DATABASE_URL").unwrap_or(defaults.database_url),
            north_addr: var("WFX_NORTH_ADDR").unwrap_or(defaults.north_addr),
            south_addr: var("WFX_SOUTH_ADDR").unwrap_or(defaults.south_addr),
            default_page_size: parse_var(&var, "WFX_DEFAULT_PAGE_SIZE")?
                .unwrap_or(defaults.default_page_size),
            max_page_size: parse_var(&var, "WFX_MAX_PAGE_SIZE")?
                .unwrap_or(defaults.max_page_size),
            event_queue_capacity: parse_var(&var, "WFX_EVENT_QUEUE_CAPACITY")?
                .unwrap_or(defaults.event_queue_capacity),
            keep_alive_secs: parse_var(&var, "WFX_KEEP_ALIVE_SECS")?
                .unwrap_or(defaults.keep_alive_secs),
            log_format: match var("WFX_LOG_FORMAT").as_deref() {
                None | Some("") | Some("text") => LogFormat::Text,
                Some("json") => LogFormat::Json,
                Some(other) => {
                    return Err(Error::Config(format!(
                        "Invalid WFX_LOG_FORMAT '{}' (expected text or json)",
                        other
                    )))
                }
            },
        })
    }

    fn validate(&self) -> Result<()> {
        if self.max_page_size <= 0 {
            return Err(Error::Config("max_page_size must be positive".to_string()));
        }
        if self.default_page_size <= 0 || self.default_page_size > self.max_page_size {
            return Err(Error::Config(format!(
                "default_page_size must be between 1 and {}",
                self.max_page_size
            )));
        }
        if self.event_queue_capacity == 0 {
            return Err(Error::Config(
                "event_queue_capacity must be positive".to_string(),
            ));
        }
        if self.keep_alive_secs == 0 {
            return Err(Error::Config("keep_alive_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            default_limit: self.default_page_size,
            max_limit: self.max_page_size,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    match var(name) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("Invalid value for {}: '{}'", name, value))),
        _ => Ok(None),
    }
}
