//! Configuration infrastructure.
//!
//! Loading and validation of per-run settings: seed list, fetch behavior,
//! pagination behavior, politeness knobs and logging. Configuration errors
//! are the only fatal error class in the system; everything encountered
//! mid-run is recoverable by skip-and-continue.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Fatal configuration failures. Surfaced at startup, never mid-run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown source '{name}' in seed list")]
    MissingSource { name: String },

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },

    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Seed list: which sources to crawl and where to start them.
    pub seeds: Vec<SeedConfig>,

    /// Fetch layer behavior.
    pub fetch: FetchConfig,

    /// Hierarchy walk behavior.
    pub crawl: CrawlConfig,

    /// Incremental content loading behavior.
    pub pagination: PaginationConfig,

    /// Outbound identity pool. Empty means the built-in desktop-browser
    /// identities.
    pub identities: Vec<IdentityConfig>,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// One entry of the seed list: a source name plus the region to start from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedConfig {
    /// Registered source name, e.g. "lennar" or "zillow".
    pub source: String,

    /// Region slug or location hint handed to the source, e.g. "texas".
    #[serde(default)]
    pub region_hint: String,

    /// Optional search filters forwarded to the source's listing queries.
    #[serde(default)]
    pub filters: SearchFilters,
}

/// Search filters a source may translate into listing-query parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchFilters {
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub bedrooms: Option<u32>,
    pub house_type: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Query parameters in the shape listing search endpoints expect.
    pub fn to_query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(min) = self.min_price {
            params.push(("minPrice".to_string(), min.to_string()));
        }
        if let Some(max) = self.max_price {
            params.push(("maxPrice".to_string(), max.to_string()));
        }
        if let Some(beds) = self.bedrooms {
            params.push(("beds".to_string(), beds.to_string()));
        }
        if let Some(house_type) = &self.house_type {
            params.push(("homeType".to_string(), house_type.clone()));
        }
        params
    }
}

/// One configured outbound identity: a user agent plus the headers that
/// have to stay consistent with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub user_agent: String,

    #[serde(default = "default_accept")]
    pub accept: String,

    #[serde(default = "default_accept_language")]
    pub accept_language: String,

    #[serde(default)]
    pub referer: Option<String>,
}

fn default_accept() -> String {
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string()
}

fn default_accept_language() -> String {
    "en-US,en;q=0.9".to_string()
}

/// Fetch layer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Maximum retry attempts for transient failures.
    pub max_retries: u32,

    /// Base unit of the exponential backoff sequence, in milliseconds.
    pub backoff_base_ms: u64,

    /// Ceiling for a single backoff delay, in milliseconds.
    pub backoff_ceiling_ms: u64,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Maximum requests per second within one fetch session.
    pub max_requests_per_second: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1_000,
            backoff_ceiling_ms: 30_000,
            request_timeout_seconds: 30,
            max_requests_per_second: 5,
        }
    }
}

/// Hierarchy walk settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Politeness delay between node visits, in milliseconds.
    pub request_delay_ms: u64,

    /// Optional bound on children visited per parent node. Truncation is
    /// reported in run statistics, never silent.
    pub max_children: Option<usize>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 1_000,
            max_children: None,
        }
    }
}

/// Incremental content loading settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Consecutive unchanged snapshots required to consider content stable.
    pub stability_threshold: u32,

    /// Consecutive failed trigger-location attempts before giving up.
    pub max_locate_failures: u32,

    /// Hard cap on total trigger count.
    pub max_triggers: u32,

    /// Settle delay after stabilization, in milliseconds.
    pub settle_delay_ms: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            stability_threshold: 2,
            max_locate_failures: 3,
            max_triggers: 100,
            settle_delay_ms: 500,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: String,

    /// Enable console output.
    pub console_output: bool,

    /// Enable rolling file output under `log_dir`.
    pub file_output: bool,

    /// Directory for log files when file output is enabled.
    pub log_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_output: true,
            file_output: false,
            log_dir: "logs".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            fetch: FetchConfig::default(),
            crawl: CrawlConfig::default(),
            pagination: PaginationConfig::default(),
            identities: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file, validating before returning.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        let config: Self = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;

        config.validate()?;
        info!("Loaded configuration from {} ({} seeds)", path.display(), config.seeds.len());
        Ok(config)
    }

    /// Load from a file if it exists, otherwise fall back to defaults.
    /// A malformed existing file is still fatal.
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            info!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.backoff_ceiling_ms < self.fetch.backoff_base_ms {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "backoff ceiling ({}ms) is below backoff base ({}ms)",
                    self.fetch.backoff_ceiling_ms, self.fetch.backoff_base_ms
                ),
            });
        }
        if self.fetch.max_requests_per_second == 0 {
            return Err(ConfigError::Invalid {
                reason: "max_requests_per_second must be greater than 0".to_string(),
            });
        }
        if self.pagination.stability_threshold == 0 {
            return Err(ConfigError::Invalid {
                reason: "pagination stability_threshold must be greater than 0".to_string(),
            });
        }
        for seed in &self.seeds {
            if seed.source.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    reason: "seed entry with empty source name".to_string(),
                });
            }
        }
        for identity in &self.identities {
            if identity.user_agent.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    reason: "identity entry with empty user agent".to_string(),
                });
            }
        }
        Ok(())
    }
}
