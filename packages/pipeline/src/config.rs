//! Run configuration.
//!
//! [`GeocoderConfig`] is built once at the binary edge (from environment
//! variables, then overridden by CLI flags or request parameters),
//! validated, and passed down by reference. Nothing below this module
//! reads the environment.

use std::path::PathBuf;
use std::time::Duration;

use address_geocoder::DEFAULT_LANGUAGE;
use address_geocoder::address::MAX_QUERY_LEN;
use thiserror::Error;

/// Default number of concurrent workers.
pub const DEFAULT_MAX_WORKERS: usize = 4;
/// Default number of addresses per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 100;
/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
/// Default directory holding the IRIS `GeoJSON` files.
pub const DEFAULT_IRIS_DIR: &str = "data/iris_geojson";
/// Default attempts per address when the resolver fails unexpectedly.
pub const DEFAULT_MAX_RETRY_NO: usize = 3;
/// Default delay before the first retry, in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 1;
/// Default `User-Agent` sent to providers.
pub const DEFAULT_USER_AGENT: &str = "address-geocoder";

/// Invalid configuration. Always fatal before any chunk is scheduled.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable or option could not be parsed.
    #[error("invalid value '{value}' for {name}: expected {expected}")]
    InvalidValue {
        /// Variable or option name.
        name: String,
        /// Offending value.
        value: String,
        /// What was expected.
        expected: &'static str,
    },

    /// A numeric setting is out of range.
    #[error("{name} must be at least 1")]
    Zero {
        /// Setting name.
        name: &'static str,
    },

    /// The result language is empty.
    #[error("language must not be empty")]
    EmptyLanguage,
}

/// Immutable settings for one geocoding run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeocoderConfig {
    /// Number of concurrent workers (`MAX_WORKERS`).
    pub max_workers: usize,
    /// Addresses per chunk (`CHUNKSIZE`).
    pub chunk_size: usize,
    /// Addresses resolved concurrently inside one chunk
    /// (`CHUNK_CONCURRENCY`).
    pub chunk_concurrency: usize,
    /// Attach IRIS zone attributes to results (`IRIS_GEOCODING`).
    pub iris_geocoding_enabled: bool,
    /// Directory of IRIS `GeoJSON` files (`IRIS_GEOJSON_DIR`).
    pub iris_geojson_dir: PathBuf,
    /// Timeout for one provider call (`REQUEST_TIMEOUT_SECS`).
    pub request_timeout: Duration,
    /// Result language (`GEOCODER_LANGUAGE`).
    pub language: String,
    /// Maximum query length in characters.
    pub max_address_length: usize,
    /// `User-Agent` header (`GEOCODER_USER_AGENT`).
    pub user_agent: String,
    /// Provider ids in fallback order (`GEOCODER_PROVIDERS`). Empty means
    /// every enabled provider in registry priority order.
    pub providers: Vec<String>,
    /// `OpenCage` credential (`OPENCAGE_API_KEY`).
    pub opencage_api_key: Option<String>,
    /// Attempts per address after an unexpected failure (`MAX_RETRY_NO`).
    pub max_retry_no: usize,
    /// Delay before the first retry, doubled each time (`RETRY_DELAY`,
    /// in seconds).
    pub retry_delay: Duration,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_concurrency: 1,
            iris_geocoding_enabled: false,
            iris_geojson_dir: PathBuf::from(DEFAULT_IRIS_DIR),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            language: DEFAULT_LANGUAGE.to_string(),
            max_address_length: MAX_QUERY_LEN,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            providers: Vec::new(),
            opencage_api_key: None,
            max_retry_no: DEFAULT_MAX_RETRY_NO,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

impl GeocoderConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable
    /// name to its value. Unset or blank variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an invalid value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("MAX_WORKERS") {
            config.max_workers = parse_count("MAX_WORKERS", &v)?;
        }
        if let Some(v) = get("CHUNKSIZE") {
            config.chunk_size = parse_count("CHUNKSIZE", &v)?;
        }
        if let Some(v) = get("CHUNK_CONCURRENCY") {
            config.chunk_concurrency = parse_count("CHUNK_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("IRIS_GEOCODING") {
            config.iris_geocoding_enabled = parse_bool("IRIS_GEOCODING", &v)?;
        }
        if let Some(v) = get("IRIS_GEOJSON_DIR") {
            config.iris_geojson_dir = PathBuf::from(v.trim());
        }
        if let Some(v) = get("REQUEST_TIMEOUT_SECS") {
            let secs = parse_count("REQUEST_TIMEOUT_SECS", &v)?;
            config.request_timeout = Duration::from_secs(secs as u64);
        }
        if let Some(v) = get("GEOCODER_LANGUAGE") {
            config.language = v.trim().to_string();
        }
        if let Some(v) = get("GEOCODER_USER_AGENT") {
            config.user_agent = v.trim().to_string();
        }
        if let Some(v) = get("GEOCODER_PROVIDERS") {
            config.providers = parse_list(&v);
        }
        if let Some(v) = get("MAX_RETRY_NO") {
            config.max_retry_no = parse_count("MAX_RETRY_NO", &v)?;
        }
        if let Some(v) = get("RETRY_DELAY") {
            config.retry_delay = parse_secs("RETRY_DELAY", &v)?;
        }
        config.opencage_api_key = get("OPENCAGE_API_KEY").map(|k| k.trim().to_string());

        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants every run relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a count is zero or the language is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("max_workers", self.max_workers),
            ("chunk_size", self.chunk_size),
            ("chunk_concurrency", self.chunk_concurrency),
            ("max_retry_no", self.max_retry_no),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { name });
            }
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Zero {
                name: "request_timeout",
            });
        }
        if self.language.trim().is_empty() {
            return Err(ConfigError::EmptyLanguage);
        }
        Ok(())
    }
}

fn parse_count(name: &str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            expected: "an integer >= 1",
        }),
    }
}

fn parse_secs(name: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            expected: "a non-negative number of seconds",
        })
}

/// Parses a boolean the way shell users write them.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] for anything other than
/// `true/false`, `1/0`, `yes/no` or `on/off` (case-insensitive).
pub fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            expected: "a boolean",
        }),
    }
}

/// Splits a comma-separated list, dropping blank entries.
#[must_use]
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
