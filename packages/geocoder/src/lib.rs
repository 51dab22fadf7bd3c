#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geocoding providers and the single-address fallback resolver.
//!
//! Converts free-form addresses to coordinates and address components
//! using a multi-provider strategy configured via TOML files in
//! `services/`:
//!
//! 1. **Nominatim / OpenStreetMap** (priority 1): free, 1 req/sec.
//! 2. **Photon** (priority 2): OSM-based, `GeoJSON` responses.
//! 3. **OpenCage** (priority 3): requires an API key, daily quota.
//!
//! Every provider implements [`GeocodeProvider`] and is paired with its
//! own [`rate_limit::RateGovernor`]. The [`fallback::FallbackResolver`]
//! walks them in priority order and always returns a row: the first
//! success, or an unresolved marker when every provider failed.

pub mod address;
pub mod fallback;
pub mod http;
pub mod nominatim;
pub mod normalize;
pub mod opencage;
pub mod photon;
pub mod rate_limit;
pub mod service_registry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::normalize::FieldMapping;
use crate::rate_limit::RateGovernor;

/// Address used to verify that a provider (and its credential) works.
pub const PROBE_ADDRESS: &str = "Tour Eiffel, Paris, France";

/// Result language used when none is configured.
pub const DEFAULT_LANGUAGE: &str = "fr";

/// Which external service an adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ProviderKind {
    /// Nominatim / `OpenStreetMap` search.
    Nominatim,
    /// Photon (komoot) search.
    Photon,
    /// `OpenCage` geocoding API.
    #[strum(to_string = "opencage", serialize = "open_cage")]
    OpenCage,
}

/// Why a single provider attempt failed. Always recovered by the
/// [`fallback::FallbackResolver`]; never surfaced past it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The provider refused the request because of its rate limit or
    /// quota.
    #[error("rate limit exceeded")]
    RateLimited,

    /// The provider answered but had no match for the address.
    #[error("no match found")]
    NotFound,

    /// The request failed or the response did not have the expected
    /// shape.
    #[error("malformed response: {message}")]
    Malformed {
        /// Description of what went wrong.
        message: String,
    },
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Malformed {
                message: format!("HTTP error: {e}"),
            }
        }
    }
}

/// Errors raised while turning service definitions into live providers.
/// These are configuration problems and abort the run before any
/// geocoding starts.
#[derive(Debug, Error)]
pub enum SetupError {
    /// A provider needs a credential that was not supplied.
    #[error("provider '{service}' requires an API key ({env_var})")]
    MissingApiKey {
        /// Service id.
        service: String,
        /// Environment variable expected to hold the key.
        env_var: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// A requested provider id is not in the registry.
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    /// No provider is enabled.
    #[error("no geocoding provider enabled")]
    NoProviders,

    /// The embedded service definitions are invalid.
    #[error(transparent)]
    Registry(#[from] service_registry::RegistryError),
}

/// Uniform single-provider query capability.
///
/// Each implementation owns its request construction and response
/// parsing. On success it returns the raw JSON of the best match, which
/// the [`normalize`] module maps into the canonical schema using the
/// adapter's [`FieldMapping`].
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    /// Human-readable provider name, written to the `encoder` column.
    fn name(&self) -> &str;

    /// Field-mapping table for this provider's raw payloads.
    fn field_mapping(&self) -> &FieldMapping;

    /// Sends one query to the provider, asking for results in
    /// `language` (ISO 639-1 code) where the service supports it.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] for timeouts, rate limiting, empty
    /// results, and unexpected responses.
    async fn geocode(&self, query: &str, language: &str)
        -> Result<serde_json::Value, ProviderError>;
}

/// The outcome of one provider call. Used for the fallback decision and
/// for logging only.
#[derive(Debug, Clone)]
pub struct GeocodeAttempt {
    /// Provider name.
    pub provider: String,
    /// Raw payload on success, the failure kind otherwise.
    pub outcome: Result<serde_json::Value, ProviderError>,
    /// Time spent in the provider call, excluding rate-governor waits.
    pub latency: Duration,
}

/// A provider paired with the governor that throttles it.
#[derive(Clone)]
pub struct GovernedProvider {
    provider: Arc<dyn GeocodeProvider>,
    governor: Arc<RateGovernor>,
}

impl GovernedProvider {
    /// Pairs `provider` with `governor`.
    #[must_use]
    pub fn new(provider: Arc<dyn GeocodeProvider>, governor: Arc<RateGovernor>) -> Self {
        Self { provider, governor }
    }

    /// Provider name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.provider.name()
    }

    /// The wrapped provider.
    #[must_use]
    pub fn provider(&self) -> &dyn GeocodeProvider {
        self.provider.as_ref()
    }

    /// The governor throttling this provider.
    #[must_use]
    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    /// Waits for rate budget, then performs one call bounded by
    /// `timeout`. Expiry is reported as [`ProviderError::Timeout`].
    pub async fn attempt(&self, query: &str, language: &str, timeout: Duration) -> GeocodeAttempt {
        self.governor.acquire().await;

        let start = tokio::time::Instant::now();
        let outcome = tokio::time::timeout(timeout, self.provider.geocode(query, language))
            .await
            .unwrap_or(Err(ProviderError::Timeout));

        GeocodeAttempt {
            provider: self.provider.name().to_string(),
            outcome,
            latency: start.elapsed(),
        }
    }
}

impl std::fmt::Debug for GovernedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernedProvider")
            .field("provider", &self.provider.name())
            .field("governor", &self.governor)
            .finish()
    }
}

/// Builds the shared HTTP client used by every provider.
///
/// # Errors
///
/// Returns [`SetupError::Client`] if the TLS backend fails to initialize.
pub fn build_http_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client, SetupError> {
    Ok(reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()?)
}
