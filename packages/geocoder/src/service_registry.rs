//! Compile-time registry of geocoding service configurations.
//!
//! Each geocoding provider is defined in a TOML file under `services/`.
//! The registry embeds these at compile time and checks them on load:
//! the `id` must match the file name, ids and priorities must be unique
//! and a daily quota must be positive. [`default_chain`] orders enabled
//! services by priority and leaves out those whose credential is absent;
//! [`select_services`] honours an explicit list instead.
//! [`build_providers`] turns the selected definitions into live,
//! rate-governed providers.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::nominatim::NominatimProvider;
use crate::opencage::OpenCageProvider;
use crate::photon::PhotonProvider;
use crate::rate_limit::{Quota, RateBudget, RateGovernor};
use crate::{GeocodeProvider, GovernedProvider, ProviderKind, SetupError};

/// A geocoding service configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingService {
    /// Unique identifier (e.g., `"nominatim"`, `"opencage"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Whether this service takes part in the default fallback chain.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fallback order. Lower values are tried first.
    pub priority: u32,
    /// Provider-specific configuration.
    pub provider: ProviderConfig,
}

/// Provider-specific configuration, tagged by `type` in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Nominatim / `OpenStreetMap` search.
    Nominatim {
        /// Search endpoint (e.g., `"https://nominatim.openstreetmap.org/search"`).
        base_url: String,
        /// Minimum delay between requests in milliseconds.
        rate_limit_ms: u64,
    },
    /// Photon search.
    Photon {
        /// Search endpoint (e.g., `"https://photon.komoot.io/api"`).
        base_url: String,
        /// Minimum delay between requests in milliseconds.
        rate_limit_ms: u64,
    },
    /// `OpenCage` geocoding API.
    OpenCage {
        /// JSON endpoint.
        base_url: String,
        /// Minimum delay between requests in milliseconds.
        rate_limit_ms: u64,
        /// Requests allowed per day.
        #[serde(default)]
        daily_quota: Option<u32>,
        /// Environment variable holding the API key.
        api_key_env: String,
    },
}

const fn default_true() -> bool {
    true
}

impl GeocodingService {
    /// The provider's endpoint.
    #[must_use]
    pub fn base_url(&self) -> &str {
        match &self.provider {
            ProviderConfig::Nominatim { base_url, .. }
            | ProviderConfig::Photon { base_url, .. }
            | ProviderConfig::OpenCage { base_url, .. } => base_url,
        }
    }

    /// Which adapter serves this definition.
    #[must_use]
    pub const fn kind(&self) -> ProviderKind {
        match self.provider {
            ProviderConfig::Nominatim { .. } => ProviderKind::Nominatim,
            ProviderConfig::Photon { .. } => ProviderKind::Photon,
            ProviderConfig::OpenCage { .. } => ProviderKind::OpenCage,
        }
    }

    /// Environment variable holding the credential, if one is needed.
    #[must_use]
    pub fn api_key_env(&self) -> Option<&str> {
        match &self.provider {
            ProviderConfig::OpenCage { api_key_env, .. } => Some(api_key_env),
            ProviderConfig::Nominatim { .. } | ProviderConfig::Photon { .. } => None,
        }
    }

    /// The request budget the provider's governor enforces.
    #[must_use]
    pub const fn budget(&self) -> RateBudget {
        let (rate_limit_ms, daily_quota) = match &self.provider {
            ProviderConfig::Nominatim { rate_limit_ms, .. }
            | ProviderConfig::Photon { rate_limit_ms, .. } => (*rate_limit_ms, None),
            ProviderConfig::OpenCage {
                rate_limit_ms,
                daily_quota,
                ..
            } => (*rate_limit_ms, *daily_quota),
        };

        RateBudget {
            min_interval: if rate_limit_ms == 0 {
                None
            } else {
                Some(Duration::from_millis(rate_limit_ms))
            },
            quota: match daily_quota {
                Some(max) => Some(Quota::per_day(max)),
                None => None,
            },
        }
    }
}

// ── Compile-time embedded TOML files ────────────────────────────────

/// `(file stem, contents)` of every service definition.
const SERVICE_TOMLS: &[(&str, &str)] = &[
    ("nominatim", include_str!("../services/nominatim.toml")),
    ("photon", include_str!("../services/photon.toml")),
    ("opencage", include_str!("../services/opencage.toml")),
];

/// A service definition breaks a registry rule.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The TOML does not describe a service.
    #[error("failed to parse service '{file}': {source}")]
    Parse {
        /// File stem of the definition.
        file: String,
        /// Parser error.
        source: toml::de::Error,
    },

    /// The `id` field differs from the file it was loaded from.
    #[error("service file '{file}' declares id '{id}'")]
    IdMismatch {
        /// File stem of the definition.
        file: String,
        /// Declared id.
        id: String,
    },

    /// Two definitions use the same id.
    #[error("service id '{0}' is defined twice")]
    DuplicateId(String),

    /// Two services claim the same place in the fallback order.
    #[error("services '{first}' and '{second}' share priority {priority}")]
    DuplicatePriority {
        /// Service sorted first.
        first: String,
        /// Service sorted second.
        second: String,
        /// Shared priority.
        priority: u32,
    },

    /// A daily quota of zero would block the provider forever.
    #[error("service '{0}' declares a daily quota of 0")]
    ZeroQuota(String),
}

/// Parses and checks service definitions given as `(file stem, TOML)`.
///
/// The result is sorted by priority, which is the default fallback order.
///
/// # Errors
///
/// Returns the first [`RegistryError`] found: unparsable TOML, an id that
/// differs from its file stem, a repeated id or priority, or a zero quota.
pub fn parse_services(sources: &[(&str, &str)]) -> Result<Vec<GeocodingService>, RegistryError> {
    let mut services = Vec::with_capacity(sources.len());
    let mut ids = BTreeSet::new();

    for (file, contents) in sources {
        let service: GeocodingService =
            toml::de::from_str(contents).map_err(|source| RegistryError::Parse {
                file: (*file).to_string(),
                source,
            })?;

        if service.id != *file {
            return Err(RegistryError::IdMismatch {
                file: (*file).to_string(),
                id: service.id,
            });
        }
        if !ids.insert(service.id.clone()) {
            return Err(RegistryError::DuplicateId(service.id));
        }
        if matches!(
            service.provider,
            ProviderConfig::OpenCage {
                daily_quota: Some(0),
                ..
            }
        ) {
            return Err(RegistryError::ZeroQuota(service.id));
        }

        services.push(service);
    }

    services.sort_by_key(|s| s.priority);
    if let Some(pair) = services.windows(2).find(|w| w[0].priority == w[1].priority) {
        return Err(RegistryError::DuplicatePriority {
            first: pair[0].id.clone(),
            second: pair[1].id.clone(),
            priority: pair[0].priority,
        });
    }

    Ok(services)
}

/// Every embedded service (enabled or not), in priority order.
///
/// # Errors
///
/// Returns [`RegistryError`] if an embedded definition breaks a registry
/// rule.
pub fn all_services() -> Result<Vec<GeocodingService>, RegistryError> {
    parse_services(SERVICE_TOMLS)
}

/// The default fallback chain: enabled services in priority order.
///
/// A service that needs a credential joins the chain only when `api_key`
/// holds one; otherwise it is skipped with a log line rather than failing
/// the run.
///
/// # Errors
///
/// * [`SetupError::Registry`] if the embedded definitions are invalid
/// * [`SetupError::NoProviders`] if nothing is left to try
pub fn default_chain(api_key: Option<&str>) -> Result<Vec<GeocodingService>, SetupError> {
    let has_key = api_key.is_some_and(|k| !k.trim().is_empty());
    let chain: Vec<GeocodingService> = all_services()?
        .into_iter()
        .filter(|s| s.enabled)
        .filter(|s| match s.api_key_env() {
            Some(env_var) if !has_key => {
                log::info!("Skipping {}: {env_var} is not set", s.name);
                false
            }
            _ => true,
        })
        .collect();

    if chain.is_empty() {
        return Err(SetupError::NoProviders);
    }
    Ok(chain)
}

/// Resolves the provider list of a run. The order of `ids` becomes the
/// fallback order; an empty list means [`default_chain`].
///
/// Explicitly named services are kept even without a credential, so
/// [`build_providers`] reports the missing key.
///
/// # Errors
///
/// * [`SetupError::UnknownProvider`] if an id is not in the registry
/// * [`SetupError::NoProviders`] if the selection is empty
/// * [`SetupError::Registry`] if the embedded definitions are invalid
pub fn select_services(
    ids: &[String],
    api_key: Option<&str>,
) -> Result<Vec<GeocodingService>, SetupError> {
    if ids.is_empty() {
        return default_chain(api_key);
    }

    let registry = all_services()?;
    let mut selected: Vec<GeocodingService> = Vec::with_capacity(ids.len());
    for id in ids {
        let id = id.trim();
        let kind = id.parse::<ProviderKind>().ok();
        let service = registry
            .iter()
            .find(|s| s.id.eq_ignore_ascii_case(id) || Some(s.kind()) == kind)
            .ok_or_else(|| SetupError::UnknownProvider(id.to_string()))?;
        if !selected.iter().any(|s| s.id == service.id) {
            selected.push(service.clone());
        }
    }

    if selected.is_empty() {
        return Err(SetupError::NoProviders);
    }
    Ok(selected)
}

/// Builds one governed provider per service, preserving order.
///
/// Every provider gets its own [`RateGovernor`]; governors are never
/// shared between providers.
///
/// # Errors
///
/// * [`SetupError::MissingApiKey`] if `OpenCage` is selected without a key
/// * [`SetupError::NoProviders`] if `services` is empty
pub fn build_providers(
    services: &[GeocodingService],
    client: &reqwest::Client,
    opencage_api_key: Option<&str>,
) -> Result<Vec<GovernedProvider>, SetupError> {
    if services.is_empty() {
        return Err(SetupError::NoProviders);
    }

    services
        .iter()
        .map(|service| {
            let provider: Arc<dyn GeocodeProvider> = match &service.provider {
                ProviderConfig::Nominatim { base_url, .. } => {
                    Arc::new(NominatimProvider::new(client.clone(), base_url))
                }
                ProviderConfig::Photon { base_url, .. } => {
                    Arc::new(PhotonProvider::new(client.clone(), base_url))
                }
                ProviderConfig::OpenCage {
                    base_url,
                    api_key_env,
                    ..
                } => {
                    let api_key = opencage_api_key
                        .filter(|k| !k.trim().is_empty())
                        .ok_or_else(|| SetupError::MissingApiKey {
                            service: service.id.clone(),
                            env_var: api_key_env.clone(),
                        })?;
                    Arc::new(OpenCageProvider::new(client.clone(), base_url, api_key))
                }
            };

            let governor = Arc::new(RateGovernor::new(&service.name, service.budget()));
            log::debug!(
                "Provider {} (priority {}) budget: {:?}",
                service.name,
                service.priority,
                governor.budget()
            );

            Ok(GovernedProvider::new(provider, governor))
        })
        .collect()
}
