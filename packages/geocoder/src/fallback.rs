//! Ordered provider fallback for a single address.
//!
//! The [`FallbackResolver`] tries each provider strictly in priority
//! order and stops at the first success. Any [`ProviderError`] moves on
//! to the next provider. When the list is exhausted the address still
//! gets a row: [`GeocodeResult::unresolved`] with `encoder = "none"`.
//! Provider errors never escape [`FallbackResolver::resolve`].

use std::time::Duration;

use address_geocoder_models::GeocodeResult;

use crate::address::prepare_query;
use crate::normalize::normalize;
use crate::{DEFAULT_LANGUAGE, GovernedProvider, PROBE_ADDRESS, ProviderError};

/// Summary of one provider call, kept for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptLog {
    /// Provider name.
    pub provider: String,
    /// `None` on success.
    pub error: Option<ProviderError>,
    /// Time spent in the provider call.
    pub latency: Duration,
}

/// Outcome of resolving one address.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The canonical row for the address (resolved or not).
    pub result: GeocodeResult,
    /// Every provider call made, in order.
    pub attempts: Vec<AttemptLog>,
    /// Number of providers configured, for "attempt i/n" reporting.
    pub provider_count: usize,
}

impl Resolution {
    /// The last provider error, when every attempt failed.
    #[must_use]
    pub fn last_error(&self) -> Option<&ProviderError> {
        self.attempts.iter().rev().find_map(|a| a.error.as_ref())
    }
}

/// Tries providers in a fixed priority order for one address at a time.
#[derive(Debug, Clone)]
pub struct FallbackResolver {
    providers: Vec<GovernedProvider>,
    timeout: Duration,
    max_query_len: usize,
    language: String,
}

impl FallbackResolver {
    /// Creates a resolver. `providers` must already be in priority
    /// order; that order is fixed for the resolver's lifetime.
    #[must_use]
    pub fn new(providers: Vec<GovernedProvider>, timeout: Duration, max_query_len: usize) -> Self {
        Self {
            providers,
            timeout,
            max_query_len,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    /// Returns a resolver asking providers for results in `language`.
    ///
    /// The providers and their rate governors are shared with `self`, so
    /// both resolvers draw from the same request budget.
    #[must_use]
    pub fn with_language(&self, language: &str) -> Self {
        Self {
            language: language.to_string(),
            ..self.clone()
        }
    }

    /// Result language sent to providers.
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Per-call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends [`PROBE_ADDRESS`] to every provider, without fallback, to
    /// check that each one (and its credential) works.
    pub async fn probe(&self) -> Vec<AttemptLog> {
        let mut results = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let attempt = provider
                .attempt(PROBE_ADDRESS, &self.language, self.timeout)
                .await;
            results.push(AttemptLog {
                provider: attempt.provider,
                error: attempt.outcome.err(),
                latency: attempt.latency,
            });
        }
        results
    }

    /// The providers in priority order.
    #[must_use]
    pub fn providers(&self) -> &[GovernedProvider] {
        &self.providers
    }

    /// Resolves `address`, always returning a result row.
    pub async fn resolve(&self, address: &str) -> Resolution {
        let query = prepare_query(address, self.max_query_len);
        let mut attempts = Vec::with_capacity(self.providers.len());

        if query.is_empty() {
            return Resolution {
                result: GeocodeResult::unresolved(address),
                attempts,
                provider_count: self.providers.len(),
            };
        }

        for provider in &self.providers {
            let attempt = provider
                .attempt(&query, &self.language, self.timeout)
                .await;

            match attempt.outcome {
                Ok(payload) => {
                    attempts.push(AttemptLog {
                        provider: attempt.provider,
                        error: None,
                        latency: attempt.latency,
                    });

                    let result = normalize(
                        provider.provider().field_mapping(),
                        &payload,
                        address,
                        provider.name(),
                    );

                    return Resolution {
                        result,
                        attempts,
                        provider_count: self.providers.len(),
                    };
                }
                Err(e) => {
                    log::debug!(
                        "{} failed for '{query}' after {:?}: {e}",
                        attempt.provider,
                        attempt.latency
                    );
                    attempts.push(AttemptLog {
                        provider: attempt.provider,
                        error: Some(e),
                        latency: attempt.latency,
                    });
                }
            }
        }

        Resolution {
            result: GeocodeResult::unresolved(address),
            attempts,
            provider_count: self.providers.len(),
        }
    }
}
