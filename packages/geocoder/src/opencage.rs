//! `OpenCage` geocoder client.
//!
//! Last-resort provider. Requires an API key (`OPENCAGE_API_KEY`); the
//! free tier allows 1 request per second and 2,500 requests per day.
//! Quota exhaustion is reported with HTTP 402 and treated like a rate
//! limit.
//!
//! See <https://opencagedata.com/api>

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::normalize::{FieldMapping, OPENCAGE};
use crate::{GeocodeProvider, ProviderError, http};

/// `OpenCage` forward-geocoding client.
#[derive(Clone)]
pub struct OpenCageProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenCageProvider {
    /// Creates a client for the JSON endpoint at `base_url`.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

impl std::fmt::Debug for OpenCageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenCageProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl GeocodeProvider for OpenCageProvider {
    fn name(&self) -> &str {
        "OpenCage"
    }

    fn field_mapping(&self) -> &FieldMapping {
        &OPENCAGE
    }

    async fn geocode(
        &self,
        query: &str,
        language: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", query),
                ("key", self.api_key.as_str()),
                ("language", language),
                ("limit", "1"),
                ("no_annotations", "1"),
            ])
            .send()
            .await?;

        if resp.status() == StatusCode::PAYMENT_REQUIRED {
            return Err(ProviderError::RateLimited);
        }

        let body = http::read_json(resp).await?;
        parse_response(body)
    }
}

/// Extracts the first entry of the `results` array.
fn parse_response(mut body: serde_json::Value) -> Result<serde_json::Value, ProviderError> {
    if let Some(code) = body.pointer("/status/code").and_then(serde_json::Value::as_u64) {
        match code {
            200 => {}
            402 | 429 => return Err(ProviderError::RateLimited),
            _ => {
                let message = body
                    .pointer("/status/message")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown error");
                return Err(ProviderError::Malformed {
                    message: format!("OpenCage status {code}: {message}"),
                });
            }
        }
    }

    let results = body
        .get_mut("results")
        .and_then(serde_json::Value::as_array_mut)
        .ok_or_else(|| ProviderError::Malformed {
            message: "OpenCage response missing 'results' array".to_string(),
        })?;

    if results.is_empty() {
        return Err(ProviderError::NotFound);
    }

    Ok(results.swap_remove(0))
}
