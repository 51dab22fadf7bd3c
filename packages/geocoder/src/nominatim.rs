//! Nominatim / OpenStreetMap geocoder client.
//!
//! Primary provider. The public instance allows **1 request per second**
//! and requires an identifying `User-Agent`; both are handled outside
//! this module (rate governor and shared HTTP client).
//!
//! See <https://nominatim.org/release-docs/develop/api/Search/>

use async_trait::async_trait;

use crate::normalize::{FieldMapping, NOMINATIM};
use crate::{GeocodeProvider, ProviderError, http};

/// Nominatim free-form search client.
#[derive(Debug, Clone)]
pub struct NominatimProvider {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimProvider {
    /// Creates a client for the search endpoint at `base_url`.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
        }
    }
}

#[async_trait]
impl GeocodeProvider for NominatimProvider {
    fn name(&self) -> &str {
        "Nominatim"
    }

    fn field_mapping(&self) -> &FieldMapping {
        &NOMINATIM
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
                ("format", "jsonv2"),
                ("addressdetails", "1"),
                ("limit", "1"),
                ("accept-language", language),
            ])
            .send()
            .await?;

        let body = http::read_json(resp).await?;
        parse_response(body)
    }
}

/// Extracts the best match from a Nominatim JSON array response.
fn parse_response(body: serde_json::Value) -> Result<serde_json::Value, ProviderError> {
    let serde_json::Value::Array(results) = body else {
        return Err(ProviderError::Malformed {
            message: "Nominatim response is not an array".to_string(),
        });
    };

    results.into_iter().next().ok_or(ProviderError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nominatim_result() {
        let body = serde_json::json!([{
            "lat": "48.8582599",
            "lon": "2.2945006",
            "display_name": "Tour Eiffel, 5, Avenue Anatole France, Paris, France"
        }]);
        let first = parse_response(body).unwrap();
        assert_eq!(first["lat"], "48.8582599");
    }

    #[test]
    fn parses_nominatim_empty() {
        let body = serde_json::json!([]);
        assert_eq!(parse_response(body).unwrap_err(), ProviderError::NotFound);
    }

    #[test]
    fn rejects_non_array() {
        let body = serde_json::json!({ "error": "Unable to geocode" });
        assert!(matches!(
            parse_response(body),
            Err(ProviderError::Malformed { .. })
        ));
    }

    mod over_http {
        use std::time::Duration;

        use super::super::*;
        use crate::http::test_server::{Reply, TestServer, client};

        async fn geocode(reply: Reply) -> (Result<serde_json::Value, ProviderError>, TestServer) {
            let server = TestServer::start(reply);
            let provider = NominatimProvider::new(client(Duration::from_secs(5)), &server.url);
            let result = provider.geocode("10 Downing Street, London", "en").await;
            (result, server)
        }

        #[actix_web::test]
        async fn sends_query_and_language() {
            let body = serde_json::json!([{ "lat": "51.5034", "lon": "-0.1276", "address": {} }]);
            let (result, server) = geocode(Reply::json(200, &body)).await;

            assert_eq!(result.unwrap()["lat"], "51.5034");
            let queries = server.queries();
            assert_eq!(queries.len(), 1);
            assert!(queries[0].contains("accept-language=en"), "{}", queries[0]);
            assert!(queries[0].contains("format=jsonv2"));
            assert!(queries[0].contains("q=10+Downing+Street%2C+London"));
        }

        #[actix_web::test]
        async fn too_many_requests_is_rate_limited() {
            let (result, _server) = geocode(Reply::raw(429, "slow down")).await;
            assert_eq!(result.unwrap_err(), ProviderError::RateLimited);
        }

        #[actix_web::test]
        async fn gateway_and_request_timeouts_are_timeouts() {
            let (result, _server) = geocode(Reply::raw(504, "")).await;
            assert_eq!(result.unwrap_err(), ProviderError::Timeout);
            let (result, _server) = geocode(Reply::raw(408, "")).await;
            assert_eq!(result.unwrap_err(), ProviderError::Timeout);
        }

        #[actix_web::test]
        async fn invalid_json_is_malformed() {
            let (result, _server) = geocode(Reply::raw(200, "<html>maintenance</html>")).await;
            assert!(matches!(
                result,
                Err(ProviderError::Malformed { message }) if message.contains("maintenance")
            ));
        }

        #[actix_web::test]
        async fn empty_array_is_not_found() {
            let (result, _server) = geocode(Reply::json(200, &serde_json::json!([]))).await;
            assert_eq!(result.unwrap_err(), ProviderError::NotFound);
        }

        #[actix_web::test]
        async fn slow_server_hits_client_timeout() {
            let server = TestServer::start(
                Reply::json(200, &serde_json::json!([])).slow(Duration::from_secs(3)),
            );
            let provider =
                NominatimProvider::new(client(Duration::from_millis(200)), &server.url);
            assert_eq!(
                provider.geocode("x", "fr").await.unwrap_err(),
                ProviderError::Timeout
            );
        }
    }
}
