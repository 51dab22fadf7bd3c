//! Photon geocoder client.
//!
//! Photon exposes an `/api` endpoint that accepts free-form text queries
//! and returns `GeoJSON` `FeatureCollection` responses built from
//! `OpenStreetMap` data. Only `default`, `en`, `de` and `fr` are accepted
//! as `lang`; anything else is sent as `default`.
//!
//! See <https://github.com/komoot/photon#search-api>

use async_trait::async_trait;

use crate::normalize::{FieldMapping, PHOTON};
use crate::{GeocodeProvider, ProviderError, http};

/// Languages the Photon API understands.
const SUPPORTED_LANGUAGES: &[&str] = &["default", "en", "de", "fr"];

/// Photon search client.
#[derive(Debug, Clone)]
pub struct PhotonProvider {
    client: reqwest::Client,
    base_url: String,
}

impl PhotonProvider {
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
impl GeocodeProvider for PhotonProvider {
    fn name(&self) -> &str {
        "Photon"
    }

    fn field_mapping(&self) -> &FieldMapping {
        &PHOTON
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
                ("limit", "1"),
                ("lang", photon_language(language)),
            ])
            .send()
            .await?;

        let body = http::read_json(resp).await?;
        parse_response(body)
    }
}

/// Maps a requested language onto one Photon accepts.
fn photon_language(language: &str) -> &'static str {
    SUPPORTED_LANGUAGES
        .iter()
        .find(|l| l.eq_ignore_ascii_case(language))
        .copied()
        .unwrap_or("default")
}

/// Extracts the first feature of a Photon `FeatureCollection`.
fn parse_response(mut body: serde_json::Value) -> Result<serde_json::Value, ProviderError> {
    let features = body
        .get_mut("features")
        .and_then(serde_json::Value::as_array_mut)
        .ok_or_else(|| ProviderError::Malformed {
            message: "Photon response missing 'features' array".to_string(),
        })?;

    if features.is_empty() {
        return Err(ProviderError::NotFound);
    }

    let first = features.swap_remove(0);
    if first.pointer("/geometry/coordinates").is_none() {
        return Err(ProviderError::Malformed {
            message: "Feature missing geometry.coordinates".to_string(),
        });
    }

    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_photon_feature() {
        let body = serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [2.2945, 48.8583] },
                "properties": { "name": "Tour Eiffel", "city": "Paris" }
            }]
        });
        let first = parse_response(body).unwrap();
        assert_eq!(first["properties"]["city"], "Paris");
    }

    #[test]
    fn parses_photon_empty() {
        let body = serde_json::json!({ "type": "FeatureCollection", "features": [] });
        assert_eq!(parse_response(body).unwrap_err(), ProviderError::NotFound);
    }

    #[test]
    fn rejects_feature_without_geometry() {
        let body = serde_json::json!({
            "features": [{ "type": "Feature", "properties": {} }]
        });
        assert!(matches!(
            parse_response(body),
            Err(ProviderError::Malformed { .. })
        ));
    }

    #[test]
    fn unsupported_language_falls_back_to_default() {
        assert_eq!(photon_language("es"), "default");
        assert_eq!(photon_language("FR"), "fr");
        assert_eq!(photon_language("en"), "en");
    }

    mod over_http {
        use std::time::Duration;

        use super::super::*;
        use crate::http::test_server::{Reply, TestServer, client};

        #[actix_web::test]
        async fn empty_collection_is_not_found_and_language_falls_back() {
            let body = serde_json::json!({ "type": "FeatureCollection", "features": [] });
            let server = TestServer::start(Reply::json(200, &body));
            let provider = PhotonProvider::new(client(Duration::from_secs(5)), &server.url);

            assert_eq!(
                provider.geocode("nowhere", "es").await.unwrap_err(),
                ProviderError::NotFound
            );
            assert!(server.queries()[0].contains("lang=default"));
        }

        #[actix_web::test]
        async fn server_error_is_malformed() {
            let server = TestServer::start(Reply::raw(500, "boom"));
            let provider = PhotonProvider::new(client(Duration::from_secs(5)), &server.url);
            assert!(matches!(
                provider.geocode("x", "fr").await,
                Err(ProviderError::Malformed { message }) if message.contains("500")
            ));
        }
    }
}
