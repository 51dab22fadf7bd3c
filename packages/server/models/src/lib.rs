#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the address geocoder server.
//!
//! The geocoded table itself travels as CSV; these are the JSON bodies
//! around it.

use serde::{Deserialize, Serialize};

/// `GET /api/health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiHealth {
    pub healthy: bool,
    pub version: String,
}

/// JSON body returned for any non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

/// One entry of the provider chain, as reported by `GET /api/providers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiProvider {
    pub name: String,
    /// Position in the fallback chain, starting at 1.
    pub priority: usize,
    pub min_interval_ms: Option<u64>,
    pub quota: Option<u32>,
    pub quota_window_secs: Option<u64>,
}

/// Query parameters of `POST /api/geocode`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeocodeParams {
    /// Attach IRIS zone attributes. Defaults to the server setting.
    pub iris_geocoding: Option<bool>,
    /// Result language. Defaults to the server setting.
    pub language: Option<String>,
}
