#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Canonical types shared by every stage of the address geocoder.
//!
//! Input rows become [`AddressRecord`]s, are grouped into [`Chunk`]s for
//! the worker pool, come back as [`GeocodeResult`]s and, when IRIS
//! enrichment is enabled, leave the pipeline as [`EnrichedResult`]s
//! carrying the attributes of the containing [`ZoneAttributes`].

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Value of [`GeocodeResult::encoder`] when no provider matched.
pub const UNRESOLVED_ENCODER: &str = "none";

/// Column names of a geocoded output row, in output order.
pub const GEOCODE_COLUMNS: &[&str] = &[
    "street_number",
    "street_name",
    "postal_code",
    "city",
    "admin_level_1",
    "admin_level_2",
    "country",
    "latitude",
    "longitude",
    "location_type",
    "address_type",
    "raw_address",
    "encoder",
    "is_encoded",
];

/// Column names appended to each row when IRIS enrichment is enabled.
pub const ZONE_COLUMNS: &[&str] = &[
    "iris_code",
    "municipality_code",
    "municipality_name",
    "iris",
    "iris_name",
    "iris_type",
];

/// A single address to geocode. Immutable once read from the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Caller-supplied unique identifier, echoed on the output row.
    pub id: String,
    /// The address exactly as it appeared in the input.
    pub raw_address: String,
}

/// A contiguous slice of the input assigned to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of this chunk in the input (0-based).
    pub index: usize,
    /// Records in input order.
    pub records: Vec<AddressRecord>,
}

/// Canonical geocoding output, independent of the provider that
/// produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    /// House number.
    pub street_number: Option<String>,
    /// Street / road name.
    pub street_name: Option<String>,
    /// Postal code.
    pub postal_code: Option<String>,
    /// City or municipality name.
    pub city: Option<String>,
    /// First administrative level below country (county / département).
    pub admin_level_1: Option<String>,
    /// Second administrative level (state / région).
    pub admin_level_2: Option<String>,
    /// Country name.
    pub country: Option<String>,
    /// Latitude (WGS84).
    pub latitude: Option<f64>,
    /// Longitude (WGS84).
    pub longitude: Option<f64>,
    /// Provider-specific location class (e.g. `house`, `street`).
    pub location_type: Option<String>,
    /// Provider-specific address type (e.g. `building`, `road`).
    pub address_type: Option<String>,
    /// The input address this result was produced for.
    pub raw_address: String,
    /// Name of the provider that resolved the address, or
    /// [`UNRESOLVED_ENCODER`].
    pub encoder: String,
}

impl GeocodeResult {
    /// Builds the failure marker for an address no provider could match:
    /// every geographic field empty and `encoder = "none"`.
    #[must_use]
    pub fn unresolved(raw_address: impl Into<String>) -> Self {
        Self {
            raw_address: raw_address.into(),
            encoder: UNRESOLVED_ENCODER.to_string(),
            ..Self::default()
        }
    }

    /// Whether a provider matched this address.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.encoder != UNRESOLVED_ENCODER
    }

    /// Returns `(longitude, latitude)` when both are present and finite.
    #[must_use]
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.longitude, self.latitude) {
            (Some(lng), Some(lat)) if lng.is_finite() && lat.is_finite() => Some((lng, lat)),
            _ => None,
        }
    }

    /// Field values in [`GEOCODE_COLUMNS`] order, `None` rendered empty.
    #[must_use]
    pub fn column_values(&self) -> Vec<String> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        let num = |v: Option<f64>| v.map(|n| n.to_string()).unwrap_or_default();

        vec![
            opt(&self.street_number),
            opt(&self.street_name),
            opt(&self.postal_code),
            opt(&self.city),
            opt(&self.admin_level_1),
            opt(&self.admin_level_2),
            opt(&self.country),
            num(self.latitude),
            num(self.longitude),
            opt(&self.location_type),
            opt(&self.address_type),
            self.raw_address.clone(),
            self.encoder.clone(),
            self.is_resolved().to_string(),
        ]
    }
}

/// Attributes of an IRIS zone attached to an enriched row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneAttributes {
    /// Full IRIS code (`CODE_IRIS`, 9 characters).
    pub iris_code: String,
    /// INSEE municipality code (`INSEE_COM`).
    pub municipality_code: String,
    /// Municipality name (`NOM_COM`).
    pub municipality_name: String,
    /// IRIS number within the municipality (`IRIS`, 4 characters).
    pub iris: String,
    /// IRIS name (`NOM_IRIS`).
    pub iris_name: String,
    /// IRIS type (`TYP_IRIS`: H, A, D or Z).
    pub iris_type: String,
}

impl ZoneAttributes {
    /// Field values in [`ZONE_COLUMNS`] order.
    #[must_use]
    pub fn column_values(&self) -> Vec<String> {
        vec![
            self.iris_code.clone(),
            self.municipality_code.clone(),
            self.municipality_name.clone(),
            self.iris.clone(),
            self.iris_name.clone(),
            self.iris_type.clone(),
        ]
    }
}

/// A geocode result plus the (nullable) zone it falls in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedResult {
    /// The geocoding outcome.
    pub result: GeocodeResult,
    /// Containing zone; `None` when enrichment is off, the row has no
    /// coordinates, or the point lies outside every zone.
    pub zone: Option<ZoneAttributes>,
}

impl EnrichedResult {
    /// Wraps a result without zone attributes.
    #[must_use]
    pub const fn bare(result: GeocodeResult) -> Self {
        Self { result, zone: None }
    }
}

/// One row of the final output table.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    /// Identifier copied from the input record.
    pub id: String,
    /// Geocoding and enrichment outcome.
    pub enriched: EnrichedResult,
}

/// Why an input row was rejected before geocoding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InputRowErrorKind {
    /// The `id` column is empty.
    MissingId,
    /// The `address` column is empty or blank.
    MissingAddress,
    /// The `id` was already used by an earlier row.
    DuplicateId,
}

/// A malformed input row. Reported separately, never geocoded, and
/// never aborts the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("input row {line}: {kind}{}", id_suffix(.id.as_deref()))]
pub struct InputRowError {
    /// 1-based data row number (header excluded).
    pub line: u64,
    /// The row's id, when it had one.
    pub id: Option<String>,
    /// What was wrong with the row.
    pub kind: InputRowErrorKind,
}

fn id_suffix(id: Option<&str>) -> String {
    id.map(|i| format!(" (id '{i}')")).unwrap_or_default()
}
