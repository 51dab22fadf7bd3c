#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial index for IRIS zone attribution.
//!
//! Loads IRIS polygons from `GeoJSON` files at startup, builds an R-tree
//! over their bounding boxes, and provides fast point-in-polygon
//! lookups. The index is built once before any geocoding starts and is
//! read-only afterwards, so it can be shared across workers behind an
//! `Arc` without locking.

pub mod crs;
pub mod loader;

use std::path::PathBuf;

use address_geocoder_models::{EnrichedResult, GeocodeResult, ZoneAttributes};
use geo::{Contains, MultiPolygon};
use rstar::{AABB, RTree, RTreeObject};
use thiserror::Error;

/// Errors raised while loading the zone reference dataset. Always fatal:
/// a run with enrichment enabled never starts without its zones.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// The dataset path does not exist.
    #[error("zone dataset not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// File or directory being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A file is not a valid `GeoJSON` `FeatureCollection`.
    #[error("failed to parse {}: {message}", .path.display())]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Description of what went wrong.
        message: String,
    },

    /// A feature lacks a required property.
    #[error("{}: feature {feature} has no '{property}' property", .path.display())]
    MissingProperty {
        /// Offending file.
        path: PathBuf,
        /// 0-based index of the feature in its collection.
        feature: usize,
        /// Missing property name.
        property: &'static str,
    },

    /// The file declares a coordinate reference system with no known
    /// definition.
    #[error("{}: unsupported CRS '{crs}' (expected WGS84, Lambert-93 or web mercator)", .path.display())]
    UnsupportedCrs {
        /// Offending file.
        path: PathBuf,
        /// Declared CRS name.
        crs: String,
    },

    /// A zone could not be converted to WGS84.
    #[error("{}: reprojection failed: {message}", .path.display())]
    Reproject {
        /// Offending file.
        path: PathBuf,
        /// Description of what went wrong.
        message: String,
    },

    /// The dataset contained no usable zone.
    #[error("no zones found in {}", .0.display())]
    Empty(PathBuf),
}

/// A zone polygon stored in the R-tree with its attributes.
#[derive(Debug, Clone)]
pub struct ZonePolygon {
    attributes: ZoneAttributes,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl ZonePolygon {
    /// Pairs `attributes` with its geometry (WGS84, `x` = longitude).
    #[must_use]
    pub fn new(attributes: ZoneAttributes, polygon: MultiPolygon<f64>) -> Self {
        let envelope = compute_envelope(&polygon);
        Self {
            attributes,
            envelope,
            polygon,
        }
    }

    /// The zone's attributes.
    #[must_use]
    pub const fn attributes(&self) -> &ZoneAttributes {
        &self.attributes
    }
}

impl RTreeObject for ZonePolygon {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Pre-built spatial index over IRIS zones.
pub struct ZoneIndex {
    zones: RTree<ZonePolygon>,
}

impl std::fmt::Debug for ZoneIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneIndex")
            .field("zones", &self.zones.size())
            .finish()
    }
}

impl ZoneIndex {
    /// Bulk-loads `zones` into an R-tree.
    #[must_use]
    pub fn new(zones: Vec<ZonePolygon>) -> Self {
        Self {
            zones: RTree::bulk_load(zones),
        }
    }

    /// Loads every `GeoJSON` file under `path` (or `path` itself if it is
    /// a file) and builds the index.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the dataset is missing, unreadable,
    /// malformed, not WGS84, or contains no zones.
    pub fn load(path: &std::path::Path) -> Result<Self, SpatialError> {
        let zones = loader::load_path(path)?;
        let index = Self::new(zones);
        log::info!("Loaded {} IRIS zones into spatial index", index.len());
        Ok(index)
    }

    /// Number of indexed zones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.size()
    }

    /// Whether the index holds no zones.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zones.size() == 0
    }

    /// Looks up the zone containing the point.
    ///
    /// IRIS zones tile the territory without overlap. If several zones
    /// contain the point anyway, the smallest `iris_code` wins so the
    /// answer does not depend on tree layout.
    #[must_use]
    pub fn lookup(&self, lng: f64, lat: f64) -> Option<&ZoneAttributes> {
        if !lng.is_finite() || !lat.is_finite() {
            return None;
        }

        let point = geo::Point::new(lng, lat);
        let query_env = AABB::from_point([lng, lat]);

        self.zones
            .locate_in_envelope_intersecting(&query_env)
            .filter(|zone| zone.polygon.contains(&point))
            .map(|zone| &zone.attributes)
            .min_by(|a, b| a.iris_code.cmp(&b.iris_code))
    }

    /// Attaches the containing zone to `result`. Rows without coordinates
    /// or outside every zone get no zone attributes.
    #[must_use]
    pub fn enrich(&self, result: GeocodeResult) -> EnrichedResult {
        let zone = result
            .coordinates()
            .and_then(|(lng, lat)| self.lookup(lng, lat))
            .cloned();

        EnrichedResult { result, zone }
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    use geo::BoundingRect;

    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}
