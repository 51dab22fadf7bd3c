//! `GeoJSON` loading for the IRIS reference dataset.
//!
//! The dataset is one or more `FeatureCollection` files, usually one per
//! département. Each feature carries the IRIS properties `CODE_IRIS`,
//! `INSEE_COM`, `NOM_COM`, `IRIS`, `NOM_IRIS` and `TYP_IRIS` and a
//! `Polygon` or `MultiPolygon` geometry. Collections declaring Lambert-93
//! or web mercator through the legacy `crs` member are reprojected to
//! WGS84 on load.

use std::path::{Path, PathBuf};

use address_geocoder_models::ZoneAttributes;
use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, GeoJson};

use crate::crs::{Reprojector, SourceCrs};
use crate::{SpatialError, ZonePolygon};

const CODE_IRIS: &str = "CODE_IRIS";
const INSEE_COM: &str = "INSEE_COM";
const NOM_COM: &str = "NOM_COM";
const IRIS: &str = "IRIS";
const NOM_IRIS: &str = "NOM_IRIS";
const TYP_IRIS: &str = "TYP_IRIS";

/// File extensions considered part of the dataset.
const EXTENSIONS: &[&str] = &["geojson", "json"];

/// Loads zones from `path`, a single file or a directory of files.
///
/// Directory entries are read in file-name order so the resulting zone
/// list is deterministic.
///
/// # Errors
///
/// Returns [`SpatialError`] on missing paths, read or parse failures,
/// missing `CODE_IRIS`, an unknown CRS, or an empty dataset.
pub fn load_path(path: &Path) -> Result<Vec<ZonePolygon>, SpatialError> {
    if !path.exists() {
        return Err(SpatialError::NotFound(path.to_path_buf()));
    }

    let files = if path.is_dir() {
        list_dataset_files(path)?
    } else {
        vec![path.to_path_buf()]
    };

    let mut zones = Vec::new();
    for file in &files {
        let contents = std::fs::read_to_string(file).map_err(|source| SpatialError::Io {
            path: file.clone(),
            source,
        })?;
        let loaded = parse_collection(&contents, file)?;
        log::debug!("Loaded {} zones from {}", loaded.len(), file.display());
        zones.extend(loaded);
    }

    if zones.is_empty() {
        return Err(SpatialError::Empty(path.to_path_buf()));
    }

    Ok(zones)
}

fn list_dataset_files(dir: &Path) -> Result<Vec<PathBuf>, SpatialError> {
    let io_err = |source| SpatialError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_dataset = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)));
        if path.is_file() && is_dataset {
            files.push(path);
        }
    }
    files.sort();

    Ok(files)
}

/// Parses one `FeatureCollection` document.
///
/// Features without geometry, or with a geometry that is not a polygon,
/// are skipped with a warning.
///
/// # Errors
///
/// Returns [`SpatialError`] if the document is not a `FeatureCollection`,
/// declares an unknown CRS, or a feature lacks `CODE_IRIS`.
pub fn parse_collection(contents: &str, path: &Path) -> Result<Vec<ZonePolygon>, SpatialError> {
    let parse_err = |message: String| SpatialError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let geojson: GeoJson = contents.parse().map_err(|e| parse_err(format!("{e}")))?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(parse_err("expected a FeatureCollection".to_string()));
    };

    let reprojector = source_crs(&collection, path)?;

    let mut zones = Vec::with_capacity(collection.features.len());
    for (i, feature) in collection.features.into_iter().enumerate() {
        let attributes = zone_attributes(&feature, i, path)?;

        let Some(polygon) = feature.geometry.and_then(to_multipolygon) else {
            log::warn!(
                "{}: skipping zone {} without polygon geometry",
                path.display(),
                attributes.iris_code
            );
            continue;
        };

        let polygon = match &reprojector {
            Some(r) => r.polygon(&polygon).map_err(|e| SpatialError::Reproject {
                path: path.to_path_buf(),
                message: format!("zone {}: {e}", attributes.iris_code),
            })?,
            None => polygon,
        };

        zones.push(ZonePolygon::new(attributes, polygon));
    }

    Ok(zones)
}

/// Reads the legacy `crs` member. A missing `crs` means WGS84 per
/// RFC 7946; a projected one yields the converter to apply.
fn source_crs(
    collection: &FeatureCollection,
    path: &Path,
) -> Result<Option<Reprojector>, SpatialError> {
    let Some(name) = collection
        .foreign_members
        .as_ref()
        .and_then(|m| m.get("crs"))
        .and_then(|crs| crs.pointer("/properties/name"))
        .and_then(serde_json::Value::as_str)
    else {
        return Ok(None);
    };

    let unsupported = || SpatialError::UnsupportedCrs {
        path: path.to_path_buf(),
        crs: name.to_string(),
    };

    match SourceCrs::from_name(name) {
        Ok(Some(SourceCrs::Wgs84)) => Ok(None),
        Ok(Some(SourceCrs::Projected(r))) => {
            log::info!("{}: reprojecting from {name} to WGS84", path.display());
            Ok(Some(r))
        }
        Ok(None) => Err(unsupported()),
        Err(e) => {
            log::error!("{}: cannot set up {name}: {e}", path.display());
            Err(unsupported())
        }
    }
}

fn zone_attributes(
    feature: &Feature,
    index: usize,
    path: &Path,
) -> Result<ZoneAttributes, SpatialError> {
    let iris_code =
        property(feature, CODE_IRIS).ok_or_else(|| SpatialError::MissingProperty {
            path: path.to_path_buf(),
            feature: index,
            property: CODE_IRIS,
        })?;

    Ok(ZoneAttributes {
        iris_code,
        municipality_code: property(feature, INSEE_COM).unwrap_or_default(),
        municipality_name: property(feature, NOM_COM).unwrap_or_default(),
        iris: property(feature, IRIS).unwrap_or_default(),
        iris_name: property(feature, NOM_IRIS).unwrap_or_default(),
        iris_type: property(feature, TYP_IRIS).unwrap_or_default(),
    })
}

/// Reads a property as text; numeric codes are stringified.
fn property(feature: &Feature, name: &str) -> Option<String> {
    match feature.property(name)? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn to_multipolygon(geometry: geojson::Geometry) -> Option<MultiPolygon<f64>> {
    let geo_geom: geo::Geometry<f64> = geometry.try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}
