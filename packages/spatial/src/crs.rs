//! Coordinate reference systems accepted for zone datasets.
//!
//! IRIS contours are published in Lambert-93 as well as WGS84. Projected
//! datasets are converted to WGS84 longitude/latitude while loading so the
//! index always compares against geocoder output directly.

use geo::{Coord, MapCoords as _, MultiPolygon};
use proj4rs::Proj;

/// RGF93 / Lambert-93, the French metropolitan projection.
const LAMBERT_93: &str = "+proj=lcc +lat_0=46.5 +lon_0=3 +lat_1=49 +lat_2=44 +x_0=700000 \
     +y_0=6600000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs";

/// Spherical web mercator.
const WEB_MERCATOR: &str =
    "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs";

const WGS84: &str = "+proj=longlat +ellps=WGS84 +datum=WGS84 +no_defs";

/// What a declared CRS name resolves to.
pub enum SourceCrs {
    /// Already longitude/latitude in WGS84.
    Wgs84,
    /// A projected system to convert from.
    Projected(Reprojector),
}

impl SourceCrs {
    /// Resolves a `GeoJSON` CRS name such as `urn:ogc:def:crs:EPSG::2154`.
    ///
    /// Returns `None` for systems with no known definition.
    ///
    /// # Errors
    ///
    /// Returns the proj error if a known definition fails to initialise.
    pub fn from_name(name: &str) -> Result<Option<Self>, proj4rs::errors::Error> {
        let upper = name.trim().to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Ok(Some(Self::Wgs84));
        }

        let definition = match epsg_code(&upper) {
            Some(4326) => return Ok(Some(Self::Wgs84)),
            Some(2154) => LAMBERT_93,
            Some(3857 | 900_913) => WEB_MERCATOR,
            _ => return Ok(None),
        };

        Reprojector::new(definition).map(|r| Some(Self::Projected(r)))
    }
}

/// Trailing EPSG code of names like `EPSG:2154` or `urn:ogc:def:crs:EPSG::2154`.
fn epsg_code(upper: &str) -> Option<u32> {
    let (_, code) = upper.rsplit_once("EPSG:")?;
    code.trim_start_matches(':').trim().parse().ok()
}

/// Converts projected coordinates to WGS84 degrees.
pub struct Reprojector {
    from: Proj,
    to: Proj,
}

impl Reprojector {
    /// # Errors
    ///
    /// Returns the proj error if `definition` is not a valid proj string.
    pub fn new(definition: &str) -> Result<Self, proj4rs::errors::Error> {
        Ok(Self {
            from: Proj::from_proj_string(definition)?,
            to: Proj::from_proj_string(WGS84)?,
        })
    }

    /// Projects one coordinate; `x` is easting, result `x` is longitude.
    ///
    /// # Errors
    ///
    /// Returns the proj error if the point cannot be transformed.
    pub fn point(&self, coord: Coord<f64>) -> Result<Coord<f64>, proj4rs::errors::Error> {
        let mut point = (coord.x, coord.y, 0.0);
        proj4rs::transform::transform(&self.from, &self.to, &mut point)?;
        Ok(Coord {
            x: point.0.to_degrees(),
            y: point.1.to_degrees(),
        })
    }

    /// Projects every vertex of `polygon`.
    ///
    /// # Errors
    ///
    /// Returns the first vertex error.
    pub fn polygon(
        &self,
        polygon: &MultiPolygon<f64>,
    ) -> Result<MultiPolygon<f64>, proj4rs::errors::Error> {
        polygon.try_map_coords(|c| self.point(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lambert() -> Reprojector {
        match SourceCrs::from_name("urn:ogc:def:crs:EPSG::2154").unwrap() {
            Some(SourceCrs::Projected(r)) => r,
            _ => panic!("Lambert-93 should be projected"),
        }
    }

    #[test]
    fn recognises_names() {
        assert!(matches!(
            SourceCrs::from_name("urn:ogc:def:crs:OGC:1.3:CRS84"),
            Ok(Some(SourceCrs::Wgs84))
        ));
        assert!(matches!(
            SourceCrs::from_name("EPSG:4326"),
            Ok(Some(SourceCrs::Wgs84))
        ));
        assert!(matches!(
            SourceCrs::from_name("epsg:3857"),
            Ok(Some(SourceCrs::Projected(_)))
        ));
        assert!(matches!(SourceCrs::from_name("EPSG:27572"), Ok(None)));
        assert!(matches!(SourceCrs::from_name("something"), Ok(None)));
    }

    #[test]
    fn lambert_false_origin_maps_to_its_centre() {
        let c = lambert()
            .point(Coord {
                x: 700_000.0,
                y: 6_600_000.0,
            })
            .unwrap();
        assert!((c.x - 3.0).abs() < 1e-6, "lon {}", c.x);
        assert!((c.y - 46.5).abs() < 1e-6, "lat {}", c.y);
    }

    #[test]
    fn lambert_paris_lands_in_paris() {
        let c = lambert()
            .point(Coord {
                x: 648_237.0,
                y: 6_862_271.0,
            })
            .unwrap();
        assert!((c.x - 2.2945).abs() < 0.01, "lon {}", c.x);
        assert!((c.y - 48.858).abs() < 0.01, "lat {}", c.y);
    }
}
