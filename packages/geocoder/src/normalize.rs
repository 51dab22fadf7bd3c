//! Maps raw provider payloads onto the canonical [`GeocodeResult`].
//!
//! Each provider describes where its fields live with a [`FieldMapping`]
//! of JSON pointers. A field may list several pointers; the first one
//! that resolves to a non-empty value wins. Anything missing becomes
//! `None`; normalization never fails.
//!
//! Known gaps: Nominatim and `OpenCage` report small settlements under
//! `town` / `village` rather than `city`, so `city` stays empty for them.

use address_geocoder_models::GeocodeResult;

/// JSON-pointer table locating each canonical field in a raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    /// House number.
    pub street_number: &'static [&'static str],
    /// Street name.
    pub street_name: &'static [&'static str],
    /// Postal code.
    pub postal_code: &'static [&'static str],
    /// City.
    pub city: &'static [&'static str],
    /// First administrative level (county).
    pub admin_level_1: &'static [&'static str],
    /// Second administrative level (state / region).
    pub admin_level_2: &'static [&'static str],
    /// Country.
    pub country: &'static [&'static str],
    /// Latitude (number or numeric string).
    pub latitude: &'static [&'static str],
    /// Longitude (number or numeric string).
    pub longitude: &'static [&'static str],
    /// Location type.
    pub location_type: &'static [&'static str],
    /// Address type.
    pub address_type: &'static [&'static str],
}

/// Nominatim `jsonv2` search result with `addressdetails=1`.
pub const NOMINATIM: FieldMapping = FieldMapping {
    street_number: &["/address/house_number"],
    street_name: &["/address/road"],
    postal_code: &["/address/postcode"],
    city: &["/address/city"],
    admin_level_1: &["/address/county"],
    admin_level_2: &["/address/state"],
    country: &["/address/country"],
    latitude: &["/lat"],
    longitude: &["/lon"],
    location_type: &["/type"],
    address_type: &["/addresstype"],
};

/// Photon `GeoJSON` feature.
pub const PHOTON: FieldMapping = FieldMapping {
    street_number: &["/properties/housenumber"],
    street_name: &["/properties/street", "/properties/name"],
    postal_code: &["/properties/postcode"],
    city: &["/properties/city"],
    admin_level_1: &["/properties/county"],
    admin_level_2: &["/properties/state"],
    country: &["/properties/country"],
    latitude: &["/geometry/coordinates/1"],
    longitude: &["/geometry/coordinates/0"],
    location_type: &["/properties/type"],
    address_type: &["/properties/osm_value"],
};

/// `OpenCage` result object.
pub const OPENCAGE: FieldMapping = FieldMapping {
    street_number: &["/components/house_number"],
    street_name: &["/components/road"],
    postal_code: &["/components/postcode"],
    city: &["/components/city"],
    admin_level_1: &["/components/county"],
    admin_level_2: &["/components/state"],
    country: &["/components/country"],
    latitude: &["/geometry/lat"],
    longitude: &["/geometry/lng"],
    location_type: &["/components/_type"],
    address_type: &["/components/_category"],
};

/// Builds the canonical result for `raw_address` from a provider payload.
#[must_use]
pub fn normalize(
    mapping: &FieldMapping,
    raw: &serde_json::Value,
    raw_address: &str,
    encoder: &str,
) -> GeocodeResult {
    GeocodeResult {
        street_number: text(raw, mapping.street_number),
        street_name: text(raw, mapping.street_name),
        postal_code: text(raw, mapping.postal_code),
        city: text(raw, mapping.city),
        admin_level_1: text(raw, mapping.admin_level_1),
        admin_level_2: text(raw, mapping.admin_level_2),
        country: text(raw, mapping.country),
        latitude: number(raw, mapping.latitude),
        longitude: number(raw, mapping.longitude),
        location_type: text(raw, mapping.location_type),
        address_type: text(raw, mapping.address_type),
        raw_address: raw_address.to_string(),
        encoder: encoder.to_string(),
    }
}

fn text(raw: &serde_json::Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|p| match raw.pointer(p)? {
        serde_json::Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn number(raw: &serde_json::Value, pointers: &[&str]) -> Option<f64> {
    pointers
        .iter()
        .find_map(|p| match raw.pointer(p)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_nominatim_result() {
        let raw = serde_json::json!({
            "lat": "48.8582599",
            "lon": "2.2945006",
            "type": "attraction",
            "addresstype": "tourism",
            "address": {
                "house_number": "5",
                "road": "Avenue Anatole France",
                "postcode": "75007",
                "city": "Paris",
                "county": "Paris",
                "state": "Île-de-France",
                "country": "France"
            }
        });
        let result = normalize(&NOMINATIM, &raw, "Tour Eiffel", "Nominatim");
        assert_eq!(result.street_number.as_deref(), Some("5"));
        assert_eq!(result.street_name.as_deref(), Some("Avenue Anatole France"));
        assert_eq!(result.postal_code.as_deref(), Some("75007"));
        assert_eq!(result.city.as_deref(), Some("Paris"));
        assert_eq!(result.admin_level_2.as_deref(), Some("Île-de-France"));
        assert_eq!(result.country.as_deref(), Some("France"));
        assert!((result.latitude.unwrap() - 48.858_259_9).abs() < 1e-7);
        assert!((result.longitude.unwrap() - 2.294_500_6).abs() < 1e-7);
        assert_eq!(result.location_type.as_deref(), Some("attraction"));
        assert_eq!(result.address_type.as_deref(), Some("tourism"));
        assert_eq!(result.raw_address, "Tour Eiffel");
        assert_eq!(result.encoder, "Nominatim");
    }

    #[test]
    fn normalizes_photon_feature() {
        let raw = serde_json::json!({
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": [2.3522, 48.8566] },
            "properties": {
                "name": "Rue de Rivoli",
                "housenumber": "10",
                "postcode": "75001",
                "city": "Paris",
                "state": "Île-de-France",
                "country": "France",
                "type": "house",
                "osm_value": "yes"
            }
        });
        let result = normalize(&PHOTON, &raw, "10 rue de Rivoli", "Photon");
        assert_eq!(result.street_number.as_deref(), Some("10"));
        assert_eq!(result.street_name.as_deref(), Some("Rue de Rivoli"));
        assert!((result.latitude.unwrap() - 48.8566).abs() < 1e-9);
        assert!((result.longitude.unwrap() - 2.3522).abs() < 1e-9);
        assert_eq!(result.address_type.as_deref(), Some("yes"));
        assert!(result.admin_level_1.is_none());
    }

    #[test]
    fn photon_prefers_street_over_name() {
        let raw = serde_json::json!({
            "properties": { "street": "Rue de Rivoli", "name": "Le Meurice" }
        });
        let result = normalize(&PHOTON, &raw, "x", "Photon");
        assert_eq!(result.street_name.as_deref(), Some("Rue de Rivoli"));
    }

    #[test]
    fn normalizes_opencage_result() {
        let raw = serde_json::json!({
            "geometry": { "lat": 45.764, "lng": 4.8357 },
            "components": {
                "_type": "city",
                "_category": "place",
                "city": "Lyon",
                "postcode": 69001,
                "country": "France"
            }
        });
        let result = normalize(&OPENCAGE, &raw, "Lyon", "OpenCage");
        assert_eq!(result.city.as_deref(), Some("Lyon"));
        assert_eq!(result.postal_code.as_deref(), Some("69001"));
        assert_eq!(result.location_type.as_deref(), Some("city"));
        assert_eq!(result.address_type.as_deref(), Some("place"));
        assert_eq!(result.latitude, Some(45.764));
        assert_eq!(result.longitude, Some(4.8357));
    }

    #[test]
    fn missing_fields_default_to_none() {
        let raw = serde_json::json!({});
        let result = normalize(&NOMINATIM, &raw, "somewhere", "Nominatim");
        assert!(result.street_number.is_none());
        assert!(result.latitude.is_none());
        assert!(result.longitude.is_none());
        assert_eq!(result.encoder, "Nominatim");
    }

    #[test]
    fn blank_and_garbage_values_are_none() {
        let raw = serde_json::json!({
            "lat": "not a number",
            "lon": null,
            "address": { "road": "   " }
        });
        let result = normalize(&NOMINATIM, &raw, "x", "Nominatim");
        assert!(result.latitude.is_none());
        assert!(result.longitude.is_none());
        assert!(result.street_name.is_none());
    }

    #[test]
    fn normalization_is_deterministic() {
        let raw = serde_json::json!({ "lat": "1.5", "lon": "2.5", "type": "house" });
        assert_eq!(
            normalize(&NOMINATIM, &raw, "a", "Nominatim"),
            normalize(&NOMINATIM, &raw, "a", "Nominatim")
        );
    }
}
