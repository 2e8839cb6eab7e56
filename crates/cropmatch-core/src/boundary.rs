//! Administrative boundaries from a GeoJSON FeatureCollection.

use std::path::Path;

use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde_json::Value;
use tracing::debug;

use crate::crs::Crs;
use crate::error::{HarmonizeError, Result};
use crate::mask::RegionMask;

/// Supplies the analysis boundary for a named region.
pub trait BoundaryProvider: Send + Sync {
    fn boundary_for(&self, name: &str) -> Result<RegionMask>;
}

/// Feature properties checked, in order, for the region name.
const NAME_KEYS: [&str; 6] = ["name", "NAME", "ADMIN", "NAME_0", "COUNTRY", "name_en"];

/// Boundaries held as parsed GeoJSON (EPSG:4326 per RFC 7946).
#[derive(Debug, Clone)]
pub struct GeoJsonBoundaries {
    collection: Value,
}

impl GeoJsonBoundaries {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let collection: Value = serde_json::from_str(text)?;
        if collection.get("features").and_then(Value::as_array).is_none() {
            return Err(HarmonizeError::InvalidGeometry("GeoJSON has no 'features' array".into()));
        }
        Ok(Self { collection })
    }

    fn features(&self) -> &[Value] {
        self.collection
            .get("features")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Names of every feature, in file order.
    pub fn names(&self) -> Vec<String> {
        self.features().iter().filter_map(feature_name).map(str::to_owned).collect()
    }
}

fn feature_name(feature: &Value) -> Option<&str> {
    let props = feature.get("properties")?;
    NAME_KEYS.iter().find_map(|k| props.get(*k).and_then(Value::as_str))
}

fn matches_name(feature: &Value, name: &str) -> bool {
    let Some(props) = feature.get("properties") else {
        return false;
    };
    NAME_KEYS
        .iter()
        .filter_map(|k| props.get(*k).and_then(Value::as_str))
        .any(|v| v.trim().eq_ignore_ascii_case(name.trim()))
}

impl BoundaryProvider for GeoJsonBoundaries {
    fn boundary_for(&self, name: &str) -> Result<RegionMask> {
        let mut polygons = Vec::new();
        for feature in self.features().iter().filter(|f| matches_name(f, name)) {
            if let Some(geometry) = feature.get("geometry").filter(|g| !g.is_null()) {
                polygons.extend(parse_geometry(geometry)?);
            }
        }
        if polygons.is_empty() {
            return Err(HarmonizeError::BoundaryNotFound(name.to_owned()));
        }
        debug!(name, polygons = polygons.len(), "boundary resolved");
        RegionMask::new(MultiPolygon::new(polygons), Crs::WGS84)
    }
}

fn parse_geometry(geometry: &Value) -> Result<Vec<Polygon<f64>>> {
    let kind = geometry.get("type").and_then(Value::as_str).unwrap_or_default();
    let coords = geometry
        .get("coordinates")
        .ok_or_else(|| HarmonizeError::InvalidGeometry(format!("{kind} without coordinates")))?;
    match kind {
        "Polygon" => Ok(vec![parse_polygon(coords)?]),
        "MultiPolygon" => as_array(coords)?.iter().map(parse_polygon).collect(),
        other => Err(HarmonizeError::InvalidGeometry(format!("unsupported geometry type '{other}'"))),
    }
}

fn parse_polygon(coords: &Value) -> Result<Polygon<f64>> {
    let mut rings = as_array(coords)?.iter().map(parse_ring);
    let exterior = rings
        .next()
        .ok_or_else(|| HarmonizeError::InvalidGeometry("polygon without rings".into()))??;
    let holes = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, holes))
}

fn parse_ring(coords: &Value) -> Result<LineString<f64>> {
    as_array(coords)?
        .iter()
        .map(|p| match p.as_array().map(Vec::as_slice) {
            Some([x, y, ..]) => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => Ok(Coord { x, y }),
                _ => Err(HarmonizeError::InvalidGeometry(format!("non-numeric position {p}"))),
            },
            _ => Err(HarmonizeError::InvalidGeometry(format!("malformed position {p}"))),
        })
        .collect::<Result<Vec<_>>>()
        .map(LineString::new)
}

fn as_array(v: &Value) -> Result<&Vec<Value>> {
    v.as_array()
        .ok_or_else(|| HarmonizeError::InvalidGeometry(format!("expected an array, found {v}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLECTION: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "ADMIN": "Paraguay" },
                "geometry": { "type": "Polygon", "coordinates": [[[-62,-27],[-54,-27],[-54,-19],[-62,-19],[-62,-27]]] }
            },
            {
                "type": "Feature",
                "properties": { "NAME_0": "Brazil" },
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [
                        [[[-60,-20],[-40,-20],[-40,0],[-60,0],[-60,-20]],
                         [[-50,-12],[-48,-12],[-48,-10],[-50,-10],[-50,-12]]],
                        [[[-32.5,-4],[-32.3,-4],[-32.3,-3.8],[-32.5,-3.8],[-32.5,-4]]]
                    ]
                }
            },
            { "type": "Feature", "properties": { "name": "Nowhere" }, "geometry": null }
        ]
    }"#;

    #[test]
    fn multipolygon_with_hole_is_resolved() {
        let b = GeoJsonBoundaries::from_json(COLLECTION).unwrap();
        let mask = b.boundary_for("brazil").unwrap();
        assert_eq!(mask.crs(), Crs::WGS84);
        assert_eq!(mask.geometry().0.len(), 2);
        assert_eq!(mask.geometry().0[0].interiors().len(), 1);
        assert!(mask.contains(-45.0, -15.0));
        assert!(!mask.contains(-49.0, -11.0), "point inside the hole");
        assert!(mask.contains(-32.4, -3.9), "island polygon");
    }

    #[test]
    fn unknown_or_empty_names_are_not_found() {
        let b = GeoJsonBoundaries::from_json(COLLECTION).unwrap();
        assert!(matches!(b.boundary_for("Chile"), Err(HarmonizeError::BoundaryNotFound(_))));
        assert!(matches!(b.boundary_for("Nowhere"), Err(HarmonizeError::BoundaryNotFound(_))));
        assert_eq!(b.names(), vec!["Paraguay", "Brazil", "Nowhere"]);
    }

    #[test]
    fn malformed_collections_are_rejected() {
        assert!(GeoJsonBoundaries::from_json(r#"{"type": "Feature"}"#).is_err());
        let bad = r#"{"features": [{"properties": {"name": "X"},
            "geometry": {"type": "LineString", "coordinates": [[0,0],[1,1]]}}]}"#;
        let b = GeoJsonBoundaries::from_json(bad).unwrap();
        assert!(matches!(b.boundary_for("X"), Err(HarmonizeError::InvalidGeometry(_))));
    }
}
