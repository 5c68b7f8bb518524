use std::collections::HashSet;
use std::fs;
use std::path::Path;

use core_types::{AreaId, AreaKind, Coordinates, Fingerprint};
use geojson::{Feature, GeoJson};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::{Area, MapError, Result};

const SIGLA_PROPERTY: &str = "Sigla";
const KIND_PRECEDENCE: [AreaKind; 2] = [AreaKind::Quadra, AreaKind::Canteiro];

/// Parsed site map in file order.
#[derive(Debug, Clone)]
pub struct AreaMap {
    pub areas: Vec<Area>,
    /// blake3 digest of the map source; assignments are only valid against the same digest.
    pub digest: Fingerprint,
    /// Features left out of the map, one human-readable line each.
    pub skipped: Vec<String>,
}

pub fn load_area_map(path: &Path) -> Result<AreaMap> {
    let source = fs::read_to_string(path).map_err(|source| MapError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let map = parse_area_map(&source)?;
    info!(
        path = %path.display(),
        areas = map.areas.len(),
        skipped = map.skipped.len(),
        "loaded area map"
    );
    Ok(map)
}

pub fn parse_area_map(source: &str) -> Result<AreaMap> {
    let digest = Fingerprint::from_digest(blake3::hash(source.as_bytes()).as_bytes());
    let GeoJson::FeatureCollection(collection) = source.parse::<GeoJson>()? else {
        return Err(MapError::NotAFeatureCollection);
    };

    let mut areas = Vec::with_capacity(collection.features.len());
    let mut skipped = Vec::new();
    let mut seen = HashSet::new();

    for (idx, feature) in collection.features.iter().enumerate() {
        let name = feature_name(feature, idx);
        let Some((kind, label)) = area_kind(feature) else {
            warn!(feature = %name, "feature has no Quadra or Canteiro value; skipped");
            skipped.push(format!("{name}: no Quadra or Canteiro value"));
            continue;
        };
        let Some(geometry) = feature.geometry.as_ref() else {
            warn!(feature = %name, "feature has no geometry; skipped");
            skipped.push(format!("{name}: no geometry"));
            continue;
        };

        let id = feature_id(feature).unwrap_or_else(|| {
            AreaId::new(format!(
                "{}-{}",
                kind.property_name().to_ascii_lowercase(),
                label
            ))
        });
        if !seen.insert(id.clone()) {
            return Err(MapError::DuplicateArea(id));
        }

        let rings = polygon_rings(&geometry.value, &name)?;
        let mut rings = rings
            .iter()
            .map(|ring| clean_ring(ring, &id))
            .collect::<Result<Vec<_>>>()?
            .into_iter();
        let Some(boundary) = rings.next() else {
            return Err(MapError::InvalidRing {
                area: id,
                reason: "polygon has no exterior ring".into(),
            });
        };

        areas.push(Area {
            id,
            kind,
            label,
            sigla: string_property(feature, SIGLA_PROPERTY),
            boundary,
            holes: rings.collect(),
        });
    }

    Ok(AreaMap {
        areas,
        digest,
        skipped,
    })
}

fn feature_name(feature: &Feature, idx: usize) -> String {
    feature_id(feature)
        .map(|id| id.to_string())
        .unwrap_or_else(|| format!("#{idx}"))
}

fn feature_id(feature: &Feature) -> Option<AreaId> {
    match feature.id.as_ref()? {
        geojson::feature::Id::String(s) if !s.trim().is_empty() => Some(AreaId::new(s.trim())),
        geojson::feature::Id::String(_) => None,
        geojson::feature::Id::Number(n) => Some(AreaId::new(n.to_string())),
    }
}

/// Quadra takes precedence when a feature carries both values.
fn area_kind(feature: &Feature) -> Option<(AreaKind, String)> {
    KIND_PRECEDENCE.into_iter().find_map(|kind| {
        string_property(feature, kind.property_name()).map(|label| (kind, label))
    })
}

fn string_property(feature: &Feature, key: &str) -> Option<String> {
    let value = feature.properties.as_ref()?.get(key)?;
    let text = match value {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn polygon_rings<'a>(value: &'a geojson::Value, feature: &str) -> Result<&'a geojson::PolygonType> {
    let unsupported = |geometry: &str| MapError::UnsupportedGeometry {
        feature: feature.to_string(),
        geometry: geometry.to_string(),
    };
    match value {
        geojson::Value::Polygon(rings) => Ok(rings),
        geojson::Value::MultiPolygon(polygons) if polygons.len() == 1 => Ok(&polygons[0]),
        geojson::Value::MultiPolygon(polygons) => Err(unsupported(&format!(
            "MultiPolygon with {} parts",
            polygons.len()
        ))),
        geojson::Value::Point(_) => Err(unsupported("Point")),
        geojson::Value::MultiPoint(_) => Err(unsupported("MultiPoint")),
        geojson::Value::LineString(_) => Err(unsupported("LineString")),
        geojson::Value::MultiLineString(_) => Err(unsupported("MultiLineString")),
        geojson::Value::GeometryCollection(_) => Err(unsupported("GeometryCollection")),
    }
}

/// Drops any Z/M ordinates, validates the positions and closes the ring.
fn clean_ring(ring: &[geojson::Position], area: &AreaId) -> Result<Vec<Coordinates>> {
    let invalid = |reason: String| MapError::InvalidRing {
        area: area.clone(),
        reason,
    };

    let mut points = Vec::with_capacity(ring.len() + 1);
    for position in ring {
        let [lon, lat, ..] = position.as_slice() else {
            return Err(invalid(format!("position {position:?} has fewer than 2 ordinates")));
        };
        let point = Coordinates::new(*lat, *lon)
            .ok_or_else(|| invalid(format!("position ({lon}, {lat}) is out of range")))?;
        points.push(point);
    }

    let mut distinct: Vec<Coordinates> = Vec::new();
    for point in &points {
        if !distinct.contains(point) {
            distinct.push(*point);
        }
    }
    if distinct.len() < 3 {
        return Err(invalid(format!(
            "ring has {} distinct vertices, at least 3 required",
            distinct.len()
        )));
    }

    if points.first() != points.last() {
        points.push(points[0]);
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection(features: &str) -> String {
        format!(r#"{{"type":"FeatureCollection","features":[{features}]}}"#)
    }

    const SQUARE: &str = "[[[0,0],[0,10],[10,10],[10,0],[0,0]]]";

    #[test]
    fn reads_quadra_and_canteiro_features() {
        let src = collection(&format!(
            r#"{{"type":"Feature","properties":{{"Quadra":"12","Sigla":"Q12"}},
                 "geometry":{{"type":"Polygon","coordinates":{SQUARE}}}}},
               {{"type":"Feature","id":"bed-a","properties":{{"Canteiro":7}},
                 "geometry":{{"type":"MultiPolygon","coordinates":[{SQUARE}]}}}}"#
        ));
        let map = parse_area_map(&src).unwrap();

        assert_eq!(map.areas.len(), 2);
        let quadra = &map.areas[0];
        assert_eq!(quadra.id.as_str(), "quadra-12");
        assert_eq!(quadra.kind, AreaKind::Quadra);
        assert_eq!(quadra.sigla.as_deref(), Some("Q12"));
        assert_eq!(quadra.boundary.len(), 5);

        let canteiro = &map.areas[1];
        assert_eq!(canteiro.id.as_str(), "bed-a");
        assert_eq!(canteiro.kind, AreaKind::Canteiro);
        assert_eq!(canteiro.label, "7");
        assert_eq!(canteiro.display_code(), "7");
    }

    #[test]
    fn drops_z_and_closes_open_rings() {
        let src = collection(
            r#"{"type":"Feature","properties":{"Quadra":"1"},
                "geometry":{"type":"Polygon","coordinates":[[[0,0,5],[0,1,5],[1,1,5],[1,0,5]]]}}"#,
        );
        let area = &parse_area_map(&src).unwrap().areas[0];
        assert_eq!(area.boundary.len(), 5);
        assert_eq!(area.boundary.first(), area.boundary.last());
    }

    #[test]
    fn skips_features_without_kind() {
        let src = collection(&format!(
            r#"{{"type":"Feature","properties":{{"Quadra":"  "}},
                 "geometry":{{"type":"Polygon","coordinates":{SQUARE}}}}}"#
        ));
        let map = parse_area_map(&src).unwrap();
        assert!(map.areas.is_empty());
        assert_eq!(map.skipped.len(), 1);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let feature = format!(
            r#"{{"type":"Feature","properties":{{"Quadra":"3"}},
                 "geometry":{{"type":"Polygon","coordinates":{SQUARE}}}}}"#
        );
        let src = collection(&format!("{feature},{feature}"));
        let err = parse_area_map(&src).unwrap_err();
        assert!(matches!(err, MapError::DuplicateArea(id) if id.as_str() == "quadra-3"));
    }

    #[test]
    fn rejects_degenerate_rings() {
        let src = collection(
            r#"{"type":"Feature","properties":{"Quadra":"1"},
                "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,1],[0,0]]]}}"#,
        );
        assert!(matches!(
            parse_area_map(&src).unwrap_err(),
            MapError::InvalidRing { .. }
        ));
    }

    #[test]
    fn rejects_non_polygons_and_bare_geometries() {
        let src = collection(
            r#"{"type":"Feature","properties":{"Quadra":"1"},
                "geometry":{"type":"Point","coordinates":[0,0]}}"#,
        );
        assert!(matches!(
            parse_area_map(&src).unwrap_err(),
            MapError::UnsupportedGeometry { .. }
        ));

        let bare = r#"{"type":"Point","coordinates":[0,0]}"#;
        assert!(matches!(
            parse_area_map(bare).unwrap_err(),
            MapError::NotAFeatureCollection
        ));
    }

    #[test]
    fn digest_tracks_source_bytes() {
        let a = parse_area_map(&collection("")).unwrap();
        let b = parse_area_map(&collection("")).unwrap();
        let c = parse_area_map(&format!("{} ", collection(""))).unwrap();
        assert_eq!(a.digest, b.digest);
        assert_ne!(a.digest, c.digest);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_area_map(&dir.path().join("mapa.geojson")).unwrap_err();
        assert!(matches!(err, MapError::Io { .. }));
    }
}
