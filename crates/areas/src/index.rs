use core_types::{AreaAssignment, AreaId, Coordinates, Fingerprint, UnresolvedReason};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::closest_point::ClosestPoint;
use geo::coordinate_position::{CoordPos, CoordinatePosition};
use geo::{Closest, Coord, Distance, Haversine, Point, Polygon, Rect};
use serde::Serialize;

use crate::{Area, AreaMap};

/// Outcome of locating one position against the map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Inside(AreaId),
    /// Only boundary hits; the smallest id among them.
    OnBoundary(AreaId),
    /// Several areas contain the point; the first in map order was chosen.
    Ambiguous { chosen: AreaId, others: Vec<AreaId> },
    Outside,
}

impl Resolution {
    pub fn area_id(&self) -> Option<&AreaId> {
        match self {
            Resolution::Inside(id) | Resolution::OnBoundary(id) => Some(id),
            Resolution::Ambiguous { chosen, .. } => Some(chosen),
            Resolution::Outside => None,
        }
    }

    pub fn assignment(&self) -> AreaAssignment {
        match self.area_id() {
            Some(area_id) => AreaAssignment::Resolved {
                area_id: area_id.clone(),
            },
            None => AreaAssignment::Unresolved {
                reason: UnresolvedReason::OutsideMap,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearestArea {
    pub area_id: AreaId,
    /// Great-circle distance in metres to the closest point of the area boundary.
    pub distance_m: f64,
}

#[derive(Debug, Clone)]
struct IndexedArea {
    area: Area,
    polygon: Polygon<f64>,
    bbox: Option<Rect<f64>>,
}

/// Immutable set of areas in map order with their planar polygons and bounding boxes.
#[derive(Debug, Clone, Default)]
pub struct AreaIndex {
    entries: Vec<IndexedArea>,
    digest: Option<Fingerprint>,
}

impl AreaIndex {
    pub fn new(areas: Vec<Area>) -> Self {
        let entries = areas
            .into_iter()
            .map(|area| {
                let polygon = area.polygon();
                let bbox = polygon.bounding_rect();
                IndexedArea {
                    area,
                    polygon,
                    bbox,
                }
            })
            .collect();
        Self {
            entries,
            digest: None,
        }
    }

    pub fn from_map(map: AreaMap) -> Self {
        Self::new(map.areas).with_digest(Some(map.digest))
    }

    pub fn with_digest(mut self, digest: Option<Fingerprint>) -> Self {
        self.digest = digest;
        self
    }

    /// Digest of the map the index was built from, if known.
    pub fn digest(&self) -> Option<&Fingerprint> {
        self.digest.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn areas(&self) -> impl Iterator<Item = &Area> {
        self.entries.iter().map(|entry| &entry.area)
    }

    pub fn get(&self, id: &AreaId) -> Option<&Area> {
        self.areas().find(|area| &area.id == id)
    }

    /// Interior hits win over boundary hits; boundary-only hits go to the smallest id so the
    /// same point always lands in the same area.
    pub fn locate(&self, point: Coordinates) -> Resolution {
        let coord = Coord {
            x: point.longitude,
            y: point.latitude,
        };

        let mut interior: Vec<&AreaId> = Vec::new();
        let mut boundary: Vec<&AreaId> = Vec::new();
        for entry in &self.entries {
            if !entry.bbox.is_some_and(|bbox| rect_contains(&bbox, coord)) {
                continue;
            }
            match entry.polygon.coordinate_position(&coord) {
                CoordPos::Inside => interior.push(&entry.area.id),
                CoordPos::OnBoundary => boundary.push(&entry.area.id),
                CoordPos::Outside => {}
            }
        }

        match interior.as_slice() {
            [only] => Resolution::Inside((*only).clone()),
            [first, rest @ ..] if !rest.is_empty() => Resolution::Ambiguous {
                chosen: (*first).clone(),
                others: rest.iter().map(|id| (*id).clone()).collect(),
            },
            _ => match boundary.into_iter().min() {
                Some(id) => Resolution::OnBoundary(id.clone()),
                None => Resolution::Outside,
            },
        }
    }

    /// Closest area to a position, for "near" hints on unresolved images.
    pub fn nearest_area(&self, point: Coordinates) -> Option<NearestArea> {
        let origin = Point::new(point.longitude, point.latitude);
        self.entries
            .iter()
            .filter_map(|entry| {
                let closest = match entry.polygon.exterior().closest_point(&origin) {
                    Closest::Intersection(p) | Closest::SinglePoint(p) => p,
                    Closest::Indeterminate => return None,
                };
                Some(NearestArea {
                    area_id: entry.area.id.clone(),
                    distance_m: Haversine.distance(origin, closest),
                })
            })
            .min_by(|a, b| {
                a.distance_m
                    .total_cmp(&b.distance_m)
                    .then_with(|| a.area_id.cmp(&b.area_id))
            })
    }
}

fn rect_contains(rect: &Rect<f64>, coord: Coord<f64>) -> bool {
    rect.min().x <= coord.x
        && coord.x <= rect.max().x
        && rect.min().y <= coord.y
        && coord.y <= rect.max().y
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::AreaKind;

    fn square(id: &str, x0: f64, y0: f64, size: f64) -> Area {
        let c = |x: f64, y: f64| Coordinates {
            latitude: y,
            longitude: x,
        };
        Area {
            id: AreaId::new(id),
            kind: AreaKind::Quadra,
            label: id.to_string(),
            sigla: None,
            boundary: vec![
                c(x0, y0),
                c(x0, y0 + size),
                c(x0 + size, y0 + size),
                c(x0 + size, y0),
                c(x0, y0),
            ],
            holes: Vec::new(),
        }
    }

    fn at(lon: f64, lat: f64) -> Coordinates {
        Coordinates::new(lat, lon).unwrap()
    }

    #[test]
    fn point_inside_square_resolves() {
        let index = AreaIndex::new(vec![square("a", 0.0, 0.0, 10.0)]);
        assert_eq!(index.locate(at(5.0, 5.0)), Resolution::Inside(AreaId::new("a")));
    }

    #[test]
    fn point_outside_is_unresolved() {
        let index = AreaIndex::new(vec![square("a", 0.0, 0.0, 10.0)]);
        let resolution = index.locate(at(15.0, 15.0));
        assert_eq!(resolution, Resolution::Outside);
        assert_eq!(
            resolution.assignment(),
            AreaAssignment::Unresolved {
                reason: UnresolvedReason::OutsideMap
            }
        );
    }

    #[test]
    fn shared_edge_goes_to_smallest_id_every_time() {
        // "b" comes first in map order but "a" sorts first.
        let index = AreaIndex::new(vec![
            square("b", 0.0, 0.0, 10.0),
            square("a", -10.0, 0.0, 10.0),
        ]);
        for _ in 0..3 {
            assert_eq!(
                index.locate(at(0.0, 5.0)),
                Resolution::OnBoundary(AreaId::new("a"))
            );
        }
    }

    #[test]
    fn interior_beats_boundary() {
        let index = AreaIndex::new(vec![
            square("a", 0.0, 0.0, 10.0),
            square("z", 5.0, 0.0, 10.0),
        ]);
        // On the left edge of "z", strictly inside "a".
        assert_eq!(index.locate(at(5.0, 5.0)), Resolution::Inside(AreaId::new("a")));
    }

    #[test]
    fn overlapping_areas_are_ambiguous_and_first_wins() {
        let index = AreaIndex::new(vec![
            square("q2", 0.0, 0.0, 10.0),
            square("q1", 2.0, 2.0, 10.0),
        ]);
        assert_eq!(
            index.locate(at(5.0, 5.0)),
            Resolution::Ambiguous {
                chosen: AreaId::new("q2"),
                others: vec![AreaId::new("q1")],
            }
        );
    }

    #[test]
    fn holes_are_outside() {
        let mut area = square("a", 0.0, 0.0, 10.0);
        area.holes = vec![square("hole", 4.0, 4.0, 2.0).boundary];
        let index = AreaIndex::new(vec![area]);
        assert_eq!(index.locate(at(5.0, 5.0)), Resolution::Outside);
        assert!(index.locate(at(1.0, 1.0)).area_id().is_some());
    }

    #[test]
    fn nearest_area_picks_closest_boundary() {
        let index = AreaIndex::new(vec![
            square("far", 0.0, 0.0, 0.001),
            square("near", 0.01, 0.0, 0.001),
        ]);
        let nearest = index.nearest_area(at(0.0115, 0.0005)).unwrap();
        assert_eq!(nearest.area_id.as_str(), "near");
        assert!(nearest.distance_m > 0.0 && nearest.distance_m < 100.0);
        assert!(AreaIndex::default().nearest_area(at(0.0, 0.0)).is_none());
    }
}
