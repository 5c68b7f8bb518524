//! Site map areas (quadras and canteiros) and point-in-polygon resolution of photo positions.

use std::path::PathBuf;

use core_types::{AreaId, AreaKind, Coordinates};
use geo::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};

pub mod index;
pub mod locator;
pub mod map;

pub use index::{AreaIndex, NearestArea, Resolution};
pub use locator::Locator;
pub use map::{load_area_map, parse_area_map, AreaMap};

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("failed to read area map {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("area map must be a GeoJSON FeatureCollection")]
    NotAFeatureCollection,

    #[error("feature {feature} has unsupported geometry {geometry}")]
    UnsupportedGeometry { feature: String, geometry: String },

    #[error("area {area} has an invalid ring: {reason}")]
    InvalidRing { area: AreaId, reason: String },

    #[error("area {0} appears more than once in the map")]
    DuplicateArea(AreaId),
}

pub type Result<T> = std::result::Result<T, MapError>;

/// A named polygon of the site map. Rings are closed; positions are WGS84 degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub id: AreaId,
    pub kind: AreaKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigla: Option<String>,
    pub boundary: Vec<Coordinates>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub holes: Vec<Vec<Coordinates>>,
}

impl Area {
    /// Planar polygon with x = longitude and y = latitude.
    pub fn polygon(&self) -> Polygon<f64> {
        Polygon::new(
            ring(&self.boundary),
            self.holes.iter().map(|hole| ring(hole)).collect(),
        )
    }

    /// Short code printed on reports, falling back to the label.
    pub fn display_code(&self) -> &str {
        self.sigla.as_deref().unwrap_or(&self.label)
    }
}

fn ring(points: &[Coordinates]) -> LineString<f64> {
    LineString::new(
        points
            .iter()
            .map(|p| Coord {
                x: p.longitude,
                y: p.latitude,
            })
            .collect(),
    )
}
