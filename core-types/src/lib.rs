use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod jpeg_segments;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid fingerprint {0:?}: expected 64 hex characters")]
    Fingerprint(String),

    #[error("unknown status {0:?}")]
    Status(String),

    #[error("unknown area kind {0:?}")]
    AreaKind(String),
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Content identity of an image: lowercase hex blake3 digest of the bytes used downstream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub const HEX_LEN: usize = 64;

    pub fn from_hex(raw: &str) -> Result<Self, ParseError> {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized.len() != Self::HEX_LEN
            || !normalized.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(ParseError::Fingerprint(raw.to_string()));
        }
        Ok(Self(normalized))
    }

    /// Builds a fingerprint from a raw 32-byte digest.
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        let mut hex = String::with_capacity(Self::HEX_LEN);
        for byte in digest {
            hex.push(char::from(HEX_DIGITS[(byte >> 4) as usize]));
            hex.push(char::from(HEX_DIGITS[(byte & 0x0F) as usize]));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, enough to tell records apart in logs and file names.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

/// Service status an inspector assigns to a photograph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ImageStatus {
    #[default]
    NotStarted,
    Partial,
    Completed,
}

impl ImageStatus {
    pub const ALL: [ImageStatus; 3] = [
        ImageStatus::NotStarted,
        ImageStatus::Partial,
        ImageStatus::Completed,
    ];

    /// Rank used when two statuses are equally frequent in an area; lower wins.
    /// Partial > NotStarted > Completed.
    pub fn tie_rank(self) -> u8 {
        match self {
            ImageStatus::Partial => 0,
            ImageStatus::NotStarted => 1,
            ImageStatus::Completed => 2,
        }
    }

    /// Label printed on inspection reports.
    pub fn label(self) -> &'static str {
        match self {
            ImageStatus::NotStarted => "Não Concluído",
            ImageStatus::Partial => "Parcial",
            ImageStatus::Completed => "Concluído",
        }
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageStatus::NotStarted => "not-started",
            ImageStatus::Partial => "partial",
            ImageStatus::Completed => "completed",
        };
        f.write_str(name)
    }
}

impl FromStr for ImageStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lowered = trimmed.to_lowercase();
        match lowered.as_str() {
            "not-started" | "notstarted" | "not_started" | "não concluído" => {
                Ok(ImageStatus::NotStarted)
            }
            "partial" | "parcial" => Ok(ImageStatus::Partial),
            "completed" | "concluído" => Ok(ImageStatus::Completed),
            _ => Err(ParseError::Status(trimmed.to_string())),
        }
    }
}

/// Kind of polygon on the site map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AreaKind {
    Quadra,
    Canteiro,
}

impl AreaKind {
    /// Name of the GeoJSON property that carries the area label for this kind.
    pub fn property_name(self) -> &'static str {
        match self {
            AreaKind::Quadra => "Quadra",
            AreaKind::Canteiro => "Canteiro",
        }
    }
}

impl fmt::Display for AreaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.property_name())
    }
}

impl FromStr for AreaKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quadra" => Ok(AreaKind::Quadra),
            "canteiro" => Ok(AreaKind::Canteiro),
            other => Err(ParseError::AreaKind(other.to_string())),
        }
    }
}

/// Stable identifier of an area, taken from the source map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AreaId(String);

impl AreaId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signed decimal WGS84 position. Only constructed from finite, in-range values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && latitude.abs() <= 90.0
            && longitude.abs() <= 180.0;
        valid.then_some(Self {
            latitude,
            longitude,
        })
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// Why an image has no area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    NoCoordinates,
    OutsideMap,
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::NoCoordinates => f.write_str("no GPS coordinates"),
            UnresolvedReason::OutsideMap => f.write_str("outside every mapped area"),
        }
    }
}

/// Area membership of an image. Either fully resolved or explicitly unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AreaAssignment {
    Resolved { area_id: AreaId },
    Unresolved { reason: UnresolvedReason },
}

impl AreaAssignment {
    pub fn area_id(&self) -> Option<&AreaId> {
        match self {
            AreaAssignment::Resolved { area_id } => Some(area_id),
            AreaAssignment::Unresolved { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, AreaAssignment::Resolved { .. })
    }
}

impl Default for AreaAssignment {
    fn default() -> Self {
        AreaAssignment::Unresolved {
            reason: UnresolvedReason::NoCoordinates,
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RecordFlags: u8 {
        /// Left out of reports and area rollups.
        const EXCLUDED     = 0b0000_0001;
        /// Order index was set by hand; automatic reordering keeps it.
        const ORDER_LOCKED = 0b0000_0010;
    }
}

impl Default for RecordFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262";

    #[test]
    fn fingerprint_normalizes_and_validates() {
        let fp = Fingerprint::from_hex(&HEX.to_ascii_uppercase()).unwrap();
        assert_eq!(fp.as_str(), HEX);
        assert_eq!(fp.short(), "af1349b9f5f9");
        assert!(Fingerprint::from_hex("abc").is_err());
        assert!(Fingerprint::from_hex(&"g".repeat(64)).is_err());
    }

    #[test]
    fn fingerprint_from_digest_is_lower_hex() {
        let mut digest = [0u8; 32];
        digest[0] = 0xAB;
        digest[31] = 0x01;
        let fp = Fingerprint::from_digest(&digest);
        assert!(fp.as_str().starts_with("ab00"));
        assert!(fp.as_str().ends_with("01"));
        assert_eq!(Fingerprint::from_hex(fp.as_str()).unwrap(), fp);
    }

    #[test]
    fn fingerprint_serde_rejects_garbage() {
        let json = format!("\"{HEX}\"");
        let fp: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&fp).unwrap(), json);
        assert!(serde_json::from_str::<Fingerprint>("\"nope\"").is_err());
    }

    #[test]
    fn status_parses_report_labels() {
        assert_eq!("Parcial".parse::<ImageStatus>(), Ok(ImageStatus::Partial));
        assert_eq!("Concluído".parse::<ImageStatus>(), Ok(ImageStatus::Completed));
        assert_eq!("not-started".parse::<ImageStatus>(), Ok(ImageStatus::NotStarted));
        assert!("done".parse::<ImageStatus>().is_err());
        assert_eq!(ImageStatus::default(), ImageStatus::NotStarted);
    }

    #[test]
    fn coordinates_reject_out_of_range() {
        assert!(Coordinates::new(-22.8, -47.06).is_some());
        assert!(Coordinates::new(91.0, 0.0).is_none());
        assert!(Coordinates::new(0.0, f64::NAN).is_none());
    }

    #[test]
    fn assignment_serializes_tagged() {
        let resolved = AreaAssignment::Resolved {
            area_id: AreaId::new("quadra-12"),
        };
        let json = serde_json::to_string(&resolved).unwrap();
        assert_eq!(json, r#"{"state":"resolved","area_id":"quadra-12"}"#);
        assert_eq!(resolved.area_id().map(AreaId::as_str), Some("quadra-12"));

        let outside: AreaAssignment =
            serde_json::from_str(r#"{"state":"unresolved","reason":"outside_map"}"#).unwrap();
        assert!(!outside.is_resolved());
        assert_eq!(
            outside,
            AreaAssignment::Unresolved {
                reason: UnresolvedReason::OutsideMap
            }
        );
    }

    #[test]
    fn flags_default_to_empty() {
        let flags = RecordFlags::default();
        assert!(!flags.contains(RecordFlags::EXCLUDED));
    }
}
