//! Capture time, GPS position and orientation from embedded Exif.
//!
//! Every field is optional. A damaged block degrades the affected field to `None` and leaves a
//! [`MetadataWarning`]; nothing here is fatal except failing to read the file at all.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use core_types::jpeg_segments::{exif_payload, find_embedded_jpeg};
use core_types::Coordinates;
use exif::{Exif, In, Reader, Tag, Value as ExifValue};
use tracing::debug;

use crate::{EngineError, Result};

const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";
const CAPTURE_TAGS: [Tag; 3] = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataWarning {
    /// The Exif block exists but could not be parsed.
    Malformed(String),
    InvalidTimestamp(String),
    InvalidGps(String),
    InvalidOrientation(u32),
}

impl fmt::Display for MetadataWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataWarning::Malformed(reason) => write!(f, "malformed metadata: {reason}"),
            MetadataWarning::InvalidTimestamp(raw) => write!(f, "invalid capture time {raw:?}"),
            MetadataWarning::InvalidGps(reason) => write!(f, "invalid GPS data: {reason}"),
            MetadataWarning::InvalidOrientation(value) => {
                write!(f, "invalid orientation value {value}")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoMetadata {
    pub captured_at: Option<DateTime<Utc>>,
    pub coordinates: Option<Coordinates>,
    pub orientation: Option<u16>,
    pub warnings: Vec<MetadataWarning>,
}

pub fn extract_from_file(path: &Path) -> Result<PhotoMetadata> {
    let file = File::open(path).map_err(|err| EngineError::read(path, err))?;
    let mut reader = BufReader::new(file);
    let metadata = extract_metadata(&mut reader);
    if !metadata.warnings.is_empty() {
        debug!(path = %path.display(), warnings = ?metadata.warnings, "metadata degraded");
    }
    Ok(metadata)
}

pub fn extract_from_bytes(bytes: &[u8]) -> PhotoMetadata {
    extract_metadata(&mut Cursor::new(bytes))
}

pub fn extract_metadata<R: BufRead + Seek>(reader: &mut R) -> PhotoMetadata {
    match Reader::new().read_from_container(reader) {
        Ok(exif) => summarize(&exif),
        Err(exif::Error::NotFound(_)) => PhotoMetadata::default(),
        Err(err) => match exif_from_embedded_jpeg(reader) {
            Some(exif) => summarize(&exif),
            None => PhotoMetadata {
                warnings: vec![MetadataWarning::Malformed(err.to_string())],
                ..PhotoMetadata::default()
            },
        },
    }
}

/// Falls back to the Exif block of a JPEG stream embedded somewhere in the container.
fn exif_from_embedded_jpeg<R: Read + Seek>(reader: &mut R) -> Option<Exif> {
    reader.seek(SeekFrom::Start(0)).ok()?;
    let mut data = Vec::new();
    reader.read_to_end(&mut data).ok()?;
    let jpeg = find_embedded_jpeg(&data)?;
    let payload = exif_payload(jpeg)?;
    Reader::new().read_raw(payload.to_vec()).ok()
}

fn summarize(exif: &Exif) -> PhotoMetadata {
    let mut warnings = Vec::new();
    let captured_at = capture_time(exif, &mut warnings);
    let coordinates = gps_position(exif, &mut warnings);
    let orientation = orientation(exif, &mut warnings);

    PhotoMetadata {
        captured_at,
        coordinates,
        orientation,
        warnings,
    }
}

fn capture_time(exif: &Exif, warnings: &mut Vec<MetadataWarning>) -> Option<DateTime<Utc>> {
    for tag in CAPTURE_TAGS {
        let Some(field) = exif.get_field(tag, In::PRIMARY) else {
            continue;
        };
        let Some(raw) = exif_string(&field.value) else {
            continue;
        };
        match NaiveDateTime::parse_from_str(&raw, EXIF_DATETIME_FORMAT) {
            Ok(naive) => return Some(naive.and_utc()),
            Err(_) => warnings.push(MetadataWarning::InvalidTimestamp(raw)),
        }
    }
    None
}

fn gps_position(exif: &Exif, warnings: &mut Vec<MetadataWarning>) -> Option<Coordinates> {
    let lat = exif.get_field(Tag::GPSLatitude, In::PRIMARY);
    let lon = exif.get_field(Tag::GPSLongitude, In::PRIMARY);
    let (lat, lon) = match (lat, lon) {
        (None, None) => return None,
        (Some(lat), Some(lon)) => (lat, lon),
        _ => {
            warnings.push(MetadataWarning::InvalidGps(
                "latitude and longitude must both be present".into(),
            ));
            return None;
        }
    };

    let lat_ref = exif
        .get_field(Tag::GPSLatitudeRef, In::PRIMARY)
        .and_then(|f| exif_string(&f.value));
    let lon_ref = exif
        .get_field(Tag::GPSLongitudeRef, In::PRIMARY)
        .and_then(|f| exif_string(&f.value));

    let latitude = match signed_degrees(&lat.value, lat_ref.as_deref(), ('N', 'S')) {
        Ok(value) => value,
        Err(reason) => {
            warnings.push(MetadataWarning::InvalidGps(format!("latitude: {reason}")));
            return None;
        }
    };
    let longitude = match signed_degrees(&lon.value, lon_ref.as_deref(), ('E', 'W')) {
        Ok(value) => value,
        Err(reason) => {
            warnings.push(MetadataWarning::InvalidGps(format!("longitude: {reason}")));
            return None;
        }
    };

    // Receivers without a fix commonly write zeroed rationals.
    if latitude == 0.0 && longitude == 0.0 {
        warnings.push(MetadataWarning::InvalidGps("zeroed position".into()));
        return None;
    }

    match Coordinates::new(latitude, longitude) {
        Some(coords) => Some(coords),
        None => {
            warnings.push(MetadataWarning::InvalidGps(format!(
                "position out of range ({latitude}, {longitude})"
            )));
            None
        }
    }
}

/// Degrees/minutes/seconds rationals plus hemisphere reference to a signed decimal degree.
fn signed_degrees(
    value: &ExifValue,
    reference: Option<&str>,
    (positive, negative): (char, char),
) -> std::result::Result<f64, String> {
    let ExifValue::Rational(parts) = value else {
        return Err("expected rational components".into());
    };
    if parts.len() < 3 {
        return Err(format!("expected 3 components, found {}", parts.len()));
    }
    if parts.iter().take(3).any(|r| r.denom == 0) {
        return Err("zero denominator".into());
    }

    let degrees = parts[0].to_f64() + parts[1].to_f64() / 60.0 + parts[2].to_f64() / 3600.0;
    let sign = match reference.map(|r| r.trim().to_ascii_uppercase()) {
        None => 1.0,
        Some(r) if r.starts_with(positive) => 1.0,
        Some(r) if r.starts_with(negative) => -1.0,
        Some(r) => return Err(format!("unknown hemisphere reference {r:?}")),
    };
    Ok(sign * degrees)
}

fn orientation(exif: &Exif, warnings: &mut Vec<MetadataWarning>) -> Option<u16> {
    let value = exif
        .get_field(Tag::Orientation, In::PRIMARY)?
        .value
        .get_uint(0)?;
    if (1..=8).contains(&value) {
        Some(value as u16)
    } else {
        warnings.push(MetadataWarning::InvalidOrientation(value));
        None
    }
}

fn exif_string(value: &ExifValue) -> Option<String> {
    match value {
        ExifValue::Ascii(values) => values
            .first()
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .map(|s| s.trim_matches('\u{0}').trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exif::experimental::Writer;
    use exif::{Field, Rational};
    use image::codecs::jpeg::JpegEncoder;
    use image::RgbImage;

    fn rational(num: u32, denom: u32) -> Rational {
        Rational { num, denom }
    }

    fn tiff_block(fields: &[Field]) -> Vec<u8> {
        let mut writer = Writer::new();
        for field in fields {
            writer.push_field(field);
        }
        let mut out = Cursor::new(Vec::new());
        writer.write(&mut out, false).unwrap();
        out.into_inner()
    }

    fn jpeg_with_exif(tiff: &[u8]) -> Vec<u8> {
        let img = RgbImage::from_pixel(8, 8, image::Rgb([10, 120, 40]));
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, 90)
            .encode_image(&img)
            .unwrap();

        let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
        let len = (tiff.len() + 8) as u16;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(b"Exif\0\0");
        out.extend_from_slice(tiff);
        out.extend_from_slice(&encoded[2..]);
        out
    }

    fn ascii(tag: Tag, text: &str) -> Field {
        Field {
            tag,
            ifd_num: In::PRIMARY,
            value: ExifValue::Ascii(vec![text.as_bytes().to_vec()]),
        }
    }

    fn dms(tag: Tag, d: u32, m: u32, s_hundredths: u32) -> Field {
        Field {
            tag,
            ifd_num: In::PRIMARY,
            value: ExifValue::Rational(vec![
                rational(d, 1),
                rational(m, 1),
                rational(s_hundredths, 100),
            ]),
        }
    }

    #[test]
    fn converts_southern_western_dms_to_signed_decimal() {
        let fields = vec![
            dms(Tag::GPSLatitude, 22, 49, 1800),
            ascii(Tag::GPSLatitudeRef, "S"),
            dms(Tag::GPSLongitude, 47, 4, 3600),
            ascii(Tag::GPSLongitudeRef, "W"),
            ascii(Tag::DateTimeOriginal, "2024:03:15 09:30:00"),
            Field {
                tag: Tag::Orientation,
                ifd_num: In::PRIMARY,
                value: ExifValue::Short(vec![6]),
            },
        ];
        let jpeg = jpeg_with_exif(&tiff_block(&fields));

        let meta = extract_from_bytes(&jpeg);
        let coords = meta.coordinates.expect("coordinates");
        assert!((coords.latitude - (-22.821_666_666)).abs() < 1e-6);
        assert!((coords.longitude - (-47.076_666_666)).abs() < 1e-6);
        assert_eq!(
            meta.captured_at.unwrap().to_rfc3339(),
            "2024-03-15T09:30:00+00:00"
        );
        assert_eq!(meta.orientation, Some(6));
        assert!(meta.warnings.is_empty());
    }

    #[test]
    fn image_without_exif_has_no_fields_and_no_warnings() {
        let img = RgbImage::from_pixel(4, 4, image::Rgb([0, 0, 0]));
        let mut encoded = Vec::new();
        JpegEncoder::new(&mut encoded).encode_image(&img).unwrap();

        let meta = extract_from_bytes(&encoded);
        assert_eq!(meta, PhotoMetadata::default());
    }

    #[test]
    fn half_gps_block_is_absent_with_warning() {
        let fields = vec![
            dms(Tag::GPSLatitude, 22, 49, 0),
            ascii(Tag::GPSLatitudeRef, "S"),
        ];
        let meta = extract_from_bytes(&jpeg_with_exif(&tiff_block(&fields)));
        assert_eq!(meta.coordinates, None);
        assert!(matches!(meta.warnings[0], MetadataWarning::InvalidGps(_)));
    }

    #[test]
    fn zeroed_gps_is_not_null_island() {
        let fields = vec![
            dms(Tag::GPSLatitude, 0, 0, 0),
            dms(Tag::GPSLongitude, 0, 0, 0),
        ];
        let meta = extract_from_bytes(&jpeg_with_exif(&tiff_block(&fields)));
        assert_eq!(meta.coordinates, None);
        assert_eq!(meta.warnings.len(), 1);
    }

    #[test]
    fn bad_timestamp_degrades_to_absent() {
        let fields = vec![ascii(Tag::DateTimeOriginal, "yesterday-ish")];
        let meta = extract_from_bytes(&jpeg_with_exif(&tiff_block(&fields)));
        assert_eq!(meta.captured_at, None);
        assert_eq!(
            meta.warnings,
            vec![MetadataWarning::InvalidTimestamp("yesterday-ish".into())]
        );
    }

    #[test]
    fn garbage_is_a_warning_not_an_error() {
        let meta = extract_from_bytes(b"definitely not an image");
        assert_eq!(meta.coordinates, None);
        assert!(matches!(meta.warnings[0], MetadataWarning::Malformed(_)));
    }

    #[test]
    fn finds_exif_inside_unknown_container() {
        let fields = vec![ascii(Tag::DateTime, "2023:12:01 17:05:09")];
        let mut container = b"PROPRIETARY-HEADER".to_vec();
        container.extend_from_slice(&jpeg_with_exif(&tiff_block(&fields)));

        let meta = extract_from_bytes(&container);
        assert!(meta.captured_at.is_some());
    }
}
