#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use app_settings::EngineSettings;
use areas::{parse_area_map, AreaIndex};
use exif::experimental::Writer;
use exif::{Field, In, Rational, Tag, Value};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

/// Two adjacent blocks: Q1 west of longitude -47.0, Q2 east of it.
pub const MAP: &str = r#"{"type":"FeatureCollection","features":[
    {"type":"Feature","properties":{"Quadra":"1","Sigla":"Q1"},
     "geometry":{"type":"Polygon","coordinates":[[[-47.1,-22.9],[-47.1,-22.8],[-47.0,-22.8],[-47.0,-22.9],[-47.1,-22.9]]]}},
    {"type":"Feature","properties":{"Quadra":"2","Sigla":"Q2"},
     "geometry":{"type":"Polygon","coordinates":[[[-47.0,-22.9],[-47.0,-22.8],[-46.9,-22.8],[-46.9,-22.9],[-47.0,-22.9]]]}}
]}"#;

pub fn index() -> AreaIndex {
    AreaIndex::from_map(parse_area_map(MAP).unwrap())
}

/// Small thumbnails and two workers keep the tests quick.
pub fn settings() -> EngineSettings {
    EngineSettings {
        worker_threads: 2,
        thumbnail_edge: 64,
        ..EngineSettings::default()
    }
}

/// Position as whole degrees plus minutes, southern and western hemisphere.
pub struct Gps {
    pub lat_deg: u32,
    pub lat_min: u32,
    pub lon_deg: u32,
    pub lon_min: u32,
}

/// Inside Q1 (-22.85, -47.05).
pub const IN_Q1: Gps = Gps {
    lat_deg: 22,
    lat_min: 51,
    lon_deg: 47,
    lon_min: 3,
};

/// Inside Q2 (-22.85, -46.95).
pub const IN_Q2: Gps = Gps {
    lat_deg: 22,
    lat_min: 51,
    lon_deg: 46,
    lon_min: 57,
};

/// Far from both blocks.
pub const OUTSIDE: Gps = Gps {
    lat_deg: 10,
    lat_min: 0,
    lon_deg: 10,
    lon_min: 0,
};

fn dms(tag: Tag, deg: u32, min: u32) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Rational(vec![
            Rational { num: deg, denom: 1 },
            Rational { num: min, denom: 1 },
            Rational { num: 0, denom: 1 },
        ]),
    }
}

fn ascii(tag: Tag, text: &str) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![text.as_bytes().to_vec()]),
    }
}

/// Plain JPEG; `shade` makes the content distinct.
pub fn jpeg(edge: u32, shade: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(edge, edge, |x, y| {
        Rgb([shade, (x * 7 % 256) as u8, (y * 13 % 256) as u8])
    });
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode_image(&img)
        .unwrap();
    out
}

/// JPEG with an Exif block carrying GPS and, optionally, a capture time
/// (`"YYYY:MM:DD HH:MM:SS"`).
pub fn photo(shade: u8, gps: Option<&Gps>, captured: Option<&str>) -> Vec<u8> {
    let mut fields = Vec::new();
    if let Some(gps) = gps {
        fields.push(dms(Tag::GPSLatitude, gps.lat_deg, gps.lat_min));
        fields.push(ascii(Tag::GPSLatitudeRef, "S"));
        fields.push(dms(Tag::GPSLongitude, gps.lon_deg, gps.lon_min));
        fields.push(ascii(Tag::GPSLongitudeRef, "W"));
    }
    if let Some(captured) = captured {
        fields.push(ascii(Tag::DateTimeOriginal, captured));
    }

    let encoded = jpeg(32, shade);
    if fields.is_empty() {
        return encoded;
    }

    let mut writer = Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    let mut tiff = Cursor::new(Vec::new());
    writer.write(&mut tiff, false).unwrap();
    let tiff = tiff.into_inner();

    let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
    out.extend_from_slice(&((tiff.len() + 8) as u16).to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&encoded[2..]);
    out
}

pub fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, bytes).unwrap();
    path
}
