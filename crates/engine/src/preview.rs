use std::io::Cursor;

use core_types::jpeg_segments::find_embedded_jpeg;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{overlay, FilterType};
use image::metadata::Orientation;
use image::{DynamicImage, RgbaImage};

use crate::{EngineError, Result};

const CANVAS: image::Rgba<u8> = image::Rgba([16, 16, 16, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailSpec {
    /// Both sides of the square output, in pixels.
    pub edge: u32,
    pub quality: u8,
}

impl Default for ThumbnailSpec {
    fn default() -> Self {
        Self {
            edge: 600,
            quality: 85,
        }
    }
}

/// Renders a letterboxed JPEG preview, upright according to the Exif orientation.
pub fn render_thumbnail(
    bytes: &[u8],
    orientation: Option<u16>,
    spec: ThumbnailSpec,
) -> Result<Vec<u8>> {
    let mut img = decode(bytes)?;
    if let Some(orientation) = orientation
        .and_then(|o| u8::try_from(o).ok())
        .and_then(Orientation::from_exif)
    {
        img.apply_orientation(orientation);
    }

    let thumb = letterboxed(&img, spec.edge.max(1));
    let rgb = DynamicImage::ImageRgba8(thumb).to_rgb8();
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, spec.quality)
        .encode_image(&rgb)
        .map_err(|err| EngineError::Encode(err.to_string()))?;
    Ok(out.into_inner())
}

fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    match image::load_from_memory(bytes) {
        Ok(img) => Ok(img),
        Err(err) => {
            let embedded =
                find_embedded_jpeg(bytes).ok_or_else(|| EngineError::Decode(err.to_string()))?;
            image::load_from_memory(embedded).map_err(|inner| {
                EngineError::Decode(format!("{err}; embedded preview: {inner}"))
            })
        }
    }
}

fn letterboxed(img: &DynamicImage, edge: u32) -> RgbaImage {
    let resized = img.resize(edge, edge, FilterType::Lanczos3).to_rgba8();
    let (w, h) = resized.dimensions();
    if w == edge && h == edge {
        return resized;
    }

    let mut canvas = RgbaImage::from_pixel(edge, edge, CANVAS);
    let offset_x = (edge - w) / 2;
    let offset_y = (edge - h) / 2;
    overlay(&mut canvas, &resized, offset_x.into(), offset_y.into());
    canvas
}
