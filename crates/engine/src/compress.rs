use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use tracing::debug;

use crate::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePolicy {
    pub ceiling_bytes: u64,
    pub quality: u8,
    pub max_attempts: u32,
}

impl Default for SizePolicy {
    fn default() -> Self {
        Self {
            ceiling_bytes: 4_950_000,
            quality: 80,
            max_attempts: 3,
        }
    }
}

/// Produces a smaller encoding of an image. Implementations must be lossy-stable: feeding the
/// output back in yields a result no larger than the input for any sane quality.
pub trait Reencoder: Send + Sync {
    fn reencode(&self, input: &[u8], quality: u8) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JpegReencoder;

impl Reencoder for JpegReencoder {
    fn reencode(&self, input: &[u8], quality: u8) -> Result<Vec<u8>> {
        let decoded =
            image::load_from_memory(input).map_err(|err| EngineError::Decode(err.to_string()))?;
        let rgb = decoded.to_rgb8();

        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode_image(&rgb)
            .map_err(|err| EngineError::Encode(err.to_string()))?;
        Ok(out.into_inner())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeOutcome {
    WithinLimit,
    /// A derived encoding under the ceiling; the original bytes are untouched.
    Compressed { bytes: Vec<u8>, attempts: u32 },
}

pub fn enforce_size_limit(
    bytes: &[u8],
    policy: &SizePolicy,
    reencoder: &dyn Reencoder,
) -> Result<SizeOutcome> {
    let original_size = bytes.len() as u64;
    if original_size <= policy.ceiling_bytes {
        return Ok(SizeOutcome::WithinLimit);
    }

    let mut current = bytes.to_vec();
    for attempt in 1..=policy.max_attempts {
        current = reencoder.reencode(&current, policy.quality)?;
        debug!(
            attempt,
            original_size,
            size = current.len(),
            ceiling = policy.ceiling_bytes,
            "re-encoded oversized image"
        );
        if current.len() as u64 <= policy.ceiling_bytes {
            return Ok(SizeOutcome::Compressed {
                bytes: current,
                attempts: attempt,
            });
        }
    }

    Err(EngineError::SizeViolation {
        original_size,
        final_size: current.len() as u64,
        ceiling: policy.ceiling_bytes,
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Shrinks every pass by `num / den`.
    struct Shrink(usize, usize);

    impl Reencoder for Shrink {
        fn reencode(&self, input: &[u8], _quality: u8) -> Result<Vec<u8>> {
            Ok(vec![0u8; input.len() * self.0 / self.1])
        }
    }

    struct Scripted(Mutex<Vec<usize>>);

    impl Reencoder for Scripted {
        fn reencode(&self, _input: &[u8], _quality: u8) -> Result<Vec<u8>> {
            let size = self.0.lock().unwrap().remove(0);
            Ok(vec![0u8; size])
        }
    }

    #[test]
    fn small_images_are_left_alone() {
        let outcome =
            enforce_size_limit(&[0u8; 1024], &SizePolicy::default(), &Shrink(1, 2)).unwrap();
        assert_eq!(outcome, SizeOutcome::WithinLimit);
    }

    #[test]
    fn exactly_at_ceiling_is_within_limit() {
        let policy = SizePolicy {
            ceiling_bytes: 100,
            ..SizePolicy::default()
        };
        let outcome = enforce_size_limit(&[0u8; 100], &policy, &Shrink(1, 2)).unwrap();
        assert_eq!(outcome, SizeOutcome::WithinLimit);
    }

    #[test]
    fn oversized_image_compresses_in_one_pass() {
        let input = vec![0u8; 6_000_000];
        let outcome = enforce_size_limit(&input, &SizePolicy::default(), &Shrink(4, 5)).unwrap();
        match outcome {
            SizeOutcome::Compressed { bytes, attempts } => {
                assert_eq!(attempts, 1);
                assert_eq!(bytes.len(), 4_800_000);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn retries_on_previous_generation_until_under_ceiling() {
        let encoder = Scripted(Mutex::new(vec![5_500_000, 5_000_000, 4_900_000]));
        let outcome =
            enforce_size_limit(&vec![0u8; 6_000_000], &SizePolicy::default(), &encoder).unwrap();
        assert!(matches!(outcome, SizeOutcome::Compressed { attempts: 3, .. }));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let err = enforce_size_limit(&vec![0u8; 6_000_000], &SizePolicy::default(), &Shrink(19, 20))
            .unwrap_err();
        match err {
            EngineError::SizeViolation {
                original_size,
                final_size,
                ceiling,
                attempts,
            } => {
                assert_eq!(original_size, 6_000_000);
                assert_eq!(final_size, 5_144_250);
                assert_eq!(ceiling, 4_950_000);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn jpeg_reencoder_produces_decodable_output() {
        let img = image::RgbaImage::from_pixel(64, 64, image::Rgba([200, 30, 30, 255]));
        let mut png = Cursor::new(Vec::new());
        img.write_to(&mut png, image::ImageFormat::Png).unwrap();

        let jpeg = JpegReencoder.reencode(png.get_ref(), 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
    }
}
