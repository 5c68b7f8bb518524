use std::path::{Path, PathBuf};
use std::sync::Arc;

use core_types::Fingerprint;

pub mod compress;
pub mod fingerprint;
pub mod metadata;
pub mod preview;

pub use compress::{enforce_size_limit, JpegReencoder, Reencoder, SizeOutcome, SizePolicy};
pub use fingerprint::{fingerprint_bytes, fingerprint_file, fingerprint_reader};
pub use metadata::{extract_from_bytes, extract_from_file, extract_metadata, MetadataWarning, PhotoMetadata};
pub use preview::{render_thumbnail, ThumbnailSpec};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error(
        "image still {final_size} bytes after {attempts} re-encoding attempts \
         (ceiling {ceiling}, original {original_size})"
    )]
    SizeViolation {
        original_size: u64,
        final_size: u64,
        ceiling: u64,
        attempts: u32,
    },
}

impl EngineError {
    pub(crate) fn read(path: &Path, source: std::io::Error) -> Self {
        EngineError::Read {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Bundles the per-image processing steps with the policies of one session.
#[derive(Clone)]
pub struct ImageEngine {
    size_policy: SizePolicy,
    thumbnail: ThumbnailSpec,
    reencoder: Arc<dyn Reencoder>,
}

impl Default for ImageEngine {
    fn default() -> Self {
        Self::new(SizePolicy::default(), ThumbnailSpec::default())
    }
}

impl ImageEngine {
    pub fn new(size_policy: SizePolicy, thumbnail: ThumbnailSpec) -> Self {
        Self {
            size_policy,
            thumbnail,
            reencoder: Arc::new(JpegReencoder),
        }
    }

    pub fn with_reencoder(mut self, reencoder: Arc<dyn Reencoder>) -> Self {
        self.reencoder = reencoder;
        self
    }

    pub fn size_policy(&self) -> &SizePolicy {
        &self.size_policy
    }

    pub fn thumbnail_spec(&self) -> ThumbnailSpec {
        self.thumbnail
    }

    pub fn fingerprint_file(&self, path: &Path) -> Result<Fingerprint> {
        fingerprint_file(path)
    }

    pub fn extract_metadata(&self, path: &Path) -> Result<PhotoMetadata> {
        extract_from_file(path)
    }

    /// Applies the size ceiling to `bytes`, re-encoding a derived copy when needed.
    pub fn enforce_size_limit(&self, bytes: &[u8]) -> Result<SizeOutcome> {
        enforce_size_limit(bytes, &self.size_policy, self.reencoder.as_ref())
    }

    pub fn render_thumbnail(&self, bytes: &[u8], orientation: Option<u16>) -> Result<Vec<u8>> {
        render_thumbnail(bytes, orientation, self.thumbnail)
    }
}
