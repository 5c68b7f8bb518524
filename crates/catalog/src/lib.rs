pub mod aggregate;
pub mod db;
pub mod ingest;
pub mod schema;
pub mod services;
pub mod snapshot;
pub mod store;
pub mod thumbnails;

use std::path::PathBuf;

use core_types::{AreaId, Fingerprint};
use thiserror::Error;

pub use aggregate::{aggregate_areas, aggregate_statuses, comment_digest, AreaRollup, StatusCounts};
pub use ingest::{
    scan_directory, CancellationFlag, IngestOptions, IngestOutcome, IngestProgress, IngestReport,
};
pub use services::{suggested_filename, AreaReport, CatalogService, ImageReport, PruneReport};
pub use snapshot::{SnapshotFile, StagedSnapshot, FORMAT_VERSION};
pub use store::{DerivedCopy, ImageRecord, Store, UNKNOWN_SIGLA};
pub use thumbnails::ThumbnailCache;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot {} is corrupt and was left untouched: {source}", path.display())]
    StoreCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot {} has format version {found}, newest supported is {supported}", path.display())]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    #[error("no image with fingerprint {0}")]
    UnknownImage(Fingerprint),

    #[error("no area with id {0}")]
    UnknownArea(AreaId),

    #[error("order index must be at least 1, got {0}")]
    InvalidOrder(i64),

    #[error("image {0} has no derived copy")]
    NoDerivedCopy(Fingerprint),

    #[error(transparent)]
    Engine(#[from] engine::EngineError),

    #[error("thumbnail cache error: {0:#}")]
    Thumbnail(#[source] anyhow::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] app_settings::AppSettingsError),

    /// A lock was poisoned by a panicking writer; the session can no longer guarantee
    /// consistent state.
    #[error("concurrent write conflict on {0}")]
    ConcurrentWriteConflict(&'static str),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
