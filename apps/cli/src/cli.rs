use std::path::PathBuf;

use clap::{Parser, Subcommand};
use core_types::ImageStatus;

/// Vistoria - classify field inspection photos by area and track their status
#[derive(Parser, Debug)]
#[command(name = "vistoria")]
#[command(about = "Classify inspection photos by site area and track their status", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Working directory holding the snapshot, thumbnails and derived copies
    /// (defaults to the last one used)
    #[arg(long, global = true)]
    pub workdir: Option<PathBuf>,

    /// GeoJSON area map (defaults to the last one used, then to the stored areas)
    #[arg(long, global = true)]
    pub map: Option<PathBuf>,

    /// Output results in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest every image under a directory (defaults to the working directory)
    Ingest(IngestArgs),

    /// List areas with their aggregated status
    Areas,

    /// Show one area with its members and comments
    Area {
        /// Area id, e.g. quadra-12
        id: String,
    },

    /// List images in report order
    List {
        /// Only images without an area
        #[arg(long)]
        unresolved: bool,
    },

    /// Show one image
    Show {
        /// Fingerprint or a unique prefix of it
        fingerprint: String,
    },

    /// Set the service status of an image
    Status {
        fingerprint: String,
        /// not-started, partial or completed
        status: ImageStatus,
    },

    /// Replace the comment of an image
    Comment { fingerprint: String, text: String },

    /// Pin an image at a report position
    Order { fingerprint: String, index: i64 },

    /// Exclude an image from reports and rollups
    Exclude {
        fingerprint: String,
        /// Include it again
        #[arg(long)]
        undo: bool,
    },

    /// Forget an image (source files are kept)
    Remove { fingerprint: String },

    /// Renumber images by area code, then capture time
    Reorder,

    /// Drop source paths that no longer exist
    Prune,

    /// Overwrite the originals of an image with its compressed copy
    ReplaceOriginals { fingerprint: String },

    /// Write the thumbnail of an image to a file
    Thumbnail {
        fingerprint: String,
        /// Output JPEG path
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[derive(Parser, Debug)]
pub struct IngestArgs {
    /// Directory to scan recursively
    pub dir: Option<PathBuf>,

    /// Worker threads (defaults to the working directory settings)
    #[arg(long)]
    pub workers: Option<usize>,
}
