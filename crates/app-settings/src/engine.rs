use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{AppSettingsError, Result};

/// Name of the per-workdir settings file.
pub const ENGINE_SETTINGS_FILE: &str = "vistoria.json";

const MAX_DEFAULT_WORKERS: usize = 8;

/// Processing settings of one working directory. Missing keys take their defaults, so an old
/// or hand-edited file keeps working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub size_ceiling_bytes: u64,
    pub reencode_quality: u8,
    pub max_reencode_attempts: u32,
    pub thumbnail_edge: u32,
    pub thumbnail_quality: u8,
    pub worker_threads: usize,
    pub snapshot_file_name: String,
    pub thumbnail_db_name: String,
    pub derived_dir_name: String,
    pub image_extensions: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_DEFAULT_WORKERS);
        Self {
            size_ceiling_bytes: 4_950_000,
            reencode_quality: 80,
            max_reencode_attempts: 3,
            thumbnail_edge: 600,
            thumbnail_quality: 85,
            worker_threads: workers,
            snapshot_file_name: "vistoria_db.json".into(),
            thumbnail_db_name: "thumbnails.sqlite".into(),
            derived_dir_name: "derived".into(),
            image_extensions: ["jpg", "jpeg", "png", "heic", "heif", "tif", "tiff", "webp"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl EngineSettings {
    pub fn load_from_dir(workdir: &Path) -> Result<Self> {
        let path = Self::path_in(workdir);
        if !path.exists() {
            debug!(path = %path.display(), "no engine settings file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        let settings: EngineSettings = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save_to_dir(&self, workdir: &Path) -> Result<()> {
        self.validate()?;
        fs::create_dir_all(workdir)?;
        let payload = serde_json::to_string_pretty(self)?;
        fs::write(Self::path_in(workdir), payload)?;
        Ok(())
    }

    pub fn path_in(workdir: &Path) -> PathBuf {
        workdir.join(ENGINE_SETTINGS_FILE)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |field, reason: &str| AppSettingsError::Invalid {
            field,
            reason: reason.to_string(),
        };
        if self.size_ceiling_bytes == 0 {
            return Err(invalid("size_ceiling_bytes", "must be positive"));
        }
        if !(1..=100).contains(&self.reencode_quality) {
            return Err(invalid("reencode_quality", "must be within 1..=100"));
        }
        if !(1..=100).contains(&self.thumbnail_quality) {
            return Err(invalid("thumbnail_quality", "must be within 1..=100"));
        }
        if self.max_reencode_attempts == 0 {
            return Err(invalid("max_reencode_attempts", "must be at least 1"));
        }
        if self.thumbnail_edge == 0 {
            return Err(invalid("thumbnail_edge", "must be positive"));
        }
        if self.worker_threads == 0 {
            return Err(invalid("worker_threads", "must be at least 1"));
        }
        Ok(())
    }

    /// Case-insensitive match of the file extension against `image_extensions`.
    pub fn is_image_path(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.image_extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }
}
