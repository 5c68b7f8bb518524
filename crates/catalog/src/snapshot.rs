//! Crash-safe JSON snapshot of the [`Store`].
//!
//! Writes never touch the durable file in place: the document is written to a temporary file in
//! the same directory, synced, and atomically renamed over the previous snapshot. A reader
//! therefore sees either the old or the new snapshot, never a torn one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::store::Store;
use crate::{CatalogError, Result};

/// Newest snapshot layout this build reads and the one it writes.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotOut<'a> {
    format_version: u32,
    saved_at: DateTime<Utc>,
    store: &'a Store,
}

#[derive(Deserialize)]
struct SnapshotHeader {
    format_version: u32,
}

#[derive(Deserialize)]
struct SnapshotIn {
    #[serde(default)]
    store: Store,
}

#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file is an empty store; anything unreadable is reported and left in place.
    pub fn load(&self) -> Result<Store> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no snapshot yet, starting with an empty store");
                return Ok(Store::default());
            }
            Err(err) => return Err(err.into()),
        };

        let header: SnapshotHeader = serde_json::from_slice(&raw).map_err(|source| self.corrupt(source))?;
        if header.format_version > FORMAT_VERSION {
            return Err(CatalogError::UnsupportedVersion {
                path: self.path.clone(),
                found: header.format_version,
                supported: FORMAT_VERSION,
            });
        }

        let snapshot: SnapshotIn = serde_json::from_slice(&raw).map_err(|source| self.corrupt(source))?;
        debug!(
            path = %self.path.display(),
            records = snapshot.store.records.len(),
            "loaded snapshot"
        );
        Ok(snapshot.store)
    }

    /// Writes `store` to a synced temporary file next to the snapshot. Nothing durable changes
    /// until [`StagedSnapshot::commit`].
    pub fn stage(&self, store: &Store) -> Result<StagedSnapshot> {
        let dir = self.directory();
        fs::create_dir_all(dir)?;

        let document = SnapshotOut {
            format_version: FORMAT_VERSION,
            saved_at: Utc::now(),
            store,
        };
        let payload = serde_json::to_vec_pretty(&document)?;

        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(&payload)?;
        temp.flush()?;
        temp.as_file().sync_all()?;

        Ok(StagedSnapshot {
            temp,
            target: self.path.clone(),
        })
    }

    pub fn save(&self, store: &Store) -> Result<()> {
        self.stage(store)?.commit()
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn corrupt(&self, source: serde_json::Error) -> CatalogError {
        CatalogError::StoreCorrupt {
            path: self.path.clone(),
            source,
        }
    }
}

/// A fully written snapshot waiting to replace the durable one. Dropping it discards the
/// temporary file.
#[derive(Debug)]
pub struct StagedSnapshot {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedSnapshot {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    pub fn commit(self) -> Result<()> {
        self.temp
            .persist(&self.target)
            .map_err(|err| CatalogError::Io(err.error))?;
        sync_parent_dir(&self.target);
        Ok(())
    }
}

/// Makes the rename itself durable where the platform allows opening directories.
fn sync_parent_dir(path: &Path) {
    let Some(parent) = path.parent() else { return };
    if let Err(err) = File::open(parent).and_then(|dir| dir.sync_all()) {
        debug!(dir = %parent.display(), error = %err, "directory sync skipped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ImageRecord;
    use core_types::Fingerprint;
    use tempfile::tempdir;

    fn sample_store() -> Store {
        let mut store = Store::default();
        let fp = Fingerprint::from_digest(&[3; 32]);
        let mut record = ImageRecord::new(fp.clone(), PathBuf::from("/fotos/a.jpg"), Utc::now());
        record.comment = "poda pendente".into();
        store.records.insert(fp, record);
        store
    }

    #[test]
    fn missing_snapshot_is_empty_store() {
        let dir = tempdir().unwrap();
        let store = SnapshotFile::new(dir.path().join("db.json")).load().unwrap();
        assert_eq!(store, Store::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("db.json"));
        let store = sample_store();
        file.save(&store).unwrap();
        assert_eq!(file.load().unwrap(), store);
    }

    #[test]
    fn dropped_stage_leaves_durable_file_alone() {
        let dir = tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("db.json"));
        file.save(&Store::default()).unwrap();
        let before = fs::read(file.path()).unwrap();

        let staged = file.stage(&sample_store()).unwrap();
        assert!(staged.temp_path().exists());
        drop(staged);

        assert_eq!(fs::read(file.path()).unwrap(), before);
        assert_eq!(file.load().unwrap(), Store::default());
    }

    #[test]
    fn corrupt_snapshot_is_reported_and_preserved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, b"{\"format_version\": 1, \"store\": ").unwrap();

        let err = SnapshotFile::new(&path).load().unwrap_err();
        assert!(matches!(err, CatalogError::StoreCorrupt { .. }));
        assert_eq!(fs::read(&path).unwrap(), b"{\"format_version\": 1, \"store\": ");
    }

    #[test]
    fn newer_format_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, br#"{"format_version": 7, "store": {"shape": "unknown"}}"#).unwrap();

        let err = SnapshotFile::new(&path).load().unwrap_err();
        assert!(matches!(
            err,
            CatalogError::UnsupportedVersion { found: 7, supported: 1, .. }
        ));
    }
}
