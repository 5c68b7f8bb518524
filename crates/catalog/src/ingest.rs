//! Batch ingestion: directory scan, per-image preparation on a worker pool, and folding the
//! prepared results into a [`Store`].

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use app_settings::EngineSettings;
use areas::{AreaIndex, Locator, Resolution};
use chrono::{DateTime, Utc};
use core_types::{AreaAssignment, Coordinates, Fingerprint};
use engine::{fingerprint_bytes, EngineError, ImageEngine, SizeOutcome};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::store::{DerivedCopy, ImageRecord, Store};
use crate::{CatalogError, Result};

#[derive(Clone, Default, Debug)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub type ProgressCallback = Arc<dyn Fn(IngestProgress) + Send + Sync>;

#[derive(Clone, Default)]
pub struct IngestOptions {
    /// Worker count; `None` uses the session's `worker_threads`.
    pub workers: Option<usize>,
    pub cancel: CancellationFlag,
    pub progress: Option<ProgressCallback>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestProgress {
    pub completed: usize,
    pub total: usize,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "fingerprint", rename_all = "snake_case")]
pub enum IngestOutcome {
    Added(Fingerprint),
    /// Known content seen under a new path.
    Updated(Fingerprint),
    Unchanged(Fingerprint),
}

impl IngestOutcome {
    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            IngestOutcome::Added(fp) | IngestOutcome::Updated(fp) | IngestOutcome::Unchanged(fp) => fp,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub added: Vec<Fingerprint>,
    pub updated: Vec<Fingerprint>,
    pub unchanged: Vec<Fingerprint>,
    pub failed: Vec<(PathBuf, String)>,
    pub warnings: Vec<(PathBuf, String)>,
    pub canceled: bool,
    /// Paths never picked up because the batch was canceled.
    pub skipped: usize,
}

impl IngestReport {
    pub fn record(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Added(fp) => self.added.push(fp),
            IngestOutcome::Updated(fp) => self.updated.push(fp),
            IngestOutcome::Unchanged(fp) => self.unchanged.push(fp),
        }
    }

    pub fn processed(&self) -> usize {
        self.added.len() + self.updated.len() + self.unchanged.len() + self.failed.len()
    }
}

/// Recursively lists image files under `dir`, sorted. `derived_dir`, when it lies inside the
/// scanned tree, is not entered; folders elsewhere that merely share its name are.
pub fn scan_directory(
    dir: &Path,
    settings: &EngineSettings,
    derived_dir: Option<&Path>,
    cancel: &CancellationFlag,
) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(CatalogError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        )));
    }

    let skip = derived_dir.and_then(|path| path.canonicalize().ok());
    let mut out = Vec::new();
    let walker = WalkDir::new(dir).into_iter().filter_entry(|entry| match &skip {
        Some(skip) if entry.depth() > 0 && entry.file_type().is_dir() => {
            entry.file_name() != skip.file_name().unwrap_or_default()
                || entry.path().canonicalize().map_or(true, |path| &path != skip)
        }
        _ => true,
    });
    for entry in walker {
        if cancel.is_canceled() {
            break;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry during scan");
                continue;
            }
        };
        if entry.file_type().is_file() && settings.is_image_path(entry.path()) {
            out.push(entry.into_path());
        }
    }

    out.sort();
    debug!(dir = %dir.display(), found = out.len(), "scanned directory");
    Ok(out)
}

/// What a worker learned about one file, before the store is touched.
#[derive(Debug)]
pub(crate) struct PreparedItem {
    pub path: PathBuf,
    pub prepared: Prepared,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub(crate) enum Prepared {
    /// Content already catalogued under this record fingerprint.
    Known(Fingerprint),
    New(Box<NewImage>),
}

#[derive(Debug)]
pub(crate) struct NewImage {
    pub fingerprint: Fingerprint,
    pub captured_at: Option<DateTime<Utc>>,
    pub coordinates: Option<Coordinates>,
    pub orientation: Option<u16>,
    pub area: AreaAssignment,
    pub derived: Option<DerivedCopy>,
}

/// Read-only inputs shared by every worker of one batch.
pub(crate) struct IngestContext<'a> {
    pub engine: &'a ImageEngine,
    pub index: &'a AreaIndex,
    pub store: &'a Store,
    pub derived_dir: &'a Path,
}

impl IngestContext<'_> {
    pub fn prepare(&self, path: &Path) -> Result<PreparedItem> {
        let original = self.engine.fingerprint_file(path)?;
        if let Some(existing) = self.store.find_by_content(&original) {
            return Ok(PreparedItem {
                path: path.to_path_buf(),
                prepared: Prepared::Known(existing.fingerprint.clone()),
                warnings: Vec::new(),
            });
        }

        let metadata = self.engine.extract_metadata(path)?;
        let mut warnings: Vec<String> = metadata.warnings.iter().map(ToString::to_string).collect();

        let (fingerprint, derived) = self.enforce_size(path, &original)?;

        let (area, resolution) = Locator::new(self.index).resolve(metadata.coordinates);
        if let Some(Resolution::Ambiguous { chosen, others }) = &resolution {
            let others: Vec<&str> = others.iter().map(|id| id.as_str()).collect();
            warnings.push(format!(
                "position lies inside overlapping areas {chosen} and {}; assigned to {chosen}",
                others.join(", ")
            ));
        }

        debug!(path = %path.display(), fingerprint = %fingerprint.short(), ?area, "prepared image");
        Ok(PreparedItem {
            path: path.to_path_buf(),
            prepared: Prepared::New(Box::new(NewImage {
                fingerprint,
                captured_at: metadata.captured_at,
                coordinates: metadata.coordinates,
                orientation: metadata.orientation,
                area,
                derived,
            })),
            warnings,
        })
    }

    /// Fingerprint the record will carry, plus the derived copy when the original is over the
    /// ceiling. The original file is never modified.
    fn enforce_size(
        &self,
        path: &Path,
        original: &Fingerprint,
    ) -> Result<(Fingerprint, Option<DerivedCopy>)> {
        let read_err = |source| EngineError::Read {
            path: path.to_path_buf(),
            source,
        };
        let len = fs::metadata(path).map_err(read_err)?.len();
        if len <= self.engine.size_policy().ceiling_bytes {
            return Ok((original.clone(), None));
        }

        let bytes = fs::read(path).map_err(read_err)?;
        match self.engine.enforce_size_limit(&bytes)? {
            SizeOutcome::WithinLimit => Ok((original.clone(), None)),
            SizeOutcome::Compressed { bytes, attempts } => {
                let derived_path = write_derived(self.derived_dir, path, original, &bytes)?;
                debug!(
                    path = %path.display(),
                    derived = %derived_path.display(),
                    original_size = len,
                    size = bytes.len(),
                    attempts,
                    "wrote derived copy"
                );
                Ok((
                    fingerprint_bytes(&bytes),
                    Some(DerivedCopy {
                        path: derived_path,
                        original_fingerprint: original.clone(),
                        attempts,
                        size_bytes: bytes.len() as u64,
                    }),
                ))
            }
        }
    }
}

fn write_derived(dir: &Path, source: &Path, original: &Fingerprint, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let stem = source
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("image");
    let target = dir.join(format!("{stem}-{}.jpg", original.short()));

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(&target).map_err(|err| CatalogError::Io(err.error))?;
    Ok(target)
}

/// Folds one prepared item into `store`. User-owned fields of an existing record are never
/// touched; only the new source path is added.
pub(crate) fn apply(store: &mut Store, item: PreparedItem, now: DateTime<Utc>) -> Result<IngestOutcome> {
    let PreparedItem { path, prepared, .. } = item;
    match prepared {
        Prepared::Known(fingerprint) => add_path(store, &fingerprint, path, now),
        Prepared::New(image) => {
            let existing = store
                .find_by_content(&image.fingerprint)
                .or_else(|| {
                    image
                        .derived
                        .as_ref()
                        .and_then(|d| store.find_by_content(&d.original_fingerprint))
                })
                .map(|record| (record.fingerprint.clone(), record.derived.clone()));

            if let Some((fingerprint, kept)) = existing {
                // Same content prepared twice in one batch.
                discard_orphan(image.derived.as_ref(), kept.as_ref());
                return add_path(store, &fingerprint, path, now);
            }

            let NewImage {
                fingerprint,
                captured_at,
                coordinates,
                orientation,
                area,
                derived,
            } = *image;
            let mut record = ImageRecord::new(fingerprint.clone(), path, now);
            record.captured_at = captured_at;
            record.coordinates = coordinates;
            record.orientation = orientation;
            record.area = area;
            record.derived = derived;
            record.order_index = store.next_order_index();
            store.records.insert(fingerprint.clone(), record);
            Ok(IngestOutcome::Added(fingerprint))
        }
    }
}

fn add_path(
    store: &mut Store,
    fingerprint: &Fingerprint,
    path: PathBuf,
    now: DateTime<Utc>,
) -> Result<IngestOutcome> {
    let record = store.record_mut(fingerprint)?;
    if record.source_paths.insert(path) {
        record.touch(now);
        Ok(IngestOutcome::Updated(fingerprint.clone()))
    } else {
        Ok(IngestOutcome::Unchanged(fingerprint.clone()))
    }
}

fn discard_orphan(written: Option<&DerivedCopy>, kept: Option<&DerivedCopy>) {
    let Some(written) = written else { return };
    if kept.is_some_and(|kept| kept.path == written.path) {
        return;
    }
    if let Err(err) = fs::remove_file(&written.path) {
        debug!(path = %written.path.display(), error = %err, "could not remove duplicate derived copy");
    }
}

/// Runs `work` over `paths` on up to `workers` scoped threads pulling from a shared cursor.
/// `sink` sees every result on the calling thread in the order of `paths`, whatever order the
/// workers finish in; returning `false` stops the pool. Canceled or stopped pools let in-flight items finish.
pub(crate) fn run_pool<T, W, S>(
    paths: &[PathBuf],
    workers: usize,
    cancel: &CancellationFlag,
    work: W,
    mut sink: S,
) where
    T: Send,
    W: Fn(&Path) -> T + Sync,
    S: FnMut(&Path, T) -> bool,
{
    if paths.is_empty() {
        return;
    }

    let cursor = AtomicUsize::new(0);
    let halted = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel::<(usize, T)>();

    thread::scope(|scope| {
        for _ in 0..workers.clamp(1, paths.len()) {
            let tx = tx.clone();
            let (cursor, halted, work) = (&cursor, &halted, &work);
            scope.spawn(move || loop {
                if cancel.is_canceled() || halted.load(Ordering::SeqCst) {
                    break;
                }
                let next = cursor.fetch_add(1, Ordering::SeqCst);
                let Some(path) = paths.get(next) else { break };
                if tx.send((next, work(path))).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        // Workers finish out of order; hold results until the next index in scan order
        // arrives. Taken indices are always contiguous, so nothing is left behind.
        let mut ready: BTreeMap<usize, T> = BTreeMap::new();
        let mut next_up = 0;
        for (idx, result) in rx {
            ready.insert(idx, result);
            while let Some(result) = ready.remove(&next_up) {
                if !halted.load(Ordering::SeqCst) && !sink(&paths[next_up], result) {
                    halted.store(true, Ordering::SeqCst);
                }
                next_up += 1;
            }
        }
    });
}
