use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use app_settings::EngineSettings;
use areas::{Area, AreaIndex, NearestArea};
use chrono::{DateTime, Utc};
use core_types::{AreaId, Fingerprint, ImageStatus, RecordFlags};
use engine::{EngineError, ImageEngine, Reencoder, SizePolicy, ThumbnailSpec};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate_areas, comment_digest, AreaRollup, StatusCounts};
use crate::ingest::{
    self, scan_directory, IngestContext, IngestOptions, IngestOutcome, IngestProgress, IngestReport,
};
use crate::snapshot::SnapshotFile;
use crate::store::{ImageRecord, Store};
use crate::thumbnails::ThumbnailCache;
use crate::{CatalogError, Result};

/// Batch ingestion persists after this many applied items, and once more at the end.
const COMMIT_CHUNK: usize = 64;

const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Everything a report needs about one area.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaReport {
    pub area: Area,
    pub status: ImageStatus,
    pub counts: StatusCounts,
    /// Non-excluded members ordered by `order_index`, then fingerprint.
    pub members: Vec<ImageRecord>,
    pub comment_digest: Vec<String>,
}

/// Everything a report needs about one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageReport {
    pub record: ImageRecord,
    pub area: Option<Area>,
    pub sigla: String,
    pub status: ImageStatus,
    pub comment: String,
    /// Closest area for an unresolved image that has coordinates.
    pub near: Option<NearestArea>,
    pub suggested_filename: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub paths_removed: Vec<PathBuf>,
    /// Records left without any source path. They are kept with their user data.
    pub orphaned: Vec<Fingerprint>,
}

/// One open working directory: the store, its snapshot file, the thumbnail cache and the
/// area index used for classification.
///
/// Readers get the last committed [`Store`] without blocking writers. Mutations are
/// serialized by the writer lock: each one clones the committed store, applies the change,
/// persists it and only then publishes it.
pub struct CatalogService {
    workdir: PathBuf,
    settings: EngineSettings,
    engine: ImageEngine,
    index: AreaIndex,
    store: RwLock<Arc<Store>>,
    writer: Mutex<SnapshotFile>,
    thumbnails: ThumbnailCache,
}

impl CatalogService {
    /// Opens (or starts) the session in `workdir`. With a map, its areas replace the stored
    /// ones and every record is re-resolved when the map changed. Without one, the areas of
    /// the previous session are used.
    pub fn open(
        workdir: impl Into<PathBuf>,
        settings: EngineSettings,
        index: Option<AreaIndex>,
    ) -> Result<Self> {
        let workdir = workdir.into();
        settings.validate()?;
        fs::create_dir_all(&workdir)?;

        let snapshot = SnapshotFile::new(workdir.join(&settings.snapshot_file_name));
        let mut store = snapshot.load()?;

        let index = match index {
            Some(index) => {
                if index.digest().is_none() || store.map_digest.as_ref() != index.digest() {
                    let changed = store.adopt_map(&index, Utc::now());
                    snapshot.save(&store)?;
                    info!(areas = index.len(), reassigned = changed, "adopted area map");
                }
                index
            }
            None => AreaIndex::new(store.areas.values().cloned().collect())
                .with_digest(store.map_digest.clone()),
        };

        let engine = ImageEngine::new(
            SizePolicy {
                ceiling_bytes: settings.size_ceiling_bytes,
                quality: settings.reencode_quality,
                max_attempts: settings.max_reencode_attempts,
            },
            ThumbnailSpec {
                edge: settings.thumbnail_edge,
                quality: settings.thumbnail_quality,
            },
        );
        let thumbnails = ThumbnailCache::open(
            &workdir.join(&settings.thumbnail_db_name),
            settings.thumbnail_edge,
        )?;

        info!(
            workdir = %workdir.display(),
            records = store.records.len(),
            areas = index.len(),
            "opened session"
        );
        Ok(Self {
            workdir,
            settings,
            engine,
            index,
            store: RwLock::new(Arc::new(store)),
            writer: Mutex::new(snapshot),
            thumbnails,
        })
    }

    pub fn with_reencoder(mut self, reencoder: Arc<dyn Reencoder>) -> Self {
        self.engine = self.engine.with_reencoder(reencoder);
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn index(&self) -> &AreaIndex {
        &self.index
    }

    pub fn derived_dir(&self) -> PathBuf {
        self.workdir.join(&self.settings.derived_dir_name)
    }

    /// Last committed store.
    pub fn snapshot(&self) -> Result<Arc<Store>> {
        self.store
            .read()
            .map(|store| Arc::clone(&store))
            .map_err(|_| CatalogError::ConcurrentWriteConflict("store"))
    }

    pub fn ingest_file(&self, path: &Path) -> Result<IngestOutcome> {
        let writer = self.lock_writer()?;
        let current = self.snapshot()?;
        let derived_dir = self.derived_dir();
        let ctx = IngestContext {
            engine: &self.engine,
            index: &self.index,
            store: &current,
            derived_dir: &derived_dir,
        };

        let item = ctx.prepare(path)?;
        for warning in &item.warnings {
            warn!(path = %path.display(), %warning, "ingest warning");
        }
        let mut next = Store::clone(&current);
        let outcome = ingest::apply(&mut next, item, Utc::now())?;
        if !matches!(outcome, IngestOutcome::Unchanged(_)) {
            self.publish(&writer, next)?;
        }
        debug!(path = %path.display(), ?outcome, "ingested file");
        Ok(outcome)
    }

    /// Ingests `paths` on a worker pool. Per-image failures land in the report and never
    /// abort the batch; a failed snapshot write does.
    pub fn ingest_paths(&self, paths: &[PathBuf], options: IngestOptions) -> Result<IngestReport> {
        let writer = self.lock_writer()?;
        let base = self.snapshot()?;
        let derived_dir = self.derived_dir();
        let ctx = IngestContext {
            engine: &self.engine,
            index: &self.index,
            store: &base,
            derived_dir: &derived_dir,
        };

        let total = paths.len();
        let workers = options.workers.unwrap_or(self.settings.worker_threads).max(1);
        info!(total, workers, "starting ingest");

        let mut working = Store::clone(&base);
        let mut report = IngestReport::default();
        let mut completed = 0;
        let mut pending = 0;
        let mut failure: Option<CatalogError> = None;

        ingest::run_pool(
            paths,
            workers,
            &options.cancel,
            |path| ctx.prepare(path),
            |path, prepared| {
                completed += 1;
                let applied = prepared.and_then(|item| {
                    for warning in &item.warnings {
                        warn!(path = %path.display(), %warning, "ingest warning");
                        report.warnings.push((path.to_path_buf(), warning.clone()));
                    }
                    ingest::apply(&mut working, item, Utc::now())
                });
                match applied {
                    Ok(IngestOutcome::Unchanged(fp)) => report.record(IngestOutcome::Unchanged(fp)),
                    Ok(outcome) => {
                        report.record(outcome);
                        pending += 1;
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "failed to ingest image");
                        report.failed.push((path.to_path_buf(), err.to_string()));
                    }
                }

                if let Some(progress) = &options.progress {
                    progress(IngestProgress {
                        completed,
                        total,
                        path: path.to_path_buf(),
                    });
                }

                if pending >= COMMIT_CHUNK {
                    if let Err(err) = self.publish(&writer, working.clone()) {
                        failure = Some(err);
                        return false;
                    }
                    pending = 0;
                }
                true
            },
        );

        if let Some(err) = failure {
            return Err(err);
        }
        if pending > 0 {
            self.publish(&writer, working)?;
        }

        report.canceled = options.cancel.is_canceled();
        report.skipped = total - completed;
        info!(
            added = report.added.len(),
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            canceled = report.canceled,
            "ingest finished"
        );
        Ok(report)
    }

    pub fn ingest_directory(&self, dir: &Path, options: IngestOptions) -> Result<IngestReport> {
        let derived_dir = self.derived_dir();
        let paths = scan_directory(dir, &self.settings, Some(&derived_dir), &options.cancel)?;
        self.ingest_paths(&paths, options)
    }

    pub fn set_status(&self, fingerprint: &Fingerprint, status: ImageStatus) -> Result<()> {
        self.mutate(|store, now| {
            let record = store.record_mut(fingerprint)?;
            record.status = status;
            record.touch(now);
            Ok(())
        })
    }

    pub fn set_comment(&self, fingerprint: &Fingerprint, comment: impl Into<String>) -> Result<()> {
        let comment = comment.into();
        self.mutate(|store, now| {
            let record = store.record_mut(fingerprint)?;
            record.comment = comment;
            record.touch(now);
            Ok(())
        })
    }

    /// Pins the record at `order_index`; [`CatalogService::reorder_by_area`] keeps it there.
    pub fn set_order(&self, fingerprint: &Fingerprint, order_index: i64) -> Result<()> {
        if order_index < 1 {
            return Err(CatalogError::InvalidOrder(order_index));
        }
        self.mutate(|store, now| {
            let record = store.record_mut(fingerprint)?;
            record.order_index = order_index;
            record.flags.insert(RecordFlags::ORDER_LOCKED);
            record.touch(now);
            Ok(())
        })
    }

    pub fn set_excluded(&self, fingerprint: &Fingerprint, excluded: bool) -> Result<()> {
        self.mutate(|store, now| {
            let record = store.record_mut(fingerprint)?;
            record.flags.set(RecordFlags::EXCLUDED, excluded);
            record.touch(now);
            Ok(())
        })
    }

    /// Forgets the image, its cached thumbnail and its derived copy. Source files are left
    /// alone.
    pub fn remove_image(&self, fingerprint: &Fingerprint) -> Result<ImageRecord> {
        let removed = self.mutate(|store, _| {
            store
                .records
                .remove(fingerprint)
                .ok_or_else(|| CatalogError::UnknownImage(fingerprint.clone()))
        })?;

        if let Err(err) = self.thumbnails.remove(fingerprint) {
            warn!(fingerprint = %fingerprint.short(), error = %err, "failed to drop cached thumbnail");
        }
        if let Some(derived) = &removed.derived {
            if let Err(err) = fs::remove_file(&derived.path) {
                debug!(path = %derived.path.display(), error = %err, "derived copy not removed");
            }
        }
        info!(fingerprint = %fingerprint.short(), "removed image");
        Ok(removed)
    }

    /// Returns how many order indices changed.
    pub fn reorder_by_area(&self) -> Result<usize> {
        self.mutate(|store, now| Ok(store.reorder_by_area(now)))
    }

    /// Drops source paths that no longer exist on disk.
    pub fn prune_missing_paths(&self) -> Result<PruneReport> {
        self.mutate(|store, now| {
            let mut report = PruneReport::default();
            for record in store.records.values_mut() {
                let missing: Vec<PathBuf> = record
                    .source_paths
                    .iter()
                    .filter(|path| !path.exists())
                    .cloned()
                    .collect();
                if missing.is_empty() {
                    continue;
                }
                for path in &missing {
                    record.source_paths.remove(path);
                }
                record.touch(now);
                if record.source_paths.is_empty() {
                    report.orphaned.push(record.fingerprint.clone());
                }
                report.paths_removed.extend(missing);
            }
            Ok(report)
        })
    }

    /// Overwrites every existing source file of the record with its derived copy, then drops
    /// the copy. Returns how many files were replaced.
    pub fn replace_with_derived(&self, fingerprint: &Fingerprint) -> Result<usize> {
        let writer = self.lock_writer()?;
        let current = self.snapshot()?;
        let record = current
            .record(fingerprint)
            .ok_or_else(|| CatalogError::UnknownImage(fingerprint.clone()))?;
        let derived = record
            .derived
            .clone()
            .ok_or_else(|| CatalogError::NoDerivedCopy(fingerprint.clone()))?;

        let bytes = fs::read(&derived.path).map_err(|source| EngineError::Read {
            path: derived.path.clone(),
            source,
        })?;

        let mut replaced = 0;
        for path in &record.source_paths {
            if !path.exists() {
                warn!(path = %path.display(), "source file missing, not replaced");
                continue;
            }
            overwrite_atomically(path, &bytes)?;
            replaced += 1;
        }
        if replaced == 0 {
            return Ok(0);
        }

        let mut next = Store::clone(&current);
        let record = next.record_mut(fingerprint)?;
        record.derived = None;
        record.touch(Utc::now());
        self.publish(&writer, next)?;

        if let Err(err) = fs::remove_file(&derived.path) {
            debug!(path = %derived.path.display(), error = %err, "derived copy not removed");
        }
        info!(fingerprint = %fingerprint.short(), replaced, "replaced originals with derived copy");
        Ok(replaced)
    }

    pub fn area_report(&self, area_id: &AreaId) -> Result<AreaReport> {
        let store = self.snapshot()?;
        let area = store
            .areas
            .get(area_id)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownArea(area_id.clone()))?;

        let members: Vec<ImageRecord> = store.members(area_id).into_iter().cloned().collect();
        let counts: StatusCounts = members.iter().map(|record| record.status).collect();
        let digest = comment_digest(members.iter().map(|record| record.comment.as_str()));
        Ok(AreaReport {
            area,
            status: counts.mode(),
            counts,
            members,
            comment_digest: digest,
        })
    }

    pub fn area_rollups(&self) -> Result<Vec<AreaRollup>> {
        Ok(aggregate_areas(&*self.snapshot()?).into_values().collect())
    }

    pub fn image_report(&self, fingerprint: &Fingerprint) -> Result<ImageReport> {
        let store = self.snapshot()?;
        let record = store
            .record(fingerprint)
            .ok_or_else(|| CatalogError::UnknownImage(fingerprint.clone()))?;

        let area = record.area_id().and_then(|id| store.areas.get(id)).cloned();
        let near = match (&area, record.coordinates) {
            (None, Some(point)) => self.index.nearest_area(point),
            _ => None,
        };
        let sigla = store.sigla_of(record).to_string();
        let extension = record
            .source_paths
            .iter()
            .next()
            .and_then(|path| path.extension())
            .and_then(|ext| ext.to_str());

        Ok(ImageReport {
            suggested_filename: suggested_filename(record.order_index, &sigla, extension),
            record: record.clone(),
            area,
            sigla,
            status: record.status,
            comment: record.comment.clone(),
            near,
        })
    }

    /// Square JPEG preview of the image, rendered on first request.
    pub fn thumbnail(&self, fingerprint: &Fingerprint) -> Result<Vec<u8>> {
        self.thumbnail_from(&*self.snapshot()?, fingerprint)
    }

    /// Renders from `store`, which may already be stale. An image removed while its preview
    /// was rendering is dropped from the cache again: `remove_image` publishes before it
    /// prunes the cache, so one of the two sides always sees the other.
    fn thumbnail_from(&self, store: &Store, fingerprint: &Fingerprint) -> Result<Vec<u8>> {
        let record = store
            .record(fingerprint)
            .ok_or_else(|| CatalogError::UnknownImage(fingerprint.clone()))?;

        let jpeg = self.thumbnails.get_or_create(fingerprint, || {
            let path = record.working_path().ok_or_else(|| {
                CatalogError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("image {fingerprint} has no file on disk"),
                ))
            })?;
            let bytes = fs::read(path).map_err(|source| EngineError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(self.engine.render_thumbnail(&bytes, record.orientation)?)
        })?;

        if self.snapshot()?.record(fingerprint).is_none() {
            self.thumbnails.remove(fingerprint)?;
            return Err(CatalogError::UnknownImage(fingerprint.clone()));
        }
        Ok(jpeg)
    }

    pub fn list_areas(&self) -> Result<Vec<Area>> {
        Ok(self.snapshot()?.areas.values().cloned().collect())
    }

    /// All records in report order.
    pub fn list_records(&self) -> Result<Vec<ImageRecord>> {
        let store = self.snapshot()?;
        let mut records: Vec<ImageRecord> = store.records.values().cloned().collect();
        records.sort_by(|a, b| {
            a.order_index
                .cmp(&b.order_index)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        Ok(records)
    }

    pub fn unresolved_records(&self) -> Result<Vec<ImageRecord>> {
        Ok(self.snapshot()?.unresolved().into_iter().cloned().collect())
    }

    /// Waits for any in-flight write and ends the session. Every mutation is already durable.
    pub fn close(self) -> Result<()> {
        let _writer = self.lock_writer()?;
        let records = self.snapshot()?.records.len();
        info!(workdir = %self.workdir.display(), records, "closed session");
        Ok(())
    }

    fn mutate<T>(&self, op: impl FnOnce(&mut Store, DateTime<Utc>) -> Result<T>) -> Result<T> {
        let writer = self.lock_writer()?;
        let mut next = Store::clone(&*self.snapshot()?);
        let value = op(&mut next, Utc::now())?;
        self.publish(&writer, next)?;
        Ok(value)
    }

    /// Persists `next` and makes it the committed store. Nothing is published when the
    /// write fails.
    fn publish(&self, snapshot: &SnapshotFile, next: Store) -> Result<()> {
        snapshot.save(&next)?;
        let mut store = self
            .store
            .write()
            .map_err(|_| CatalogError::ConcurrentWriteConflict("store"))?;
        *store = Arc::new(next);
        Ok(())
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, SnapshotFile>> {
        self.writer
            .lock()
            .map_err(|_| CatalogError::ConcurrentWriteConflict("snapshot writer"))
    }
}

/// `"{index:03} - {sigla}.{ext}"` with characters invalid in file names replaced by `-`.
pub fn suggested_filename(index: i64, sigla: &str, extension: Option<&str>) -> String {
    let sigla: String = sigla
        .chars()
        .map(|c| if INVALID_FILENAME_CHARS.contains(&c) { '-' } else { c })
        .collect();
    match extension {
        Some(ext) if !ext.is_empty() => format!("{index:03} - {sigla}.{ext}"),
        _ => format!("{index:03} - {sigla}"),
    }
}

fn overwrite_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| CatalogError::Io(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn plain_jpeg() -> Vec<u8> {
        let img = RgbImage::from_pixel(16, 16, Rgb([90, 120, 30]));
        let mut out = Vec::new();
        JpegEncoder::new(&mut out).encode_image(&img).unwrap();
        out
    }

    #[test]
    fn preview_of_an_image_removed_mid_render_is_not_cached() {
        let work = tempdir().unwrap();
        let path = work.path().join("foto.jpg");
        fs::write(&path, plain_jpeg()).unwrap();
        let service = CatalogService::open(work.path(), EngineSettings::default(), None).unwrap();
        let fp = match service.ingest_file(&path).unwrap() {
            IngestOutcome::Added(fp) => fp,
            other => panic!("unexpected outcome {other:?}"),
        };

        let before_removal = service.snapshot().unwrap();
        service.remove_image(&fp).unwrap();

        let err = service.thumbnail_from(&before_removal, &fp).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownImage(_)));
        assert_eq!(service.thumbnails.len().unwrap(), 0);
    }

    #[test]
    fn suggested_filename_pads_and_sanitizes() {
        assert_eq!(suggested_filename(7, "Q12", Some("jpg")), "007 - Q12.jpg");
        assert_eq!(suggested_filename(12, "A/B:C?", Some("JPG")), "012 - A-B-C-.JPG");
        assert_eq!(suggested_filename(1234, "Desconhecida", None), "1234 - Desconhecida");
    }
}
