//! Fingerprint-keyed preview cache backed by SQLite.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use core_types::Fingerprint;
use tracing::debug;

use crate::db::{CacheDb, CachedThumbnail, DbResult};
use crate::{CatalogError, Result};

/// Previews survive path changes; only [`ThumbnailCache::remove`] invalidates an entry.
pub struct ThumbnailCache {
    db: Mutex<CacheDb>,
    inflight: Mutex<HashMap<Fingerprint, Arc<Mutex<()>>>>,
    edge: u32,
}

impl ThumbnailCache {
    pub fn open(path: &Path, edge: u32) -> Result<Self> {
        let db = CacheDb::open(path).map_err(CatalogError::Thumbnail)?;
        Ok(Self::with_db(db, edge))
    }

    pub fn in_memory(edge: u32) -> Result<Self> {
        let db = CacheDb::in_memory().map_err(CatalogError::Thumbnail)?;
        Ok(Self::with_db(db, edge))
    }

    fn with_db(db: CacheDb, edge: u32) -> Self {
        Self {
            db: Mutex::new(db),
            inflight: Mutex::new(HashMap::new()),
            edge,
        }
    }

    pub fn edge(&self) -> u32 {
        self.edge
    }

    /// Cached preview for `fingerprint`. Entries rendered at another edge count as missing.
    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Vec<u8>>> {
        let cached = self.with_db_lock(|db| CachedThumbnail::load(db, fingerprint))?;
        Ok(cached
            .filter(|thumb| thumb.edge == self.edge)
            .map(|thumb| thumb.jpeg))
    }

    /// Returns the cached preview or runs `render` once to produce it. Concurrent callers for
    /// the same fingerprint wait for the first one instead of rendering again.
    pub fn get_or_create<F>(&self, fingerprint: &Fingerprint, render: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        if let Some(jpeg) = self.get(fingerprint)? {
            return Ok(jpeg);
        }

        let key_lock = {
            let mut inflight = self
                .inflight
                .lock()
                .map_err(|_| CatalogError::ConcurrentWriteConflict("thumbnail in-flight table"))?;
            Arc::clone(inflight.entry(fingerprint.clone()).or_default())
        };

        let result = {
            let _guard = key_lock
                .lock()
                .map_err(|_| CatalogError::ConcurrentWriteConflict("thumbnail key lock"))?;
            match self.get(fingerprint)? {
                Some(jpeg) => Ok(jpeg),
                None => self.render_and_store(fingerprint, render),
            }
        };

        if let Ok(mut inflight) = self.inflight.lock() {
            if Arc::strong_count(&key_lock) <= 2 {
                inflight.remove(fingerprint);
            }
        }
        result
    }

    /// Drops the preview for a removed image. Returns whether one existed.
    pub fn remove(&self, fingerprint: &Fingerprint) -> Result<bool> {
        self.with_db_lock(|db| CachedThumbnail::delete(db, fingerprint))
    }

    pub fn len(&self) -> Result<usize> {
        self.with_db_lock(|db| CachedThumbnail::count(db))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn fingerprints(&self) -> Result<Vec<Fingerprint>> {
        self.with_db_lock(|db| CachedThumbnail::fingerprints(db))
    }

    fn render_and_store<F>(&self, fingerprint: &Fingerprint, render: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let jpeg = render()?;
        let entry = CachedThumbnail {
            fingerprint: fingerprint.clone(),
            edge: self.edge,
            jpeg,
            created_at: Utc::now(),
        };
        self.with_db_lock(|db| entry.upsert(db))?;
        debug!(fingerprint = %fingerprint.short(), bytes = entry.jpeg.len(), "cached thumbnail");
        Ok(entry.jpeg)
    }

    fn with_db_lock<T>(&self, op: impl FnOnce(&CacheDb) -> DbResult<T>) -> Result<T> {
        let db: MutexGuard<'_, CacheDb> = self
            .db
            .lock()
            .map_err(|_| CatalogError::ConcurrentWriteConflict("thumbnail cache"))?;
        op(&db).map_err(CatalogError::Thumbnail)
    }
}
