use crate::db::{parse_datetime, query_all, query_optional, to_rfc3339, DbHandle, DbResult};
use anyhow::Context;
use chrono::{DateTime, Utc};
use core_types::Fingerprint;
use rusqlite::params;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedThumbnail {
    pub fingerprint: Fingerprint,
    pub edge: u32,
    pub jpeg: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl CachedThumbnail {
    pub fn upsert<H: DbHandle>(&self, db: &H) -> DbResult<()> {
        db.execute(
            "INSERT INTO thumbnails (fingerprint, edge, jpeg, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(fingerprint) DO UPDATE SET
                edge = excluded.edge,
                jpeg = excluded.jpeg,
                created_at = excluded.created_at",
            params![
                self.fingerprint.as_str(),
                self.edge,
                self.jpeg,
                to_rfc3339(self.created_at)
            ],
        )
        .with_context(|| format!("failed to store thumbnail for {}", self.fingerprint))?;
        Ok(())
    }

    pub fn load<H: DbHandle>(db: &H, fingerprint: &Fingerprint) -> DbResult<Option<Self>> {
        query_optional(
            db,
            "SELECT fingerprint, edge, jpeg, created_at FROM thumbnails WHERE fingerprint = ?1",
            params![fingerprint.as_str()],
            CachedThumbnail::from_row,
        )
        .with_context(|| format!("failed to load thumbnail for {fingerprint}"))
    }

    pub fn fingerprints<H: DbHandle>(db: &H) -> DbResult<Vec<Fingerprint>> {
        query_all(
            db,
            "SELECT fingerprint FROM thumbnails ORDER BY fingerprint",
            [],
            |row| {
                let raw: String = row.get(0)?;
                Fingerprint::from_hex(&raw)
                    .with_context(|| format!("invalid fingerprint in thumbnail cache: {raw}"))
            },
        )
    }

    /// Returns whether a row was removed.
    pub fn delete<H: DbHandle>(db: &H, fingerprint: &Fingerprint) -> DbResult<bool> {
        let removed = db
            .execute(
                "DELETE FROM thumbnails WHERE fingerprint = ?1",
                params![fingerprint.as_str()],
            )
            .with_context(|| format!("failed to delete thumbnail for {fingerprint}"))?;
        Ok(removed > 0)
    }

    pub fn count<H: DbHandle>(db: &H) -> DbResult<usize> {
        db.query_row("SELECT COUNT(*) FROM thumbnails", [], |row| {
            let count: i64 = row.get(0)?;
            Ok(count as usize)
        })
    }

    fn from_row(row: &rusqlite::Row<'_>) -> DbResult<Self> {
        let raw: String = row.get(0)?;
        Ok(Self {
            fingerprint: Fingerprint::from_hex(&raw)
                .with_context(|| format!("invalid fingerprint in thumbnail cache: {raw}"))?,
            edge: row.get(1)?,
            jpeg: row.get(2)?,
            created_at: parse_datetime(row.get::<_, String>(3)?, "created_at")?,
        })
    }
}
