//! Row bindings for the thumbnail cache SQLite schema.

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Row};

pub mod db;
pub mod thumbnails;

pub use db::CacheDb;
pub use thumbnails::CachedThumbnail;

pub type DbResult<T> = anyhow::Result<T>;

/// Common trait allowing row modules to operate over a raw `Connection` or a [`CacheDb`].
pub trait DbHandle {
    fn execute(&self, sql: &str, params: impl rusqlite::Params) -> rusqlite::Result<usize>;
    fn prepare<'a>(&'a self, sql: &str) -> rusqlite::Result<rusqlite::Statement<'a>>;

    fn query_row<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        f: impl FnOnce(&Row) -> DbResult<T>,
    ) -> DbResult<T>
    where
        Self: Sized,
    {
        query_one(self, sql, params, f)
    }
}

impl DbHandle for Connection {
    fn execute(&self, sql: &str, params: impl rusqlite::Params) -> rusqlite::Result<usize> {
        Connection::execute(self, sql, params)
    }

    fn prepare<'a>(&'a self, sql: &str) -> rusqlite::Result<rusqlite::Statement<'a>> {
        Connection::prepare(self, sql)
    }
}

/// Map a single row result to a typed value, returning an error when no rows are present.
pub fn query_one<T, H, P, F>(db: &H, sql: &str, params: P, map: F) -> DbResult<T>
where
    H: DbHandle + ?Sized,
    P: rusqlite::Params,
    F: FnOnce(&Row) -> DbResult<T>,
{
    let mut stmt = db.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let row = rows.next()?.context("query returned no rows")?;
    map(&row)
}

/// Map at most one row result to a typed value.
pub fn query_optional<T, H, P, F>(db: &H, sql: &str, params: P, mut map: F) -> DbResult<Option<T>>
where
    H: DbHandle + ?Sized,
    P: rusqlite::Params,
    F: FnMut(&Row) -> DbResult<T>,
{
    let mut stmt = db.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(map(&row)?)),
        None => Ok(None),
    }
}

/// Collect all rows from a query into a vector.
pub fn query_all<T, H, P, F>(db: &H, sql: &str, params: P, mut map: F) -> DbResult<Vec<T>>
where
    H: DbHandle + ?Sized,
    P: rusqlite::Params,
    F: FnMut(&Row) -> DbResult<T>,
{
    let mut stmt = db.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(map(&row)?);
    }
    Ok(out)
}

pub fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_datetime(raw: String, field: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field} timestamp: {raw}"))
}
