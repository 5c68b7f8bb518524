//! SQLite schema DDL and initialization for the thumbnail cache.

use rusqlite::{Connection, Error as SqliteError, ErrorCode};

/// SQLite schema version supported by this build.
pub const TARGET_SCHEMA_VERSION: i64 = 1;

pub const THUMBNAIL_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS thumbnails (
    fingerprint TEXT PRIMARY KEY NOT NULL,
    edge        INTEGER NOT NULL,
    jpeg        BLOB NOT NULL,
    created_at  TEXT NOT NULL
);
";

/// Applies the schema (or upgrades an existing cache) on the provided connection.
///
/// The helper enables WAL journaling, runs any pending migrations and keeps
/// `PRAGMA user_version` aligned with [`TARGET_SCHEMA_VERSION`].
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;

    let user_version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if user_version > TARGET_SCHEMA_VERSION {
        return Err(newer_schema_error(user_version));
    }
    if user_version < TARGET_SCHEMA_VERSION {
        apply_migrations(conn, user_version)?;
    }

    conn.pragma_update(None, "user_version", TARGET_SCHEMA_VERSION)?;
    Ok(())
}

fn apply_migrations(conn: &Connection, from_version: i64) -> rusqlite::Result<()> {
    match from_version {
        0 => conn.execute_batch(THUMBNAIL_SCHEMA_SQL),
        _ => Err(newer_schema_error(from_version)),
    }
}

fn newer_schema_error(version: i64) -> SqliteError {
    SqliteError::SqliteFailure(
        rusqlite::ffi::Error {
            code: ErrorCode::DatabaseCorrupt,
            extended_code: 0,
        },
        Some(format!(
            "thumbnail cache schema version {version} is newer than supported {TARGET_SCHEMA_VERSION}"
        )),
    )
}
