use std::path::Path;

use crate::db::DbResult;
use crate::schema::initialize_schema;
use anyhow::Context;
use rusqlite::Connection;

use super::DbHandle;

#[derive(Debug)]
pub struct CacheDb {
    conn: Connection,
}

impl CacheDb {
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open thumbnail cache {}", path.display()))?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

impl DbHandle for CacheDb {
    fn execute(&self, sql: &str, params: impl rusqlite::Params) -> rusqlite::Result<usize> {
        self.conn.execute(sql, params)
    }

    fn prepare<'a>(&'a self, sql: &str) -> rusqlite::Result<rusqlite::Statement<'a>> {
        self.conn.prepare(sql)
    }
}
