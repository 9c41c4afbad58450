use std::path::{Path, PathBuf};

use log::{debug, info};
use rusqlite::Connection;

use crate::error::{NotepadError, Result};

mod notes;
mod schema;

pub use schema::SCHEMA_VERSION;

/// The record store: one SQLite connection holding every note.
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
#[error("database schema version {found} is newer than supported version {supported}")]
struct UnsupportedVersion {
    found: i32,
    supported: i32,
}

impl Database {
    /// Open (creating if needed) the database file and bring its schema up to date.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| NotepadError::unavailable(&path, e))?;
            }
        }

        let conn = Connection::open(&path).map_err(|e| NotepadError::unavailable(&path, e))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .and_then(|()| {
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                })
            })
            .map_err(|e| NotepadError::unavailable(&path, e))?;

        let db = Self { conn, path };
        db.initialize()?;
        info!("opened note store at {}", db.path.display());
        Ok(db)
    }

    /// Open in-memory database for testing
    pub fn open_memory() -> Result<Self> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|e| NotepadError::unavailable(&path, e))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| NotepadError::unavailable(&path, e))?;

        let db = Self { conn, path };
        db.initialize()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the schema if absent. Safe to call repeatedly; never touches
    /// data in a database that is already at the current version.
    pub fn initialize(&self) -> Result<()> {
        let version = self
            .schema_version()
            .map_err(|e| NotepadError::unavailable(&self.path, e))?;

        if version > SCHEMA_VERSION {
            return Err(NotepadError::unavailable(
                &self.path,
                UnsupportedVersion {
                    found: version,
                    supported: SCHEMA_VERSION,
                },
            ));
        }

        if version == 0 {
            debug!("creating schema v{}", SCHEMA_VERSION);
            self.conn
                .execute_batch(&format!(
                    "BEGIN TRANSACTION; {} INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, {}); COMMIT;",
                    schema::SCHEMA_V1,
                    SCHEMA_VERSION
                ))
                .map_err(|e| {
                    let _ = self.conn.execute_batch("ROLLBACK;");
                    NotepadError::unavailable(&self.path, e)
                })?;
        }

        Ok(())
    }

    fn schema_version(&self) -> rusqlite::Result<i32> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
            [],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(0);
        }

        match self
            .conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            }) {
            Ok(v) => Ok(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(e),
        }
    }
}
