//! SQLite persistence.
//!
//! `Database` owns a single connection behind a mutex; operations are
//! grouped into submodules by record type. Chunk writes go through one
//! transaction so a document's chunk set is always consistent.

mod chunks;
mod documents;
mod migrations;
pub mod models;

pub use models::{Chunk, Document, ProcessingStatus};

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{DatabaseError, DbResult};

/// Handle to the SQLite store shared across the service
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database file, creating it and its parent directory if needed
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
            })?;
        }

        let conn = Connection::open(path).map_err(DatabaseError::Connection)?;

        // WAL keeps readers out of the writers' way
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}
