//! SQLite connection handling for the store
//!
//! Connections come back ready for the engine: foreign keys enforced and
//! WAL journaling on, so callers never have to remember the session setup.

#![allow(clippy::result_large_err)]

use std::path::Path;

use rusqlite::Connection;

use crate::errors::{from_rusqlite, Result};

/// Open a file-backed database, configured for the engine
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path).map_err(from_rusqlite)?;
    configure(&conn)?;
    Ok(conn)
}

/// Open an in-memory database, configured for the engine (used mostly
/// by tests)
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(from_rusqlite)?;
    configure(&conn)?;
    Ok(conn)
}

/// Apply the engine's session settings to a caller-supplied connection
pub fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(from_rusqlite)?;
    // WAL keeps readers unblocked while a deploy transaction runs
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(from_rusqlite)
}
