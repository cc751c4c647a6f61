// src/db/mod.rs

//! Database layer for the catalog engine
//!
//! This module handles all SQLite operations including:
//! - Database initialization and schema creation
//! - Scoped connection management and pooling
//! - Transaction handling
//! - CRUD operations for tenants, catalogs, variants, versions, etc.

pub mod models;
pub mod schema;
pub mod scope;

pub use scope::{Pool, ScopedConn, SCOPE_PROJECT_ID, SCOPE_TENANT_ID};

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, info};

/// Initialize a new catalog database at the specified path
///
/// Creates the database file, applies pragmas, and runs all schema
/// migrations. This is idempotent - calling it on an existing database
/// is safe.
pub fn init(db_path: &str) -> Result<()> {
    debug!("Initializing database at: {}", db_path);

    // Create parent directories if they don't exist
    if let Some(parent) = Path::new(db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(db_path)?;
    apply_pragmas(&conn)?;
    schema::migrate(&conn)?;

    info!("Database initialized successfully");
    Ok(())
}

/// Open an existing catalog database
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        return Err(Error::NotFound(format!("database at path {}", db_path)));
    }

    let conn = Connection::open(db_path)?;
    apply_pragmas(&conn)?;

    Ok(conn)
}

/// Set pragmas for reliability under concurrent writers
///
/// WAL keeps readers unblocked during commits; busy_timeout makes
/// competing write transactions queue instead of failing fast.
fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 10000;
        ",
    )?;
    Ok(())
}
