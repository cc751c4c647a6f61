// src/db/scope.rs

//! Scoped connection management
//!
//! A [`ScopedConn`] is a handle to a single backend connection plus a set
//! of named scope variables (tenant, project) that every data operation
//! consults before touching rows. Scopes fail closed: an operation that
//! needs a tenant or project scope returns `MissingTenantId` /
//! `MissingProjectId` when the binding is absent.
//!
//! Connections are pooled. Dropping a `ScopedConn` clears its scopes,
//! rolls back any transaction left open, and returns the connection to
//! the pool - on every exit path, including panic unwind.

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Scope variable holding the current tenant id
pub const SCOPE_TENANT_ID: &str = "curr_tenantid";

/// Scope variable holding the current project id
pub const SCOPE_PROJECT_ID: &str = "curr_projectid";

struct PoolShared {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
}

/// Connection pool for one catalog database file
///
/// Cloning the pool is cheap; all clones share the same idle list.
#[derive(Clone)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl Pool {
    /// Open a pool over an existing database file
    pub fn open(db_path: &str) -> Result<Self> {
        // Fail early if the database is missing or unreadable
        let conn = crate::db::open(db_path)?;

        Ok(Self {
            shared: Arc::new(PoolShared {
                path: PathBuf::from(db_path),
                idle: Mutex::new(vec![conn]),
            }),
        })
    }

    /// Acquire a connection with no scopes bound
    pub fn acquire(&self) -> Result<ScopedConn> {
        let reused = {
            let mut idle = self
                .shared
                .idle
                .lock()
                .map_err(|_| Error::Io(std::io::Error::other("connection pool lock poisoned")))?;
            idle.pop()
        };

        let conn = match reused {
            Some(conn) => conn,
            None => {
                let path = self.shared.path.to_string_lossy().to_string();
                crate::db::open(&path)?
            }
        };

        Ok(ScopedConn {
            conn: Some(conn),
            scopes: HashMap::new(),
            shared: Arc::clone(&self.shared),
        })
    }
}

/// A backend connection with bound scope variables
pub struct ScopedConn {
    conn: Option<Connection>,
    scopes: HashMap<String, String>,
    shared: Arc<PoolShared>,
}

impl ScopedConn {
    /// Bind a scope variable; rebinding an existing name overwrites it
    pub fn add_scope(&mut self, name: &str, value: &str) {
        self.scopes.insert(name.to_string(), value.to_string());
    }

    /// Bind several scope variables at once
    pub fn add_scopes(&mut self, scopes: &HashMap<String, String>) {
        for (name, value) in scopes {
            self.scopes.insert(name.clone(), value.clone());
        }
    }

    /// Remove one scope binding; absent names are ignored
    pub fn drop_scope(&mut self, name: &str) {
        self.scopes.remove(name);
    }

    /// Remove several scope bindings
    pub fn drop_scopes(&mut self, names: &[&str]) {
        for name in names {
            self.scopes.remove(*name);
        }
    }

    /// Remove every scope binding
    pub fn drop_all_scopes(&mut self) {
        self.scopes.clear();
    }

    /// Look up a scope variable
    pub fn scope(&self, name: &str) -> Option<&str> {
        self.scopes.get(name).map(String::as_str)
    }

    /// Current tenant id, failing closed when unbound
    pub fn tenant_id(&self) -> Result<&str> {
        self.scope(SCOPE_TENANT_ID).ok_or(Error::MissingTenantId)
    }

    /// Current project id, failing closed when unbound
    pub fn project_id(&self) -> Result<&str> {
        self.scope(SCOPE_PROJECT_ID).ok_or(Error::MissingProjectId)
    }

    /// The underlying connection
    pub fn conn(&self) -> &Connection {
        self.conn
            .as_ref()
            .expect("connection is present until the handle is dropped")
    }

    /// Run `f` inside a write transaction
    ///
    /// The transaction starts in immediate mode so competing writers
    /// queue on the database write lock. Commits on `Ok`, rolls back on
    /// `Err`. Nested calls join the outer transaction through a
    /// savepoint, so a failed inner step unwinds only its own writes.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ScopedConn) -> Result<T>,
    {
        let conn = self.conn();

        if !conn.is_autocommit() {
            conn.execute_batch("SAVEPOINT scoped_op")?;
            return match f(self) {
                Ok(value) => {
                    conn.execute_batch("RELEASE scoped_op")?;
                    Ok(value)
                }
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK TO scoped_op; RELEASE scoped_op");
                    Err(e)
                }
            };
        }

        conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                // Preserve the original failure even if rollback fails
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Drop all scopes and return the connection to the pool
    pub fn close(mut self) {
        self.drop_all_scopes();
        // Drop impl performs the release
    }
}

impl Drop for ScopedConn {
    fn drop(&mut self) {
        self.scopes.clear();
        if let Some(conn) = self.conn.take() {
            // A panic mid-transaction must not leak an open transaction
            // into the pool
            if !conn.is_autocommit() {
                let _ = conn.execute_batch("ROLLBACK");
            }
            if let Ok(mut idle) = self.shared.idle.lock() {
                debug!("returning connection to pool");
                idle.push(conn);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::NamedTempFile;

    fn create_test_pool() -> (NamedTempFile, Pool) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap().to_string();
        crate::db::init(&db_path).unwrap();
        let pool = Pool::open(&db_path).unwrap();
        (temp_file, pool)
    }

    #[test]
    fn test_scope_lifecycle() {
        let (_temp, pool) = create_test_pool();
        let mut scope = pool.acquire().unwrap();

        assert_eq!(scope.tenant_id().unwrap_err().kind(), ErrorKind::MissingTenantId);
        assert_eq!(
            scope.project_id().unwrap_err().kind(),
            ErrorKind::MissingProjectId
        );

        scope.add_scope(SCOPE_TENANT_ID, "TABCDE");
        scope.add_scope(SCOPE_PROJECT_ID, "PABCDE");
        assert_eq!(scope.tenant_id().unwrap(), "TABCDE");
        assert_eq!(scope.project_id().unwrap(), "PABCDE");

        // Rebinding overwrites
        scope.add_scope(SCOPE_TENANT_ID, "TFGHIJ");
        assert_eq!(scope.tenant_id().unwrap(), "TFGHIJ");

        scope.drop_scope(SCOPE_TENANT_ID);
        assert!(scope.tenant_id().is_err());

        scope.drop_all_scopes();
        assert!(scope.project_id().is_err());
    }

    #[test]
    fn test_add_scopes_map() {
        let (_temp, pool) = create_test_pool();
        let mut scope = pool.acquire().unwrap();

        let mut scopes = HashMap::new();
        scopes.insert(SCOPE_TENANT_ID.to_string(), "TABCDE".to_string());
        scopes.insert(SCOPE_PROJECT_ID.to_string(), "PABCDE".to_string());
        scope.add_scopes(&scopes);

        assert_eq!(scope.tenant_id().unwrap(), "TABCDE");
        assert_eq!(scope.project_id().unwrap(), "PABCDE");

        scope.drop_scopes(&[SCOPE_TENANT_ID, SCOPE_PROJECT_ID]);
        assert!(scope.tenant_id().is_err());
        assert!(scope.project_id().is_err());
    }

    #[test]
    fn test_connection_is_reused() {
        let (_temp, pool) = create_test_pool();

        let scope = pool.acquire().unwrap();
        scope.close();

        // Second acquisition takes the pooled connection, so the idle
        // list never grows past one
        let scope = pool.acquire().unwrap();
        drop(scope);
        let idle_count = pool.shared.idle.lock().unwrap().len();
        assert_eq!(idle_count, 1);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let (_temp, pool) = create_test_pool();
        let scope = pool.acquire().unwrap();

        scope
            .conn()
            .execute_batch("CREATE TABLE scratch (n INTEGER)")
            .unwrap();

        let result: Result<()> = scope.transaction(|s| {
            s.conn().execute("INSERT INTO scratch (n) VALUES (1)", [])?;
            Err(Error::invalid_input("forced failure"))
        });
        assert!(result.is_err());

        let count: i64 = scope
            .conn()
            .query_row("SELECT COUNT(*) FROM scratch", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_transaction_commits_on_ok() {
        let (_temp, pool) = create_test_pool();
        let scope = pool.acquire().unwrap();

        scope
            .conn()
            .execute_batch("CREATE TABLE scratch (n INTEGER)")
            .unwrap();

        scope
            .transaction(|s| {
                s.conn().execute("INSERT INTO scratch (n) VALUES (1)", [])?;
                Ok(())
            })
            .unwrap();

        let count: i64 = scope
            .conn()
            .query_row("SELECT COUNT(*) FROM scratch", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_open_transaction_is_rolled_back_on_drop() {
        let (_temp, pool) = create_test_pool();
        let scope = pool.acquire().unwrap();
        scope
            .conn()
            .execute_batch("CREATE TABLE scratch (n INTEGER)")
            .unwrap();

        scope.conn().execute_batch("BEGIN IMMEDIATE").unwrap();
        scope
            .conn()
            .execute("INSERT INTO scratch (n) VALUES (1)", [])
            .unwrap();
        drop(scope);

        let scope = pool.acquire().unwrap();
        assert!(scope.conn().is_autocommit());
        let count: i64 = scope
            .conn()
            .query_row("SELECT COUNT(*) FROM scratch", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
