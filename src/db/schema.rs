// src/db/schema.rs

//! Database schema definitions and migrations for the catalog engine
//!
//! This module defines the SQLite schema for all core tables and provides
//! a migration system to evolve the schema over time.

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        debug!("Schema is up to date");
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!(
        "Schema migration complete. Now at version {}",
        SCHEMA_VERSION
    );
    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        3 => migrate_v3(conn),
        _ => panic!("Unknown migration version: {}", version),
    }
}

/// Initial schema - Version 1
///
/// Creates the metadata tables:
/// - tenants: Root of ownership; deletes cascade to every dependent row
/// - projects: Grouping under a tenant
/// - catalogs: Named configuration catalogs per project
/// - variants: Parallel branches within a catalog
/// - versions: Numbered immutable snapshots per variant
/// - workspaces: Mutable branches rooted at a base version
/// - namespaces: Named scopes within a variant
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        -- Tenants: root of the ownership chain
        CREATE TABLE tenants (
            tenant_id TEXT PRIMARY KEY CHECK(length(tenant_id) BETWEEN 1 AND 10),
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        -- Projects: grouping under a tenant
        CREATE TABLE projects (
            project_id TEXT NOT NULL CHECK(length(project_id) BETWEEN 1 AND 10),
            tenant_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (project_id, tenant_id),
            FOREIGN KEY (tenant_id) REFERENCES tenants(tenant_id) ON DELETE CASCADE
        );

        -- Catalogs: named configuration catalogs
        CREATE TABLE catalogs (
            catalog_id TEXT PRIMARY KEY,
            name TEXT NOT NULL CHECK(length(name) BETWEEN 1 AND 128),
            description TEXT,
            info TEXT,
            project_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (name, project_id, tenant_id),
            FOREIGN KEY (project_id, tenant_id)
                REFERENCES projects(project_id, tenant_id) ON DELETE CASCADE
        );

        CREATE INDEX idx_catalogs_name ON catalogs(name, tenant_id);

        -- Variants: parallel branches within a catalog
        CREATE TABLE variants (
            variant_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            info TEXT,
            catalog_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (name, catalog_id, tenant_id),
            FOREIGN KEY (catalog_id) REFERENCES catalogs(catalog_id) ON DELETE CASCADE
        );

        CREATE INDEX idx_variants_catalog ON variants(catalog_id);

        -- Versions: numbered immutable snapshots; numbers are dense 1..N
        -- per (variant, tenant). NULL labels are not unique.
        CREATE TABLE versions (
            variant_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            version_num INTEGER NOT NULL CHECK(version_num > 0),
            label TEXT,
            description TEXT,
            info TEXT,
            parameters_dir TEXT NOT NULL,
            collections_dir TEXT NOT NULL,
            values_dir TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (variant_id, version_num, tenant_id),
            UNIQUE (label, variant_id, tenant_id),
            FOREIGN KEY (variant_id) REFERENCES variants(variant_id) ON DELETE CASCADE
        );

        -- Workspaces: mutable branches rooted at a base version
        CREATE TABLE workspaces (
            workspace_id TEXT PRIMARY KEY,
            label TEXT,
            description TEXT,
            info TEXT,
            base_version INTEGER NOT NULL,
            variant_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            parameters_dir TEXT NOT NULL,
            collections_dir TEXT NOT NULL,
            values_dir TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (label, variant_id, tenant_id),
            FOREIGN KEY (variant_id) REFERENCES variants(variant_id) ON DELETE CASCADE
        );

        CREATE INDEX idx_workspaces_variant ON workspaces(variant_id);

        -- Namespaces: named scopes within a variant
        CREATE TABLE namespaces (
            name TEXT NOT NULL,
            description TEXT,
            info TEXT,
            variant_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (name, variant_id, tenant_id),
            FOREIGN KEY (variant_id) REFERENCES variants(variant_id) ON DELETE CASCADE
        );
        ",
    )?;

    info!("Schema version 1 created successfully");
    Ok(())
}

/// Schema Version 2: Object storage
///
/// Adds the content-addressed object store and the per-owner directory
/// tables:
/// - catalog_objects: Immutable blobs keyed by (hash, type, tenant),
///   reference counted so duplicate inserts and deletes balance out
/// - parameters_directory / collections_directory / values_directory:
///   One path->ObjectRef document per row, owned by exactly one of a
///   version or a workspace
/// - collections: Path-keyed collection rows scoped to a directory owner
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 2");

    conn.execute_batch(
        "
        -- Content-addressed object store
        CREATE TABLE catalog_objects (
            hash TEXT NOT NULL CHECK(length(hash) = 128),
            type TEXT NOT NULL CHECK(type IN ('parameter_schema', 'collection_schema', 'collection')),
            version TEXT NOT NULL DEFAULT 'v1',
            data BLOB NOT NULL,
            refcount INTEGER NOT NULL DEFAULT 1 CHECK(refcount >= 1),
            tenant_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (hash, type, tenant_id),
            FOREIGN KEY (tenant_id) REFERENCES tenants(tenant_id) ON DELETE CASCADE
        );

        -- Schema directories: one path->ObjectRef document per row.
        -- Each row is owned by exactly one of a version or a workspace.
        CREATE TABLE parameters_directory (
            directory_id TEXT PRIMARY KEY,
            variant_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            version_num INTEGER,
            workspace_id TEXT,
            directory TEXT NOT NULL DEFAULT '{}',
            CHECK ((version_num IS NULL) <> (workspace_id IS NULL)),
            FOREIGN KEY (variant_id) REFERENCES variants(variant_id) ON DELETE CASCADE
        );

        CREATE TABLE collections_directory (
            directory_id TEXT PRIMARY KEY,
            variant_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            version_num INTEGER,
            workspace_id TEXT,
            directory TEXT NOT NULL DEFAULT '{}',
            CHECK ((version_num IS NULL) <> (workspace_id IS NULL)),
            FOREIGN KEY (variant_id) REFERENCES variants(variant_id) ON DELETE CASCADE
        );

        CREATE TABLE values_directory (
            directory_id TEXT PRIMARY KEY,
            variant_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            version_num INTEGER,
            workspace_id TEXT,
            directory TEXT NOT NULL DEFAULT '{}',
            CHECK ((version_num IS NULL) <> (workspace_id IS NULL)),
            FOREIGN KEY (variant_id) REFERENCES variants(variant_id) ON DELETE CASCADE
        );

        CREATE INDEX idx_parameters_dir_workspace ON parameters_directory(workspace_id);
        CREATE INDEX idx_collections_dir_workspace ON collections_directory(workspace_id);
        CREATE INDEX idx_values_dir_workspace ON values_directory(workspace_id);

        -- Collections: path-keyed rows scoped to a directory owner
        CREATE TABLE collections (
            collection_id TEXT NOT NULL,
            path TEXT NOT NULL,
            hash TEXT NOT NULL,
            collection_schema TEXT,
            namespace TEXT NOT NULL DEFAULT '--root--',
            repo_id TEXT NOT NULL,
            variant_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            PRIMARY KEY (path, namespace, repo_id, variant_id, tenant_id),
            FOREIGN KEY (variant_id) REFERENCES variants(variant_id) ON DELETE CASCADE
        );

        CREATE INDEX idx_collections_repo ON collections(repo_id, variant_id);
        CREATE INDEX idx_collections_schema ON collections(collection_schema, repo_id);
        ",
    )?;

    info!("Schema version 2 applied successfully");
    Ok(())
}

/// Schema Version 3: Auth surface
///
/// Adds the tables consumed by the policy/token layer:
/// - views: Named row filters over a catalog
/// - view_tokens: Expiring tokens bound to a view
/// - signing_keys: Per-tenant key set with at most one active key,
///   enforced by a partial unique index
fn migrate_v3(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 3");

    conn.execute_batch(
        "
        -- Views: named row filters over a catalog
        CREATE TABLE views (
            view_id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            description TEXT,
            rules TEXT,
            catalog_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (label, catalog_id, tenant_id),
            FOREIGN KEY (catalog_id) REFERENCES catalogs(catalog_id) ON DELETE CASCADE
        );

        -- View tokens: expiring tokens bound to a view
        CREATE TABLE view_tokens (
            token_id TEXT PRIMARY KEY,
            view_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            expire_at TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (view_id) REFERENCES views(view_id) ON DELETE CASCADE
        );

        CREATE INDEX idx_view_tokens_expire ON view_tokens(expire_at);

        -- Signing keys: at most one active key per tenant
        CREATE TABLE signing_keys (
            key_id TEXT PRIMARY KEY,
            public_key BLOB NOT NULL,
            private_key BLOB NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            tenant_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (tenant_id) REFERENCES tenants(tenant_id) ON DELETE CASCADE
        );

        CREATE UNIQUE INDEX idx_signing_keys_active
            ON signing_keys(tenant_id) WHERE is_active = 1;
        ",
    )?;

    info!("Schema version 3 applied successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        (temp_file, conn)
    }

    #[test]
    fn test_schema_version_tracking() {
        let (_temp, conn) = create_test_db();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, 0);

        set_schema_version(&conn, 1).unwrap();
        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_migrate_creates_all_tables() {
        let (_temp, conn) = create_test_db();

        migrate(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "tenants",
            "projects",
            "catalogs",
            "variants",
            "versions",
            "workspaces",
            "namespaces",
            "catalog_objects",
            "parameters_directory",
            "collections_directory",
            "values_directory",
            "collections",
            "views",
            "view_tokens",
            "signing_keys",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let (_temp, conn) = create_test_db();

        migrate(&conn).unwrap();
        let version1 = get_schema_version(&conn).unwrap();

        migrate(&conn).unwrap();
        let version2 = get_schema_version(&conn).unwrap();

        assert_eq!(version1, version2);
        assert_eq!(version1, SCHEMA_VERSION);
    }

    #[test]
    fn test_tenant_id_length_check() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        conn.execute("INSERT INTO tenants (tenant_id) VALUES (?1)", ["TABCDE"])
            .unwrap();

        // Eleven characters exceeds the id width
        let result = conn.execute("INSERT INTO tenants (tenant_id) VALUES (?1)", ["T2345678901"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_directory_owner_is_exclusive() {
        let (_temp, conn) = create_test_db();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        migrate(&conn).unwrap();

        conn.execute("INSERT INTO tenants (tenant_id) VALUES ('TABCDE')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO projects (project_id, tenant_id) VALUES ('PABCDE', 'TABCDE')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO catalogs (catalog_id, name, project_id, tenant_id)
             VALUES ('c1', 'cat', 'PABCDE', 'TABCDE')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO variants (variant_id, name, catalog_id, tenant_id)
             VALUES ('v1', 'main', 'c1', 'TABCDE')",
            [],
        )
        .unwrap();

        // Both owners set violates the XOR check
        let result = conn.execute(
            "INSERT INTO parameters_directory
             (directory_id, variant_id, tenant_id, version_num, workspace_id)
             VALUES ('d1', 'v1', 'TABCDE', 1, 'w1')",
            [],
        );
        assert!(result.is_err());

        // Neither owner set violates it too
        let result = conn.execute(
            "INSERT INTO parameters_directory
             (directory_id, variant_id, tenant_id)
             VALUES ('d1', 'v1', 'TABCDE')",
            [],
        );
        assert!(result.is_err());

        // Exactly one owner is accepted
        conn.execute(
            "INSERT INTO parameters_directory
             (directory_id, variant_id, tenant_id, version_num)
             VALUES ('d1', 'v1', 'TABCDE', 1)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_null_labels_are_not_unique() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        conn.execute("INSERT INTO tenants (tenant_id) VALUES ('TABCDE')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO projects (project_id, tenant_id) VALUES ('PABCDE', 'TABCDE')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO catalogs (catalog_id, name, project_id, tenant_id)
             VALUES ('c1', 'cat', 'PABCDE', 'TABCDE')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO variants (variant_id, name, catalog_id, tenant_id)
             VALUES ('v1', 'main', 'c1', 'TABCDE')",
            [],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO versions
             (variant_id, tenant_id, version_num, label, parameters_dir, collections_dir, values_dir)
             VALUES ('v1', 'TABCDE', 1, NULL, 'p1', 'c1', 'l1')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO versions
             (variant_id, tenant_id, version_num, label, parameters_dir, collections_dir, values_dir)
             VALUES ('v1', 'TABCDE', 2, NULL, 'p2', 'c2', 'l2')",
            [],
        )
        .unwrap();

        // Duplicate non-null label within the variant is rejected
        conn.execute(
            "INSERT INTO versions
             (variant_id, tenant_id, version_num, label, parameters_dir, collections_dir, values_dir)
             VALUES ('v1', 'TABCDE', 3, 'rc', 'p3', 'c3', 'l3')",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO versions
             (variant_id, tenant_id, version_num, label, parameters_dir, collections_dir, values_dir)
             VALUES ('v1', 'TABCDE', 4, 'rc', 'p4', 'c4', 'l4')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_signing_key_partial_unique_index() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        conn.execute("INSERT INTO tenants (tenant_id) VALUES ('TABCDE')", [])
            .unwrap();

        conn.execute(
            "INSERT INTO signing_keys (key_id, public_key, private_key, is_active, tenant_id)
             VALUES ('k1', X'00', X'00', 1, 'TABCDE')",
            [],
        )
        .unwrap();

        // Two inactive keys are fine
        conn.execute(
            "INSERT INTO signing_keys (key_id, public_key, private_key, is_active, tenant_id)
             VALUES ('k2', X'00', X'00', 0, 'TABCDE')",
            [],
        )
        .unwrap();

        // A second active key violates the partial unique index
        let result = conn.execute(
            "INSERT INTO signing_keys (key_id, public_key, private_key, is_active, tenant_id)
             VALUES ('k3', X'00', X'00', 1, 'TABCDE')",
            [],
        );
        assert!(result.is_err());
    }
}
