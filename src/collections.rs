// src/collections.rs

//! Collection store
//!
//! Collections are path-keyed rows scoped to a directory owner (the
//! `repo_id`: a workspace id, or the values-directory id of a version
//! after commit). Each collection may name a governing collection
//! schema, resolved against the owner's collections directory via the
//! closest-ancestor walk.

use crate::db::scope::ScopedConn;
use crate::directory::{engine, DirectoryType};
use crate::error::{Error, Result};
use crate::validate;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

/// Namespace used when a collection is not namespace-scoped
pub const DEFAULT_NAMESPACE: &str = "--root--";

/// A collection row
#[derive(Debug, Clone)]
pub struct Collection {
    pub collection_id: String,
    pub path: String,
    pub hash: String,
    pub collection_schema: Option<String>,
    pub namespace: String,
    pub repo_id: String,
    pub variant_id: String,
}

impl Collection {
    pub fn new(path: String, hash: String, repo_id: String, variant_id: String) -> Self {
        Self {
            collection_id: Uuid::new_v4().to_string(),
            path,
            hash,
            collection_schema: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            repo_id,
            variant_id,
        }
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            collection_id: row.get(0)?,
            path: row.get(1)?,
            hash: row.get(2)?,
            collection_schema: row.get(3)?,
            namespace: row.get(4)?,
            repo_id: row.get(5)?,
            variant_id: row.get(6)?,
        })
    }
}

/// Insert or update a collection row
///
/// A new row gets the caller's `collection_id`; updating an existing row
/// preserves the stored id and rewrites hash and schema. When the
/// collection names a governing schema, the name must resolve against
/// `schemas_dir` (the owner's collections directory) from the
/// collection's path; an exhausted walk fails the upsert.
pub fn upsert_collection(
    scope: &ScopedConn,
    collection: &mut Collection,
    schemas_dir: &str,
) -> Result<()> {
    validate::valid_path(&collection.path)?;
    validate::valid_hash(&collection.hash)?;
    validate::valid_name(&collection.namespace)?;
    let tenant_id = scope.tenant_id()?.to_string();

    scope.transaction(|s| {
        if let Some(schema) = &collection.collection_schema {
            engine::find_closest_object(
                s,
                DirectoryType::Collections,
                schemas_dir,
                schema,
                &collection.path,
            )
            .map_err(|e| e.context(format!("resolving schema for {}", collection.path)))?;
        }

        let existing: Option<String> = s
            .conn()
            .query_row(
                "SELECT collection_id FROM collections
                 WHERE path = ?1 AND namespace = ?2 AND repo_id = ?3
                   AND variant_id = ?4 AND tenant_id = ?5",
                params![
                    &collection.path,
                    &collection.namespace,
                    &collection.repo_id,
                    &collection.variant_id,
                    &tenant_id,
                ],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(collection_id) => {
                s.conn().execute(
                    "UPDATE collections SET hash = ?1, collection_schema = ?2
                     WHERE path = ?3 AND namespace = ?4 AND repo_id = ?5
                       AND variant_id = ?6 AND tenant_id = ?7",
                    params![
                        &collection.hash,
                        &collection.collection_schema,
                        &collection.path,
                        &collection.namespace,
                        &collection.repo_id,
                        &collection.variant_id,
                        &tenant_id,
                    ],
                )?;
                collection.collection_id = collection_id;
            }
            None => {
                s.conn().execute(
                    "INSERT INTO collections
                     (collection_id, path, hash, collection_schema, namespace,
                      repo_id, variant_id, tenant_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        &collection.collection_id,
                        &collection.path,
                        &collection.hash,
                        &collection.collection_schema,
                        &collection.namespace,
                        &collection.repo_id,
                        &collection.variant_id,
                        &tenant_id,
                    ],
                )?;
            }
        }

        debug!("upserted collection at {}", collection.path);
        Ok(())
    })
}

/// Fetch a collection by path within a directory owner
pub fn get_collection(
    scope: &ScopedConn,
    path: &str,
    namespace: &str,
    repo_id: &str,
) -> Result<Collection> {
    let tenant_id = scope.tenant_id()?;
    let collection = scope
        .conn()
        .query_row(
            "SELECT collection_id, path, hash, collection_schema, namespace,
                    repo_id, variant_id
             FROM collections
             WHERE path = ?1 AND namespace = ?2 AND repo_id = ?3 AND tenant_id = ?4",
            params![path, namespace, repo_id, tenant_id],
            Collection::from_row,
        )
        .optional()?;

    collection.ok_or_else(|| Error::not_found(format!("collection at {}", path)))
}

/// Delete a collection, returning the removed hash
///
/// Unlike most metadata deletes this is not idempotent: a missing row is
/// an error.
pub fn delete_collection(
    scope: &ScopedConn,
    path: &str,
    namespace: &str,
    repo_id: &str,
) -> Result<String> {
    let tenant_id = scope.tenant_id()?.to_string();

    scope.transaction(|s| {
        let hash: Option<String> = s
            .conn()
            .query_row(
                "SELECT hash FROM collections
                 WHERE path = ?1 AND namespace = ?2 AND repo_id = ?3 AND tenant_id = ?4",
                params![path, namespace, repo_id, &tenant_id],
                |row| row.get(0),
            )
            .optional()?;

        let hash = hash.ok_or_else(|| Error::not_found(format!("collection at {}", path)))?;

        s.conn().execute(
            "DELETE FROM collections
             WHERE path = ?1 AND namespace = ?2 AND repo_id = ?3 AND tenant_id = ?4",
            params![path, namespace, repo_id, &tenant_id],
        )?;
        Ok(hash)
    })
}

/// Whether any collection in this owner depends on the named schema
pub fn has_references_to_collection_schema(
    scope: &ScopedConn,
    schema_name: &str,
    repo_id: &str,
) -> Result<bool> {
    let tenant_id = scope.tenant_id()?;
    let found: Option<i64> = scope
        .conn()
        .query_row(
            "SELECT 1 FROM collections
             WHERE collection_schema = ?1 AND repo_id = ?2 AND tenant_id = ?3
             LIMIT 1",
            params![schema_name, repo_id, tenant_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// List every collection of a directory owner, ordered by path
pub fn list_collections(scope: &ScopedConn, repo_id: &str) -> Result<Vec<Collection>> {
    let tenant_id = scope.tenant_id()?;
    let mut stmt = scope.conn().prepare(
        "SELECT collection_id, path, hash, collection_schema, namespace,
                repo_id, variant_id
         FROM collections
         WHERE repo_id = ?1 AND tenant_id = ?2
         ORDER BY namespace, path",
    )?;

    let collections = stmt
        .query_map(params![repo_id, tenant_id], Collection::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(collections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Catalog, Project, Tenant, Variant};
    use crate::db::scope::{Pool, ScopedConn, SCOPE_PROJECT_ID, SCOPE_TENANT_ID};
    use crate::directory::{Directory, ObjectRef, SchemaDirectory};
    use crate::error::ErrorKind;
    use tempfile::NamedTempFile;
    use uuid::Uuid;

    struct Fixture {
        _temp: NamedTempFile,
        scope: ScopedConn,
        variant_id: String,
        workspace_id: String,
        schemas_dir: String,
    }

    fn create_fixture() -> Fixture {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap().to_string();
        crate::db::init(&db_path).unwrap();
        let pool = Pool::open(&db_path).unwrap();
        let mut scope = pool.acquire().unwrap();
        scope.add_scope(SCOPE_TENANT_ID, "TABCDE");
        scope.add_scope(SCOPE_PROJECT_ID, "PABCDE");

        Tenant::new("TABCDE".to_string()).insert(&scope).unwrap();
        Project::new("PABCDE".to_string())
            .insert(&mut scope)
            .unwrap();
        let mut catalog = Catalog::new("cat".to_string());
        catalog.insert(&scope).unwrap();
        let variant = Variant::new("main".to_string(), catalog.catalog_id.clone());
        variant.insert(&scope).unwrap();

        let workspace_id = Uuid::new_v4().to_string();
        let mut schemas = Directory::new();
        schemas.insert("/Schema".to_string(), ObjectRef::new("s".repeat(128)));
        let dir = SchemaDirectory {
            directory_id: Uuid::new_v4().to_string(),
            dtype: DirectoryType::Collections,
            variant_id: variant.variant_id.clone(),
            version_num: None,
            workspace_id: Some(workspace_id.clone()),
            directory: schemas,
        };
        dir.insert(&scope).unwrap();

        Fixture {
            _temp: temp_file,
            scope,
            variant_id: variant.variant_id,
            workspace_id,
            schemas_dir: dir.directory_id,
        }
    }

    #[test]
    fn test_upsert_preserves_collection_id() {
        let f = create_fixture();

        let mut collection = Collection::new(
            "/data/app".to_string(),
            "a".repeat(128),
            f.workspace_id.clone(),
            f.variant_id.clone(),
        );
        upsert_collection(&f.scope, &mut collection, &f.schemas_dir).unwrap();
        let original_id = collection.collection_id.clone();

        let mut updated = Collection::new(
            "/data/app".to_string(),
            "b".repeat(128),
            f.workspace_id.clone(),
            f.variant_id.clone(),
        );
        upsert_collection(&f.scope, &mut updated, &f.schemas_dir).unwrap();

        // The stored id wins over the freshly generated one
        assert_eq!(updated.collection_id, original_id);
        let found =
            get_collection(&f.scope, "/data/app", DEFAULT_NAMESPACE, &f.workspace_id).unwrap();
        assert_eq!(found.hash, "b".repeat(128));
        assert_eq!(found.collection_id, original_id);
    }

    #[test]
    fn test_schema_resolution_gates_upsert() {
        let f = create_fixture();

        let mut collection = Collection::new(
            "/data/app".to_string(),
            "a".repeat(128),
            f.workspace_id.clone(),
            f.variant_id.clone(),
        );
        collection.collection_schema = Some("Schema".to_string());
        upsert_collection(&f.scope, &mut collection, &f.schemas_dir).unwrap();

        let mut dangling = Collection::new(
            "/data/other".to_string(),
            "c".repeat(128),
            f.workspace_id.clone(),
            f.variant_id.clone(),
        );
        dangling.collection_schema = Some("Missing".to_string());
        let err = upsert_collection(&f.scope, &mut dangling, &f.schemas_dir).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoAncestorReferencesFound);

        let err = get_collection(&f.scope, "/data/other", DEFAULT_NAMESPACE, &f.workspace_id)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_delete_returns_hash_and_is_strict() {
        let f = create_fixture();

        let mut collection = Collection::new(
            "/data/app".to_string(),
            "a".repeat(128),
            f.workspace_id.clone(),
            f.variant_id.clone(),
        );
        upsert_collection(&f.scope, &mut collection, &f.schemas_dir).unwrap();

        let hash =
            delete_collection(&f.scope, "/data/app", DEFAULT_NAMESPACE, &f.workspace_id).unwrap();
        assert_eq!(hash, "a".repeat(128));

        let err = delete_collection(&f.scope, "/data/app", DEFAULT_NAMESPACE, &f.workspace_id)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_schema_reference_query() {
        let f = create_fixture();

        let mut collection = Collection::new(
            "/data/app".to_string(),
            "a".repeat(128),
            f.workspace_id.clone(),
            f.variant_id.clone(),
        );
        collection.collection_schema = Some("Schema".to_string());
        upsert_collection(&f.scope, &mut collection, &f.schemas_dir).unwrap();

        assert!(
            has_references_to_collection_schema(&f.scope, "Schema", &f.workspace_id).unwrap()
        );
        assert!(
            !has_references_to_collection_schema(&f.scope, "Other", &f.workspace_id).unwrap()
        );
    }

    #[test]
    fn test_namespaced_rows_are_distinct() {
        let f = create_fixture();

        let mut root = Collection::new(
            "/data/app".to_string(),
            "a".repeat(128),
            f.workspace_id.clone(),
            f.variant_id.clone(),
        );
        upsert_collection(&f.scope, &mut root, &f.schemas_dir).unwrap();

        let mut staged = Collection::new(
            "/data/app".to_string(),
            "b".repeat(128),
            f.workspace_id.clone(),
            f.variant_id.clone(),
        );
        staged.namespace = "staging".to_string();
        upsert_collection(&f.scope, &mut staged, &f.schemas_dir).unwrap();

        let all = list_collections(&f.scope, &f.workspace_id).unwrap();
        assert_eq!(all.len(), 2);
        assert_ne!(all[0].namespace, all[1].namespace);
    }
}
