// src/directory/engine.rs

//! Schema directory operations
//!
//! All operations address a directory by (type, directory_id). Mutations
//! run in a write transaction; when an operation crosses into the paired
//! directory the two row updates are applied in ascending directory_id
//! order.

use crate::db::scope::ScopedConn;
use crate::directory::{Directory, DirectoryType, ObjectRef, Reference, SchemaDirectory};
use crate::error::{Error, Result};
use crate::objects::CatalogObject;
use crate::validate;
use tracing::debug;

/// Policy flags for [`delete_object_with_references`]
///
/// Without flags the entry is removed and its reverse links in the
/// paired directory are cleaned up.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Remove the entry without touching reverse links; the caller owns
    /// the resulting asymmetry
    pub ignore_references: bool,
    /// Cascade-delete every cross-referenced paired entry
    pub delete_references: bool,
    /// Rewrite referencing paired entries to the nearest ancestor of the
    /// deleted entry
    pub replace_references_with_ancestor: bool,
}

/// Overwrite the entire map of a directory
pub fn set_directory(
    scope: &ScopedConn,
    dtype: DirectoryType,
    directory_id: &str,
    directory: &Directory,
) -> Result<()> {
    for (path, entry) in directory {
        validate::valid_path(path)?;
        validate::valid_hash(&entry.hash)?;
    }

    scope.transaction(|s| SchemaDirectory::save(s, dtype, directory_id, directory))
}

/// Load the entire map of a directory
pub fn get_directory(
    scope: &ScopedConn,
    dtype: DirectoryType,
    directory_id: &str,
) -> Result<Directory> {
    Ok(SchemaDirectory::find(scope, dtype, directory_id)?.directory)
}

/// Look up the entry at a path
pub fn get_object_ref_by_path(
    scope: &ScopedConn,
    dtype: DirectoryType,
    directory_id: &str,
    path: &str,
) -> Result<ObjectRef> {
    let row = SchemaDirectory::find(scope, dtype, directory_id)?;
    row.directory
        .get(path)
        .cloned()
        .ok_or_else(|| Error::not_found(format!("path {}", path)))
}

/// Look up an entry and resolve its hash through the object store
pub fn load_object_by_path(
    scope: &ScopedConn,
    dtype: DirectoryType,
    directory_id: &str,
    path: &str,
) -> Result<(ObjectRef, CatalogObject)> {
    let entry = get_object_ref_by_path(scope, dtype, directory_id, path)?;
    let object = CatalogObject::find(scope, dtype.object_type(), &entry.hash)?;
    Ok((entry, object))
}

/// Whether a path has an entry in the directory
pub fn path_exists(
    scope: &ScopedConn,
    dtype: DirectoryType,
    directory_id: &str,
    path: &str,
) -> Result<bool> {
    let row = SchemaDirectory::find(scope, dtype, directory_id)?;
    Ok(row.directory.contains_key(path))
}

/// Replace the hash of an existing entry
pub fn update_object_hash_for_path(
    scope: &ScopedConn,
    dtype: DirectoryType,
    directory_id: &str,
    path: &str,
    hash: &str,
) -> Result<()> {
    validate::valid_hash(hash)?;

    scope.transaction(|s| {
        let mut row = SchemaDirectory::find(s, dtype, directory_id)?;
        let entry = row
            .directory
            .get_mut(path)
            .ok_or_else(|| Error::not_found(format!("path {}", path)))?;
        entry.hash = hash.to_string();
        SchemaDirectory::save(s, dtype, directory_id, &row.directory)
    })
}

/// Insert or replace the entry at a path
///
/// When the entry carries references into the paired directory, each
/// referenced paired entry gains the reverse reference, keeping the
/// cross-directory link graph symmetric.
pub fn add_or_update_object_by_path(
    scope: &ScopedConn,
    dtype: DirectoryType,
    directory_id: &str,
    path: &str,
    entry: ObjectRef,
) -> Result<()> {
    validate::valid_path(path)?;
    validate::valid_hash(&entry.hash)?;
    for reference in &entry.references {
        validate::valid_path(&reference.name)?;
    }

    scope.transaction(|s| {
        let mut row = SchemaDirectory::find(s, dtype, directory_id)?;

        if entry.references.is_empty() {
            row.directory.insert(path.to_string(), entry.clone());
            return SchemaDirectory::save(s, dtype, directory_id, &row.directory);
        }

        let mut paired = row
            .find_paired(s)?
            .ok_or_else(|| Error::invalid_input("directory kind carries no references"))?;

        for reference in &entry.references {
            let target = paired
                .directory
                .get_mut(&reference.name)
                .ok_or_else(|| Error::not_found(format!("referenced path {}", reference.name)))?;
            target.add_reference(path);
        }

        row.directory.insert(path.to_string(), entry.clone());
        save_pair_ordered(s, &row, &paired)
    })
}

/// Union-add references to an existing entry
pub fn add_references_to_object(
    scope: &ScopedConn,
    dtype: DirectoryType,
    directory_id: &str,
    path: &str,
    references: &[Reference],
) -> Result<()> {
    for reference in references {
        validate::valid_path(&reference.name)?;
    }

    scope.transaction(|s| {
        let mut row = SchemaDirectory::find(s, dtype, directory_id)?;
        if !row.directory.contains_key(path) {
            return Err(Error::not_found(format!("path {}", path)));
        }

        let mut paired = row
            .find_paired(s)?
            .ok_or_else(|| Error::invalid_input("directory kind carries no references"))?;

        for reference in references {
            let target = paired
                .directory
                .get_mut(&reference.name)
                .ok_or_else(|| Error::not_found(format!("referenced path {}", reference.name)))?;
            target.add_reference(path);
        }

        let entry = row
            .directory
            .get_mut(path)
            .ok_or_else(|| Error::not_found(format!("path {}", path)))?;
        for reference in references {
            entry.add_reference(&reference.name);
        }

        save_pair_ordered(s, &row, &paired)
    })
}

/// Remove one reference from an entry and its reverse link
pub fn delete_reference_from_object(
    scope: &ScopedConn,
    dtype: DirectoryType,
    directory_id: &str,
    path: &str,
    reference: &str,
) -> Result<()> {
    scope.transaction(|s| {
        let mut row = SchemaDirectory::find(s, dtype, directory_id)?;
        let entry = row
            .directory
            .get_mut(path)
            .ok_or_else(|| Error::not_found(format!("path {}", path)))?;
        entry.remove_reference(reference);

        let paired = row.find_paired(s)?;
        match paired {
            Some(mut paired) => {
                if let Some(target) = paired.directory.get_mut(reference) {
                    target.remove_reference(path);
                }
                save_pair_ordered(s, &row, &paired)
            }
            None => SchemaDirectory::save(s, dtype, directory_id, &row.directory),
        }
    })
}

/// The current reference list of an entry
pub fn get_all_references(
    scope: &ScopedConn,
    dtype: DirectoryType,
    directory_id: &str,
    path: &str,
) -> Result<Vec<Reference>> {
    Ok(get_object_ref_by_path(scope, dtype, directory_id, path)?.references)
}

/// Walk a path's prefixes from deepest to shallowest looking for an
/// entry whose terminal segment equals `target_name`
///
/// For a start path `/a/b/c` and target `X` the candidates are
/// `/a/b/X`, `/a/X`, `/X`, in that order.
pub(crate) fn closest_in_directory(
    directory: &Directory,
    target_name: &str,
    start_path: &str,
) -> Option<(String, ObjectRef)> {
    let segments: Vec<&str> = start_path.split('/').filter(|s| !s.is_empty()).collect();

    for depth in (0..segments.len()).rev() {
        let mut candidate = String::new();
        for segment in &segments[..depth] {
            candidate.push('/');
            candidate.push_str(segment);
        }
        candidate.push('/');
        candidate.push_str(target_name);

        if let Some(entry) = directory.get(&candidate) {
            return Some((candidate, entry.clone()));
        }
    }

    None
}

/// Resolve a name against the ancestry of a start path
///
/// Returns the matched path together with its entry. Used for schema
/// inheritance: a collection at `/a/b/c` governed by schema `X` resolves
/// `X` to the deepest ancestor level containing an `X` entry.
pub fn find_closest_object(
    scope: &ScopedConn,
    dtype: DirectoryType,
    directory_id: &str,
    target_name: &str,
    start_path: &str,
) -> Result<(String, ObjectRef)> {
    validate::valid_name(target_name)?;
    validate::valid_path(start_path)?;

    let row = SchemaDirectory::find(scope, dtype, directory_id)?;
    closest_in_directory(&row.directory, target_name, start_path)
        .ok_or_else(|| Error::NoAncestorReferencesFound(target_name.to_string()))
}

/// Remove the entry at a path, returning its hash
pub fn delete_object_by_path(
    scope: &ScopedConn,
    dtype: DirectoryType,
    directory_id: &str,
    path: &str,
) -> Result<String> {
    scope.transaction(|s| {
        let mut row = SchemaDirectory::find(s, dtype, directory_id)?;
        let entry = row
            .directory
            .remove(path)
            .ok_or_else(|| Error::not_found(format!("path {}", path)))?;
        SchemaDirectory::save(s, dtype, directory_id, &row.directory)?;
        Ok(entry.hash)
    })
}

/// Remove a path and every entry below it, returning the removed hashes
pub fn delete_tree(
    scope: &ScopedConn,
    dtype: DirectoryType,
    directory_id: &str,
    path: &str,
) -> Result<Vec<String>> {
    validate::valid_path(path)?;
    let prefix = format!("{}/", path);

    scope.transaction(|s| {
        let mut row = SchemaDirectory::find(s, dtype, directory_id)?;
        let doomed: Vec<String> = row
            .directory
            .keys()
            .filter(|p| *p == path || p.starts_with(&prefix))
            .cloned()
            .collect();

        let mut hashes = Vec::with_capacity(doomed.len());
        for p in &doomed {
            if let Some(entry) = row.directory.remove(p) {
                hashes.push(entry.hash);
            }
        }

        if !hashes.is_empty() {
            SchemaDirectory::save(s, dtype, directory_id, &row.directory)?;
        }
        debug!("removed {} entries under {}", hashes.len(), path);
        Ok(hashes)
    })
}

/// Remove every entry under the namespace scope `/ns/<namespace>/`
pub fn delete_namespace_objects(
    scope: &ScopedConn,
    dtype: DirectoryType,
    directory_id: &str,
    namespace: &str,
) -> Result<Vec<String>> {
    validate::valid_name(namespace)?;
    delete_tree(scope, dtype, directory_id, &format!("/ns/{}", namespace))
}

/// Composite delete honoring the reference policy in `options`
///
/// Returns the hash of the removed entry.
pub fn delete_object_with_references(
    scope: &ScopedConn,
    dtype: DirectoryType,
    directory_id: &str,
    path: &str,
    options: DeleteOptions,
) -> Result<String> {
    scope.transaction(|s| {
        let mut row = SchemaDirectory::find(s, dtype, directory_id)?;
        let entry = row
            .directory
            .get(path)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("path {}", path)))?;

        if options.ignore_references || entry.references.is_empty() {
            row.directory.remove(path);
            SchemaDirectory::save(s, dtype, directory_id, &row.directory)?;
            return Ok(entry.hash);
        }

        let mut paired = row
            .find_paired(s)?
            .ok_or_else(|| Error::invalid_input("directory kind carries no references"))?;

        if options.delete_references {
            // Cascade: drop each referencing paired entry, then scrub the
            // dangling back-links those entries held into this directory
            for reference in &entry.references {
                let Some(removed) = paired.directory.remove(&reference.name) else {
                    continue;
                };
                for back in &removed.references {
                    if back.name == path {
                        continue;
                    }
                    if let Some(other) = row.directory.get_mut(&back.name) {
                        other.remove_reference(&reference.name);
                    }
                }
            }
        } else if options.replace_references_with_ancestor {
            let target_name = path
                .rsplit('/')
                .next()
                .ok_or_else(|| Error::invalid_input(format!("path '{}'", path)))?;

            // Walk starts at the parent level so the entry being deleted
            // can never match itself
            let parent = match path.rfind('/') {
                Some(0) | None => {
                    return Err(Error::NoAncestorReferencesFound(target_name.to_string()))
                }
                Some(idx) => &path[..idx],
            };

            let (ancestor_path, _) =
                closest_in_directory(&row.directory, target_name, parent)
                    .ok_or_else(|| Error::NoAncestorReferencesFound(target_name.to_string()))?;

            for reference in &entry.references {
                if let Some(target) = paired.directory.get_mut(&reference.name) {
                    target.remove_reference(path);
                    target.add_reference(&ancestor_path);
                }
            }
            let ancestor = row
                .directory
                .get_mut(&ancestor_path)
                .ok_or_else(|| Error::NoAncestorReferencesFound(target_name.to_string()))?;
            for reference in &entry.references {
                ancestor.add_reference(&reference.name);
            }
        } else {
            // Default: keep paired entries but drop their reverse links
            for reference in &entry.references {
                if let Some(target) = paired.directory.get_mut(&reference.name) {
                    target.remove_reference(path);
                }
            }
        }

        row.directory.remove(path);
        save_pair_ordered(s, &row, &paired)?;
        Ok(entry.hash)
    })
}

/// Persist two directory rows in ascending directory_id order
fn save_pair_ordered(scope: &ScopedConn, a: &SchemaDirectory, b: &SchemaDirectory) -> Result<()> {
    let (first, second) = if a.directory_id <= b.directory_id {
        (a, b)
    } else {
        (b, a)
    };
    SchemaDirectory::save(scope, first.dtype, &first.directory_id, &first.directory)?;
    SchemaDirectory::save(scope, second.dtype, &second.directory_id, &second.directory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Catalog, Project, Tenant, Variant};
    use crate::db::scope::{Pool, SCOPE_PROJECT_ID, SCOPE_TENANT_ID};
    use crate::error::ErrorKind;
    use crate::objects::ObjectType;
    use tempfile::NamedTempFile;
    use uuid::Uuid;

    struct Fixture {
        _temp: NamedTempFile,
        scope: ScopedConn,
        params_dir: String,
        cols_dir: String,
        values_dir: String,
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
        let mut dirs = Vec::new();
        for dtype in [
            DirectoryType::Parameters,
            DirectoryType::Collections,
            DirectoryType::Values,
        ] {
            let dir = SchemaDirectory {
                directory_id: Uuid::new_v4().to_string(),
                dtype,
                variant_id: variant.variant_id.clone(),
                version_num: None,
                workspace_id: Some(workspace_id.clone()),
                directory: Directory::new(),
            };
            dir.insert(&scope).unwrap();
            dirs.push(dir.directory_id);
        }

        Fixture {
            _temp: temp_file,
            scope,
            params_dir: dirs[0].clone(),
            cols_dir: dirs[1].clone(),
            values_dir: dirs[2].clone(),
        }
    }

    fn h(c: char) -> String {
        c.to_string().repeat(128)
    }

    #[test]
    fn test_set_and_get_directory() {
        let f = create_fixture();

        let mut dir = Directory::new();
        dir.insert("/par/a".to_string(), ObjectRef::new(h('a')));
        dir.insert("/par/a/b".to_string(), ObjectRef::new(h('b')));

        set_directory(&f.scope, DirectoryType::Parameters, &f.params_dir, &dir).unwrap();
        let loaded = get_directory(&f.scope, DirectoryType::Parameters, &f.params_dir).unwrap();
        assert_eq!(dir, loaded);

        assert!(path_exists(&f.scope, DirectoryType::Parameters, &f.params_dir, "/par/a").unwrap());
        assert!(
            !path_exists(&f.scope, DirectoryType::Parameters, &f.params_dir, "/par/x").unwrap()
        );
    }

    #[test]
    fn test_set_directory_rejects_bad_entries() {
        let f = create_fixture();

        let mut dir = Directory::new();
        dir.insert("not-a-path".to_string(), ObjectRef::new(h('a')));
        let err =
            set_directory(&f.scope, DirectoryType::Parameters, &f.params_dir, &dir).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let mut dir = Directory::new();
        dir.insert("/par/a".to_string(), ObjectRef::new("abc"));
        let err =
            set_directory(&f.scope, DirectoryType::Parameters, &f.params_dir, &dir).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_get_object_ref_and_missing_path() {
        let f = create_fixture();

        add_or_update_object_by_path(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a",
            ObjectRef::new(h('a')),
        )
        .unwrap();

        let entry =
            get_object_ref_by_path(&f.scope, DirectoryType::Parameters, &f.params_dir, "/par/a")
                .unwrap();
        assert_eq!(entry.hash, h('a'));

        let err =
            get_object_ref_by_path(&f.scope, DirectoryType::Parameters, &f.params_dir, "/par/x")
                .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_load_object_by_path_resolves_store() {
        let f = create_fixture();

        let object = CatalogObject::new(ObjectType::ParameterSchema, b"schema".to_vec());
        object.insert(&f.scope).unwrap();

        add_or_update_object_by_path(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a",
            ObjectRef::new(object.hash.clone()),
        )
        .unwrap();

        let (entry, loaded) =
            load_object_by_path(&f.scope, DirectoryType::Parameters, &f.params_dir, "/par/a")
                .unwrap();
        assert_eq!(entry.hash, object.hash);
        assert_eq!(loaded.data, b"schema");
    }

    #[test]
    fn test_update_hash_for_path() {
        let f = create_fixture();

        add_or_update_object_by_path(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a",
            ObjectRef::new(h('a')),
        )
        .unwrap();

        update_object_hash_for_path(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a",
            &h('b'),
        )
        .unwrap();
        let entry =
            get_object_ref_by_path(&f.scope, DirectoryType::Parameters, &f.params_dir, "/par/a")
                .unwrap();
        assert_eq!(entry.hash, h('b'));

        let err = update_object_hash_for_path(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/x",
            &h('c'),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_upsert_maintains_symmetric_references() {
        let f = create_fixture();

        add_or_update_object_by_path(
            &f.scope,
            DirectoryType::Collections,
            &f.cols_dir,
            "/col/a/b",
            ObjectRef::new(h('c')),
        )
        .unwrap();

        let mut entry = ObjectRef::new(h('d'));
        entry.add_reference("/col/a/b");
        add_or_update_object_by_path(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a/b",
            entry,
        )
        .unwrap();

        // The collections entry gained the reverse reference
        let col =
            get_object_ref_by_path(&f.scope, DirectoryType::Collections, &f.cols_dir, "/col/a/b")
                .unwrap();
        assert!(col.has_reference("/par/a/b"));
    }

    #[test]
    fn test_upsert_with_missing_paired_path_rolls_back() {
        let f = create_fixture();

        let mut entry = ObjectRef::new(h('d'));
        entry.add_reference("/col/missing");
        let err = add_or_update_object_by_path(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a",
            entry,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // Nothing was written
        assert!(
            !path_exists(&f.scope, DirectoryType::Parameters, &f.params_dir, "/par/a").unwrap()
        );
    }

    #[test]
    fn test_add_and_delete_references() {
        let f = create_fixture();

        add_or_update_object_by_path(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a",
            ObjectRef::new(h('d')),
        )
        .unwrap();
        add_or_update_object_by_path(
            &f.scope,
            DirectoryType::Collections,
            &f.cols_dir,
            "/col/a",
            ObjectRef::new(h('c')),
        )
        .unwrap();

        add_references_to_object(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a",
            &[Reference::new("/col/a")],
        )
        .unwrap();

        // Union-add is idempotent
        add_references_to_object(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a",
            &[Reference::new("/col/a")],
        )
        .unwrap();

        let refs =
            get_all_references(&f.scope, DirectoryType::Parameters, &f.params_dir, "/par/a")
                .unwrap();
        assert_eq!(refs.len(), 1);

        let col = get_object_ref_by_path(&f.scope, DirectoryType::Collections, &f.cols_dir, "/col/a")
            .unwrap();
        assert!(col.has_reference("/par/a"));

        delete_reference_from_object(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a",
            "/col/a",
        )
        .unwrap();

        let refs =
            get_all_references(&f.scope, DirectoryType::Parameters, &f.params_dir, "/par/a")
                .unwrap();
        assert!(refs.is_empty());
        let col = get_object_ref_by_path(&f.scope, DirectoryType::Collections, &f.cols_dir, "/col/a")
            .unwrap();
        assert!(!col.has_reference("/par/a"));
    }

    #[test]
    fn test_find_closest_object_walk() {
        let f = create_fixture();

        let mut dir = Directory::new();
        dir.insert("/schemas/X".to_string(), ObjectRef::new(h('a')));
        dir.insert("/schemas/a/X".to_string(), ObjectRef::new(h('b')));
        dir.insert("/schemas/a/b/other".to_string(), ObjectRef::new(h('c')));
        set_directory(&f.scope, DirectoryType::Collections, &f.cols_dir, &dir).unwrap();

        // Deepest level first: /schemas/a/X beats /schemas/X
        let (path, entry) = find_closest_object(
            &f.scope,
            DirectoryType::Collections,
            &f.cols_dir,
            "X",
            "/schemas/a/b/c",
        )
        .unwrap();
        assert_eq!(path, "/schemas/a/X");
        assert_eq!(entry.hash, h('b'));

        // From a shallower start only the root-level match remains
        let (path, _) = find_closest_object(
            &f.scope,
            DirectoryType::Collections,
            &f.cols_dir,
            "X",
            "/schemas/c",
        )
        .unwrap();
        assert_eq!(path, "/schemas/X");

        let err = find_closest_object(
            &f.scope,
            DirectoryType::Collections,
            &f.cols_dir,
            "Y",
            "/schemas/a/b/c",
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoAncestorReferencesFound);
    }

    #[test]
    fn test_delete_object_by_path_returns_hash() {
        let f = create_fixture();

        add_or_update_object_by_path(
            &f.scope,
            DirectoryType::Values,
            &f.values_dir,
            "/vals/a",
            ObjectRef::new(h('f')),
        )
        .unwrap();

        let hash =
            delete_object_by_path(&f.scope, DirectoryType::Values, &f.values_dir, "/vals/a")
                .unwrap();
        assert_eq!(hash, h('f'));

        let err = delete_object_by_path(&f.scope, DirectoryType::Values, &f.values_dir, "/vals/a")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_delete_tree_respects_segment_boundary() {
        let f = create_fixture();

        let mut dir = Directory::new();
        dir.insert("/a".to_string(), ObjectRef::new(h('1')));
        dir.insert("/a/b".to_string(), ObjectRef::new(h('2')));
        dir.insert("/a/b/c".to_string(), ObjectRef::new(h('3')));
        dir.insert("/ab".to_string(), ObjectRef::new(h('4')));
        set_directory(&f.scope, DirectoryType::Values, &f.values_dir, &dir).unwrap();

        let hashes = delete_tree(&f.scope, DirectoryType::Values, &f.values_dir, "/a").unwrap();
        assert_eq!(hashes.len(), 3);

        // /ab shares the byte prefix but not the path prefix
        let remaining = get_directory(&f.scope, DirectoryType::Values, &f.values_dir).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains_key("/ab"));
    }

    #[test]
    fn test_delete_namespace_objects() {
        let f = create_fixture();

        let mut dir = Directory::new();
        dir.insert("/ns/staging/a".to_string(), ObjectRef::new(h('1')));
        dir.insert("/ns/staging/b/c".to_string(), ObjectRef::new(h('2')));
        dir.insert("/ns/prod/a".to_string(), ObjectRef::new(h('3')));
        dir.insert("/other".to_string(), ObjectRef::new(h('4')));
        set_directory(&f.scope, DirectoryType::Values, &f.values_dir, &dir).unwrap();

        let hashes =
            delete_namespace_objects(&f.scope, DirectoryType::Values, &f.values_dir, "staging")
                .unwrap();
        assert_eq!(hashes.len(), 2);

        let remaining = get_directory(&f.scope, DirectoryType::Values, &f.values_dir).unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains_key("/ns/prod/a"));
    }

    fn seed_cross_linked(f: &Fixture) {
        // /par/a/X referenced by two collections; /par/X is its ancestor
        add_or_update_object_by_path(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/X",
            ObjectRef::new(h('e')),
        )
        .unwrap();
        add_or_update_object_by_path(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a/X",
            ObjectRef::new(h('d')),
        )
        .unwrap();
        for col in ["/col/one", "/col/two"] {
            add_or_update_object_by_path(
                &f.scope,
                DirectoryType::Collections,
                &f.cols_dir,
                col,
                ObjectRef::new(h('c')),
            )
            .unwrap();
        }
        add_references_to_object(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a/X",
            &[Reference::new("/col/one"), Reference::new("/col/two")],
        )
        .unwrap();
    }

    #[test]
    fn test_delete_with_references_default_scrubs_links() {
        let f = create_fixture();
        seed_cross_linked(&f);

        let hash = delete_object_with_references(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a/X",
            DeleteOptions::default(),
        )
        .unwrap();
        assert_eq!(hash, h('d'));

        for col in ["/col/one", "/col/two"] {
            let entry =
                get_object_ref_by_path(&f.scope, DirectoryType::Collections, &f.cols_dir, col)
                    .unwrap();
            assert!(!entry.has_reference("/par/a/X"));
        }
    }

    #[test]
    fn test_delete_with_references_ignore_leaves_links() {
        let f = create_fixture();
        seed_cross_linked(&f);

        delete_object_with_references(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a/X",
            DeleteOptions {
                ignore_references: true,
                ..Default::default()
            },
        )
        .unwrap();

        // Links in the paired directory are untouched
        let entry =
            get_object_ref_by_path(&f.scope, DirectoryType::Collections, &f.cols_dir, "/col/one")
                .unwrap();
        assert!(entry.has_reference("/par/a/X"));
    }

    #[test]
    fn test_delete_with_references_cascades() {
        let f = create_fixture();
        seed_cross_linked(&f);

        delete_object_with_references(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a/X",
            DeleteOptions {
                delete_references: true,
                ..Default::default()
            },
        )
        .unwrap();

        for col in ["/col/one", "/col/two"] {
            assert!(!path_exists(&f.scope, DirectoryType::Collections, &f.cols_dir, col).unwrap());
        }
    }

    #[test]
    fn test_delete_with_references_rewrites_to_ancestor() {
        let f = create_fixture();
        seed_cross_linked(&f);

        delete_object_with_references(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a/X",
            DeleteOptions {
                replace_references_with_ancestor: true,
                ..Default::default()
            },
        )
        .unwrap();

        // Collections now reference the surviving ancestor /par/X
        for col in ["/col/one", "/col/two"] {
            let entry =
                get_object_ref_by_path(&f.scope, DirectoryType::Collections, &f.cols_dir, col)
                    .unwrap();
            assert!(entry.has_reference("/par/X"));
            assert!(!entry.has_reference("/par/a/X"));
        }
        let ancestor =
            get_object_ref_by_path(&f.scope, DirectoryType::Parameters, &f.params_dir, "/par/X")
                .unwrap();
        assert!(ancestor.has_reference("/col/one"));
        assert!(ancestor.has_reference("/col/two"));
    }

    #[test]
    fn test_delete_with_no_ancestor_fails_and_rolls_back() {
        let f = create_fixture();

        add_or_update_object_by_path(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a/X",
            ObjectRef::new(h('d')),
        )
        .unwrap();
        add_or_update_object_by_path(
            &f.scope,
            DirectoryType::Collections,
            &f.cols_dir,
            "/col/one",
            ObjectRef::new(h('c')),
        )
        .unwrap();
        add_references_to_object(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a/X",
            &[Reference::new("/col/one")],
        )
        .unwrap();

        let err = delete_object_with_references(
            &f.scope,
            DirectoryType::Parameters,
            &f.params_dir,
            "/par/a/X",
            DeleteOptions {
                replace_references_with_ancestor: true,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoAncestorReferencesFound);

        // The entry and its links survive the failed delete
        assert!(
            path_exists(&f.scope, DirectoryType::Parameters, &f.params_dir, "/par/a/X").unwrap()
        );
        let entry =
            get_object_ref_by_path(&f.scope, DirectoryType::Collections, &f.cols_dir, "/col/one")
                .unwrap();
        assert!(entry.has_reference("/par/a/X"));
    }
}
