// src/lifecycle.rs

//! Workspace and version lifecycle
//!
//! Variants carry an immutable version history plus mutable workspaces.
//! Creating a variant seeds version 1 (label `init`) with three empty
//! directories. A workspace clones the directories of its base version;
//! committing it promotes those directories into a freshly numbered
//! version and removes the workspace, all in one transaction.
//!
//! Version numbers are allocated as `MAX + 1` inside an immediate
//! transaction. Writers queue on the database write lock, so concurrent
//! commits on one variant produce consecutive numbers with no gaps.

use crate::collections;
use crate::db::models::{Variant, Version, Workspace};
use crate::db::scope::ScopedConn;
use crate::directory::engine::closest_in_directory;
use crate::directory::{Directory, DirectoryType, SchemaDirectory};
use crate::error::{Error, ErrorKind, Result};
use crate::objects::CatalogObject;
use crate::validate;
use rusqlite::params;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

/// Label carried by the implicit initial version of every variant
pub const INITIAL_VERSION_LABEL: &str = "init";

/// Create a variant together with its initial version
///
/// One transaction inserts the variant row, three empty directory rows,
/// and version 1 labelled `init` owning them.
pub fn create_variant(scope: &ScopedConn, variant: &mut Variant) -> Result<()> {
    scope.transaction(|s| {
        variant.insert(s)?;

        let mut dir_ids = Vec::with_capacity(3);
        for dtype in [
            DirectoryType::Parameters,
            DirectoryType::Collections,
            DirectoryType::Values,
        ] {
            let dir = SchemaDirectory {
                directory_id: Uuid::new_v4().to_string(),
                dtype,
                variant_id: variant.variant_id.clone(),
                version_num: Some(1),
                workspace_id: None,
                directory: Directory::new(),
            };
            dir.insert(s)?;
            dir_ids.push(dir.directory_id);
        }

        let mut initial = Version {
            version_num: Some(1),
            label: Some(INITIAL_VERSION_LABEL.to_string()),
            description: variant.description.clone(),
            info: None,
            parameters_dir: dir_ids[0].clone(),
            collections_dir: dir_ids[1].clone(),
            values_dir: dir_ids[2].clone(),
            variant_id: variant.variant_id.clone(),
        };
        initial.insert(s)?;

        info!("created variant {} with initial version", variant.name);
        Ok(())
    })
}

/// Normalize an optional label argument: empty means unlabelled
fn normalize_label(label: &str) -> Result<Option<String>> {
    if label.is_empty() {
        return Ok(None);
    }
    validate::valid_label(label)?;
    Ok(Some(label.to_string()))
}

/// Create a new version of a variant
///
/// The version's directories are cloned from `base_version`, defaulting
/// to the variant's latest version. An empty label leaves the version
/// unlabelled; unlabelled versions may repeat, labels may not.
pub fn create_version(
    scope: &ScopedConn,
    variant_id: &str,
    label: &str,
    description: Option<String>,
    info: Option<Value>,
    base_version: Option<i64>,
) -> Result<Version> {
    let label = normalize_label(label)?;

    scope.transaction(|s| {
        require_variant(s, variant_id)?;

        let base = match base_version {
            Some(num) => Version::find(s, variant_id, num)?,
            None => Version::latest(s, variant_id)?,
        };

        let mut version = Version {
            version_num: None,
            label,
            description,
            info,
            parameters_dir: Uuid::new_v4().to_string(),
            collections_dir: Uuid::new_v4().to_string(),
            values_dir: Uuid::new_v4().to_string(),
            variant_id: variant_id.to_string(),
        };
        let num = version.insert(s)?;

        clone_directory(s, DirectoryType::Parameters, &base.parameters_dir,
            &version.parameters_dir, DirectoryOwner::Version(num))?;
        clone_directory(s, DirectoryType::Collections, &base.collections_dir,
            &version.collections_dir, DirectoryOwner::Version(num))?;
        clone_directory(s, DirectoryType::Values, &base.values_dir,
            &version.values_dir, DirectoryOwner::Version(num))?;

        debug!("created version {} of variant {}", num, variant_id);
        Ok(version)
    })
}

/// A missing parent variant is a caller error, not a bare lookup miss
fn require_variant(scope: &ScopedConn, variant_id: &str) -> Result<Variant> {
    Variant::find(scope, variant_id).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Error::InvalidVariant(variant_id.to_string()),
        _ => e,
    })
}

enum DirectoryOwner {
    Version(i64),
    Workspace(String),
}

/// Copy one directory row's document into a new row under a new owner
fn clone_directory(
    scope: &ScopedConn,
    dtype: DirectoryType,
    source_id: &str,
    new_id: &str,
    owner: DirectoryOwner,
) -> Result<()> {
    let source = SchemaDirectory::find(scope, dtype, source_id)?;

    let (version_num, workspace_id) = match owner {
        DirectoryOwner::Version(num) => (Some(num), None),
        DirectoryOwner::Workspace(id) => (None, Some(id)),
    };

    let clone = SchemaDirectory {
        directory_id: new_id.to_string(),
        dtype,
        variant_id: source.variant_id.clone(),
        version_num,
        workspace_id,
        directory: source.directory,
    };
    clone.insert(scope)
}

/// Create a workspace rooted at a base version
///
/// One transaction inserts the workspace row and three directory rows
/// whose documents are copied from the base version. `base_version`
/// defaults to the variant's latest version; an empty label is allowed.
pub fn create_workspace(
    scope: &ScopedConn,
    variant_id: &str,
    label: &str,
    description: Option<String>,
    base_version: Option<i64>,
) -> Result<Workspace> {
    let label = normalize_label(label)?;

    scope.transaction(|s| {
        require_variant(s, variant_id)?;

        let base = match base_version {
            Some(num) => Version::find(s, variant_id, num)?,
            None => Version::latest(s, variant_id)?,
        };
        let base_num = base
            .version_num
            .ok_or_else(|| Error::invalid_input("base version has no number"))?;

        let workspace = Workspace {
            workspace_id: Uuid::new_v4().to_string(),
            label,
            description,
            info: None,
            base_version: base_num,
            parameters_dir: Uuid::new_v4().to_string(),
            collections_dir: Uuid::new_v4().to_string(),
            values_dir: Uuid::new_v4().to_string(),
            variant_id: variant_id.to_string(),
        };

        let owner = workspace.workspace_id.clone();
        clone_directory(s, DirectoryType::Parameters, &base.parameters_dir,
            &workspace.parameters_dir, DirectoryOwner::Workspace(owner.clone()))?;
        clone_directory(s, DirectoryType::Collections, &base.collections_dir,
            &workspace.collections_dir, DirectoryOwner::Workspace(owner.clone()))?;
        clone_directory(s, DirectoryType::Values, &base.values_dir,
            &workspace.values_dir, DirectoryOwner::Workspace(owner))?;

        workspace.insert(s)?;

        debug!(
            "created workspace {} at version {}",
            workspace.workspace_id, base_num
        );
        Ok(workspace)
    })
}

/// Commit a workspace into a new version
///
/// Single transaction: allocate the next version number, insert the
/// version row pointing at the workspace's directories, reparent those
/// directory rows and the workspace's collections, and delete the
/// workspace. Before any of that, verify that every schema hash in the
/// collections directory still resolves in the object store and that
/// every collection's schema name resolves through the ancestor walk -
/// a failed check aborts the commit with the workspace unchanged.
///
/// Returns the allocated version number.
pub fn commit_workspace(scope: &ScopedConn, workspace_id: &str) -> Result<i64> {
    scope.transaction(|s| {
        let workspace = Workspace::find(s, workspace_id)?;

        verify_commit_integrity(s, &workspace)?;

        let mut version = Version {
            version_num: None,
            label: None,
            description: workspace.description.clone(),
            info: workspace.info.clone(),
            parameters_dir: workspace.parameters_dir.clone(),
            collections_dir: workspace.collections_dir.clone(),
            values_dir: workspace.values_dir.clone(),
            variant_id: workspace.variant_id.clone(),
        };
        let num = version.insert(s)?;

        for (dtype, directory_id) in [
            (DirectoryType::Parameters, &workspace.parameters_dir),
            (DirectoryType::Collections, &workspace.collections_dir),
            (DirectoryType::Values, &workspace.values_dir),
        ] {
            reparent_directory(s, dtype, directory_id, num)?;
        }

        let tenant_id = s.tenant_id()?;
        s.conn().execute(
            "UPDATE collections SET repo_id = ?1 WHERE repo_id = ?2 AND tenant_id = ?3",
            params![&workspace.values_dir, workspace_id, tenant_id],
        )?;

        Workspace::delete(s, workspace_id)?;

        info!(
            "committed workspace {} as version {} of variant {}",
            workspace_id, num, workspace.variant_id
        );
        Ok(num)
    })
}

/// Commit-time integrity checks over a workspace
fn verify_commit_integrity(scope: &ScopedConn, workspace: &Workspace) -> Result<()> {
    let schemas =
        SchemaDirectory::find(scope, DirectoryType::Collections, &workspace.collections_dir)?;

    // Every authoritative schema hash must still resolve in the store
    for (path, entry) in &schemas.directory {
        if !CatalogObject::exists(
            scope,
            DirectoryType::Collections.object_type(),
            &entry.hash,
        )? {
            return Err(Error::not_found(format!(
                "object {} for schema {}",
                entry.hash, path
            ))
            .context("commit integrity check failed"));
        }
    }

    // Every collection's governing schema must resolve via the ancestor walk
    for collection in collections::list_collections(scope, &workspace.workspace_id)? {
        let Some(schema) = &collection.collection_schema else {
            continue;
        };
        if closest_in_directory(&schemas.directory, schema, &collection.path).is_none() {
            return Err(Error::NoAncestorReferencesFound(schema.clone())
                .context(format!("resolving schema for {}", collection.path)));
        }
    }

    Ok(())
}

/// Move one directory row from workspace ownership to a version
fn reparent_directory(
    scope: &ScopedConn,
    dtype: DirectoryType,
    directory_id: &str,
    version_num: i64,
) -> Result<()> {
    let tenant_id = scope.tenant_id()?;
    let sql = format!(
        "UPDATE {} SET version_num = ?1, workspace_id = NULL
         WHERE directory_id = ?2 AND tenant_id = ?3",
        dtype.table()
    );

    let rows = scope
        .conn()
        .execute(&sql, params![version_num, directory_id, tenant_id])?;
    if rows == 0 {
        return Err(Error::not_found(format!("directory {}", directory_id)));
    }
    Ok(())
}

/// Delete a workspace and everything it owns
///
/// Removes the three directory rows, the workspace's collections, and
/// the workspace itself. A missing workspace is an error.
pub fn delete_workspace(scope: &ScopedConn, workspace_id: &str) -> Result<()> {
    scope.transaction(|s| {
        let workspace = Workspace::find(s, workspace_id)?;
        let tenant_id = s.tenant_id()?.to_string();

        for (dtype, directory_id) in [
            (DirectoryType::Parameters, &workspace.parameters_dir),
            (DirectoryType::Collections, &workspace.collections_dir),
            (DirectoryType::Values, &workspace.values_dir),
        ] {
            let sql = format!(
                "DELETE FROM {} WHERE directory_id = ?1 AND tenant_id = ?2",
                dtype.table()
            );
            s.conn().execute(&sql, params![directory_id, &tenant_id])?;
        }

        s.conn().execute(
            "DELETE FROM collections WHERE repo_id = ?1 AND tenant_id = ?2",
            params![workspace_id, &tenant_id],
        )?;

        Workspace::delete(s, workspace_id)?;
        debug!("deleted workspace {}", workspace_id);
        Ok(())
    })
}
