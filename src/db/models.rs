// src/db/models.rs

//! Data models for catalog metadata entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting
//! records. All operations run over a [`ScopedConn`] and derive their
//! tenant (and where applicable project) predicate from its scope
//! bindings, failing closed when a required scope is unbound.

use crate::db::scope::ScopedConn;
use crate::error::{Error, Result};
use crate::validate;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

/// Convert a JSON text column to a serde value
fn info_from_row(raw: Option<String>, idx: usize) -> rusqlite::Result<Option<Value>> {
    match raw {
        None => Ok(None),
        Some(text) => serde_json::from_str(&text).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        }),
    }
}

/// Serialize an info document for storage
fn info_to_sql(info: &Option<Value>) -> Option<String> {
    info.as_ref().map(|v| v.to_string())
}

/// An id argument counts as given only when non-empty and non-nil
fn id_given(id: &str) -> bool {
    !id.is_empty() && id != Uuid::nil().to_string()
}

/// A Tenant is the root of the ownership chain
///
/// Deleting a tenant cascades through every dependent row.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub tenant_id: String,
    pub created_at: Option<String>,
}

impl Tenant {
    pub fn new(tenant_id: String) -> Self {
        Self {
            tenant_id,
            created_at: None,
        }
    }

    /// Insert this tenant
    pub fn insert(&self, scope: &ScopedConn) -> Result<()> {
        validate::valid_tenant_id(&self.tenant_id)?;
        scope
            .conn()
            .execute(
                "INSERT INTO tenants (tenant_id) VALUES (?1)",
                [&self.tenant_id],
            )
            .map_err(|e| Error::from(e).context(format!("creating tenant {}", self.tenant_id)))?;
        Ok(())
    }

    /// Find a tenant by id
    pub fn find(scope: &ScopedConn, tenant_id: &str) -> Result<Self> {
        let tenant = scope
            .conn()
            .query_row(
                "SELECT tenant_id, created_at FROM tenants WHERE tenant_id = ?1",
                [tenant_id],
                Self::from_row,
            )
            .optional()?;

        tenant.ok_or_else(|| Error::not_found(format!("tenant {}", tenant_id)))
    }

    /// Delete a tenant; cascades to all dependent rows. Idempotent.
    pub fn delete(scope: &ScopedConn, tenant_id: &str) -> Result<()> {
        scope
            .conn()
            .execute("DELETE FROM tenants WHERE tenant_id = ?1", [tenant_id])?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            tenant_id: row.get(0)?,
            created_at: row.get(1)?,
        })
    }
}

/// A Project groups catalogs under a tenant
#[derive(Debug, Clone)]
pub struct Project {
    pub project_id: String,
    pub tenant_id: String,
    pub created_at: Option<String>,
}

impl Project {
    pub fn new(project_id: String) -> Self {
        Self {
            project_id,
            tenant_id: String::new(),
            created_at: None,
        }
    }

    /// Insert this project under the scoped tenant
    pub fn insert(&mut self, scope: &ScopedConn) -> Result<()> {
        validate::valid_project_id(&self.project_id)?;
        let tenant_id = scope.tenant_id()?;

        scope
            .conn()
            .execute(
                "INSERT INTO projects (project_id, tenant_id) VALUES (?1, ?2)",
                params![&self.project_id, tenant_id],
            )
            .map_err(|e| Error::from(e).context(format!("creating project {}", self.project_id)))?;

        self.tenant_id = tenant_id.to_string();
        Ok(())
    }

    /// Find a project by id within the scoped tenant
    pub fn find(scope: &ScopedConn, project_id: &str) -> Result<Self> {
        let tenant_id = scope.tenant_id()?;
        let project = scope
            .conn()
            .query_row(
                "SELECT project_id, tenant_id, created_at FROM projects
                 WHERE project_id = ?1 AND tenant_id = ?2",
                params![project_id, tenant_id],
                Self::from_row,
            )
            .optional()?;

        project.ok_or_else(|| Error::not_found(format!("project {}", project_id)))
    }

    /// List all projects of the scoped tenant
    pub fn list(scope: &ScopedConn) -> Result<Vec<Self>> {
        let tenant_id = scope.tenant_id()?;
        let mut stmt = scope.conn().prepare(
            "SELECT project_id, tenant_id, created_at FROM projects
             WHERE tenant_id = ?1 ORDER BY project_id",
        )?;

        let projects = stmt
            .query_map([tenant_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(projects)
    }

    /// Delete a project; cascades to its catalogs. Idempotent.
    pub fn delete(scope: &ScopedConn, project_id: &str) -> Result<()> {
        let tenant_id = scope.tenant_id()?;
        scope.conn().execute(
            "DELETE FROM projects WHERE project_id = ?1 AND tenant_id = ?2",
            params![project_id, tenant_id],
        )?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            project_id: row.get(0)?,
            tenant_id: row.get(1)?,
            created_at: row.get(2)?,
        })
    }
}

/// A Catalog holds variants of configuration artifacts
#[derive(Debug, Clone)]
pub struct Catalog {
    pub catalog_id: String,
    pub name: String,
    pub description: Option<String>,
    pub info: Option<Value>,
    pub project_id: String,
}

impl Catalog {
    pub fn new(name: String) -> Self {
        Self {
            catalog_id: Uuid::new_v4().to_string(),
            name,
            description: None,
            info: None,
            project_id: String::new(),
        }
    }

    /// Insert this catalog under the scoped tenant and project
    pub fn insert(&mut self, scope: &ScopedConn) -> Result<()> {
        validate::valid_catalog_name(&self.name)?;
        let tenant_id = scope.tenant_id()?;
        let project_id = scope.project_id()?;

        scope
            .conn()
            .execute(
                "INSERT INTO catalogs (catalog_id, name, description, info, project_id, tenant_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    &self.catalog_id,
                    &self.name,
                    &self.description,
                    info_to_sql(&self.info),
                    project_id,
                    tenant_id,
                ],
            )
            .map_err(|e| Error::from(e).context(format!("creating catalog {}", self.name)))?;

        self.project_id = project_id.to_string();
        Ok(())
    }

    /// Find a catalog by id or name; the id wins when both are given
    pub fn find(scope: &ScopedConn, catalog_id: &str, name: &str) -> Result<Self> {
        let tenant_id = scope.tenant_id()?;
        let project_id = scope.project_id()?;

        let catalog = if id_given(catalog_id) {
            scope
                .conn()
                .query_row(
                    "SELECT catalog_id, name, description, info, project_id FROM catalogs
                     WHERE catalog_id = ?1 AND project_id = ?2 AND tenant_id = ?3",
                    params![catalog_id, project_id, tenant_id],
                    Self::from_row,
                )
                .optional()?
        } else if !name.is_empty() {
            scope
                .conn()
                .query_row(
                    "SELECT catalog_id, name, description, info, project_id FROM catalogs
                     WHERE name = ?1 AND project_id = ?2 AND tenant_id = ?3",
                    params![name, project_id, tenant_id],
                    Self::from_row,
                )
                .optional()?
        } else {
            None
        };

        catalog.ok_or_else(|| {
            if id_given(catalog_id) {
                Error::not_found(format!("catalog {}", catalog_id))
            } else if !name.is_empty() {
                Error::not_found(format!("catalog {}", name))
            } else {
                Error::not_found("catalog")
            }
        })
    }

    /// Resolve a catalog name to its id
    pub fn find_id_by_name(scope: &ScopedConn, name: &str) -> Result<String> {
        Ok(Self::find(scope, "", name)?.catalog_id)
    }

    /// Update description and info by catalog id
    pub fn update(&self, scope: &ScopedConn) -> Result<()> {
        let tenant_id = scope.tenant_id()?;
        let project_id = scope.project_id()?;
        if self.catalog_id.is_empty() {
            return Err(Error::invalid_input("catalog id is required for update"));
        }

        let rows = scope.conn().execute(
            "UPDATE catalogs SET description = ?1, info = ?2
             WHERE catalog_id = ?3 AND project_id = ?4 AND tenant_id = ?5",
            params![
                &self.description,
                info_to_sql(&self.info),
                &self.catalog_id,
                project_id,
                tenant_id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::not_found(format!("catalog {}", self.catalog_id)));
        }
        Ok(())
    }

    /// Delete a catalog by id or name; the id wins when both are given
    pub fn delete(scope: &ScopedConn, catalog_id: &str, name: &str) -> Result<()> {
        let tenant_id = scope.tenant_id()?;
        let project_id = scope.project_id()?;

        let rows = if id_given(catalog_id) {
            scope.conn().execute(
                "DELETE FROM catalogs
                 WHERE catalog_id = ?1 AND project_id = ?2 AND tenant_id = ?3",
                params![catalog_id, project_id, tenant_id],
            )?
        } else if !name.is_empty() {
            scope.conn().execute(
                "DELETE FROM catalogs
                 WHERE name = ?1 AND project_id = ?2 AND tenant_id = ?3",
                params![name, project_id, tenant_id],
            )?
        } else {
            return Err(Error::invalid_input("catalog id or name is required"));
        };

        if rows == 0 {
            return Err(Error::not_found("catalog"));
        }
        Ok(())
    }

    /// List all catalogs of the scoped project
    pub fn list(scope: &ScopedConn) -> Result<Vec<Self>> {
        let tenant_id = scope.tenant_id()?;
        let project_id = scope.project_id()?;
        let mut stmt = scope.conn().prepare(
            "SELECT catalog_id, name, description, info, project_id FROM catalogs
             WHERE project_id = ?1 AND tenant_id = ?2 ORDER BY name",
        )?;

        let catalogs = stmt
            .query_map(params![project_id, tenant_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(catalogs)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            catalog_id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            info: info_from_row(row.get(3)?, 3)?,
            project_id: row.get(4)?,
        })
    }
}

/// A Variant is a parallel branch within a catalog
///
/// Variants are created through `lifecycle::create_variant`, which also
/// seeds the initial version and its three directories.
#[derive(Debug, Clone)]
pub struct Variant {
    pub variant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub info: Option<Value>,
    pub catalog_id: String,
}

impl Variant {
    pub fn new(name: String, catalog_id: String) -> Self {
        Self {
            variant_id: Uuid::new_v4().to_string(),
            name,
            description: None,
            info: None,
            catalog_id,
        }
    }

    /// Insert the bare variant row
    pub(crate) fn insert(&self, scope: &ScopedConn) -> Result<()> {
        validate::valid_name(&self.name)?;
        let tenant_id = scope.tenant_id()?;

        // Missing parent catalog is a caller error, not a bare FK failure
        let catalog_exists: Option<i64> = scope
            .conn()
            .query_row(
                "SELECT 1 FROM catalogs WHERE catalog_id = ?1 AND tenant_id = ?2",
                params![&self.catalog_id, tenant_id],
                |row| row.get(0),
            )
            .optional()?;
        if catalog_exists.is_none() {
            return Err(Error::InvalidCatalog(self.catalog_id.clone()));
        }

        scope
            .conn()
            .execute(
                "INSERT INTO variants (variant_id, name, description, info, catalog_id, tenant_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    &self.variant_id,
                    &self.name,
                    &self.description,
                    info_to_sql(&self.info),
                    &self.catalog_id,
                    tenant_id,
                ],
            )
            .map_err(|e| Error::from(e).context(format!("creating variant {}", self.name)))?;

        Ok(())
    }

    /// Find a variant by id
    pub fn find(scope: &ScopedConn, variant_id: &str) -> Result<Self> {
        let tenant_id = scope.tenant_id()?;
        let variant = scope
            .conn()
            .query_row(
                "SELECT variant_id, name, description, info, catalog_id FROM variants
                 WHERE variant_id = ?1 AND tenant_id = ?2",
                params![variant_id, tenant_id],
                Self::from_row,
            )
            .optional()?;

        variant.ok_or_else(|| Error::not_found(format!("variant {}", variant_id)))
    }

    /// Find a variant by name within a catalog
    pub fn find_by_name(scope: &ScopedConn, catalog_id: &str, name: &str) -> Result<Self> {
        let tenant_id = scope.tenant_id()?;
        let variant = scope
            .conn()
            .query_row(
                "SELECT variant_id, name, description, info, catalog_id FROM variants
                 WHERE name = ?1 AND catalog_id = ?2 AND tenant_id = ?3",
                params![name, catalog_id, tenant_id],
                Self::from_row,
            )
            .optional()?;

        variant.ok_or_else(|| Error::not_found(format!("variant {}", name)))
    }

    /// Update description and info by variant id
    pub fn update(&self, scope: &ScopedConn) -> Result<()> {
        let tenant_id = scope.tenant_id()?;
        let rows = scope.conn().execute(
            "UPDATE variants SET description = ?1, info = ?2
             WHERE variant_id = ?3 AND tenant_id = ?4",
            params![
                &self.description,
                info_to_sql(&self.info),
                &self.variant_id,
                tenant_id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::not_found(format!("variant {}", self.variant_id)));
        }
        Ok(())
    }

    /// Delete a variant by explicit id; absent rows are an error
    pub fn delete(scope: &ScopedConn, variant_id: &str) -> Result<()> {
        let tenant_id = scope.tenant_id()?;
        let rows = scope.conn().execute(
            "DELETE FROM variants WHERE variant_id = ?1 AND tenant_id = ?2",
            params![variant_id, tenant_id],
        )?;

        if rows == 0 {
            return Err(Error::not_found(format!("variant {}", variant_id)));
        }
        Ok(())
    }

    /// List all variants of a catalog
    pub fn list_by_catalog(scope: &ScopedConn, catalog_id: &str) -> Result<Vec<Self>> {
        let tenant_id = scope.tenant_id()?;
        let mut stmt = scope.conn().prepare(
            "SELECT variant_id, name, description, info, catalog_id FROM variants
             WHERE catalog_id = ?1 AND tenant_id = ?2 ORDER BY name",
        )?;

        let variants = stmt
            .query_map(params![catalog_id, tenant_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(variants)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            variant_id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            info: info_from_row(row.get(3)?, 3)?,
            catalog_id: row.get(4)?,
        })
    }
}

/// A Version is a numbered immutable snapshot of a variant
#[derive(Debug, Clone)]
pub struct Version {
    pub version_num: Option<i64>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub info: Option<Value>,
    pub parameters_dir: String,
    pub collections_dir: String,
    pub values_dir: String,
    pub variant_id: String,
}

impl Version {
    /// Insert this version, allocating the next number when unset
    ///
    /// Allocation reads `MAX(version_num) + 1` for the variant inside the
    /// caller's write transaction; competing writers queue on the
    /// database write lock, so numbers come out strictly increasing and
    /// gap-free. Callers must wrap this in `ScopedConn::transaction`.
    pub(crate) fn insert(&mut self, scope: &ScopedConn) -> Result<i64> {
        let tenant_id = scope.tenant_id()?;
        if let Some(label) = &self.label {
            validate::valid_label(label)?;
        }

        match self.version_num {
            Some(num) => {
                scope
                    .conn()
                    .execute(
                        "INSERT INTO versions
                         (variant_id, tenant_id, version_num, label, description, info,
                          parameters_dir, collections_dir, values_dir)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        params![
                            &self.variant_id,
                            tenant_id,
                            num,
                            &self.label,
                            &self.description,
                            info_to_sql(&self.info),
                            &self.parameters_dir,
                            &self.collections_dir,
                            &self.values_dir,
                        ],
                    )
                    .map_err(|e| {
                        Error::from(e).context(format!("creating version {}", num))
                    })?;
                Ok(num)
            }
            None => {
                scope
                    .conn()
                    .execute(
                        "INSERT INTO versions
                         (variant_id, tenant_id, version_num, label, description, info,
                          parameters_dir, collections_dir, values_dir)
                         VALUES (?1, ?2,
                                 (SELECT COALESCE(MAX(version_num), 0) + 1 FROM versions
                                  WHERE variant_id = ?1 AND tenant_id = ?2),
                                 ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            &self.variant_id,
                            tenant_id,
                            &self.label,
                            &self.description,
                            info_to_sql(&self.info),
                            &self.parameters_dir,
                            &self.collections_dir,
                            &self.values_dir,
                        ],
                    )
                    .map_err(|e| Error::from(e).context("allocating version number"))?;

                let num: i64 = scope.conn().query_row(
                    "SELECT MAX(version_num) FROM versions
                     WHERE variant_id = ?1 AND tenant_id = ?2",
                    params![&self.variant_id, tenant_id],
                    |row| row.get(0),
                )?;
                self.version_num = Some(num);
                Ok(num)
            }
        }
    }

    /// Find a version by number
    pub fn find(scope: &ScopedConn, variant_id: &str, version_num: i64) -> Result<Self> {
        let tenant_id = scope.tenant_id()?;
        let version = scope
            .conn()
            .query_row(
                "SELECT version_num, label, description, info,
                        parameters_dir, collections_dir, values_dir, variant_id
                 FROM versions
                 WHERE variant_id = ?1 AND version_num = ?2 AND tenant_id = ?3",
                params![variant_id, version_num, tenant_id],
                Self::from_row,
            )
            .optional()?;

        version.ok_or_else(|| Error::not_found(format!("version {}", version_num)))
    }

    /// Find a version by label
    pub fn find_by_label(scope: &ScopedConn, variant_id: &str, label: &str) -> Result<Self> {
        let tenant_id = scope.tenant_id()?;
        let version = scope
            .conn()
            .query_row(
                "SELECT version_num, label, description, info,
                        parameters_dir, collections_dir, values_dir, variant_id
                 FROM versions
                 WHERE label = ?1 AND variant_id = ?2 AND tenant_id = ?3",
                params![label, variant_id, tenant_id],
                Self::from_row,
            )
            .optional()?;

        version.ok_or_else(|| Error::not_found(format!("version labelled {}", label)))
    }

    /// The highest-numbered version of a variant
    pub fn latest(scope: &ScopedConn, variant_id: &str) -> Result<Self> {
        let tenant_id = scope.tenant_id()?;
        let version = scope
            .conn()
            .query_row(
                "SELECT version_num, label, description, info,
                        parameters_dir, collections_dir, values_dir, variant_id
                 FROM versions
                 WHERE variant_id = ?1 AND tenant_id = ?2
                 ORDER BY version_num DESC LIMIT 1",
                params![variant_id, tenant_id],
                Self::from_row,
            )
            .optional()?;

        version.ok_or_else(|| Error::not_found(format!("versions of variant {}", variant_id)))
    }

    /// All labelled versions of a variant, ordered by number
    pub fn get_named_versions(scope: &ScopedConn, variant_id: &str) -> Result<Vec<Self>> {
        let tenant_id = scope.tenant_id()?;
        let mut stmt = scope.conn().prepare(
            "SELECT version_num, label, description, info,
                    parameters_dir, collections_dir, values_dir, variant_id
             FROM versions
             WHERE variant_id = ?1 AND tenant_id = ?2 AND label IS NOT NULL
             ORDER BY version_num",
        )?;

        let versions = stmt
            .query_map(params![variant_id, tenant_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(versions)
    }

    /// All versions of a variant, ordered by number
    pub fn list(scope: &ScopedConn, variant_id: &str) -> Result<Vec<Self>> {
        let tenant_id = scope.tenant_id()?;
        let mut stmt = scope.conn().prepare(
            "SELECT version_num, label, description, info,
                    parameters_dir, collections_dir, values_dir, variant_id
             FROM versions
             WHERE variant_id = ?1 AND tenant_id = ?2
             ORDER BY version_num",
        )?;

        let versions = stmt
            .query_map(params![variant_id, tenant_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(versions)
    }

    /// Set or replace the label of a version
    pub fn set_label(
        scope: &ScopedConn,
        variant_id: &str,
        version_num: i64,
        label: &str,
    ) -> Result<()> {
        validate::valid_label(label)?;
        let tenant_id = scope.tenant_id()?;

        let rows = scope
            .conn()
            .execute(
                "UPDATE versions SET label = ?1
                 WHERE variant_id = ?2 AND version_num = ?3 AND tenant_id = ?4",
                params![label, variant_id, version_num, tenant_id],
            )
            .map_err(|e| Error::from(e).context(format!("labelling version {}", version_num)))?;

        if rows == 0 {
            return Err(Error::not_found(format!("version {}", version_num)));
        }
        Ok(())
    }

    /// Delete the bare version row. Idempotent.
    pub(crate) fn delete(scope: &ScopedConn, variant_id: &str, version_num: i64) -> Result<()> {
        let tenant_id = scope.tenant_id()?;
        scope.conn().execute(
            "DELETE FROM versions
             WHERE variant_id = ?1 AND version_num = ?2 AND tenant_id = ?3",
            params![variant_id, version_num, tenant_id],
        )?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            version_num: Some(row.get(0)?),
            label: row.get(1)?,
            description: row.get(2)?,
            info: info_from_row(row.get(3)?, 3)?,
            parameters_dir: row.get(4)?,
            collections_dir: row.get(5)?,
            values_dir: row.get(6)?,
            variant_id: row.get(7)?,
        })
    }
}

/// A Workspace is a mutable branch rooted at a base version
#[derive(Debug, Clone)]
pub struct Workspace {
    pub workspace_id: String,
    pub label: Option<String>,
    pub description: Option<String>,
    pub info: Option<Value>,
    pub base_version: i64,
    pub parameters_dir: String,
    pub collections_dir: String,
    pub values_dir: String,
    pub variant_id: String,
}

impl Workspace {
    /// Insert the bare workspace row
    pub(crate) fn insert(&self, scope: &ScopedConn) -> Result<()> {
        let tenant_id = scope.tenant_id()?;
        if let Some(label) = &self.label {
            validate::valid_label(label)?;
        }

        scope
            .conn()
            .execute(
                "INSERT INTO workspaces
                 (workspace_id, label, description, info, base_version, variant_id, tenant_id,
                  parameters_dir, collections_dir, values_dir)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    &self.workspace_id,
                    &self.label,
                    &self.description,
                    info_to_sql(&self.info),
                    self.base_version,
                    &self.variant_id,
                    tenant_id,
                    &self.parameters_dir,
                    &self.collections_dir,
                    &self.values_dir,
                ],
            )
            .map_err(|e| {
                Error::from(e).context(format!("creating workspace {}", self.workspace_id))
            })?;

        Ok(())
    }

    /// Find a workspace by id
    pub fn find(scope: &ScopedConn, workspace_id: &str) -> Result<Self> {
        let tenant_id = scope.tenant_id()?;
        let workspace = scope
            .conn()
            .query_row(
                "SELECT workspace_id, label, description, info, base_version,
                        parameters_dir, collections_dir, values_dir, variant_id
                 FROM workspaces
                 WHERE workspace_id = ?1 AND tenant_id = ?2",
                params![workspace_id, tenant_id],
                Self::from_row,
            )
            .optional()?;

        workspace.ok_or_else(|| Error::not_found(format!("workspace {}", workspace_id)))
    }

    /// Find a workspace by label within a variant
    pub fn find_by_label(scope: &ScopedConn, variant_id: &str, label: &str) -> Result<Self> {
        let tenant_id = scope.tenant_id()?;
        let workspace = scope
            .conn()
            .query_row(
                "SELECT workspace_id, label, description, info, base_version,
                        parameters_dir, collections_dir, values_dir, variant_id
                 FROM workspaces
                 WHERE label = ?1 AND variant_id = ?2 AND tenant_id = ?3",
                params![label, variant_id, tenant_id],
                Self::from_row,
            )
            .optional()?;

        workspace.ok_or_else(|| Error::not_found(format!("workspace labelled {}", label)))
    }

    /// List all workspaces of a variant
    pub fn list_by_variant(scope: &ScopedConn, variant_id: &str) -> Result<Vec<Self>> {
        let tenant_id = scope.tenant_id()?;
        let mut stmt = scope.conn().prepare(
            "SELECT workspace_id, label, description, info, base_version,
                    parameters_dir, collections_dir, values_dir, variant_id
             FROM workspaces
             WHERE variant_id = ?1 AND tenant_id = ?2
             ORDER BY created_at",
        )?;

        let workspaces = stmt
            .query_map(params![variant_id, tenant_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(workspaces)
    }

    /// Delete the bare workspace row; absent rows are an error
    pub(crate) fn delete(scope: &ScopedConn, workspace_id: &str) -> Result<()> {
        let tenant_id = scope.tenant_id()?;
        let rows = scope.conn().execute(
            "DELETE FROM workspaces WHERE workspace_id = ?1 AND tenant_id = ?2",
            params![workspace_id, tenant_id],
        )?;

        if rows == 0 {
            return Err(Error::not_found(format!("workspace {}", workspace_id)));
        }
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            workspace_id: row.get(0)?,
            label: row.get(1)?,
            description: row.get(2)?,
            info: info_from_row(row.get(3)?, 3)?,
            base_version: row.get(4)?,
            parameters_dir: row.get(5)?,
            collections_dir: row.get(6)?,
            values_dir: row.get(7)?,
            variant_id: row.get(8)?,
        })
    }
}

/// A Namespace is a named scope within a variant
#[derive(Debug, Clone)]
pub struct Namespace {
    pub name: String,
    pub description: Option<String>,
    pub info: Option<Value>,
    pub variant_id: String,
}

impl Namespace {
    pub fn new(name: String, variant_id: String) -> Self {
        Self {
            name,
            description: None,
            info: None,
            variant_id,
        }
    }

    /// Insert this namespace
    pub fn insert(&self, scope: &ScopedConn) -> Result<()> {
        validate::valid_name(&self.name)?;
        let tenant_id = scope.tenant_id()?;

        // Missing parent variant is a caller error
        Variant::find(scope, &self.variant_id).map_err(|e| match e.kind() {
            crate::error::ErrorKind::NotFound => Error::InvalidVariant(self.variant_id.clone()),
            _ => e,
        })?;

        scope
            .conn()
            .execute(
                "INSERT INTO namespaces (name, description, info, variant_id, tenant_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    &self.name,
                    &self.description,
                    info_to_sql(&self.info),
                    &self.variant_id,
                    tenant_id,
                ],
            )
            .map_err(|e| Error::from(e).context(format!("creating namespace {}", self.name)))?;

        Ok(())
    }

    /// Find a namespace by name within a variant
    pub fn find(scope: &ScopedConn, variant_id: &str, name: &str) -> Result<Self> {
        let tenant_id = scope.tenant_id()?;
        let namespace = scope
            .conn()
            .query_row(
                "SELECT name, description, info, variant_id FROM namespaces
                 WHERE name = ?1 AND variant_id = ?2 AND tenant_id = ?3",
                params![name, variant_id, tenant_id],
                Self::from_row,
            )
            .optional()?;

        namespace.ok_or_else(|| Error::not_found(format!("namespace {}", name)))
    }

    /// List all namespaces of a variant
    pub fn list_by_variant(scope: &ScopedConn, variant_id: &str) -> Result<Vec<Self>> {
        let tenant_id = scope.tenant_id()?;
        let mut stmt = scope.conn().prepare(
            "SELECT name, description, info, variant_id FROM namespaces
             WHERE variant_id = ?1 AND tenant_id = ?2 ORDER BY name",
        )?;

        let namespaces = stmt
            .query_map(params![variant_id, tenant_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(namespaces)
    }

    /// Delete a namespace. Idempotent.
    pub fn delete(scope: &ScopedConn, variant_id: &str, name: &str) -> Result<()> {
        let tenant_id = scope.tenant_id()?;
        scope.conn().execute(
            "DELETE FROM namespaces
             WHERE name = ?1 AND variant_id = ?2 AND tenant_id = ?3",
            params![name, variant_id, tenant_id],
        )?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            description: row.get(1)?,
            info: info_from_row(row.get(2)?, 2)?,
            variant_id: row.get(3)?,
        })
    }
}

/// A View is a named row filter over a catalog
#[derive(Debug, Clone)]
pub struct View {
    pub view_id: String,
    pub label: String,
    pub description: Option<String>,
    pub rules: Option<Value>,
    pub catalog_id: String,
}

impl View {
    pub fn new(label: String, catalog_id: String) -> Self {
        Self {
            view_id: Uuid::new_v4().to_string(),
            label,
            description: None,
            rules: None,
            catalog_id,
        }
    }

    /// Insert this view
    pub fn insert(&self, scope: &ScopedConn) -> Result<()> {
        validate::valid_label(&self.label)?;
        let tenant_id = scope.tenant_id()?;

        scope
            .conn()
            .execute(
                "INSERT INTO views (view_id, label, description, rules, catalog_id, tenant_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    &self.view_id,
                    &self.label,
                    &self.description,
                    self.rules.as_ref().map(|v| v.to_string()),
                    &self.catalog_id,
                    tenant_id,
                ],
            )
            .map_err(|e| Error::from(e).context(format!("creating view {}", self.label)))?;

        Ok(())
    }

    /// Find a view by id
    pub fn find(scope: &ScopedConn, view_id: &str) -> Result<Self> {
        let tenant_id = scope.tenant_id()?;
        let view = scope
            .conn()
            .query_row(
                "SELECT view_id, label, description, rules, catalog_id FROM views
                 WHERE view_id = ?1 AND tenant_id = ?2",
                params![view_id, tenant_id],
                Self::from_row,
            )
            .optional()?;

        view.ok_or_else(|| Error::not_found(format!("view {}", view_id)))
    }

    /// Update description and rules by view id
    pub fn update(&self, scope: &ScopedConn) -> Result<()> {
        let tenant_id = scope.tenant_id()?;
        let rows = scope.conn().execute(
            "UPDATE views SET description = ?1, rules = ?2
             WHERE view_id = ?3 AND tenant_id = ?4",
            params![
                &self.description,
                self.rules.as_ref().map(|v| v.to_string()),
                &self.view_id,
                tenant_id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::not_found(format!("view {}", self.view_id)));
        }
        Ok(())
    }

    /// Delete a view; cascades to its tokens. Idempotent.
    pub fn delete(scope: &ScopedConn, view_id: &str) -> Result<()> {
        let tenant_id = scope.tenant_id()?;
        scope.conn().execute(
            "DELETE FROM views WHERE view_id = ?1 AND tenant_id = ?2",
            params![view_id, tenant_id],
        )?;
        Ok(())
    }

    /// List all views of a catalog
    pub fn list_by_catalog(scope: &ScopedConn, catalog_id: &str) -> Result<Vec<Self>> {
        let tenant_id = scope.tenant_id()?;
        let mut stmt = scope.conn().prepare(
            "SELECT view_id, label, description, rules, catalog_id FROM views
             WHERE catalog_id = ?1 AND tenant_id = ?2 ORDER BY label",
        )?;

        let views = stmt
            .query_map(params![catalog_id, tenant_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(views)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            view_id: row.get(0)?,
            label: row.get(1)?,
            description: row.get(2)?,
            rules: info_from_row(row.get(3)?, 3)?,
            catalog_id: row.get(4)?,
        })
    }
}

/// A ViewToken is an expiring token bound to a view
#[derive(Debug, Clone)]
pub struct ViewToken {
    pub token_id: String,
    pub view_id: String,
    pub expire_at: DateTime<Utc>,
}

impl ViewToken {
    pub fn new(view_id: String, expire_at: DateTime<Utc>) -> Self {
        Self {
            token_id: Uuid::new_v4().to_string(),
            view_id,
            expire_at,
        }
    }

    /// True once the token's expiry has passed
    pub fn is_expired(&self) -> bool {
        self.expire_at <= Utc::now()
    }

    /// Insert this token
    pub fn insert(&self, scope: &ScopedConn) -> Result<()> {
        let tenant_id = scope.tenant_id()?;
        scope
            .conn()
            .execute(
                "INSERT INTO view_tokens (token_id, view_id, tenant_id, expire_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    &self.token_id,
                    &self.view_id,
                    tenant_id,
                    self.expire_at.to_rfc3339(),
                ],
            )
            .map_err(|e| Error::from(e).context("creating view token"))?;
        Ok(())
    }

    /// Find a token by id
    pub fn find(scope: &ScopedConn, token_id: &str) -> Result<Self> {
        let tenant_id = scope.tenant_id()?;
        let token = scope
            .conn()
            .query_row(
                "SELECT token_id, view_id, expire_at FROM view_tokens
                 WHERE token_id = ?1 AND tenant_id = ?2",
                params![token_id, tenant_id],
                Self::from_row,
            )
            .optional()?;

        token.ok_or_else(|| Error::not_found(format!("view token {}", token_id)))
    }

    /// Delete a token. Idempotent.
    pub fn delete(scope: &ScopedConn, token_id: &str) -> Result<()> {
        let tenant_id = scope.tenant_id()?;
        scope.conn().execute(
            "DELETE FROM view_tokens WHERE token_id = ?1 AND tenant_id = ?2",
            params![token_id, tenant_id],
        )?;
        Ok(())
    }

    /// Remove all expired tokens of the scoped tenant
    pub fn delete_expired(scope: &ScopedConn) -> Result<usize> {
        let tenant_id = scope.tenant_id()?;
        let rows = scope.conn().execute(
            "DELETE FROM view_tokens WHERE tenant_id = ?1 AND expire_at <= ?2",
            params![tenant_id, Utc::now().to_rfc3339()],
        )?;
        Ok(rows)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let raw: String = row.get(2)?;
        let expire_at = DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?
            .with_timezone(&Utc);

        Ok(Self {
            token_id: row.get(0)?,
            view_id: row.get(1)?,
            expire_at,
        })
    }
}
