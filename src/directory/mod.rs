// src/directory/mod.rs

//! Schema directories
//!
//! A directory is a map from object paths to [`ObjectRef`] entries,
//! persisted as a single JSON document per row. Each variant owns three
//! directory kinds (parameters, collections, values); every row belongs
//! to exactly one version or one workspace. The parameters and
//! collections directories cross-link: entries carry reference lists
//! into the paired directory, kept symmetric by the engine.

pub mod engine;

pub use engine::DeleteOptions;

use crate::db::scope::ScopedConn;
use crate::error::{Error, Result};
use crate::objects::ObjectType;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// The three directory kinds of a variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryType {
    Parameters,
    Collections,
    Values,
}

impl DirectoryType {
    pub fn as_str(&self) -> &str {
        match self {
            DirectoryType::Parameters => "parameters",
            DirectoryType::Collections => "collections",
            DirectoryType::Values => "values",
        }
    }

    /// Backend table holding directories of this kind
    pub(crate) fn table(&self) -> &'static str {
        match self {
            DirectoryType::Parameters => "parameters_directory",
            DirectoryType::Collections => "collections_directory",
            DirectoryType::Values => "values_directory",
        }
    }

    /// The directory kind this one cross-links with, if any
    ///
    /// Parameter schemas and collection schemas reference each other;
    /// values directories carry no cross-links.
    pub fn paired(&self) -> Option<DirectoryType> {
        match self {
            DirectoryType::Parameters => Some(DirectoryType::Collections),
            DirectoryType::Collections => Some(DirectoryType::Parameters),
            DirectoryType::Values => None,
        }
    }

    /// The object-store type for blobs addressed from this directory
    pub fn object_type(&self) -> ObjectType {
        match self {
            DirectoryType::Parameters => ObjectType::ParameterSchema,
            DirectoryType::Collections => ObjectType::CollectionSchema,
            DirectoryType::Values => ObjectType::Collection,
        }
    }
}

impl FromStr for DirectoryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "parameters" => Ok(DirectoryType::Parameters),
            "collections" => Ok(DirectoryType::Collections),
            "values" => Ok(DirectoryType::Values),
            _ => Err(format!("Invalid directory type: {}", s)),
        }
    }
}

/// A cross-directory reference by path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
}

impl Reference {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into() }
    }
}

/// A directory entry: pointer into the object store plus cross-links
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ObjectRef {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_schema: Option<String>,
}

impl ObjectRef {
    pub fn new<S: Into<String>>(hash: S) -> Self {
        Self {
            hash: hash.into(),
            references: Vec::new(),
            base_schema: None,
        }
    }

    /// Add a reference unless it is already present
    pub fn add_reference(&mut self, name: &str) {
        if !self.references.iter().any(|r| r.name == name) {
            self.references.push(Reference::new(name));
        }
    }

    /// Remove a reference; absent names are ignored
    pub fn remove_reference(&mut self, name: &str) {
        self.references.retain(|r| r.name != name);
    }

    /// Whether this entry references the given path
    pub fn has_reference(&self, name: &str) -> bool {
        self.references.iter().any(|r| r.name == name)
    }
}

/// A directory document: path to entry, ordered for stable serialization
pub type Directory = BTreeMap<String, ObjectRef>;

/// Serialize a directory to its persisted JSON document form
pub fn directory_to_json(directory: &Directory) -> Result<String> {
    Ok(serde_json::to_string(directory)?)
}

/// Parse a directory from its persisted JSON document form
pub fn directory_from_json(raw: &str) -> Result<Directory> {
    Ok(serde_json::from_str(raw)?)
}

/// A directory row: one document owned by a version or a workspace
#[derive(Debug, Clone)]
pub struct SchemaDirectory {
    pub directory_id: String,
    pub dtype: DirectoryType,
    pub variant_id: String,
    pub version_num: Option<i64>,
    pub workspace_id: Option<String>,
    pub directory: Directory,
}

impl SchemaDirectory {
    /// Insert this directory row
    pub(crate) fn insert(&self, scope: &ScopedConn) -> Result<()> {
        let tenant_id = scope.tenant_id()?;
        let sql = format!(
            "INSERT INTO {} (directory_id, variant_id, tenant_id, version_num, workspace_id, directory)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            self.dtype.table()
        );

        scope.conn().execute(
            &sql,
            params![
                &self.directory_id,
                &self.variant_id,
                tenant_id,
                self.version_num,
                self.workspace_id,
                directory_to_json(&self.directory)?,
            ],
        )?;
        Ok(())
    }

    /// Find a directory row by id
    pub fn find(scope: &ScopedConn, dtype: DirectoryType, directory_id: &str) -> Result<Self> {
        let tenant_id = scope.tenant_id()?;
        let sql = format!(
            "SELECT directory_id, variant_id, version_num, workspace_id, directory
             FROM {} WHERE directory_id = ?1 AND tenant_id = ?2",
            dtype.table()
        );

        let found = scope
            .conn()
            .query_row(&sql, params![directory_id, tenant_id], |row| {
                Self::from_row(dtype, row)
            })
            .optional()?;

        found.ok_or_else(|| Error::not_found(format!("directory {}", directory_id)))
    }

    /// Overwrite the persisted document of a directory row
    pub(crate) fn save(
        scope: &ScopedConn,
        dtype: DirectoryType,
        directory_id: &str,
        directory: &Directory,
    ) -> Result<()> {
        let tenant_id = scope.tenant_id()?;
        let sql = format!(
            "UPDATE {} SET directory = ?1 WHERE directory_id = ?2 AND tenant_id = ?3",
            dtype.table()
        );

        let rows = scope.conn().execute(
            &sql,
            params![directory_to_json(directory)?, directory_id, tenant_id],
        )?;

        if rows == 0 {
            return Err(Error::not_found(format!("directory {}", directory_id)));
        }
        Ok(())
    }

    /// The paired directory row sharing this row's owner, if the kind pairs
    pub(crate) fn find_paired(&self, scope: &ScopedConn) -> Result<Option<Self>> {
        let Some(paired_type) = self.dtype.paired() else {
            return Ok(None);
        };
        let tenant_id = scope.tenant_id()?;

        let sql = match (&self.version_num, &self.workspace_id) {
            (Some(_), None) => format!(
                "SELECT directory_id, variant_id, version_num, workspace_id, directory
                 FROM {} WHERE variant_id = ?1 AND version_num = ?2 AND tenant_id = ?3",
                paired_type.table()
            ),
            (None, Some(_)) => format!(
                "SELECT directory_id, variant_id, version_num, workspace_id, directory
                 FROM {} WHERE variant_id = ?1 AND workspace_id = ?2 AND tenant_id = ?3",
                paired_type.table()
            ),
            _ => return Ok(None),
        };

        let found = match (&self.version_num, &self.workspace_id) {
            (Some(num), None) => scope
                .conn()
                .query_row(&sql, params![&self.variant_id, num, tenant_id], |row| {
                    Self::from_row(paired_type, row)
                })
                .optional()?,
            (None, Some(ws)) => scope
                .conn()
                .query_row(&sql, params![&self.variant_id, ws, tenant_id], |row| {
                    Self::from_row(paired_type, row)
                })
                .optional()?,
            _ => None,
        };

        Ok(found)
    }

    fn from_row(dtype: DirectoryType, row: &Row) -> rusqlite::Result<Self> {
        let raw: String = row.get(4)?;
        let directory = serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Self {
            directory_id: row.get(0)?,
            dtype,
            variant_id: row.get(1)?,
            version_num: row.get(2)?,
            workspace_id: row.get(3)?,
            directory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_json_round_trip() {
        let mut directory = Directory::new();
        let mut entry = ObjectRef::new("a".repeat(128));
        entry.add_reference("/col/a/b");
        entry.base_schema = Some("base".to_string());
        directory.insert("/par/a/b".to_string(), entry);
        directory.insert("/par/x".to_string(), ObjectRef::new("b".repeat(128)));

        let json = directory_to_json(&directory).unwrap();
        let parsed = directory_from_json(&json).unwrap();
        assert_eq!(directory, parsed);

        // Stable serialization: serializing again is byte-identical
        assert_eq!(json, directory_to_json(&parsed).unwrap());
    }

    #[test]
    fn test_document_shape() {
        let mut directory = Directory::new();
        let mut entry = ObjectRef::new("c".repeat(128));
        entry.add_reference("/col/p");
        directory.insert("/par/p".to_string(), entry);

        let json = directory_to_json(&directory).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["/par/p"]["hash"], serde_json::json!("c".repeat(128)));
        assert_eq!(value["/par/p"]["references"][0]["name"], "/col/p");
        // Empty optionals are omitted from the document
        assert!(value["/par/p"].get("base_schema").is_none());
    }

    #[test]
    fn test_reference_set_semantics() {
        let mut entry = ObjectRef::new("d".repeat(128));
        entry.add_reference("/col/a");
        entry.add_reference("/col/a");
        assert_eq!(entry.references.len(), 1);

        assert!(entry.has_reference("/col/a"));
        entry.remove_reference("/col/a");
        assert!(!entry.has_reference("/col/a"));
        entry.remove_reference("/col/a");
    }

    #[test]
    fn test_pairing() {
        assert_eq!(
            DirectoryType::Parameters.paired(),
            Some(DirectoryType::Collections)
        );
        assert_eq!(
            DirectoryType::Collections.paired(),
            Some(DirectoryType::Parameters)
        );
        assert_eq!(DirectoryType::Values.paired(), None);
    }
}
