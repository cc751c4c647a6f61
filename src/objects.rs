// src/objects.rs

//! Content-addressed object store
//!
//! Immutable blobs keyed by (hash, type, tenant). Inserts are idempotent:
//! storing the same key twice bumps a reference count instead of failing,
//! and deletes decrement it, removing storage only when the count reaches
//! zero. Directory entries never pin objects; the commit protocol is
//! responsible for checking that referenced hashes still resolve.

use crate::db::scope::ScopedConn;
use crate::error::{Error, Result};
use crate::validate;
use rusqlite::{params, OptionalExtension, Row};
use sha2::{Digest, Sha512};
use std::str::FromStr;
use tracing::debug;

/// Type of stored catalog object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    ParameterSchema,
    CollectionSchema,
    Collection,
}

impl ObjectType {
    pub fn as_str(&self) -> &str {
        match self {
            ObjectType::ParameterSchema => "parameter_schema",
            ObjectType::CollectionSchema => "collection_schema",
            ObjectType::Collection => "collection",
        }
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "parameter_schema" => Ok(ObjectType::ParameterSchema),
            "collection_schema" => Ok(ObjectType::CollectionSchema),
            "collection" => Ok(ObjectType::Collection),
            _ => Err(format!("Invalid object type: {}", s)),
        }
    }
}

/// Compute the content hash of a blob (SHA-512, 128 hex characters)
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// An immutable blob in the object store
#[derive(Debug, Clone)]
pub struct CatalogObject {
    pub hash: String,
    pub object_type: ObjectType,
    pub version: String,
    pub data: Vec<u8>,
}

impl CatalogObject {
    /// Create an object, computing its hash from the data
    pub fn new(object_type: ObjectType, data: Vec<u8>) -> Self {
        Self {
            hash: compute_hash(&data),
            object_type,
            version: "v1".to_string(),
            data,
        }
    }

    /// Insert this object for the scoped tenant
    ///
    /// Idempotent under an identical (hash, type, tenant): a duplicate
    /// insert succeeds and bumps the reference count. Equal hashes are
    /// trusted to mean equal content.
    pub fn insert(&self, scope: &ScopedConn) -> Result<()> {
        validate::valid_hash(&self.hash)?;
        let tenant_id = scope.tenant_id()?;

        scope.conn().execute(
            "INSERT INTO catalog_objects (hash, type, version, data, tenant_id)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (hash, type, tenant_id)
             DO UPDATE SET refcount = refcount + 1",
            params![
                &self.hash,
                self.object_type.as_str(),
                &self.version,
                &self.data,
                tenant_id,
            ],
        )?;

        debug!("stored object {} ({})", self.hash, self.object_type.as_str());
        Ok(())
    }

    /// Fetch an object by hash and type
    pub fn find(scope: &ScopedConn, object_type: ObjectType, hash: &str) -> Result<Self> {
        let tenant_id = scope.tenant_id()?;
        let object = scope
            .conn()
            .query_row(
                "SELECT hash, type, version, data FROM catalog_objects
                 WHERE hash = ?1 AND type = ?2 AND tenant_id = ?3",
                params![hash, object_type.as_str(), tenant_id],
                Self::from_row,
            )
            .optional()?;

        object.ok_or_else(|| Error::not_found(format!("object {}", hash)))
    }

    /// Whether an object row exists for this hash and type
    pub fn exists(scope: &ScopedConn, object_type: ObjectType, hash: &str) -> Result<bool> {
        let tenant_id = scope.tenant_id()?;
        let found: Option<i64> = scope
            .conn()
            .query_row(
                "SELECT 1 FROM catalog_objects
                 WHERE hash = ?1 AND type = ?2 AND tenant_id = ?3",
                params![hash, object_type.as_str(), tenant_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Release one reference to an object, removing storage at zero
    ///
    /// Unconditional with respect to directory entries: an object may be
    /// deleted while paths still reference its hash. Deleting an absent
    /// object is an error.
    pub fn delete(scope: &ScopedConn, object_type: ObjectType, hash: &str) -> Result<()> {
        let tenant_id = scope.tenant_id()?.to_string();

        scope.transaction(|s| {
            let refcount: Option<i64> = s
                .conn()
                .query_row(
                    "SELECT refcount FROM catalog_objects
                     WHERE hash = ?1 AND type = ?2 AND tenant_id = ?3",
                    params![hash, object_type.as_str(), &tenant_id],
                    |row| row.get(0),
                )
                .optional()?;

            match refcount {
                None => Err(Error::not_found(format!("object {}", hash))),
                Some(1) => {
                    s.conn().execute(
                        "DELETE FROM catalog_objects
                         WHERE hash = ?1 AND type = ?2 AND tenant_id = ?3",
                        params![hash, object_type.as_str(), &tenant_id],
                    )?;
                    debug!("removed object {} ({})", hash, object_type.as_str());
                    Ok(())
                }
                Some(_) => {
                    s.conn().execute(
                        "UPDATE catalog_objects SET refcount = refcount - 1
                         WHERE hash = ?1 AND type = ?2 AND tenant_id = ?3",
                        params![hash, object_type.as_str(), &tenant_id],
                    )?;
                    Ok(())
                }
            }
        })
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let type_str: String = row.get(1)?;
        let object_type = type_str.parse::<ObjectType>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            hash: row.get(0)?,
            object_type,
            version: row.get(2)?,
            data: row.get(3)?,
        })
    }
}
