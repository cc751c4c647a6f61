// src/validate.rs

//! Format validation for labels, paths, hashes, and tenant identifiers
//!
//! All user-supplied names flow through these checks before touching the
//! database. Formats are bit-exact contracts shared with the outer API
//! surface.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Labels, namespaces, and schema names: `^[A-Za-z0-9_-]+$`
static LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("label regex must compile"));

/// Object paths: `^(/[A-Za-z0-9_-]+)+$`
static PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(/[A-Za-z0-9_-]+)+$").expect("path regex must compile"));

/// Content hashes: 128 hex characters
static HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{128}$").expect("hash regex must compile"));

/// Maximum length for tenant and project identifiers
pub const MAX_ID_LEN: usize = 10;

/// Maximum length for catalog names
pub const MAX_CATALOG_NAME_LEN: usize = 128;

/// Validate a version or workspace label
pub fn valid_label(label: &str) -> Result<()> {
    if label.is_empty() || !LABEL_RE.is_match(label) {
        return Err(Error::InvalidInput(format!("label '{}'", label)));
    }
    Ok(())
}

/// Validate a namespace or schema name (same character set as labels)
pub fn valid_name(name: &str) -> Result<()> {
    if name.is_empty() || !LABEL_RE.is_match(name) {
        return Err(Error::InvalidInput(format!("name '{}'", name)));
    }
    Ok(())
}

/// Validate an object path
pub fn valid_path(path: &str) -> Result<()> {
    if !PATH_RE.is_match(path) {
        return Err(Error::InvalidInput(format!("path '{}'", path)));
    }
    Ok(())
}

/// Validate a content hash (128 lowercase hex characters)
pub fn valid_hash(hash: &str) -> Result<()> {
    if !HASH_RE.is_match(hash) {
        return Err(Error::InvalidInput(format!("hash '{}'", hash)));
    }
    Ok(())
}

/// Validate a tenant identifier (1 to 10 characters)
pub fn valid_tenant_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(Error::InvalidInput(format!("tenant id '{}'", id)));
    }
    Ok(())
}

/// Validate a project identifier (1 to 10 characters)
pub fn valid_project_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(Error::InvalidInput(format!("project id '{}'", id)));
    }
    Ok(())
}

/// Validate a catalog name (non-empty, at most 128 characters)
pub fn valid_catalog_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_CATALOG_NAME_LEN {
        return Err(Error::InvalidInput(format!("catalog name '{}'", name)));
    }
    Ok(())
}
