// src/lib.rs

//! Corral - multi-tenant catalog storage engine
//!
//! A Git-like object store layered over a relational database. Tenants
//! own catalogs; catalogs hold variants (parallel branches); variants
//! accumulate numbered immutable versions plus mutable workspaces that
//! commit atomically into new versions.
//!
//! # Architecture
//!
//! - Database-first: all state in SQLite, scoped connections bind tenant
//!   and project identity to the session
//! - Content-addressed objects: immutable blobs keyed by hash with
//!   reference-counted storage
//! - Schema directories: path-to-object maps per variant branch, with
//!   symmetric cross-directory reference tracking
//! - Atomic commits: workspaces promote into gap-free numbered versions
//!   in one transaction

pub mod collections;
pub mod db;
pub mod directory;
mod error;
pub mod lifecycle;
pub mod objects;
pub mod signing;
pub mod validate;

pub use error::{Error, ErrorKind, Result};
