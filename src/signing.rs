// src/signing.rs

//! Signing-key management
//!
//! Each tenant keeps a set of ed25519 keypairs with at most one active
//! at a time. Activation is a transactional swap: activating a key first
//! deactivates its siblings, and a partial unique index on the table
//! backstops the invariant.

use crate::db::scope::ScopedConn;
use crate::error::{Error, Result};
use ed25519_dalek::{SigningKey as Ed25519Key, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use rand::RngCore;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

/// A tenant signing keypair
#[derive(Debug, Clone)]
pub struct SigningKey {
    pub key_id: String,
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
    pub is_active: bool,
}

impl SigningKey {
    /// Generate a fresh ed25519 keypair
    pub fn generate() -> Self {
        let mut secret = [0u8; SECRET_KEY_LENGTH];
        OsRng.fill_bytes(&mut secret);
        let signing = Ed25519Key::from_bytes(&secret);

        Self {
            key_id: Uuid::new_v4().to_string(),
            public_key: signing.verifying_key().to_bytes().to_vec(),
            private_key: secret.to_vec(),
            is_active: false,
        }
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            key_id: row.get(0)?,
            public_key: row.get(1)?,
            private_key: row.get(2)?,
            is_active: row.get::<_, i64>(3)? != 0,
        })
    }
}

/// Insert a signing key for the scoped tenant
///
/// If the key arrives active, any currently active sibling is
/// deactivated in the same transaction.
pub fn create_signing_key(scope: &ScopedConn, key: &SigningKey) -> Result<()> {
    let tenant_id = scope.tenant_id()?.to_string();

    scope.transaction(|s| {
        if key.is_active {
            s.conn().execute(
                "UPDATE signing_keys SET is_active = 0
                 WHERE tenant_id = ?1 AND is_active = 1",
                params![&tenant_id],
            )?;
        }

        s.conn()
            .execute(
                "INSERT INTO signing_keys (key_id, public_key, private_key, is_active, tenant_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    &key.key_id,
                    &key.public_key,
                    &key.private_key,
                    key.is_active as i64,
                    &tenant_id,
                ],
            )
            .map_err(|e| Error::from(e).context(format!("creating signing key {}", key.key_id)))?;

        debug!("created signing key {} (active={})", key.key_id, key.is_active);
        Ok(())
    })
}

/// Fetch a signing key by id
pub fn get_signing_key(scope: &ScopedConn, key_id: &str) -> Result<SigningKey> {
    let tenant_id = scope.tenant_id()?;
    let key = scope
        .conn()
        .query_row(
            "SELECT key_id, public_key, private_key, is_active FROM signing_keys
             WHERE key_id = ?1 AND tenant_id = ?2",
            params![key_id, tenant_id],
            SigningKey::from_row,
        )
        .optional()?;

    key.ok_or_else(|| Error::not_found(format!("signing key {}", key_id)))
}

/// The single active key of the scoped tenant
pub fn get_active_signing_key(scope: &ScopedConn) -> Result<SigningKey> {
    let tenant_id = scope.tenant_id()?;
    let key = scope
        .conn()
        .query_row(
            "SELECT key_id, public_key, private_key, is_active FROM signing_keys
             WHERE tenant_id = ?1 AND is_active = 1",
            params![tenant_id],
            SigningKey::from_row,
        )
        .optional()?;

    key.ok_or_else(|| Error::not_found("active signing key"))
}

/// Activate or deactivate a key
///
/// Activation deactivates siblings atomically; a missing target id rolls
/// the whole swap back.
pub fn update_signing_key_active(scope: &ScopedConn, key_id: &str, active: bool) -> Result<()> {
    let tenant_id = scope.tenant_id()?.to_string();

    scope.transaction(|s| {
        if active {
            s.conn().execute(
                "UPDATE signing_keys SET is_active = 0
                 WHERE tenant_id = ?1 AND is_active = 1 AND key_id <> ?2",
                params![&tenant_id, key_id],
            )?;
        }

        let rows = s.conn().execute(
            "UPDATE signing_keys SET is_active = ?1
             WHERE key_id = ?2 AND tenant_id = ?3",
            params![active as i64, key_id, &tenant_id],
        )?;

        if rows == 0 {
            return Err(Error::not_found(format!("signing key {}", key_id)));
        }
        Ok(())
    })
}

/// Delete a signing key; a missing row is an error
pub fn delete_signing_key(scope: &ScopedConn, key_id: &str) -> Result<()> {
    let tenant_id = scope.tenant_id()?;
    let rows = scope.conn().execute(
        "DELETE FROM signing_keys WHERE key_id = ?1 AND tenant_id = ?2",
        params![key_id, tenant_id],
    )?;

    if rows == 0 {
        return Err(Error::not_found(format!("signing key {}", key_id)));
    }
    Ok(())
}

/// List all keys of the scoped tenant
pub fn list_signing_keys(scope: &ScopedConn) -> Result<Vec<SigningKey>> {
    let tenant_id = scope.tenant_id()?;
    let mut stmt = scope.conn().prepare(
        "SELECT key_id, public_key, private_key, is_active FROM signing_keys
         WHERE tenant_id = ?1 ORDER BY created_at, key_id",
    )?;

    let keys = stmt
        .query_map(params![tenant_id], SigningKey::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(keys)
}
