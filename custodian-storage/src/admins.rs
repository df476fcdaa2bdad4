//! The single administrator identity.
//!
//! At most one row exists. Its public key is the recipient of every field
//! envelope in the database and the only key whose signed events can
//! authorize a rotation.

use crate::error::{StorageError, StorageResult};
use custodian_crypto::XOnlyPublicKey;
use duckdb::{params, Connection};
use serde::Serialize;

const ADMIN_ROW_ID: i64 = 1;

/// The current administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdministratorIdentity {
    pub public_key: XOnlyPublicKey,
    pub created_at: i64,
    pub updated_at: i64,
}

pub(crate) fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS admins (
            id INTEGER PRIMARY KEY,
            public_key VARCHAR NOT NULL,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

/// Reads the administrator row, if one has been installed.
pub fn current_admin(conn: &Connection) -> StorageResult<Option<AdministratorIdentity>> {
    let result = conn.query_row(
        "SELECT public_key, created_at, updated_at FROM admins WHERE id = ?",
        params![ADMIN_ROW_ID],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        },
    );

    match result {
        Ok((public_key, created_at, updated_at)) => {
            let public_key = XOnlyPublicKey::from_hex(&public_key)
                .map_err(|e| StorageError::InvalidData(format!("admin public key: {e}")))?;
            Ok(Some(AdministratorIdentity {
                public_key,
                created_at,
                updated_at,
            }))
        }
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Installs the first administrator. Fails if one already exists.
pub fn insert_admin(
    conn: &Connection,
    public_key: &XOnlyPublicKey,
    now: i64,
) -> StorageResult<AdministratorIdentity> {
    if current_admin(conn)?.is_some() {
        return Err(StorageError::AlreadyExists("administrator".into()));
    }
    conn.execute(
        "INSERT INTO admins (id, public_key, created_at, updated_at) VALUES (?, ?, ?, ?)",
        params![ADMIN_ROW_ID, public_key.to_hex(), now, now],
    )?;
    Ok(AdministratorIdentity {
        public_key: *public_key,
        created_at: now,
        updated_at: now,
    })
}

/// Swaps the administrator public key in place.
pub fn replace_admin(
    conn: &Connection,
    public_key: &XOnlyPublicKey,
    now: i64,
) -> StorageResult<AdministratorIdentity> {
    let existing = current_admin(conn)?
        .ok_or_else(|| StorageError::NotFound("administrator".into()))?;
    conn.execute(
        "UPDATE admins SET public_key = ?, updated_at = ? WHERE id = ?",
        params![public_key.to_hex(), now, ADMIN_ROW_ID],
    )?;
    Ok(AdministratorIdentity {
        public_key: *public_key,
        created_at: existing.created_at,
        updated_at: now,
    })
}
