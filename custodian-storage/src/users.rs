//! Protected user rows and their custom profile field values.
//!
//! Every PII column is stored as an envelope ciphertext plus the ephemeral
//! public key that sealed it. The two columns are always both set or both
//! null; a row where they disagree is reported as [`StorageError::InvalidData`].

use crate::error::{StorageError, StorageResult};
use custodian_crypto::{BlindIndex, EncryptedField, XOnlyPublicKey};
use duckdb::{params, Connection, Row};
use serde::Serialize;

/// A user row as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub email: Option<EncryptedField>,
    pub email_blind_index: Option<BlindIndex>,
    pub name: Option<EncryptedField>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UserRecord {
    /// True when the row holds at least one sealed column and therefore takes
    /// part in key rotation.
    pub fn is_protected(&self) -> bool {
        self.email.is_some() || self.name.is_some()
    }
}

/// A custom profile field value. Always sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileFieldRecord {
    pub id: String,
    pub user_id: String,
    pub field_key: String,
    pub value: EncryptedField,
    pub created_at: i64,
    pub updated_at: i64,
}

// Secondary indexes are left off: DuckDB rewrites indexed rows on UPDATE and
// re-encryption updates every row.
pub(crate) fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id VARCHAR PRIMARY KEY,
            email_ciphertext VARCHAR,
            email_ephemeral_pk VARCHAR,
            email_blind_index VARCHAR,
            name_ciphertext VARCHAR,
            name_ephemeral_pk VARCHAR,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS user_field_values (
            id VARCHAR PRIMARY KEY,
            user_id VARCHAR NOT NULL,
            field_key VARCHAR NOT NULL,
            value_ciphertext VARCHAR NOT NULL,
            value_ephemeral_pk VARCHAR NOT NULL,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

const USER_COLUMNS: &str = "id, email_ciphertext, email_ephemeral_pk, email_blind_index, \
     name_ciphertext, name_ephemeral_pk, created_at, updated_at";

const FIELD_COLUMNS: &str =
    "id, user_id, field_key, value_ciphertext, value_ephemeral_pk, created_at, updated_at";

const PROTECTED_PREDICATE: &str =
    "(email_ciphertext IS NOT NULL OR name_ciphertext IS NOT NULL)";

struct RawUserRow {
    id: String,
    email_ciphertext: Option<String>,
    email_ephemeral_pk: Option<String>,
    email_blind_index: Option<String>,
    name_ciphertext: Option<String>,
    name_ephemeral_pk: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl RawUserRow {
    fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email_ciphertext: row.get(1)?,
            email_ephemeral_pk: row.get(2)?,
            email_blind_index: row.get(3)?,
            name_ciphertext: row.get(4)?,
            name_ephemeral_pk: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_record(self) -> StorageResult<UserRecord> {
        let email = sealed_column(
            &self.id,
            "email",
            self.email_ciphertext,
            self.email_ephemeral_pk,
        )?;
        let name = sealed_column(&self.id, "name", self.name_ciphertext, self.name_ephemeral_pk)?;
        let email_blind_index = self
            .email_blind_index
            .as_deref()
            .map(BlindIndex::from_hex)
            .transpose()?;
        Ok(UserRecord {
            id: self.id,
            email,
            email_blind_index,
            name,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn sealed_column(
    id: &str,
    column: &str,
    ciphertext: Option<String>,
    ephemeral_pk: Option<String>,
) -> StorageResult<Option<EncryptedField>> {
    match (ciphertext, ephemeral_pk) {
        (Some(ciphertext), Some(pk)) => Ok(Some(EncryptedField {
            ciphertext,
            ephemeral_public_key: XOnlyPublicKey::from_hex(&pk)?,
        })),
        (None, None) => Ok(None),
        _ => Err(StorageError::InvalidData(format!(
            "user {id}: {column} ciphertext and ephemeral key disagree"
        ))),
    }
}

fn field_from_row(row: &Row<'_>) -> duckdb::Result<(String, String, String, String, String, i64, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn field_record(
    raw: (String, String, String, String, String, i64, i64),
) -> StorageResult<ProfileFieldRecord> {
    let (id, user_id, field_key, ciphertext, pk, created_at, updated_at) = raw;
    Ok(ProfileFieldRecord {
        id,
        user_id,
        field_key,
        value: EncryptedField {
            ciphertext,
            ephemeral_public_key: XOnlyPublicKey::from_hex(&pk)?,
        },
        created_at,
        updated_at,
    })
}

fn split(field: Option<&EncryptedField>) -> (Option<&str>, Option<String>) {
    match field {
        Some(f) => (Some(f.ciphertext.as_str()), Some(f.ephemeral_public_key.to_hex())),
        None => (None, None),
    }
}

fn query_users(conn: &Connection, sql: &str, arg: Option<&str>) -> StorageResult<Vec<UserRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let raw: Vec<RawUserRow> = match arg {
        Some(a) => stmt
            .query_map(params![a], RawUserRow::from_row)?
            .collect::<Result<_, _>>()?,
        None => stmt
            .query_map([], RawUserRow::from_row)?
            .collect::<Result<_, _>>()?,
    };
    raw.into_iter().map(RawUserRow::into_record).collect()
}

fn query_fields(
    conn: &Connection,
    sql: &str,
    arg: Option<&str>,
) -> StorageResult<Vec<ProfileFieldRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let raw: Vec<_> = match arg {
        Some(a) => stmt
            .query_map(params![a], field_from_row)?
            .collect::<Result<_, _>>()?,
        None => stmt.query_map([], field_from_row)?.collect::<Result<_, _>>()?,
    };
    raw.into_iter().map(field_record).collect()
}

// ── Users ────────────────────────────────────────────────────────

pub fn insert_user(conn: &Connection, user: &UserRecord) -> StorageResult<()> {
    if get_user(conn, &user.id)?.is_some() {
        return Err(StorageError::AlreadyExists(format!("user {}", user.id)));
    }
    let (email_ct, email_pk) = split(user.email.as_ref());
    let (name_ct, name_pk) = split(user.name.as_ref());
    conn.execute(
        &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"),
        params![
            user.id,
            email_ct,
            email_pk,
            user.email_blind_index.as_ref().map(BlindIndex::as_str),
            name_ct,
            name_pk,
            user.created_at,
            user.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &str) -> StorageResult<Option<UserRecord>> {
    let result = conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
        params![id],
        RawUserRow::from_row,
    );
    match result {
        Ok(raw) => raw.into_record().map(Some),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Equality lookup on the email blind index. The oldest match wins.
pub fn find_user_by_blind_index(
    conn: &Connection,
    index: &BlindIndex,
) -> StorageResult<Option<UserRecord>> {
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email_blind_index = ? \
         ORDER BY created_at, id LIMIT 1"
    );
    Ok(query_users(conn, &sql, Some(index.as_str()))?.into_iter().next())
}

/// Replaces the sealed email and its blind index. `None` clears both.
pub fn update_email(
    conn: &Connection,
    id: &str,
    email: Option<&EncryptedField>,
    blind_index: Option<&BlindIndex>,
    now: i64,
) -> StorageResult<()> {
    let (ct, pk) = split(email);
    let changed = conn.execute(
        "UPDATE users SET email_ciphertext = ?, email_ephemeral_pk = ?, \
         email_blind_index = ?, updated_at = ? WHERE id = ?",
        params![ct, pk, blind_index.map(BlindIndex::as_str), now, id],
    )?;
    require_row(changed, "user", id)
}

pub fn update_name(
    conn: &Connection,
    id: &str,
    name: Option<&EncryptedField>,
    now: i64,
) -> StorageResult<()> {
    let (ct, pk) = split(name);
    let changed = conn.execute(
        "UPDATE users SET name_ciphertext = ?, name_ephemeral_pk = ?, updated_at = ? WHERE id = ?",
        params![ct, pk, now, id],
    )?;
    require_row(changed, "user", id)
}

/// Deletes a user and all of its profile field values.
///
/// Returns the number of field values removed.
pub fn delete_user(conn: &Connection, id: &str) -> StorageResult<usize> {
    if get_user(conn, id)?.is_none() {
        return Err(StorageError::NotFound(format!("user {id}")));
    }
    let fields = conn.execute("DELETE FROM user_field_values WHERE user_id = ?", params![id])?;
    conn.execute("DELETE FROM users WHERE id = ?", params![id])?;
    Ok(fields)
}

/// Users holding at least one sealed column, ordered by id.
pub fn list_protected_users(conn: &Connection) -> StorageResult<Vec<UserRecord>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {PROTECTED_PREDICATE} ORDER BY id");
    query_users(conn, &sql, None)
}

pub fn count_protected_users(conn: &Connection) -> StorageResult<usize> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM users WHERE {PROTECTED_PREDICATE}"),
        [],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Overwrites the sealed email and name columns, leaving the blind index.
pub fn replace_user_ciphertexts(
    conn: &Connection,
    id: &str,
    email: Option<&EncryptedField>,
    name: Option<&EncryptedField>,
    now: i64,
) -> StorageResult<()> {
    let (email_ct, email_pk) = split(email);
    let (name_ct, name_pk) = split(name);
    let changed = conn.execute(
        "UPDATE users SET email_ciphertext = ?, email_ephemeral_pk = ?, \
         name_ciphertext = ?, name_ephemeral_pk = ?, updated_at = ? WHERE id = ?",
        params![email_ct, email_pk, name_ct, name_pk, now, id],
    )?;
    require_row(changed, "user", id)
}

// ── Profile field values ─────────────────────────────────────────

/// Inserts a field value, or reseals the existing value for the same
/// `(user_id, field_key)`, keeping its id and creation time.
pub fn upsert_field_value(
    conn: &Connection,
    record: &ProfileFieldRecord,
) -> StorageResult<ProfileFieldRecord> {
    if get_user(conn, &record.user_id)?.is_none() {
        return Err(StorageError::NotFound(format!("user {}", record.user_id)));
    }

    let existing = field_value(conn, &record.user_id, &record.field_key)?;
    let pk = record.value.ephemeral_public_key.to_hex();
    match existing {
        Some(current) => {
            conn.execute(
                "UPDATE user_field_values SET value_ciphertext = ?, value_ephemeral_pk = ?, \
                 updated_at = ? WHERE id = ?",
                params![record.value.ciphertext, pk, record.updated_at, current.id],
            )?;
            Ok(ProfileFieldRecord {
                value: record.value.clone(),
                updated_at: record.updated_at,
                ..current
            })
        }
        None => {
            conn.execute(
                &format!("INSERT INTO user_field_values ({FIELD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"),
                params![
                    record.id,
                    record.user_id,
                    record.field_key,
                    record.value.ciphertext,
                    pk,
                    record.created_at,
                    record.updated_at,
                ],
            )?;
            Ok(record.clone())
        }
    }
}

pub fn field_value(
    conn: &Connection,
    user_id: &str,
    field_key: &str,
) -> StorageResult<Option<ProfileFieldRecord>> {
    let result = conn.query_row(
        &format!("SELECT {FIELD_COLUMNS} FROM user_field_values WHERE user_id = ? AND field_key = ?"),
        params![user_id, field_key],
        field_from_row,
    );
    match result {
        Ok(raw) => field_record(raw).map(Some),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn field_values_for_user(
    conn: &Connection,
    user_id: &str,
) -> StorageResult<Vec<ProfileFieldRecord>> {
    let sql =
        format!("SELECT {FIELD_COLUMNS} FROM user_field_values WHERE user_id = ? ORDER BY field_key");
    query_fields(conn, &sql, Some(user_id))
}

/// Returns whether a value was removed.
pub fn delete_field_value(conn: &Connection, user_id: &str, field_key: &str) -> StorageResult<bool> {
    let removed = conn.execute(
        "DELETE FROM user_field_values WHERE user_id = ? AND field_key = ?",
        params![user_id, field_key],
    )?;
    Ok(removed > 0)
}

/// Every field value, ordered by id.
pub fn list_field_values(conn: &Connection) -> StorageResult<Vec<ProfileFieldRecord>> {
    let sql = format!("SELECT {FIELD_COLUMNS} FROM user_field_values ORDER BY id");
    query_fields(conn, &sql, None)
}

pub fn count_field_values(conn: &Connection) -> StorageResult<usize> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM user_field_values", [], |row| row.get(0))?;
    Ok(count as usize)
}

pub fn replace_field_value_ciphertext(
    conn: &Connection,
    id: &str,
    value: &EncryptedField,
    now: i64,
) -> StorageResult<()> {
    let changed = conn.execute(
        "UPDATE user_field_values SET value_ciphertext = ?, value_ephemeral_pk = ?, \
         updated_at = ? WHERE id = ?",
        params![value.ciphertext, value.ephemeral_public_key.to_hex(), now, id],
    )?;
    require_row(changed, "field value", id)
}

fn require_row(changed: usize, what: &str, id: &str) -> StorageResult<()> {
    if changed == 0 {
        Err(StorageError::NotFound(format!("{what} {id}")))
    } else {
        Ok(())
    }
}
