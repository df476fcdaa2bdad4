//! Administrator key rotation.
//!
//! `prepare_migration` exports every sealed value as ciphertext. The operator
//! decrypts it offline with the outgoing private key, signs an
//! `admin_key_migration` event with that same key, and submits the plaintext
//! with the new public key to `execute_migration`, which re-seals everything
//! and swaps the administrator inside one transaction.

use crate::error::{MigrationError, MigrationResult};
use crate::types::{
    DecryptedFieldValue, DecryptedUser, ExecuteMigrationRequest, ExecuteMigrationResponse,
    ExportedFieldValue, ExportedUser, PrepareMigrationResponse,
};
use chrono::Utc;
use custodian_auth::{
    verify_authorization, verify_key_binding, ADMIN_AUTH_KIND, ADMIN_KEY_MIGRATION_ACTION,
    DEFAULT_MAX_EVENT_AGE_SECS,
};
use custodian_crypto::{encrypt_value, truncate_key, EncryptedField, FieldValue, XOnlyPublicKey};
use custodian_storage::{
    admins, audit, users, AuditTable, Connection, Database, NewAuditEntry, ProfileFieldRecord,
    StorageError, UserRecord,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{info, warn};

/// Which events may authorize a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationPolicy {
    pub auth_kind: u32,
    pub max_event_age_secs: u64,
}

impl Default for MigrationPolicy {
    fn default() -> Self {
        Self {
            auth_kind: ADMIN_AUTH_KIND,
            max_event_age_secs: DEFAULT_MAX_EVENT_AGE_SECS,
        }
    }
}

/// Where the orchestrator is in the rotation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Idle,
    Prepared,
    Authorized,
    Migrating,
    Committed,
    RolledBack,
}

pub struct MigrationOrchestrator {
    db: Database,
    policy: MigrationPolicy,
    state: Mutex<MigrationState>,
}

impl MigrationOrchestrator {
    pub fn new(db: Database, policy: MigrationPolicy) -> Self {
        Self {
            db,
            policy,
            state: Mutex::new(MigrationState::Idle),
        }
    }

    pub fn policy(&self) -> MigrationPolicy {
        self.policy
    }

    pub fn state(&self) -> MigrationState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: MigrationState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Exports every sealed value as ciphertext with the current admin key.
    pub fn prepare_migration(&self) -> MigrationResult<PrepareMigrationResponse> {
        let response = self.db.with_connection(|conn| {
            let admin = admins::current_admin(conn)?
                .ok_or_else(|| StorageError::NotFound("administrator".into()))?;
            let rows: Vec<ExportedUser> = users::list_protected_users(conn)?
                .into_iter()
                .map(export_user)
                .collect();
            let field_values: Vec<ExportedFieldValue> = users::list_field_values(conn)?
                .into_iter()
                .map(|f| ExportedFieldValue {
                    id: f.id,
                    user_id: f.user_id,
                    field_key: f.field_key,
                    encrypted_value: f.value.ciphertext,
                    ephemeral_public_key: f.value.ephemeral_public_key,
                })
                .collect();
            Ok(PrepareMigrationResponse {
                current_admin_public_key: admin.public_key,
                row_count: rows.len(),
                field_value_count: field_values.len(),
                rows,
                field_values,
            })
        })?;

        self.set_state(MigrationState::Prepared);
        info!(
            rows = response.row_count,
            field_values = response.field_value_count,
            "migration export prepared"
        );
        Ok(response)
    }

    /// Re-seals every protected value to the new key and installs it.
    ///
    /// Nothing is written unless every step succeeds.
    pub fn execute_migration(
        &self,
        request: &ExecuteMigrationRequest,
        actor: &str,
    ) -> MigrationResult<ExecuteMigrationResponse> {
        match self.run(request, actor) {
            Ok(response) => {
                self.set_state(MigrationState::Committed);
                info!(
                    rows = response.rows_migrated,
                    field_values = response.field_values_migrated,
                    actor,
                    "administrator key rotated"
                );
                Ok(response)
            }
            Err(e) => {
                self.set_state(MigrationState::RolledBack);
                warn!(error = %e, actor, "administrator key migration rolled back");
                Err(e)
            }
        }
    }

    fn run(
        &self,
        request: &ExecuteMigrationRequest,
        actor: &str,
    ) -> MigrationResult<ExecuteMigrationResponse> {
        let new_key = XOnlyPublicKey::parse_validated(&request.new_admin_public_key)
            .map_err(|_| MigrationError::validation("new administrator key is malformed"))?;

        let current = self
            .db
            .with_connection(admins::current_admin)?
            .ok_or_else(|| MigrationError::validation("no administrator is installed"))?;
        if new_key == current.public_key {
            return Err(MigrationError::validation(
                "new administrator key equals the current key",
            ));
        }

        verify_authorization(
            &request.signed_event,
            self.policy.auth_kind,
            ADMIN_KEY_MIGRATION_ACTION,
            &current.public_key,
            self.policy.max_event_age_secs,
        )?;
        verify_key_binding(&request.signed_event, &new_key)?;
        self.set_state(MigrationState::Authorized);

        self.set_state(MigrationState::Migrating);
        self.db.transaction(|conn| {
            let admin = admins::current_admin(conn)?
                .ok_or_else(|| MigrationError::validation("no administrator is installed"))?;
            if admin.public_key != current.public_key {
                return Err(MigrationError::validation(
                    "administrator changed while the migration was being authorized",
                ));
            }

            let now = Utc::now().timestamp_millis();
            let rows_migrated = reseal_users(conn, &request.rows, &new_key, now)?;
            let field_values_migrated =
                reseal_field_values(conn, &request.field_values, &new_key, now)?;

            admins::replace_admin(conn, &new_key, now)?;
            audit::append_in(
                conn,
                &NewAuditEntry::new(AuditTable::Admins, ADMIN_KEY_MIGRATION_ACTION, actor)
                    .with_old(truncate_key(&current.public_key.to_hex()))
                    .with_new(truncate_key(&new_key.to_hex())),
            )?;

            Ok(ExecuteMigrationResponse {
                success: true,
                rows_migrated,
                field_values_migrated,
            })
        })
    }
}

fn export_user(user: UserRecord) -> ExportedUser {
    let (encrypted_email, email_ephemeral_public_key) = unzip(user.email);
    let (encrypted_name, name_ephemeral_public_key) = unzip(user.name);
    ExportedUser {
        id: user.id,
        encrypted_email,
        email_ephemeral_public_key,
        encrypted_name,
        name_ephemeral_public_key,
    }
}

fn unzip(field: Option<EncryptedField>) -> (Option<String>, Option<XOnlyPublicKey>) {
    match field {
        Some(f) => (Some(f.ciphertext), Some(f.ephemeral_public_key)),
        None => (None, None),
    }
}

fn check_count(what: &str, expected: usize, supplied: usize) -> MigrationResult<()> {
    if expected != supplied {
        return Err(MigrationError::Validation(format!(
            "{what}: {expected} stored, {supplied} supplied"
        )));
    }
    Ok(())
}

fn check_unique<'a>(what: &str, ids: impl Iterator<Item = &'a str>) -> MigrationResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(MigrationError::Validation(format!("{what}: duplicate id {id}")));
        }
    }
    Ok(())
}

fn sealed_text(field: Option<&EncryptedField>) -> Option<&str> {
    field.map(|f| f.ciphertext.as_str())
}

fn seal(text: Option<&String>, key: &XOnlyPublicKey) -> MigrationResult<Option<EncryptedField>> {
    text.map(|t| encrypt_value(&FieldValue::Text(t.clone()), key))
        .transpose()
        .map_err(MigrationError::from)
}

fn reseal_users(
    conn: &Connection,
    supplied: &[DecryptedUser],
    new_key: &XOnlyPublicKey,
    now: i64,
) -> MigrationResult<usize> {
    check_count("user rows", users::count_protected_users(conn)?, supplied.len())?;
    check_unique("user rows", supplied.iter().map(|r| r.id.as_str()))?;

    let stored = users::list_protected_users(conn)?;
    let stored: HashMap<&str, &UserRecord> = stored.iter().map(|u| (u.id.as_str(), u)).collect();
    for row in supplied {
        let existing = stored.get(row.id.as_str()).ok_or_else(|| {
            MigrationError::Validation(format!("user rows: unknown id {}", row.id))
        })?;
        if existing.email.is_some() != row.email.is_some()
            || existing.name.is_some() != row.name.is_some()
        {
            return Err(MigrationError::Validation(format!(
                "user rows: columns supplied for {} do not match stored columns",
                row.id
            )));
        }
        if sealed_text(existing.email.as_ref()) != row.sealed_email.as_deref()
            || sealed_text(existing.name.as_ref()) != row.sealed_name.as_deref()
        {
            return Err(MigrationError::Validation(format!(
                "user rows: {} changed since export",
                row.id
            )));
        }

        let email = seal(row.email.as_ref(), new_key)?;
        let name = seal(row.name.as_ref(), new_key)?;
        users::replace_user_ciphertexts(conn, &row.id, email.as_ref(), name.as_ref(), now)?;
    }
    Ok(supplied.len())
}

fn reseal_field_values(
    conn: &Connection,
    supplied: &[DecryptedFieldValue],
    new_key: &XOnlyPublicKey,
    now: i64,
) -> MigrationResult<usize> {
    check_count("field values", users::count_field_values(conn)?, supplied.len())?;
    check_unique("field values", supplied.iter().map(|v| v.id.as_str()))?;

    let stored = users::list_field_values(conn)?;
    let stored: HashMap<&str, &ProfileFieldRecord> =
        stored.iter().map(|f| (f.id.as_str(), f)).collect();
    for value in supplied {
        let existing = stored.get(value.id.as_str()).ok_or_else(|| {
            MigrationError::Validation(format!("field values: unknown id {}", value.id))
        })?;
        if existing.value.ciphertext != value.sealed_value {
            return Err(MigrationError::Validation(format!(
                "field values: {} changed since export",
                value.id
            )));
        }
        let sealed = encrypt_value(&value.value, new_key)?;
        users::replace_field_value_ciphertext(conn, &value.id, &sealed, now)?;
    }
    Ok(supplied.len())
}
