//! Protected user data: create, update, delete and lookup.
//!
//! Every mutation writes its rows and one audit entry in the same
//! transaction. Audit values name the columns that changed, never their
//! contents.

use crate::custodian::Custodian;
use crate::error::{CustodianError, CustodianResult};
use custodian_crypto::{encrypt_value, EncryptedField, FieldValue, XOnlyPublicKey};
use custodian_storage::{
    audit, users, AuditTable, NewAuditEntry, ProfileFieldRecord, UserRecord,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub email: Option<String>,
    pub name: Option<String>,
}

fn seal_text(text: Option<&str>, admin: &XOnlyPublicKey) -> CustodianResult<Option<EncryptedField>> {
    Ok(text
        .map(|t| encrypt_value(&FieldValue::from(t), admin))
        .transpose()?)
}

fn columns(user: &UserRecord) -> Option<String> {
    let names: Vec<&str> = [
        user.email.as_ref().map(|_| "email"),
        user.name.as_ref().map(|_| "name"),
    ]
    .into_iter()
    .flatten()
    .collect();
    (!names.is_empty()).then(|| names.join(","))
}

fn field_record_key(user_id: &str, field_key: &str) -> String {
    format!("{user_id}:{field_key}")
}

fn existing_user(conn: &custodian_storage::Connection, id: &str) -> CustodianResult<UserRecord> {
    users::get_user(conn, id)?.ok_or_else(|| CustodianError::NotFound(format!("user {id}")))
}

impl Custodian {
    pub fn create_user(&self, new_user: &NewUser, actor: &str) -> CustodianResult<UserRecord> {
        let user = self.write(|conn, admin, now| {
            let user = UserRecord {
                id: Uuid::new_v4().to_string(),
                email: seal_text(new_user.email.as_deref(), admin)?,
                email_blind_index: new_user.email.as_deref().map(|e| self.indexer.compute(e)),
                name: seal_text(new_user.name.as_deref(), admin)?,
                created_at: now,
                updated_at: now,
            };
            users::insert_user(conn, &user)?;

            let mut entry = NewAuditEntry::new(AuditTable::Users, &user.id, actor);
            entry.new_value = columns(&user);
            audit::append_in(conn, &entry)?;
            Ok(user)
        })?;
        debug!(user_id = %user.id, "user created");
        Ok(user)
    }

    /// Replaces or clears (`None`) the email and its blind index.
    pub fn update_email(
        &self,
        user_id: &str,
        email: Option<&str>,
        actor: &str,
    ) -> CustodianResult<UserRecord> {
        self.write(|conn, admin, now| {
            let before = existing_user(conn, user_id)?;
            let sealed = seal_text(email, admin)?;
            let index = email.map(|e| self.indexer.compute(e));
            users::update_email(conn, user_id, sealed.as_ref(), index.as_ref(), now)?;

            let mut entry = NewAuditEntry::new(AuditTable::Users, user_id, actor);
            entry.old_value = before.email.as_ref().map(|_| "email".to_string());
            entry.new_value = email.map(|_| "email".to_string());
            audit::append_in(conn, &entry)?;
            existing_user(conn, user_id)
        })
    }

    /// Replaces or clears (`None`) the name.
    pub fn update_name(
        &self,
        user_id: &str,
        name: Option<&str>,
        actor: &str,
    ) -> CustodianResult<UserRecord> {
        self.write(|conn, admin, now| {
            let before = existing_user(conn, user_id)?;
            let sealed = seal_text(name, admin)?;
            users::update_name(conn, user_id, sealed.as_ref(), now)?;

            let mut entry = NewAuditEntry::new(AuditTable::Users, user_id, actor);
            entry.old_value = before.name.as_ref().map(|_| "name".to_string());
            entry.new_value = name.map(|_| "name".to_string());
            audit::append_in(conn, &entry)?;
            existing_user(conn, user_id)
        })
    }

    /// Seals and stores a custom profile field, replacing any previous value.
    pub fn set_profile_field(
        &self,
        user_id: &str,
        field_key: &str,
        value: &FieldValue,
        actor: &str,
    ) -> CustodianResult<ProfileFieldRecord> {
        let field_key = field_key.trim();
        if field_key.is_empty() {
            return Err(CustodianError::Validation("field key must not be empty".into()));
        }

        self.write(|conn, admin, now| {
            existing_user(conn, user_id)?;
            let previous = users::field_value(conn, user_id, field_key)?;
            let stored = users::upsert_field_value(
                conn,
                &ProfileFieldRecord {
                    id: Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    field_key: field_key.to_string(),
                    value: encrypt_value(value, admin)?,
                    created_at: now,
                    updated_at: now,
                },
            )?;

            let mut entry = NewAuditEntry::new(
                AuditTable::UserFieldValues,
                field_record_key(user_id, field_key),
                actor,
            )
            .with_new("value");
            entry.old_value = previous.map(|_| "value".to_string());
            audit::append_in(conn, &entry)?;
            Ok(stored)
        })
    }

    /// Returns whether a value existed. Only an actual removal is audited.
    pub fn delete_profile_field(
        &self,
        user_id: &str,
        field_key: &str,
        actor: &str,
    ) -> CustodianResult<bool> {
        self.write(|conn, _, _| {
            let removed = users::delete_field_value(conn, user_id, field_key)?;
            if removed {
                audit::append_in(
                    conn,
                    &NewAuditEntry::new(
                        AuditTable::UserFieldValues,
                        field_record_key(user_id, field_key),
                        actor,
                    )
                    .with_old("value"),
                )?;
            }
            Ok(removed)
        })
    }

    /// Deletes a user with all of its profile fields.
    pub fn delete_user(&self, user_id: &str, actor: &str) -> CustodianResult<()> {
        self.write(|conn, _, _| {
            let before = existing_user(conn, user_id)?;
            let removed_fields = users::delete_user(conn, user_id)?;

            let mut entry = NewAuditEntry::new(AuditTable::Users, user_id, actor);
            entry.old_value = Some(match columns(&before) {
                Some(cols) => format!("{cols};fields={removed_fields}"),
                None => format!("fields={removed_fields}"),
            });
            audit::append_in(conn, &entry)?;
            Ok(())
        })?;
        debug!(user_id, "user deleted");
        Ok(())
    }

    /// Equality lookup through the blind index. Nothing is decrypted.
    pub fn find_user_by_email(&self, email: &str) -> CustodianResult<Option<UserRecord>> {
        let index = self.indexer.compute(email);
        Ok(self
            .db
            .with_connection(|conn| users::find_user_by_blind_index(conn, &index))?)
    }

    pub fn get_user(&self, user_id: &str) -> CustodianResult<Option<UserRecord>> {
        Ok(self.db.with_connection(|conn| users::get_user(conn, user_id))?)
    }

    pub fn profile_fields(&self, user_id: &str) -> CustodianResult<Vec<ProfileFieldRecord>> {
        Ok(self
            .db
            .with_connection(|conn| users::field_values_for_user(conn, user_id))?)
    }
}
