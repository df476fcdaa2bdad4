//! Operator-side half of a rotation.
//!
//! Runs wherever the outgoing administrator's private key lives, never on
//! the server: opens a [`PrepareMigrationResponse`] and signs the request.

use crate::error::{MigrationError, MigrationResult};
use crate::types::{
    DecryptedFieldValue, DecryptedUser, ExecuteMigrationRequest, PrepareMigrationResponse,
};
use custodian_auth::admin_key_migration_event;
use custodian_crypto::{decrypt_value, EncryptedField, KeyPair, XOnlyPublicKey};

/// Plaintext of an export.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedExport {
    pub rows: Vec<DecryptedUser>,
    pub field_values: Vec<DecryptedFieldValue>,
}

/// Opens every value in `export` with the administrator's key.
pub fn decrypt_export(
    export: &PrepareMigrationResponse,
    admin: &KeyPair,
) -> MigrationResult<DecryptedExport> {
    if admin.public_key() != export.current_admin_public_key {
        return Err(MigrationError::validation(
            "key does not match the exported administrator key",
        ));
    }

    let rows = export
        .rows
        .iter()
        .map(|row| {
            Ok(DecryptedUser {
                id: row.id.clone(),
                email: open_text(
                    &row.id,
                    row.encrypted_email.as_deref(),
                    row.email_ephemeral_public_key.as_ref(),
                    admin,
                )?,
                name: open_text(
                    &row.id,
                    row.encrypted_name.as_deref(),
                    row.name_ephemeral_public_key.as_ref(),
                    admin,
                )?,
                sealed_email: row.encrypted_email.clone(),
                sealed_name: row.encrypted_name.clone(),
            })
        })
        .collect::<MigrationResult<Vec<_>>>()?;

    let field_values = export
        .field_values
        .iter()
        .map(|f| {
            let sealed = EncryptedField {
                ciphertext: f.encrypted_value.clone(),
                ephemeral_public_key: f.ephemeral_public_key,
            };
            Ok(DecryptedFieldValue {
                id: f.id.clone(),
                value: decrypt_value(&sealed, admin)?,
                sealed_value: sealed.ciphertext,
            })
        })
        .collect::<MigrationResult<Vec<_>>>()?;

    Ok(DecryptedExport { rows, field_values })
}

/// Decrypts `export` and signs a request rotating to `new_admin`.
pub fn build_migration_request(
    export: &PrepareMigrationResponse,
    current_admin: &KeyPair,
    new_admin: &XOnlyPublicKey,
    timestamp: i64,
) -> MigrationResult<ExecuteMigrationRequest> {
    let decrypted = decrypt_export(export, current_admin)?;
    let signed_event = admin_key_migration_event(current_admin, new_admin, timestamp)?;

    Ok(ExecuteMigrationRequest {
        new_admin_public_key: new_admin.to_hex(),
        rows: decrypted.rows,
        field_values: decrypted.field_values,
        signed_event,
    })
}

fn open_text(
    id: &str,
    ciphertext: Option<&str>,
    ephemeral: Option<&XOnlyPublicKey>,
    admin: &KeyPair,
) -> MigrationResult<Option<String>> {
    match (ciphertext, ephemeral) {
        (Some(ciphertext), Some(ephemeral)) => {
            let sealed = EncryptedField {
                ciphertext: ciphertext.to_string(),
                ephemeral_public_key: *ephemeral,
            };
            Ok(Some(decrypt_value(&sealed, admin)?.index_text()))
        }
        (None, None) => Ok(None),
        _ => Err(MigrationError::Validation(format!(
            "export row {id}: ciphertext without ephemeral key"
        ))),
    }
}
