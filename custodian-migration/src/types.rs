//! Wire types for the prepare and execute steps.

use custodian_auth::AuthorizationEvent;
use custodian_crypto::{FieldValue, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sealed columns of one protected user. A column and its ephemeral key are
/// both present or both absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_ephemeral_public_key: Option<XOnlyPublicKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_ephemeral_public_key: Option<XOnlyPublicKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedFieldValue {
    pub id: String,
    pub user_id: String,
    pub field_key: String,
    pub encrypted_value: String,
    pub ephemeral_public_key: XOnlyPublicKey,
}

/// Everything the operator needs to decrypt offline. Ciphertext only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareMigrationResponse {
    pub current_admin_public_key: XOnlyPublicKey,
    pub rows: Vec<ExportedUser>,
    #[serde(default)]
    pub field_values: Vec<ExportedFieldValue>,
    pub row_count: usize,
    #[serde(default)]
    pub field_value_count: usize,
}

/// Plaintext of one protected user, supplied by the operator.
///
/// `sealed_email` and `sealed_name` echo the exported ciphertexts the
/// plaintext was opened from; execution refuses the row if the stored
/// ciphertext has changed since.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_name: Option<String>,
}

impl fmt::Debug for DecryptedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedUser")
            .field("id", &self.id)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("name", &self.name.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedFieldValue {
    pub id: String,
    pub value: FieldValue,
    /// Exported ciphertext `value` was opened from.
    pub sealed_value: String,
}

impl fmt::Debug for DecryptedFieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedFieldValue")
            .field("id", &self.id)
            .field("value", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// A rotation request. Lives for one call and is never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteMigrationRequest {
    /// Unvalidated; checked as the first step of execution.
    pub new_admin_public_key: String,
    pub rows: Vec<DecryptedUser>,
    #[serde(default)]
    pub field_values: Vec<DecryptedFieldValue>,
    pub signed_event: AuthorizationEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteMigrationResponse {
    pub success: bool,
    pub rows_migrated: usize,
    pub field_values_migrated: usize,
}
