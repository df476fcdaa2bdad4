//! Migration error types.

use custodian_auth::AuthRejection;
use custodian_crypto::CryptoError;
use custodian_storage::StorageError;
use thiserror::Error;

/// Result type for migration operations.
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Reasons a rotation is refused or aborted. Every variant rolls back.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration rejected: {0}")]
    Validation(String),

    #[error("migration not authorized: {0}")]
    Authorization(#[from] AuthRejection),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl MigrationError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
