//! Unified error type and the stable error taxonomy.

use custodian_auth::AuthRejection;
use custodian_crypto::CryptoError;
use custodian_migration::MigrationError;
use custodian_storage::StorageError;
use serde::Serialize;
use thiserror::Error;

pub type CustodianResult<T> = Result<T, CustodianError>;

#[derive(Debug, Error)]
pub enum CustodianError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("authorization rejected: {0}")]
    Authorization(#[from] AuthRejection),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("audit chain broken at entry {sequence_no}")]
    ChainIntegrity { sequence_no: i64 },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Stable classification exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Format,
    Key,
    Crypto,
    Authorization,
    Validation,
    ChainIntegrity,
    Storage,
    NotFound,
}

const GENERIC_CRYPTO_MESSAGE: &str = "cryptographic operation failed";

impl CustodianError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Crypto(e) => crypto_kind(e),
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::Storage(e) => storage_kind(e),
            Self::Migration(e) => match e {
                MigrationError::Validation(_) => ErrorKind::Validation,
                MigrationError::Authorization(_) => ErrorKind::Authorization,
                MigrationError::Crypto(c) => crypto_kind(c),
                MigrationError::Storage(s) => storage_kind(s),
            },
            Self::ChainIntegrity { .. } => ErrorKind::ChainIntegrity,
            Self::Validation(_) | Self::Config(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Message safe to hand to a caller.
    ///
    /// Authorization failures keep their reason. Crypto failures collapse to
    /// one generic message so callers cannot tell which step failed.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Crypto => GENERIC_CRYPTO_MESSAGE.to_string(),
            ErrorKind::Storage => "storage failure".to_string(),
            _ => self.to_string(),
        }
    }
}

fn crypto_kind(e: &CryptoError) -> ErrorKind {
    match e {
        CryptoError::Format(_) => ErrorKind::Format,
        CryptoError::Key(_) | CryptoError::KeyLength { .. } => ErrorKind::Key,
        CryptoError::Decryption | CryptoError::Signing(_) => ErrorKind::Crypto,
    }
}

fn storage_kind(e: &StorageError) -> ErrorKind {
    match e {
        StorageError::NotFound(_) => ErrorKind::NotFound,
        StorageError::AlreadyExists(_) | StorageError::UnknownTable(_) => ErrorKind::Validation,
        StorageError::Crypto(c) => crypto_kind(c),
        StorageError::Database(_)
        | StorageError::Serialization(_)
        | StorageError::LockPoisoned
        | StorageError::InvalidData(_) => ErrorKind::Storage,
    }
}
