//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur while sealing, opening or indexing values.
///
/// `Decryption` deliberately carries no detail: callers must not be able to
/// tell a bad key from a bad padding block.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed input: {0}")]
    Format(String),

    #[error("invalid key: {0}")]
    Key(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    KeyLength { expected: usize, actual: usize },

    #[error("decryption failed")]
    Decryption,

    #[error("signing failed: {0}")]
    Signing(String),
}
