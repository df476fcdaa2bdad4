//! Authorization rejection reasons.

use thiserror::Error;

/// Why an authorization event was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthRejection {
    #[error("event kind {actual} does not match required kind {expected}")]
    WrongKind { expected: u32, actual: u32 },

    #[error("event timestamp is {skew_secs}s from server time, outside the {max_age_secs}s window")]
    TimestampOutOfWindow { skew_secs: i64, max_age_secs: u64 },

    #[error("event is missing tag [\"action\", \"{0}\"]")]
    MissingActionTag(String),

    #[error("event signed by {actual}, not by the current administrator")]
    SignerMismatch { actual: String },

    #[error("event signature is invalid")]
    InvalidSignature,

    #[error("event does not authorize rotation to {0}")]
    KeyNotAuthorized(String),
}
