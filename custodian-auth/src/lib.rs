//! Signed-event authorization for Custodian.
//!
//! Sensitive administrative actions (currently: administrator key rotation)
//! must be accompanied by an event signed by the current administrator's
//! secp256k1 key with a BIP-340 Schnorr signature. The event id is the
//! SHA-256 of a canonical JSON serialization, and the signature covers the id.
//!
//! Verification never panics and never returns an opaque error: every failure
//! is an [`AuthRejection`] variant with a human-readable reason.

mod error;
pub mod event;
pub mod signer;
pub mod verify;

pub use error::AuthRejection;
pub use event::{compute_event_id, AuthorizationEvent};
pub use signer::{admin_key_migration_event, sign_event};
pub use verify::{
    verify_authorization, verify_authorization_at, verify_key_binding, verify_signature,
};

/// Event kind used for administrator authorization events.
pub const ADMIN_AUTH_KIND: u32 = 27235;

/// Tag name carrying the authorized action.
pub const ACTION_TAG: &str = "action";

/// Action tag value authorizing an administrator key rotation.
pub const ADMIN_KEY_MIGRATION_ACTION: &str = "admin_key_migration";

/// Tag name carrying the incoming administrator key of a rotation.
pub const NEW_KEY_TAG: &str = "new_key";

/// Default freshness window, applied symmetrically to past and future.
pub const DEFAULT_MAX_EVENT_AGE_SECS: u64 = 60;
