//! Signature verification and the authorization policy.

use crate::error::AuthRejection;
use crate::event::{compute_event_id, AuthorizationEvent};
use crate::{ACTION_TAG, NEW_KEY_TAG};
use chrono::Utc;
use custodian_crypto::{truncate_key, XOnlyPublicKey};
use k256::schnorr::{Signature, VerifyingKey};
use tracing::debug;

const SIGNATURE_SIZE: usize = 64;

/// Checks the claimed id and the BIP-340 signature over it.
///
/// Returns `false` for any mismatch or malformed field; never errors.
pub fn verify_signature(event: &AuthorizationEvent) -> bool {
    let id = compute_event_id(event);
    match hex::decode(&event.id) {
        Ok(claimed) if claimed == id => {}
        _ => {
            debug!("event id does not match canonical serialization");
            return false;
        }
    }

    let Ok(pk_bytes) = hex::decode(&event.signer_public_key) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(&event.signature) else {
        return false;
    };
    if pk_bytes.len() != 32 || sig_bytes.len() != SIGNATURE_SIZE {
        return false;
    }

    let Ok(verifying_key) = VerifyingKey::from_bytes(&pk_bytes) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(sig_bytes.as_slice()) else {
        return false;
    };

    verifying_key.verify_raw(&id, &signature).is_ok()
}

/// Applies the authorization policy against the current wall clock.
pub fn verify_authorization(
    event: &AuthorizationEvent,
    required_kind: u32,
    required_action: &str,
    expected_signer: &XOnlyPublicKey,
    max_age_secs: u64,
) -> Result<(), AuthRejection> {
    verify_authorization_at(
        event,
        required_kind,
        required_action,
        expected_signer,
        max_age_secs,
        Utc::now().timestamp(),
    )
}

/// Applies the authorization policy with an explicit `now` (unix seconds).
///
/// Checks, in order: kind, symmetric freshness window, action tag, signer
/// identity, signature.
pub fn verify_authorization_at(
    event: &AuthorizationEvent,
    required_kind: u32,
    required_action: &str,
    expected_signer: &XOnlyPublicKey,
    max_age_secs: u64,
    now: i64,
) -> Result<(), AuthRejection> {
    if event.kind != required_kind {
        return Err(AuthRejection::WrongKind {
            expected: required_kind,
            actual: event.kind,
        });
    }

    let skew_secs = now.saturating_sub(event.timestamp);
    if skew_secs.unsigned_abs() > max_age_secs {
        return Err(AuthRejection::TimestampOutOfWindow {
            skew_secs,
            max_age_secs,
        });
    }

    if !event.has_tag(ACTION_TAG, required_action) {
        return Err(AuthRejection::MissingActionTag(required_action.to_string()));
    }

    match XOnlyPublicKey::from_hex(&event.signer_public_key) {
        Ok(signer) if signer == *expected_signer => {}
        _ => {
            return Err(AuthRejection::SignerMismatch {
                actual: truncate_key(&event.signer_public_key),
            });
        }
    }

    if !verify_signature(event) {
        return Err(AuthRejection::InvalidSignature);
    }

    Ok(())
}

/// Requires the event's `new_key` tag to name `new_key`.
///
/// Tags are part of the signed id, so an authorized event cannot be replayed
/// for a different incoming key. Only meaningful after
/// [`verify_authorization`] has accepted the event.
pub fn verify_key_binding(
    event: &AuthorizationEvent,
    new_key: &XOnlyPublicKey,
) -> Result<(), AuthRejection> {
    match event.tag_value(NEW_KEY_TAG).map(XOnlyPublicKey::from_hex) {
        Some(Ok(bound)) if bound == *new_key => Ok(()),
        _ => Err(AuthRejection::KeyNotAuthorized(truncate_key(&new_key.to_hex()))),
    }
}
