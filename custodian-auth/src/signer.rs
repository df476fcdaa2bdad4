//! Event signing for the administrator side.
//!
//! The server never signs anything; this exists for the operator tool that
//! holds the administrator's private key.

use crate::event::{compute_event_id, AuthorizationEvent};
use crate::{ACTION_TAG, ADMIN_AUTH_KIND, ADMIN_KEY_MIGRATION_ACTION, NEW_KEY_TAG};
use custodian_crypto::{CryptoError, CryptoResult, KeyPair, XOnlyPublicKey};
use k256::schnorr::SigningKey;
use rand::RngCore;

/// Builds and signs an event with `signer`'s key.
pub fn sign_event(
    signer: &KeyPair,
    kind: u32,
    tags: Vec<Vec<String>>,
    content: impl Into<String>,
    timestamp: i64,
) -> CryptoResult<AuthorizationEvent> {
    let signing_key = SigningKey::from_bytes(&signer.secret_bytes()[..])
        .map_err(|_| CryptoError::Key("secret is not a valid signing key".to_string()))?;

    let mut event = AuthorizationEvent {
        id: String::new(),
        signer_public_key: hex::encode(signing_key.verifying_key().to_bytes()),
        timestamp,
        kind,
        tags,
        content: content.into(),
        signature: String::new(),
    };

    let id = compute_event_id(&event);
    let mut aux_rand = [0u8; 32];
    rand::rng().fill_bytes(&mut aux_rand);
    let signature = signing_key
        .sign_raw(&id, &aux_rand)
        .map_err(|e| CryptoError::Signing(e.to_string()))?;

    event.id = hex::encode(id);
    event.signature = hex::encode(signature.to_bytes());
    Ok(event)
}

/// Signs an `admin_key_migration` event naming `new_admin` in a
/// `["new_key", hex]` tag, so the signature covers the incoming key.
pub fn admin_key_migration_event(
    signer: &KeyPair,
    new_admin: &XOnlyPublicKey,
    timestamp: i64,
) -> CryptoResult<AuthorizationEvent> {
    sign_event(
        signer,
        ADMIN_AUTH_KIND,
        vec![
            vec![
                ACTION_TAG.to_string(),
                ADMIN_KEY_MIGRATION_ACTION.to_string(),
            ],
            vec![NEW_KEY_TAG.to_string(), new_admin.to_hex()],
        ],
        "rotate administrator key",
        timestamp,
    )
}
