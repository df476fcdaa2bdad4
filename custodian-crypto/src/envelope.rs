//! Envelope encryption of single values to a single recipient.
//!
//! Each seal generates a fresh ephemeral secp256k1 keypair, derives the ECDH
//! shared secret with the recipient's x-only public key, and encrypts with
//! AES-256-CBC under that secret. The envelope is stored as
//! `base64(ciphertext) + "?iv=" + base64(iv)` next to the ephemeral public key.
//!
//! This scheme provides confidentiality only. There is no MAC over the
//! ciphertext, so a modified envelope may open to garbage instead of failing.
//! Integrity of stored rows is not a property of this module.

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{KeyPair, XOnlyPublicKey, KEY_SIZE};
use crate::value::{deserialize_value, serialize_value, FieldValue};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-CBC IV size (one block).
pub const IV_SIZE: usize = 16;

const IV_SEPARATOR: &str = "?iv=";

/// A sealed value together with the ephemeral key needed to open it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedField {
    /// `base64(ciphertext)?iv=base64(iv)`.
    pub ciphertext: String,
    /// One-time sender key (x-only, hex on the wire).
    pub ephemeral_public_key: XOnlyPublicKey,
}

/// Generates a one-time keypair for a single seal operation.
pub fn generate_ephemeral_keypair() -> KeyPair {
    KeyPair::generate()
}

/// ECDH over secp256k1; returns the x-coordinate of the shared point.
pub fn derive_shared_secret(
    ours: &KeyPair,
    theirs: &XOnlyPublicKey,
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let point = theirs.to_point()?;
    let shared =
        k256::ecdh::diffie_hellman(ours.secret_key().to_nonzero_scalar(), point.as_affine());
    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    out.copy_from_slice(shared.raw_secret_bytes().as_slice());
    Ok(out)
}

/// Seals raw bytes to `recipient`.
///
/// The ephemeral secret is dropped before returning; only its public half is
/// part of the result.
pub fn encrypt(plaintext: &[u8], recipient: &XOnlyPublicKey) -> CryptoResult<EncryptedField> {
    let ephemeral = generate_ephemeral_keypair();
    let key = derive_shared_secret(&ephemeral, recipient)?;
    let ephemeral_public_key = ephemeral.public_key();
    drop(ephemeral);

    let mut iv = [0u8; IV_SIZE];
    rand::rng().fill_bytes(&mut iv);

    let ciphertext =
        Aes256CbcEnc::new((&*key).into(), (&iv).into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    Ok(EncryptedField {
        ciphertext: format!(
            "{}{IV_SEPARATOR}{}",
            STANDARD.encode(&ciphertext),
            STANDARD.encode(iv)
        ),
        ephemeral_public_key,
    })
}

/// Opens an envelope produced by [`encrypt`].
///
/// Unparsable envelopes fail with `Format`; anything that goes wrong after
/// parsing fails with the opaque `Decryption`.
pub fn decrypt(
    envelope: &str,
    sender: &XOnlyPublicKey,
    recipient: &KeyPair,
) -> CryptoResult<Vec<u8>> {
    let (ciphertext, iv) = parse_envelope(envelope)?;
    let key = derive_shared_secret(recipient, sender)?;

    Aes256CbcDec::new((&*key).into(), (&iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

/// Serializes and seals a scalar value.
pub fn encrypt_value(value: &FieldValue, recipient: &XOnlyPublicKey) -> CryptoResult<EncryptedField> {
    let raw = Zeroizing::new(serialize_value(value)?);
    encrypt(raw.as_bytes(), recipient)
}

/// Opens and deserializes a scalar value.
pub fn decrypt_value(field: &EncryptedField, recipient: &KeyPair) -> CryptoResult<FieldValue> {
    let bytes = Zeroizing::new(decrypt(&field.ciphertext, &field.ephemeral_public_key, recipient)?);
    let raw = std::str::from_utf8(&bytes).map_err(|_| CryptoError::Decryption)?;
    deserialize_value(raw).map_err(|_| CryptoError::Decryption)
}

fn parse_envelope(envelope: &str) -> CryptoResult<(Vec<u8>, [u8; IV_SIZE])> {
    let (ct_b64, iv_b64) = envelope
        .split_once(IV_SEPARATOR)
        .ok_or_else(|| CryptoError::Format("envelope has no iv separator".to_string()))?;

    let ciphertext = STANDARD
        .decode(ct_b64)
        .map_err(|e| CryptoError::Format(format!("ciphertext is not base64: {e}")))?;
    let iv_bytes = STANDARD
        .decode(iv_b64)
        .map_err(|e| CryptoError::Format(format!("iv is not base64: {e}")))?;

    let iv: [u8; IV_SIZE] = iv_bytes.as_slice().try_into().map_err(|_| {
        CryptoError::Format(format!("iv must be {IV_SIZE} bytes, got {}", iv_bytes.len()))
    })?;

    // CBC output is always a non-empty whole number of blocks.
    if ciphertext.is_empty() || ciphertext.len() % IV_SIZE != 0 {
        return Err(CryptoError::Format(
            "ciphertext is not a whole number of blocks".to_string(),
        ));
    }

    Ok((ciphertext, iv))
}
