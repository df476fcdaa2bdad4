//! secp256k1 key material in x-only form.
//!
//! Public keys travel as 32-byte x-coordinates (64 hex characters). Lifting an
//! x-only key back to a curve point needs a y-parity; we always pick the even
//! one (`X_ONLY_PARITY_PREFIX`). ECDH only ever uses the x-coordinate of the
//! product point, and `x(k * -P) == x(k * P)`, so the choice never changes a
//! derived shared secret.

use crate::error::{CryptoError, CryptoResult};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Size of a secret scalar and of an x-only public key, in bytes.
pub const KEY_SIZE: usize = 32;

/// SEC1 prefix used when lifting an x-only key to a full point (even y).
pub const X_ONLY_PARITY_PREFIX: u8 = 0x02;

const TRUNCATED_KEY_LEN: usize = 16;

/// Renders a hex key for logs and audit values: at most 16 characters, then `...`.
pub fn truncate_key(key: &str) -> String {
    match key.get(..TRUNCATED_KEY_LEN) {
        Some(prefix) if key.len() > TRUNCATED_KEY_LEN => format!("{prefix}..."),
        _ => key.to_string(),
    }
}

/// A secp256k1 public key encoded by its x-coordinate only.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct XOnlyPublicKey([u8; KEY_SIZE]);

impl XOnlyPublicKey {
    /// Wraps raw x-coordinate bytes without validating the point.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parses raw bytes, rejecting anything that is not exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::KeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Parses a 64-character hex string.
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes =
            hex::decode(s.trim()).map_err(|e| CryptoError::Key(format!("not hex: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// Parses hex and additionally checks that the key is a point on the curve.
    pub fn parse_validated(s: &str) -> CryptoResult<Self> {
        let key = Self::from_hex(s)?;
        key.to_point()?;
        Ok(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Lifts the key to a full curve point using the even-y convention.
    pub fn to_point(&self) -> CryptoResult<PublicKey> {
        let mut sec1 = [0u8; KEY_SIZE + 1];
        sec1[0] = X_ONLY_PARITY_PREFIX;
        sec1[1..].copy_from_slice(&self.0);
        PublicKey::from_sec1_bytes(&sec1)
            .map_err(|_| CryptoError::Key("not a valid secp256k1 x-coordinate".to_string()))
    }

    pub(crate) fn from_point(point: &PublicKey) -> Self {
        let encoded = point.to_encoded_point(true);
        let mut x = [0u8; KEY_SIZE];
        x.copy_from_slice(&encoded.as_bytes()[1..]);
        Self(x)
    }
}

impl fmt::Display for XOnlyPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for XOnlyPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XOnlyPublicKey({})", self.to_hex())
    }
}

impl FromStr for XOnlyPublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for XOnlyPublicKey {
    type Error = CryptoError;

    fn try_from(s: String) -> CryptoResult<Self> {
        Self::from_hex(&s)
    }
}

impl From<XOnlyPublicKey> for String {
    fn from(key: XOnlyPublicKey) -> Self {
        key.to_hex()
    }
}

/// secp256k1 keypair.
///
/// The secret scalar zeroizes on drop (from `k256::SecretKey`) and is only
/// handed out wrapped in `Zeroizing`.
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: XOnlyPublicKey,
}

impl KeyPair {
    /// Generates a keypair from a uniformly random scalar.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        loop {
            let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
            rng.fill_bytes(&mut bytes[..]);
            // Rejects zero and values >= n; practically never loops.
            if let Ok(secret) = SecretKey::from_slice(&bytes[..]) {
                return Self::from_secret(secret);
            }
        }
    }

    /// Reconstructs a keypair from raw secret scalar bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::KeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let secret = SecretKey::from_slice(bytes)
            .map_err(|_| CryptoError::Key("secret scalar out of range".to_string()))?;
        Ok(Self::from_secret(secret))
    }

    /// Reconstructs a keypair from a 64-character hex secret.
    pub fn from_secret_hex(s: &str) -> CryptoResult<Self> {
        let bytes = Zeroizing::new(
            hex::decode(s.trim()).map_err(|e| CryptoError::Key(format!("not hex: {e}")))?,
        );
        Self::from_secret_bytes(&bytes)
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = XOnlyPublicKey::from_point(&secret.public_key());
        Self { secret, public }
    }

    pub fn public_key(&self) -> XOnlyPublicKey {
        self.public
    }

    /// Returns the secret scalar as raw bytes.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        let mut out = Zeroizing::new([0u8; KEY_SIZE]);
        out.copy_from_slice(self.secret.to_bytes().as_slice());
        out
    }

    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.secret_bytes()[..]))
    }

    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.secret
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
