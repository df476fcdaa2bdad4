//! Deterministic blind indexes for equality lookups over sealed values.
//!
//! The domain key is derived once from a master secret with HKDF-SHA256 and a
//! fixed domain-separation tag. It shares nothing with any administrator key,
//! so indexes survive key rotation unchanged.

use crate::error::{CryptoError, CryptoResult};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// HKDF info string separating blind-index keys from every other derivation.
pub const BLIND_INDEX_DOMAIN_TAG: &[u8] = b"custodian:blind-index:v1";

const BLIND_INDEX_SALT: &[u8] = b"custodian-blind-index-salt";
const MIN_MASTER_SECRET_LEN: usize = 16;

/// Hex-encoded HMAC-SHA256 digest of a normalized plaintext.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlindIndex(String);

impl BlindIndex {
    /// Wraps a stored digest, checking it is 64 hex characters.
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CryptoError::Format("blind index must be 64 hex characters".to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlindIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes blind indexes under a process-wide domain key.
///
/// Read-only after construction; clone it or share it behind an `Arc`.
#[derive(Clone)]
pub struct BlindIndexer {
    mac: HmacSha256,
}

impl BlindIndexer {
    pub fn from_master_secret(master: &[u8]) -> CryptoResult<Self> {
        if master.len() < MIN_MASTER_SECRET_LEN {
            return Err(CryptoError::Key(format!(
                "blind index master secret must be at least {MIN_MASTER_SECRET_LEN} bytes"
            )));
        }

        let hk = Hkdf::<Sha256>::new(Some(BLIND_INDEX_SALT), master);
        let mut domain_key = Zeroizing::new([0u8; 32]);
        hk.expand(BLIND_INDEX_DOMAIN_TAG, &mut domain_key[..])
            .map_err(|e| CryptoError::Key(format!("domain key derivation failed: {e}")))?;

        let mac = <HmacSha256 as Mac>::new_from_slice(&domain_key[..])
            .map_err(|e| CryptoError::Key(format!("blind index key rejected: {e}")))?;
        Ok(Self { mac })
    }

    pub fn compute(&self, value: &str) -> BlindIndex {
        let mut mac = self.mac.clone();
        mac.update(normalize(value).as_bytes());
        BlindIndex(hex::encode(mac.finalize().into_bytes()))
    }
}

impl fmt::Debug for BlindIndexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BlindIndexer { key: [REDACTED] }")
    }
}

/// Case-folds and trims a plaintext before indexing.
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}
