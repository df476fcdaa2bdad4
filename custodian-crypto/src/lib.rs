//! Encryption layer for Custodian.
//!
//! Provides field-level protection of personal data using:
//! - secp256k1 ECDH with a one-time ephemeral key per sealed value
//! - AES-256-CBC over the PKCS#7-padded, JSON-encoded value
//! - HMAC-SHA256 blind indexes for equality lookups without decryption
//!
//! # Architecture
//!
//! Every protected value is sealed to exactly one recipient: the current
//! administrator's x-only public key. The server only ever holds that public
//! key, so it can write protected data but never read it back.
//!
//! Blind indexes are keyed by a domain key derived from a process-wide master
//! secret. They never depend on the administrator key, which means a key
//! rotation re-encrypts every value while lookups keep working unchanged.

pub mod blind_index;
pub mod envelope;
mod error;
pub mod keys;
pub mod value;

pub use blind_index::{BlindIndex, BlindIndexer, BLIND_INDEX_DOMAIN_TAG};
pub use envelope::{
    decrypt, decrypt_value, derive_shared_secret, encrypt, encrypt_value,
    generate_ephemeral_keypair, EncryptedField, IV_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use keys::{truncate_key, KeyPair, XOnlyPublicKey, KEY_SIZE, X_ONLY_PARITY_PREFIX};
pub use value::{deserialize_value, serialize_value, FieldValue};
