//! Authorization event shape and canonical id.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A signed claim authorizing an administrative action.
///
/// Arrives from an untrusted caller, so keys and signature stay as the raw
/// hex strings that were sent; [`crate::verify_signature`] does the decoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationEvent {
    /// Hex SHA-256 of the canonical serialization.
    pub id: String,
    /// Hex x-only public key of the signer.
    pub signer_public_key: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    /// Hex BIP-340 signature over the id bytes.
    pub signature: String,
}

impl AuthorizationEvent {
    /// Returns the value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// Whether any tag is the pair `[name, value]`.
    pub fn has_tag(&self, name: &str, value: &str) -> bool {
        self.tags.iter().any(|tag| {
            tag.first().map(String::as_str) == Some(name)
                && tag.get(1).map(String::as_str) == Some(value)
        })
    }
}

/// Canonical serialization: `[0, signerPublicKey, timestamp, kind, tags, content]`.
pub fn canonical_form(event: &AuthorizationEvent) -> String {
    serde_json::json!([
        0,
        event.signer_public_key,
        event.timestamp,
        event.kind,
        event.tags,
        event.content,
    ])
    .to_string()
}

/// SHA-256 of the canonical serialization.
pub fn compute_event_id(event: &AuthorizationEvent) -> [u8; 32] {
    Sha256::digest(canonical_form(event).as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AuthorizationEvent {
        AuthorizationEvent {
            id: String::new(),
            signer_public_key: "ab".repeat(32),
            timestamp: 1_700_000_000,
            kind: 27235,
            tags: vec![vec!["action".into(), "admin_key_migration".into()]],
            content: "rotate \"now\"".into(),
            signature: String::new(),
        }
    }

    #[test]
    fn canonical_form_is_fixed_array() {
        let expected = format!(
            "[0,\"{}\",1700000000,27235,[[\"action\",\"admin_key_migration\"]],\"rotate \\\"now\\\"\"]",
            "ab".repeat(32)
        );
        assert_eq!(canonical_form(&sample()), expected);
    }

    #[test]
    fn id_ignores_id_and_signature_fields() {
        let a = sample();
        let mut b = sample();
        b.id = "ff".repeat(32);
        b.signature = "00".repeat(64);
        assert_eq!(compute_event_id(&a), compute_event_id(&b));
    }

    #[test]
    fn id_covers_content() {
        let a = sample();
        let mut b = sample();
        b.content.push('!');
        assert_ne!(compute_event_id(&a), compute_event_id(&b));
    }

    #[test]
    fn tag_lookup() {
        let event = sample();
        assert_eq!(event.tag_value("action"), Some("admin_key_migration"));
        assert!(event.has_tag("action", "admin_key_migration"));
        assert!(!event.has_tag("action", "delete_user"));
        assert_eq!(event.tag_value("missing"), None);
    }
}
