//! Scalar values that can be sealed.
//!
//! Only strings, booleans and numbers are protectable. Values are JSON-encoded
//! before encryption so the type survives the round trip.

use crate::error::{CryptoError, CryptoResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A protectable scalar value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl FieldValue {
    /// Builds a numeric value; `None` for NaN and infinities.
    pub fn from_f64(n: f64) -> Option<Self> {
        serde_json::Number::from_f64(n).map(Self::Number)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Textual form fed to the blind index.
    pub fn index_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => n.to_string(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.index_text())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

/// Encodes a value for sealing.
pub fn serialize_value(value: &FieldValue) -> CryptoResult<String> {
    serde_json::to_string(value).map_err(|e| CryptoError::Format(format!("value encoding: {e}")))
}

/// Decodes an opened value. Null, arrays and objects are rejected.
pub fn deserialize_value(raw: &str) -> CryptoResult<FieldValue> {
    serde_json::from_str(raw)
        .map_err(|_| CryptoError::Format("payload is not a string, boolean or number".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_roundtrip() {
        for value in [
            FieldValue::from("a@x.com"),
            FieldValue::from(true),
            FieldValue::from(-42i64),
            FieldValue::from_f64(1.5).unwrap(),
        ] {
            let raw = serialize_value(&value).unwrap();
            assert_eq!(deserialize_value(&raw).unwrap(), value);
        }
    }

    #[test]
    fn text_that_looks_like_a_number_stays_text() {
        let value = FieldValue::from("42");
        let raw = serialize_value(&value).unwrap();
        assert_eq!(raw, "\"42\"");
        assert_eq!(deserialize_value(&raw).unwrap(), value);
    }

    #[test]
    fn non_scalars_are_rejected() {
        for raw in ["null", "[1,2]", "{\"a\":1}", "not json"] {
            assert!(matches!(deserialize_value(raw), Err(CryptoError::Format(_))), "{raw}");
        }
    }

    #[test]
    fn non_finite_numbers_cannot_be_built() {
        assert!(FieldValue::from_f64(f64::NAN).is_none());
        assert!(FieldValue::from_f64(f64::INFINITY).is_none());
    }
}
