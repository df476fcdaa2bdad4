use custodian_crypto::envelope::{
    decrypt, decrypt_value, derive_shared_secret, encrypt, encrypt_value,
    generate_ephemeral_keypair,
};
use custodian_crypto::{CryptoError, FieldValue, KeyPair, XOnlyPublicKey};

#[test]
fn keypair_generation_produces_valid_keys() {
    let kp = generate_ephemeral_keypair();
    let public = kp.public_key();
    assert_eq!(public.to_hex().len(), 64);
    assert!(public.to_point().is_ok());
    assert_ne!(public.as_bytes(), &*kp.secret_bytes());
}

#[test]
fn keypair_roundtrip_from_secret_hex() {
    let kp1 = KeyPair::generate();
    let kp2 = KeyPair::from_secret_hex(&kp1.secret_hex()).unwrap();
    assert_eq!(kp1.public_key(), kp2.public_key());
}

#[test]
fn shared_secret_is_role_symmetric() {
    let alice = KeyPair::generate();
    let bob = KeyPair::generate();

    let ab = derive_shared_secret(&alice, &bob.public_key()).unwrap();
    let ba = derive_shared_secret(&bob, &alice.public_key()).unwrap();
    assert_eq!(*ab, *ba);
}

#[test]
fn shared_secret_rejects_point_off_curve() {
    let ours = KeyPair::generate();
    // BIP-340 "public key not on the curve" vector, and an x beyond the field size.
    let off_curve = XOnlyPublicKey::from_hex(
        "EEFDEA4CDB677750A420FEE807EACF21EB9898AE79B9768766E4FAA04A2D4A34",
    )
    .unwrap();
    let out_of_field = XOnlyPublicKey::from_bytes([0xFF; 32]);

    for bogus in [off_curve, out_of_field] {
        assert!(matches!(
            derive_shared_secret(&ours, &bogus),
            Err(CryptoError::Key(_))
        ));
    }
}

#[test]
fn encrypt_decrypt_roundtrip() {
    let recipient = KeyPair::generate();
    let sealed = encrypt(b"a@x.com", &recipient.public_key()).unwrap();

    let opened = decrypt(&sealed.ciphertext, &sealed.ephemeral_public_key, &recipient).unwrap();
    assert_eq!(opened, b"a@x.com");
}

#[test]
fn recipients_with_odd_y_still_roundtrip() {
    use k256::elliptic_curve::sec1::ToEncodedPoint;

    let odd = std::iter::repeat_with(KeyPair::generate)
        .find(|kp| {
            let sk = k256::SecretKey::from_slice(&kp.secret_bytes()[..]).unwrap();
            sk.public_key().to_encoded_point(true).as_bytes()[0] == 0x03
        })
        .unwrap();

    let sealed = encrypt(b"parity", &odd.public_key()).unwrap();
    let opened = decrypt(&sealed.ciphertext, &sealed.ephemeral_public_key, &odd).unwrap();
    assert_eq!(opened, b"parity");
}

#[test]
fn encrypt_decrypt_empty_plaintext() {
    let recipient = KeyPair::generate();
    let sealed = encrypt(b"", &recipient.public_key()).unwrap();

    let opened = decrypt(&sealed.ciphertext, &sealed.ephemeral_public_key, &recipient).unwrap();
    assert!(opened.is_empty());
}

#[test]
fn envelope_has_wire_format() {
    let recipient = KeyPair::generate();
    let sealed = encrypt(b"hello", &recipient.public_key()).unwrap();

    let (ct, iv) = sealed.ciphertext.split_once("?iv=").unwrap();
    assert!(!ct.is_empty());
    // 16-byte IV in padded base64
    assert_eq!(iv.len(), 24);
    assert_eq!(sealed.ephemeral_public_key.to_hex().len(), 64);
}

#[test]
fn each_encrypt_uses_fresh_ephemeral_key_and_iv() {
    let recipient = KeyPair::generate();

    let a = encrypt(b"same plaintext", &recipient.public_key()).unwrap();
    let b = encrypt(b"same plaintext", &recipient.public_key()).unwrap();

    assert_ne!(a.ephemeral_public_key, b.ephemeral_public_key);
    assert_ne!(a.ciphertext, b.ciphertext);
}

#[test]
fn wrong_recipient_does_not_recover_plaintext() {
    let intended = KeyPair::generate();
    let other = KeyPair::generate();
    let sealed = encrypt(b"secret-profile-value", &intended.public_key()).unwrap();

    let result = decrypt(&sealed.ciphertext, &sealed.ephemeral_public_key, &other);
    // Without a MAC a wrong key can occasionally produce valid padding.
    assert!(result.map(|p| p != b"secret-profile-value").unwrap_or(true));
}

#[test]
fn wrong_recipient_fails_value_decryption() {
    let intended = KeyPair::generate();
    let other = KeyPair::generate();
    let sealed = encrypt_value(&FieldValue::from("a@x.com"), &intended.public_key()).unwrap();

    assert!(decrypt_value(&sealed, &other).is_err());
}

#[test]
fn malformed_envelopes_are_format_errors() {
    let recipient = KeyPair::generate();
    let eph = KeyPair::generate().public_key();

    for envelope in [
        "no-separator",
        "!!!notbase64?iv=AAAAAAAAAAAAAAAAAAAAAA==",
        "AAAAAAAAAAAAAAAAAAAAAA==?iv=AAAA",
        "AAAA?iv=AAAAAAAAAAAAAAAAAAAAAA==",
        "?iv=AAAAAAAAAAAAAAAAAAAAAA==",
    ] {
        let err = decrypt(envelope, &eph, &recipient).unwrap_err();
        assert!(matches!(err, CryptoError::Format(_)), "{envelope}: {err:?}");
    }
}

#[test]
fn decryption_error_message_is_generic() {
    assert_eq!(CryptoError::Decryption.to_string(), "decryption failed");
}

#[test]
fn value_roundtrip_preserves_type() {
    let recipient = KeyPair::generate();

    for value in [
        FieldValue::from("Ada Lovelace"),
        FieldValue::from(false),
        FieldValue::from(1815i64),
        FieldValue::from_f64(0.25).unwrap(),
    ] {
        let sealed = encrypt_value(&value, &recipient.public_key()).unwrap();
        assert_eq!(decrypt_value(&sealed, &recipient).unwrap(), value);
    }
}

#[test]
fn encrypted_field_serialization() {
    let recipient = KeyPair::generate();
    let sealed = encrypt_value(&FieldValue::from("x"), &recipient.public_key()).unwrap();

    let json = serde_json::to_value(&sealed).unwrap();
    assert_eq!(json["ephemeralPublicKey"], sealed.ephemeral_public_key.to_hex());

    let back: custodian_crypto::EncryptedField = serde_json::from_value(json).unwrap();
    assert_eq!(back, sealed);
    assert_eq!(decrypt_value(&back, &recipient).unwrap(), FieldValue::from("x"));
}

// Property-based tests
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn encrypt_decrypt_always_roundtrips(m in ".{0,200}") {
            let recipient = KeyPair::generate();
            let sealed = encrypt(m.as_bytes(), &recipient.public_key()).unwrap();
            let opened = decrypt(&sealed.ciphertext, &sealed.ephemeral_public_key, &recipient).unwrap();
            prop_assert_eq!(opened, m.as_bytes());
        }
    }
}
