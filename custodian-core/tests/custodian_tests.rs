use custodian_core::{Custodian, CustodianError, ErrorKind, NewUser, ADMIN_BOOTSTRAP_KEY};
use custodian_crypto::{decrypt_value, FieldValue, KeyPair};
use custodian_storage::{AuditTable, NewAuditEntry};
use pretty_assertions::assert_eq;

const MASTER: &[u8] = b"custodian-core-test-master-secret";

fn setup() -> (Custodian, KeyPair) {
    let custodian = Custodian::open_in_memory(MASTER).unwrap();
    let admin = KeyPair::generate();
    custodian
        .bootstrap_admin(&admin.public_key().to_hex(), "setup")
        .unwrap();
    (custodian, admin)
}

fn ada() -> NewUser {
    NewUser {
        email: Some("ada@example.com".into()),
        name: Some("Ada Lovelace".into()),
    }
}

// ── Bootstrap ────────────────────────────────────────────────────

#[test]
fn bootstrap_is_audited_once() {
    let (custodian, admin) = setup();
    assert_eq!(custodian.admin_public_key().unwrap(), admin.public_key());

    let entries = custodian.audit_entries(Some("admins")).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].record_key, ADMIN_BOOTSTRAP_KEY);
    assert_eq!(entries[0].actor, "setup");

    let again = custodian.bootstrap_admin(&KeyPair::generate().public_key().to_hex(), "setup");
    assert_eq!(again.unwrap_err().kind(), ErrorKind::Validation);
    assert_eq!(custodian.audit_entries(None).unwrap().len(), 1);
}

#[test]
fn bootstrap_rejects_malformed_key() {
    let custodian = Custodian::open_in_memory(MASTER).unwrap();
    let err = custodian.bootstrap_admin("not-a-key", "setup").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Key);
    assert!(custodian.admin().unwrap().is_none());
}

#[test]
fn writes_before_bootstrap_fail_without_side_effects() {
    let custodian = Custodian::open_in_memory(MASTER).unwrap();
    let err = custodian.create_user(&ada(), "signup").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(custodian.audit_entries(None).unwrap().is_empty());
}

#[test]
fn short_master_secret_is_rejected() {
    let err = Custodian::open_in_memory(b"short").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Key);
}

// ── Users ────────────────────────────────────────────────────────

#[test]
fn created_user_opens_only_with_admin_key() {
    let (custodian, admin) = setup();
    let user = custodian.create_user(&ada(), "signup").unwrap();

    let email = decrypt_value(user.email.as_ref().unwrap(), &admin).unwrap();
    assert_eq!(email.as_text(), Some("ada@example.com"));
    assert!(decrypt_value(user.email.as_ref().unwrap(), &KeyPair::generate()).is_err());
    assert_eq!(custodian.get_user(&user.id).unwrap(), Some(user));
}

#[test]
fn find_by_email_uses_blind_index() {
    let (custodian, _) = setup();
    let user = custodian.create_user(&ada(), "signup").unwrap();
    custodian
        .create_user(
            &NewUser {
                email: Some("bob@example.com".into()),
                name: None,
            },
            "signup",
        )
        .unwrap();

    let found = custodian.find_user_by_email("  ADA@example.COM").unwrap().unwrap();
    assert_eq!(found.id, user.id);
    assert_eq!(found.email_blind_index, Some(custodian.blind_index("ada@example.com")));
    assert!(custodian.find_user_by_email("eve@example.com").unwrap().is_none());
}

#[test]
fn update_email_moves_the_index() {
    let (custodian, admin) = setup();
    let user = custodian.create_user(&ada(), "signup").unwrap();

    let updated = custodian
        .update_email(&user.id, Some("countess@example.com"), "profile")
        .unwrap();
    assert!(custodian.find_user_by_email("ada@example.com").unwrap().is_none());
    assert_eq!(
        custodian.find_user_by_email("countess@example.com").unwrap().unwrap().id,
        user.id
    );
    assert_eq!(
        decrypt_value(updated.email.as_ref().unwrap(), &admin).unwrap().as_text(),
        Some("countess@example.com")
    );

    let cleared = custodian.update_email(&user.id, None, "profile").unwrap();
    assert!(cleared.email.is_none());
    assert!(cleared.email_blind_index.is_none());
}

#[test]
fn update_name_on_missing_user_is_not_found() {
    let (custodian, _) = setup();
    let err = custodian.update_name("ghost", Some("Nobody"), "profile").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn profile_fields_keep_their_type() {
    let (custodian, admin) = setup();
    let user = custodian.create_user(&ada(), "signup").unwrap();

    custodian
        .set_profile_field(&user.id, "city", &FieldValue::from("London"), "profile")
        .unwrap();
    custodian
        .set_profile_field(&user.id, "age", &FieldValue::from(36_i64), "profile")
        .unwrap();
    custodian
        .set_profile_field(&user.id, "vip", &FieldValue::from(false), "profile")
        .unwrap();
    custodian
        .set_profile_field(&user.id, "age", &FieldValue::from(37_i64), "profile")
        .unwrap();

    let fields = custodian.profile_fields(&user.id).unwrap();
    let keys: Vec<_> = fields.iter().map(|f| f.field_key.as_str()).collect();
    assert_eq!(keys, vec!["age", "city", "vip"]);
    let values: Vec<_> = fields
        .iter()
        .map(|f| decrypt_value(&f.value, &admin).unwrap())
        .collect();
    assert_eq!(
        values,
        vec![
            FieldValue::from(37_i64),
            FieldValue::from("London"),
            FieldValue::from(false)
        ]
    );
}

#[test]
fn empty_field_key_is_rejected() {
    let (custodian, _) = setup();
    let user = custodian.create_user(&ada(), "signup").unwrap();
    let err = custodian
        .set_profile_field(&user.id, "  ", &FieldValue::from(1_i64), "profile")
        .unwrap_err();
    assert!(matches!(err, CustodianError::Validation(_)));
}

#[test]
fn field_on_missing_user_is_not_found() {
    let (custodian, _) = setup();
    let err = custodian
        .set_profile_field("ghost", "city", &FieldValue::from("Paris"), "profile")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn delete_user_cascades_to_fields() {
    let (custodian, _) = setup();
    let user = custodian.create_user(&ada(), "signup").unwrap();
    custodian
        .set_profile_field(&user.id, "city", &FieldValue::from("London"), "profile")
        .unwrap();

    custodian.delete_user(&user.id, "gdpr").unwrap();
    assert!(custodian.get_user(&user.id).unwrap().is_none());
    assert!(custodian.profile_fields(&user.id).unwrap().is_empty());
    assert!(custodian.find_user_by_email("ada@example.com").unwrap().is_none());

    let err = custodian.delete_user(&user.id, "gdpr").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn delete_missing_field_is_not_audited() {
    let (custodian, _) = setup();
    let user = custodian.create_user(&ada(), "signup").unwrap();
    let before = custodian.audit_entries(None).unwrap().len();

    assert!(!custodian.delete_profile_field(&user.id, "city", "profile").unwrap());
    assert_eq!(custodian.audit_entries(None).unwrap().len(), before);
}

// ── Audit ────────────────────────────────────────────────────────

#[test]
fn every_mutation_is_audited_without_plaintext() {
    let (custodian, _) = setup();
    let user = custodian.create_user(&ada(), "signup").unwrap();
    custodian.update_name(&user.id, Some("Ada King"), "profile").unwrap();
    custodian
        .set_profile_field(&user.id, "city", &FieldValue::from("London"), "profile")
        .unwrap();
    custodian.delete_profile_field(&user.id, "city", "profile").unwrap();
    custodian.delete_user(&user.id, "gdpr").unwrap();

    let entries = custodian.audit_entries(None).unwrap();
    let tables: Vec<_> = entries.iter().map(|e| e.table_name.as_str()).collect();
    assert_eq!(
        tables,
        vec![
            "admins",
            "users",
            "users",
            "user_field_values",
            "user_field_values",
            "users"
        ]
    );
    assert_eq!(entries[1].new_value.as_deref(), Some("email,name"));
    assert_eq!(entries[5].old_value.as_deref(), Some("email,name;fields=0"));

    let dump = serde_json::to_string(&entries).unwrap();
    for secret in ["ada@example.com", "Ada Lovelace", "Ada King", "London"] {
        assert!(!dump.contains(secret), "{secret} leaked into audit log");
    }

    let report = custodian.verify_chain(None).unwrap();
    assert!(report.valid);
    assert_eq!(report.checked_entries, 6);
    assert_eq!(custodian.verify_chain(Some("users")).unwrap().reported_entries, 3);
}

#[test]
fn verify_chain_rejects_unknown_table() {
    let (custodian, _) = setup();
    for name in ["sessions", "audit_log", "users; DROP TABLE users", ""] {
        let err = custodian.verify_chain(Some(name)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{name}");
    }
}

#[test]
fn ensure_chain_intact_reports_divergence() {
    let (custodian, _) = setup();
    custodian.create_user(&ada(), "signup").unwrap();
    custodian
        .append_audit(&NewAuditEntry::new(AuditTable::Users, "batch", "cron").with_new("export"))
        .unwrap();
    assert!(custodian.ensure_chain_intact(None).is_ok());

    custodian
        .database()
        .with_connection(|conn| {
            conn.execute("UPDATE audit_log SET actor = 'mallory' WHERE sequence_no = 2", [])?;
            Ok(())
        })
        .unwrap();

    let err = custodian.ensure_chain_intact(Some("admins")).unwrap_err();
    assert!(matches!(err, CustodianError::ChainIntegrity { sequence_no: 2 }));
    assert_eq!(err.kind(), ErrorKind::ChainIntegrity);
}

// ── Errors ───────────────────────────────────────────────────────

#[test]
fn crypto_failures_have_a_generic_public_message() {
    let err = CustodianError::from(custodian_crypto::CryptoError::Decryption);
    assert_eq!(err.kind(), ErrorKind::Crypto);
    assert_eq!(err.public_message(), "cryptographic operation failed");
}

#[test]
fn authorization_failures_keep_their_reason() {
    let err = CustodianError::from(custodian_auth::AuthRejection::InvalidSignature);
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert!(err.public_message().contains("signature is invalid"));
}
