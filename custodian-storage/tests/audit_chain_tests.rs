use custodian_storage::{
    audit, AuditLog, AuditTable, ChainBreak, Database, NewAuditEntry, StorageError, GENESIS_HASH,
};
use pretty_assertions::assert_eq;

fn seeded_log(db: &Database) -> AuditLog {
    let log = AuditLog::new(db.clone());
    log.append(&NewAuditEntry::new(AuditTable::Admins, "admin", "bootstrap").with_new("02abcdef..."))
        .unwrap();
    log.append(&NewAuditEntry::new(AuditTable::Users, "u1", "svc").with_new("email,name"))
        .unwrap();
    log.append(
        &NewAuditEntry::new(AuditTable::UserFieldValues, "u1:city", "svc").with_new("value"),
    )
    .unwrap();
    log.append(
        &NewAuditEntry::new(AuditTable::Users, "u1", "svc")
            .with_old("email")
            .with_new("email"),
    )
    .unwrap();
    log.append(&NewAuditEntry::new(AuditTable::Users, "u2", "svc").with_new("name"))
        .unwrap();
    log
}

fn tamper(db: &Database, sql: &str) {
    db.with_connection(|conn| {
        conn.execute(sql, [])?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn empty_chain_is_valid() {
    let db = Database::open_in_memory().unwrap();
    let report = AuditLog::new(db).verify_chain(None).unwrap();
    assert!(report.valid);
    assert_eq!(report.checked_entries, 0);
    assert_eq!(report.first_divergence, None);
}

#[test]
fn appended_entries_link_from_genesis() {
    let db = Database::open_in_memory().unwrap();
    let log = seeded_log(&db);

    let entries = log.entries(None).unwrap();
    assert_eq!(entries.len(), 5);
    assert_eq!(entries[0].previous_hash, GENESIS_HASH);
    for (i, pair) in entries.windows(2).enumerate() {
        assert_eq!(pair[1].previous_hash, pair[0].this_hash);
        assert_eq!(pair[1].sequence_no, i as i64 + 2);
    }
}

#[test]
fn untouched_chain_verifies_scoped_and_unscoped() {
    let db = Database::open_in_memory().unwrap();
    let log = seeded_log(&db);

    let all = log.verify_chain(None).unwrap();
    assert!(all.valid);
    assert_eq!(all.checked_entries, 5);
    assert_eq!(all.reported_entries, 5);

    let users = log.verify_chain(Some(AuditTable::Users)).unwrap();
    assert!(users.valid);
    assert_eq!(users.checked_entries, 5);
    assert_eq!(users.reported_entries, 3);
}

#[test]
fn filtered_entries_only_include_table() {
    let db = Database::open_in_memory().unwrap();
    let log = seeded_log(&db);
    let admins = log.entries(Some(AuditTable::Admins)).unwrap();
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0].table_name, "admins");
}

#[test]
fn tampering_any_field_is_detected() {
    let edits = [
        ("table_name = 'admins'", ChainBreak::HashMismatch),
        ("record_key = 'u9'", ChainBreak::HashMismatch),
        ("old_value = 'x'", ChainBreak::HashMismatch),
        ("new_value = 'plaintext@example.com'", ChainBreak::HashMismatch),
        ("actor = 'mallory'", ChainBreak::HashMismatch),
        ("created_at = created_at + 1", ChainBreak::HashMismatch),
        ("this_hash = '00'", ChainBreak::HashMismatch),
        ("previous_hash = 'ff'", ChainBreak::LinkBroken),
    ];

    for (assignment, expected) in edits {
        let db = Database::open_in_memory().unwrap();
        let log = seeded_log(&db);
        tamper(&db, &format!("UPDATE audit_log SET {assignment} WHERE sequence_no = 3"));

        for filter in [None, Some(AuditTable::Users), Some(AuditTable::UserFieldValues)] {
            let report = log.verify_chain(filter).unwrap();
            assert!(!report.valid, "{assignment} undetected with filter {filter:?}");
            assert_eq!(report.first_divergence, Some(3), "{assignment}");
            assert_eq!(report.reason, Some(expected), "{assignment}");
        }
    }
}

#[test]
fn deleted_entry_is_a_sequence_gap() {
    let db = Database::open_in_memory().unwrap();
    let log = seeded_log(&db);
    tamper(&db, "DELETE FROM audit_log WHERE sequence_no = 2");

    let report = log.verify_chain(Some(AuditTable::Admins)).unwrap();
    assert!(!report.valid);
    assert_eq!(report.first_divergence, Some(3));
    assert_eq!(report.reason, Some(ChainBreak::SequenceGap));
}

#[test]
fn truncated_tail_still_verifies() {
    // Dropping the newest entry leaves a valid prefix; only interior edits
    // are detectable without an external anchor.
    let db = Database::open_in_memory().unwrap();
    let log = seeded_log(&db);
    tamper(&db, "DELETE FROM audit_log WHERE sequence_no = 5");
    assert!(log.verify_chain(None).unwrap().valid);
}

#[test]
fn unknown_table_name_is_rejected() {
    assert!(matches!(
        "audit_log".parse::<AuditTable>(),
        Err(StorageError::UnknownTable(name)) if name == "audit_log"
    ));
    assert!(matches!(
        "users; DROP TABLE users".parse::<AuditTable>(),
        Err(StorageError::UnknownTable(_))
    ));
}

#[test]
fn append_in_transaction_rolls_back_with_it() {
    let db = Database::open_in_memory().unwrap();
    let log = seeded_log(&db);

    let result: Result<(), StorageError> = db.transaction(|conn| {
        audit::append_in(conn, &NewAuditEntry::new(AuditTable::Users, "u3", "svc"))?;
        Err(StorageError::InvalidData("abort".into()))
    });
    assert!(result.is_err());

    let report = log.verify_chain(None).unwrap();
    assert!(report.valid);
    assert_eq!(report.checked_entries, 5);

    let next = log.append(&NewAuditEntry::new(AuditTable::Users, "u3", "svc")).unwrap();
    assert_eq!(next.sequence_no, 6);
}

#[test]
fn chain_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.duckdb");

    {
        let db = Database::open(&path, "128MB", 1).unwrap();
        seeded_log(&db);
    }

    let db = Database::open(&path, "128MB", 1).unwrap();
    let log = AuditLog::new(db);
    let appended = log.append(&NewAuditEntry::new(AuditTable::Admins, "admin", "ops")).unwrap();
    assert_eq!(appended.sequence_no, 6);

    let report = log.verify_chain(None).unwrap();
    assert!(report.valid);
    assert_eq!(report.checked_entries, 6);
}

#[test]
fn report_serializes_camel_case() {
    let db = Database::open_in_memory().unwrap();
    let log = seeded_log(&db);
    let json = serde_json::to_value(log.verify_chain(None).unwrap()).unwrap();
    assert_eq!(json["checkedEntries"], 5);
    assert_eq!(json["reportedEntries"], 5);
    assert!(json["firstDivergence"].is_null());
    assert!(json.get("reason").is_none());
}

#[test]
fn concurrent_appends_form_one_chain() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;
    let log = AuditLog::new(Database::open_in_memory().unwrap());

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let log = log.clone();
            s.spawn(move || {
                for i in 0..PER_THREAD {
                    log.append(
                        &NewAuditEntry::new(AuditTable::Users, format!("u{t}"), format!("worker-{t}"))
                            .with_new(format!("write {i}")),
                    )
                    .unwrap();
                }
            });
        }
    });

    let report = log.verify_chain(None).unwrap();
    assert!(report.valid);
    assert_eq!(report.checked_entries, THREADS * PER_THREAD);

    let entries = log.entries(None).unwrap();
    let sequence: Vec<i64> = entries.iter().map(|e| e.sequence_no).collect();
    assert_eq!(sequence, (1..=(THREADS * PER_THREAD) as i64).collect::<Vec<_>>());
    for pair in entries.windows(2) {
        assert_eq!(pair[1].previous_hash, pair[0].this_hash);
    }
}
