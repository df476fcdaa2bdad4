//! Hash-chained, append-only audit log.
//!
//! One global chain covers every table. Each entry's hash commits to the
//! previous entry's hash and to its own canonical serialization:
//!
//! ```text
//! this_hash = SHA-256(previous_hash || json([sequence_no, table_name, record_key,
//!                                            old_value, new_value, actor, timestamp]))
//! ```
//!
//! The first entry links to [`GENESIS_HASH`]. Appends go through the shared
//! connection lock, so sequence numbers and links follow true write order.

use crate::error::{StorageError, StorageResult};
use crate::Database;
use duckdb::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// `previous_hash` of the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Tables that may appear in the audit log. Anything else is rejected before
/// it reaches a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditTable {
    Admins,
    Users,
    UserFieldValues,
}

impl AuditTable {
    pub const ALL: [AuditTable; 3] = [Self::Admins, Self::Users, Self::UserFieldValues];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admins => "admins",
            Self::Users => "users",
            Self::UserFieldValues => "user_field_values",
        }
    }
}

impl fmt::Display for AuditTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditTable {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StorageError::UnknownTable(s.to_string()))
    }
}

/// An entry to append. Sequence number, timestamp and hashes are assigned
/// by the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub table: AuditTable,
    pub record_key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: String,
}

impl NewAuditEntry {
    pub fn new(table: AuditTable, record_key: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            table,
            record_key: record_key.into(),
            old_value: None,
            new_value: None,
            actor: actor.into(),
        }
    }

    pub fn with_old(mut self, value: impl Into<String>) -> Self {
        self.old_value = Some(value.into());
        self
    }

    pub fn with_new(mut self, value: impl Into<String>) -> Self {
        self.new_value = Some(value.into());
        self
    }
}

/// A stored audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub sequence_no: i64,
    pub table_name: String,
    pub record_key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: String,
    /// Unix milliseconds.
    #[serde(rename = "timestamp")]
    pub created_at: i64,
    pub previous_hash: String,
    pub this_hash: String,
}

/// Why verification stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainBreak {
    /// Sequence numbers are not contiguous from 1.
    SequenceGap,
    /// `previous_hash` does not equal the preceding entry's hash.
    LinkBroken,
    /// The stored hash does not match the recomputed one.
    HashMismatch,
}

/// Result of walking the chain from genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainReport {
    pub valid: bool,
    /// Entries walked, across all tables.
    pub checked_entries: usize,
    /// Entries walked that match the table filter.
    pub reported_entries: usize,
    /// Sequence number of the first entry that failed.
    pub first_divergence: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ChainBreak>,
}

pub(crate) fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            sequence_no BIGINT PRIMARY KEY,
            table_name VARCHAR NOT NULL,
            record_key VARCHAR NOT NULL,
            old_value VARCHAR,
            new_value VARCHAR,
            actor VARCHAR NOT NULL,
            created_at BIGINT NOT NULL,
            previous_hash VARCHAR NOT NULL,
            this_hash VARCHAR NOT NULL
        );
        "#,
    )?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn compute_hash(
    previous_hash: &str,
    sequence_no: i64,
    table_name: &str,
    record_key: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    actor: &str,
    created_at: i64,
) -> StorageResult<String> {
    let canonical = serde_json::to_string(&serde_json::json!([
        sequence_no,
        table_name,
        record_key,
        old_value,
        new_value,
        actor,
        created_at
    ]))?;
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn entry_hash(entry: &AuditEntry) -> StorageResult<String> {
    compute_hash(
        &entry.previous_hash,
        entry.sequence_no,
        &entry.table_name,
        &entry.record_key,
        entry.old_value.as_deref(),
        entry.new_value.as_deref(),
        &entry.actor,
        entry.created_at,
    )
}

fn entry_from_row(row: &Row<'_>) -> duckdb::Result<AuditEntry> {
    Ok(AuditEntry {
        sequence_no: row.get(0)?,
        table_name: row.get(1)?,
        record_key: row.get(2)?,
        old_value: row.get(3)?,
        new_value: row.get(4)?,
        actor: row.get(5)?,
        created_at: row.get(6)?,
        previous_hash: row.get(7)?,
        this_hash: row.get(8)?,
    })
}

const ENTRY_COLUMNS: &str = "sequence_no, table_name, record_key, old_value, new_value, actor, \
     created_at, previous_hash, this_hash";

/// Appends an entry on a connection the caller already holds, typically
/// inside the transaction that made the audited change.
pub fn append_in(conn: &Connection, entry: &NewAuditEntry) -> StorageResult<AuditEntry> {
    let tail = conn.query_row(
        "SELECT sequence_no, this_hash FROM audit_log ORDER BY sequence_no DESC LIMIT 1",
        [],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
    );
    let (sequence_no, previous_hash) = match tail {
        Ok((last, hash)) => (last + 1, hash),
        Err(duckdb::Error::QueryReturnedNoRows) => (1, GENESIS_HASH.to_string()),
        Err(e) => return Err(e.into()),
    };

    let created_at = crate::now_millis();
    let table_name = entry.table.as_str();
    let this_hash = compute_hash(
        &previous_hash,
        sequence_no,
        table_name,
        &entry.record_key,
        entry.old_value.as_deref(),
        entry.new_value.as_deref(),
        &entry.actor,
        created_at,
    )?;

    conn.execute(
        &format!("INSERT INTO audit_log ({ENTRY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"),
        params![
            sequence_no,
            table_name,
            entry.record_key,
            entry.old_value,
            entry.new_value,
            entry.actor,
            created_at,
            previous_hash,
            this_hash,
        ],
    )?;
    debug!(sequence_no, table = table_name, "audit entry appended");

    Ok(AuditEntry {
        sequence_no,
        table_name: table_name.to_string(),
        record_key: entry.record_key.clone(),
        old_value: entry.old_value.clone(),
        new_value: entry.new_value.clone(),
        actor: entry.actor.clone(),
        created_at,
        previous_hash,
        this_hash,
    })
}

/// Lists entries in sequence order, optionally limited to one table.
pub fn entries(conn: &Connection, filter: Option<AuditTable>) -> StorageResult<Vec<AuditEntry>> {
    let mut stmt;
    let rows: Vec<AuditEntry> = match filter {
        Some(table) => {
            stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM audit_log WHERE table_name = ? ORDER BY sequence_no"
            ))?;
            stmt.query_map(params![table.as_str()], entry_from_row)?
                .collect::<Result<_, _>>()?
        }
        None => {
            stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM audit_log ORDER BY sequence_no"
            ))?;
            stmt.query_map([], entry_from_row)?
                .collect::<Result<_, _>>()?
        }
    };
    Ok(rows)
}

/// Walks the whole chain from genesis and stops at the first broken entry.
///
/// The filter never narrows what is verified: an entry of another table
/// still breaks the chain for every table after it.
pub fn verify_chain(conn: &Connection, filter: Option<AuditTable>) -> StorageResult<ChainReport> {
    let all = entries(conn, None)?;
    let mut report = ChainReport {
        valid: true,
        checked_entries: 0,
        reported_entries: 0,
        first_divergence: None,
        reason: None,
    };

    let mut expected_previous = GENESIS_HASH.to_string();
    for (expected_sequence, entry) in (1_i64..).zip(all.iter()) {
        report.checked_entries += 1;
        if filter.is_none_or(|t| t.as_str() == entry.table_name) {
            report.reported_entries += 1;
        }

        let reason = if entry.sequence_no != expected_sequence {
            Some(ChainBreak::SequenceGap)
        } else if entry.previous_hash != expected_previous {
            Some(ChainBreak::LinkBroken)
        } else if entry_hash(entry)? != entry.this_hash {
            Some(ChainBreak::HashMismatch)
        } else {
            None
        };

        if let Some(reason) = reason {
            warn!(
                sequence_no = entry.sequence_no,
                ?reason,
                "audit chain verification failed"
            );
            report.valid = false;
            report.first_divergence = Some(entry.sequence_no);
            report.reason = Some(reason);
            return Ok(report);
        }
        expected_previous.clone_from(&entry.this_hash);
    }

    Ok(report)
}

/// Audit log bound to a [`Database`].
#[derive(Clone)]
pub struct AuditLog {
    db: Database,
}

impl AuditLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Appends one entry as its own write.
    pub fn append(&self, entry: &NewAuditEntry) -> StorageResult<AuditEntry> {
        self.db.with_connection(|conn| append_in(conn, entry))
    }

    pub fn verify_chain(&self, filter: Option<AuditTable>) -> StorageResult<ChainReport> {
        self.db.with_connection(|conn| verify_chain(conn, filter))
    }

    pub fn entries(&self, filter: Option<AuditTable>) -> StorageResult<Vec<AuditEntry>> {
        self.db.with_connection(|conn| entries(conn, filter))
    }
}
