//! The `Custodian` context.

use crate::config::CustodianConfig;
use crate::error::{CustodianError, CustodianResult};
use chrono::Utc;
use custodian_auth::AuthorizationEvent;
use custodian_crypto::{
    truncate_key, BlindIndex, BlindIndexer, EncryptedField, FieldValue, XOnlyPublicKey,
};
use custodian_migration::{
    ExecuteMigrationRequest, ExecuteMigrationResponse, MigrationOrchestrator, MigrationPolicy,
    MigrationState, PrepareMigrationResponse,
};
use custodian_storage::{
    admins, audit, AdministratorIdentity, AuditEntry, AuditLog, AuditTable, ChainReport,
    Connection, Database, NewAuditEntry,
};
use tracing::{info, warn};

/// Audit record key for administrator installation.
pub const ADMIN_BOOTSTRAP_KEY: &str = "admin_bootstrap";

/// Owns the database, the blind indexer and the rotation orchestrator.
///
/// Cheap to share behind an `Arc`; every write funnels through one
/// connection lock.
pub struct Custodian {
    pub(crate) db: Database,
    pub(crate) indexer: BlindIndexer,
    audit: AuditLog,
    orchestrator: MigrationOrchestrator,
    config: CustodianConfig,
}

impl Custodian {
    /// Opens the configured database. `master_secret` keys the blind index.
    pub fn open(config: CustodianConfig, master_secret: &[u8]) -> CustodianResult<Self> {
        config.validate()?;
        let db = match &config.db_path {
            Some(path) => Database::open(path, &config.memory_limit, config.threads)?,
            None => Database::open_in_memory()?,
        };
        Self::with_database(db, config, master_secret)
    }

    /// In-memory instance with default settings.
    pub fn open_in_memory(master_secret: &[u8]) -> CustodianResult<Self> {
        Self::open(CustodianConfig::default(), master_secret)
    }

    /// Wraps an already opened database.
    pub fn with_database(
        db: Database,
        config: CustodianConfig,
        master_secret: &[u8],
    ) -> CustodianResult<Self> {
        let indexer = BlindIndexer::from_master_secret(master_secret)?;
        let orchestrator = MigrationOrchestrator::new(
            db.clone(),
            MigrationPolicy {
                auth_kind: config.auth_kind,
                max_event_age_secs: config.max_event_age_secs,
            },
        );
        Ok(Self {
            audit: AuditLog::new(db.clone()),
            db,
            indexer,
            orchestrator,
            config,
        })
    }

    pub fn config(&self) -> &CustodianConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ── Administrator ────────────────────────────────────────────

    /// Installs the first administrator. Fails if one already exists.
    pub fn bootstrap_admin(
        &self,
        public_key: &str,
        actor: &str,
    ) -> CustodianResult<AdministratorIdentity> {
        let public_key = XOnlyPublicKey::parse_validated(public_key)?;
        let identity = self.db.transaction(|conn| {
            let identity = admins::insert_admin(conn, &public_key, now_millis())?;
            audit::append_in(
                conn,
                &NewAuditEntry::new(AuditTable::Admins, ADMIN_BOOTSTRAP_KEY, actor)
                    .with_new(truncate_key(&public_key.to_hex())),
            )?;
            Ok::<_, CustodianError>(identity)
        })?;
        info!(actor, "administrator installed");
        Ok(identity)
    }

    pub fn admin(&self) -> CustodianResult<Option<AdministratorIdentity>> {
        Ok(self.db.with_connection(admins::current_admin)?)
    }

    /// The current administrator public key, or `NotFound` before bootstrap.
    pub fn admin_public_key(&self) -> CustodianResult<XOnlyPublicKey> {
        self.admin()?
            .map(|a| a.public_key)
            .ok_or_else(|| CustodianError::NotFound("administrator".into()))
    }

    // ── Crypto ───────────────────────────────────────────────────

    /// Seals a value to the current administrator.
    pub fn encrypt_value(&self, value: &FieldValue) -> CustodianResult<EncryptedField> {
        let recipient = self.admin_public_key()?;
        Ok(custodian_crypto::encrypt_value(value, &recipient)?)
    }

    pub fn blind_index(&self, value: &str) -> BlindIndex {
        self.indexer.compute(value)
    }

    /// Checks `event` authorizes `action` under the current administrator.
    pub fn verify_authorization(
        &self,
        event: &AuthorizationEvent,
        action: &str,
    ) -> CustodianResult<()> {
        let admin = self.admin_public_key()?;
        custodian_auth::verify_authorization(
            event,
            self.config.auth_kind,
            action,
            &admin,
            self.config.max_event_age_secs,
        )?;
        Ok(())
    }

    // ── Rotation ─────────────────────────────────────────────────

    pub fn prepare_migration(&self) -> CustodianResult<PrepareMigrationResponse> {
        Ok(self.orchestrator.prepare_migration()?)
    }

    pub fn execute_migration(
        &self,
        request: &ExecuteMigrationRequest,
        actor: &str,
    ) -> CustodianResult<ExecuteMigrationResponse> {
        Ok(self.orchestrator.execute_migration(request, actor)?)
    }

    pub fn migration_state(&self) -> MigrationState {
        self.orchestrator.state()
    }

    // ── Audit ────────────────────────────────────────────────────

    /// Appends an entry on its own, outside any data change.
    pub fn append_audit(&self, entry: &NewAuditEntry) -> CustodianResult<AuditEntry> {
        Ok(self.audit.append(entry)?)
    }

    /// Verifies the whole chain. `table` must be on the audit allow-list.
    pub fn verify_chain(&self, table: Option<&str>) -> CustodianResult<ChainReport> {
        let filter = parse_table(table)?;
        Ok(self.audit.verify_chain(filter)?)
    }

    /// Like [`verify_chain`](Self::verify_chain) but a broken chain is an error.
    pub fn ensure_chain_intact(&self, table: Option<&str>) -> CustodianResult<ChainReport> {
        let report = self.verify_chain(table)?;
        match report.first_divergence {
            Some(sequence_no) if !report.valid => {
                warn!(sequence_no, "audit chain integrity check failed");
                Err(CustodianError::ChainIntegrity { sequence_no })
            }
            _ => Ok(report),
        }
    }

    pub fn audit_entries(&self, table: Option<&str>) -> CustodianResult<Vec<AuditEntry>> {
        let filter = parse_table(table)?;
        Ok(self.audit.entries(filter)?)
    }

    /// Runs `f` and its audit entries in one transaction, sealing to the
    /// administrator current inside that transaction.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&Connection, &XOnlyPublicKey, i64) -> CustodianResult<T>,
    ) -> CustodianResult<T> {
        self.db.transaction(|conn| {
            let admin = admins::current_admin(conn)?
                .ok_or_else(|| CustodianError::NotFound("administrator".into()))?;
            f(conn, &admin.public_key, now_millis())
        })
    }
}

fn parse_table(table: Option<&str>) -> CustodianResult<Option<AuditTable>> {
    Ok(table.map(str::parse::<AuditTable>).transpose()?)
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
