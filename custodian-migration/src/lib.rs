//! Signature-authorized rotation of the administrator key.
//!
//! A rotation re-seals every protected value (user email and name columns
//! and every custom profile field value) to a new administrator public key.
//! It runs as a single all-or-nothing DuckDB transaction:
//!
//! 1. The new key must be a valid x-only secp256k1 point distinct from the
//!    current one.
//! 2. The request must carry an `admin_key_migration` event signed by the
//!    current (outgoing) administrator within the freshness window, whose
//!    `new_key` tag names the requested key.
//! 3. The operator must supply plaintext for exactly the set of stored
//!    protected rows: no missing, unknown or duplicate ids, and no row whose
//!    ciphertext changed after the export was taken.
//!
//! Blind indexes are never touched, so lookups keep working across rotations.

mod error;
pub mod operator;
mod orchestrator;
mod types;

pub use error::{MigrationError, MigrationResult};
pub use operator::{build_migration_request, decrypt_export, DecryptedExport};
pub use orchestrator::{MigrationOrchestrator, MigrationPolicy, MigrationState};
pub use types::{
    DecryptedFieldValue, DecryptedUser, ExecuteMigrationRequest, ExecuteMigrationResponse,
    ExportedFieldValue, ExportedUser, PrepareMigrationResponse,
};
