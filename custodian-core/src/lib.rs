//! Custodian: custody of personal data under a single administrator key.
//!
//! Protected values are sealed to the administrator's secp256k1 public key
//! and can only be opened offline with the matching private key. Emails also
//! carry a blind index so users can be found without decrypting anything.
//! The administrator key can be rotated by a signed, all-or-nothing
//! migration, and every sensitive write lands in a hash-chained audit log.
//!
//! [`Custodian`] is the entry point. It owns the database, the blind indexer
//! and the migration orchestrator; there is no global state.
//!
//! ```no_run
//! use custodian_core::{Custodian, NewUser};
//! use custodian_crypto::KeyPair;
//!
//! # fn main() -> custodian_core::CustodianResult<()> {
//! let admin = KeyPair::generate();
//! let custodian = Custodian::open_in_memory(b"a process-wide master secret")?;
//! custodian.bootstrap_admin(&admin.public_key().to_hex(), "setup")?;
//!
//! let user = custodian.create_user(
//!     &NewUser { email: Some("a@x.com".into()), name: None },
//!     "signup",
//! )?;
//! assert_eq!(custodian.find_user_by_email("A@X.com")?.map(|u| u.id), Some(user.id));
//! # Ok(())
//! # }
//! ```

pub mod config;
mod custodian;
mod error;
mod user_service;

pub use config::CustodianConfig;
pub use custodian::{Custodian, ADMIN_BOOTSTRAP_KEY};
pub use error::{CustodianError, CustodianResult, ErrorKind};
pub use user_service::NewUser;
