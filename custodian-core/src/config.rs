//! Runtime configuration.

use crate::error::{CustodianError, CustodianResult};
use custodian_auth::{ADMIN_AUTH_KIND, DEFAULT_MAX_EVENT_AGE_SECS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Database path environment variable. Unset means in-memory.
pub const ENV_DB_PATH: &str = "CUSTODIAN_DB_PATH";
/// Authorization freshness window environment variable, in seconds.
pub const ENV_MAX_EVENT_AGE_SECS: &str = "CUSTODIAN_MAX_EVENT_AGE_SECS";

const DEFAULT_MEMORY_LIMIT: &str = "256MB";
const DEFAULT_THREADS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustodianConfig {
    /// DuckDB file. `None` opens an in-memory database.
    pub db_path: Option<PathBuf>,
    pub memory_limit: String,
    pub threads: u32,
    /// Event kind accepted for administrator authorization.
    pub auth_kind: u32,
    pub max_event_age_secs: u64,
}

impl Default for CustodianConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            memory_limit: DEFAULT_MEMORY_LIMIT.to_string(),
            threads: DEFAULT_THREADS,
            auth_kind: ADMIN_AUTH_KIND,
            max_event_age_secs: DEFAULT_MAX_EVENT_AGE_SECS,
        }
    }
}

impl CustodianConfig {
    /// Defaults overridden by `CUSTODIAN_*` environment variables.
    pub fn from_env() -> CustodianResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CustodianResult<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_DB_PATH).filter(|p| !p.trim().is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup(ENV_MAX_EVENT_AGE_SECS) {
            config.max_event_age_secs = raw.trim().parse().map_err(|e| {
                CustodianError::Config(format!("invalid {ENV_MAX_EVENT_AGE_SECS}: {e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CustodianResult<()> {
        if self.max_event_age_secs == 0 {
            return Err(CustodianError::Config(
                "max_event_age_secs must be greater than zero".into(),
            ));
        }
        if self.threads == 0 {
            return Err(CustodianError::Config("threads must be greater than zero".into()));
        }
        if self.memory_limit.trim().is_empty() {
            return Err(CustodianError::Config("memory_limit must not be empty".into()));
        }
        Ok(())
    }
}
