//! Operator CLI for Custodian.
//!
//! # Usage
//!
//! ```bash
//! # On the operator machine
//! custodian-admin keygen > new-admin.json
//!
//! # On the server
//! custodian-admin --db pii.duckdb bootstrap --public-key <hex>
//! custodian-admin --db pii.duckdb export --out export.json
//!
//! # Back on the operator machine, with the outgoing secret key
//! custodian-admin sign --export export.json --secret-key-file admin.key \
//!     --new-public-key <hex> --out request.json
//!
//! # On the server
//! custodian-admin --db pii.duckdb migrate --request request.json --actor ops
//! custodian-admin --db pii.duckdb verify-chain --table users
//! ```

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use custodian_core::config::ENV_DB_PATH;
use custodian_core::{Custodian, CustodianConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Custodian administration
#[derive(Parser)]
#[command(name = "custodian-admin")]
#[command(about = "Key management, rotation and audit verification for Custodian")]
#[command(version)]
struct Cli {
    /// DuckDB database file
    #[arg(long, global = true, env = ENV_DB_PATH)]
    db: Option<PathBuf>,

    /// Blind index master secret
    #[arg(long, global = true, env = "CUSTODIAN_BLIND_INDEX_SECRET", hide_env_values = true)]
    index_secret: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an administrator keypair
    Keygen,

    /// Install the first administrator public key
    Bootstrap {
        #[arg(long)]
        public_key: String,
        #[arg(long, default_value = "custodian-admin")]
        actor: String,
    },

    /// Export all sealed values for offline decryption
    Export {
        #[arg(long)]
        out: PathBuf,
    },

    /// Decrypt an export and sign a rotation request (operator side)
    Sign {
        #[arg(long)]
        export: PathBuf,
        /// File holding the outgoing administrator's hex secret key
        #[arg(long)]
        secret_key_file: PathBuf,
        #[arg(long)]
        new_public_key: String,
        #[arg(long)]
        out: PathBuf,
    },

    /// Execute a signed rotation request
    Migrate {
        #[arg(long)]
        request: PathBuf,
        #[arg(long, default_value = "custodian-admin")]
        actor: String,
    },

    /// Verify the audit hash chain
    VerifyChain {
        /// Only report entries of this table
        #[arg(long)]
        table: Option<String>,
    },
}

fn open(cli: &Cli) -> Result<Custodian> {
    let mut config = CustodianConfig::from_env()?;
    if let Some(db) = &cli.db {
        config.db_path = Some(db.clone());
    }
    let secret = cli
        .index_secret
        .as_deref()
        .context("--index-secret or CUSTODIAN_BLIND_INDEX_SECRET is required")?;
    Ok(Custodian::open(config, secret.as_bytes())?)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut stdout = std::io::stdout().lock();
    match &cli.command {
        Command::Keygen => commands::keygen(&mut stdout),
        Command::Bootstrap { public_key, actor } => {
            commands::bootstrap(&open(&cli)?, public_key, actor, &mut stdout)
        }
        Command::Export { out } => commands::export(&open(&cli)?, out),
        Command::Sign {
            export,
            secret_key_file,
            new_public_key,
            out,
        } => commands::sign(export, secret_key_file, new_public_key, out),
        Command::Migrate { request, actor } => {
            commands::migrate(&open(&cli)?, request, actor, &mut stdout)
        }
        Command::VerifyChain { table } => {
            commands::verify_chain(&open(&cli)?, table.as_deref(), &mut stdout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_sign_arguments() {
        let cli = Cli::try_parse_from([
            "custodian-admin",
            "sign",
            "--export",
            "export.json",
            "--secret-key-file",
            "admin.key",
            "--new-public-key",
            "ab",
            "--out",
            "request.json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Sign { .. }));
    }

    #[test]
    fn global_db_flag_follows_subcommand() {
        let cli =
            Cli::try_parse_from(["custodian-admin", "verify-chain", "--db", "x.duckdb"]).unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("x.duckdb")));
        assert!(matches!(cli.command, Command::VerifyChain { table: None }));
    }
}
