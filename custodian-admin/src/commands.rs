//! Subcommand implementations. Each writes its JSON result to `out`.

use anyhow::{bail, Context, Result};
use custodian_core::Custodian;
use custodian_crypto::{KeyPair, XOnlyPublicKey};
use custodian_migration::{build_migration_request, ExecuteMigrationRequest, PrepareMigrationResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedKey {
    public_key: String,
    secret_key: String,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("writing {}", path.display()))
}

fn print_json(out: &mut impl Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Generates an administrator keypair. Run on the operator's machine.
pub fn keygen(out: &mut impl Write) -> Result<()> {
    let keypair = KeyPair::generate();
    print_json(
        out,
        &GeneratedKey {
            public_key: keypair.public_key().to_hex(),
            secret_key: keypair.secret_hex().as_str().to_owned(),
        },
    )
}

pub fn bootstrap(
    custodian: &Custodian,
    public_key: &str,
    actor: &str,
    out: &mut impl Write,
) -> Result<()> {
    let identity = custodian.bootstrap_admin(public_key, actor)?;
    print_json(out, &identity)
}

/// Writes the ciphertext export for offline decryption.
pub fn export(custodian: &Custodian, path: &Path) -> Result<()> {
    let export = custodian.prepare_migration()?;
    write_json(path, &export)?;
    info!(
        rows = export.row_count,
        field_values = export.field_value_count,
        path = %path.display(),
        "export written"
    );
    Ok(())
}

/// Operator side: decrypts an export and writes a signed rotation request.
pub fn sign(
    export_path: &Path,
    secret_key_path: &Path,
    new_public_key: &str,
    request_path: &Path,
) -> Result<()> {
    let export: PrepareMigrationResponse = read_json(export_path)?;
    let secret = fs::read_to_string(secret_key_path)
        .with_context(|| format!("reading {}", secret_key_path.display()))?;
    let current = KeyPair::from_secret_hex(secret.trim()).context("parsing administrator secret key")?;
    let new_admin =
        XOnlyPublicKey::parse_validated(new_public_key).context("parsing new administrator key")?;

    let request =
        build_migration_request(&export, &current, &new_admin, chrono::Utc::now().timestamp())?;
    write_json(request_path, &request)?;
    info!(path = %request_path.display(), "signed migration request written");
    Ok(())
}

pub fn migrate(
    custodian: &Custodian,
    request_path: &Path,
    actor: &str,
    out: &mut impl Write,
) -> Result<()> {
    let request: ExecuteMigrationRequest = read_json(request_path)?;
    let response = custodian.execute_migration(&request, actor)?;
    print_json(out, &response)
}

/// Prints the chain report; a broken chain is an error.
pub fn verify_chain(custodian: &Custodian, table: Option<&str>, out: &mut impl Write) -> Result<()> {
    let report = custodian.verify_chain(table)?;
    print_json(out, &report)?;
    if let Some(sequence_no) = report.first_divergence {
        bail!("audit chain broken at entry {sequence_no}");
    }
    Ok(())
}
