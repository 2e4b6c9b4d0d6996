// ABOUTME: Shared helpers for the pgcat CLI
// ABOUTME: Relation name validation and PostgreSQL installation discovery

use anyhow::{bail, Context, Result};
use pgcat_core::catalog::QualifiedName;
use std::path::PathBuf;
use std::process::Command;
use which::which;

/// Longest identifier PostgreSQL accepts without truncation
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate one part of a relation name (schema or relation)
///
/// Only unquoted identifiers are accepted: a letter or underscore followed by
/// letters, digits, underscores or `$`, at most 63 bytes.
///
/// # Examples
///
/// ```
/// # use pgcat::utils::validate_identifier;
/// assert!(validate_identifier("orders").is_ok());
/// assert!(validate_identifier("_staging$1").is_ok());
/// assert!(validate_identifier("1orders").is_err());
/// assert!(validate_identifier("orders; DROP TABLE x").is_err());
/// ```
pub fn validate_identifier(identifier: &str) -> Result<()> {
    let Some(first) = identifier.chars().next() else {
        bail!("Identifier cannot be empty");
    };
    if identifier.len() > MAX_IDENTIFIER_LENGTH {
        bail!(
            "Identifier '{}' exceeds maximum length of {} characters (got {})",
            sanitize_identifier(identifier),
            MAX_IDENTIFIER_LENGTH,
            identifier.len()
        );
    }
    if !first.is_ascii_alphabetic() && first != '_' {
        bail!(
            "Identifier '{}' must start with a letter or underscore",
            sanitize_identifier(identifier)
        );
    }
    if let Some((pos, c)) = identifier
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_' && *c != '$')
    {
        bail!(
            "Identifier '{}' contains invalid character {:?} at position {}",
            sanitize_identifier(identifier),
            c,
            pos
        );
    }
    Ok(())
}

/// Strip control characters and cap length so a name is safe to print
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Parse and validate a `schema.relation` name
pub fn parse_relation_name(value: &str) -> Result<QualifiedName> {
    let Some(name) = QualifiedName::parse(value) else {
        bail!(
            "Relation must be specified as 'schema.relation', got '{}'",
            sanitize_identifier(value)
        );
    };
    validate_identifier(&name.schema).context("Invalid schema name")?;
    validate_identifier(&name.relation).context("Invalid relation name")?;
    Ok(name)
}

/// Ask `pg_config` for the package library directory (what `$libdir` means
/// to the server)
pub fn pg_pkglibdir() -> Result<PathBuf> {
    let path = which("pg_config").context("pg_config not found in PATH")?;
    let output = Command::new(&path)
        .arg("--pkglibdir")
        .output()
        .context("Failed to execute pg_config --pkglibdir")?;
    if !output.status.success() {
        bail!(
            "pg_config --pkglibdir failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    let libdir = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if libdir.is_empty() {
        bail!("pg_config --pkglibdir printed nothing");
    }
    Ok(PathBuf::from(libdir))
}
