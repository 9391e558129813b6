// src/publish/sign.rs

//! Package and repository signing
//!
//! Crucible does no cryptography of its own: signatures come from `gpg`,
//! `dpkg-sig` and `rpm --addsign`, each invoked the way its platform
//! expects. The one thing checked here is identity: every workflow
//! verifies that the repository's published `Release.key` carries the
//! configured signing key before anything is signed or copied.

use super::run_tool as run_checked;
use crate::{Error, Result};
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Identity parsed out of a public key file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyIdentity {
    /// Full fingerprint, uppercase hex without spaces
    pub fingerprint: String,
    /// User id of the key owner, as `rpm --addsign` wants it
    pub owner: String,
}

/// Read the identity of a public key file with `gpg --with-colons`
pub fn key_fingerprint(key_file: &Path) -> Result<KeyIdentity> {
    if !key_file.is_file() {
        return Err(Error::Config(format!(
            "repository key {} does not exist",
            key_file.display()
        )));
    }

    let output = Command::new("gpg")
        .args(["--with-colons", "--with-fingerprint"])
        .arg("--")
        .arg(key_file)
        .env("LANG", "C")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| tool_failure("gpg", format!("failed to run: {e}")))?;
    if !output.status.success() {
        return Err(tool_failure(
            "gpg",
            format!(
                "could not read {}: {}",
                key_file.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }

    parse_colons(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
        Error::Config(format!(
            "{} does not look like a public key",
            key_file.display()
        ))
    })
}

/// Pull fingerprint and owner out of gpg colon records
fn parse_colons(output: &str) -> Option<KeyIdentity> {
    let mut fingerprint = None;
    let mut owner = None;
    for line in output.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        match fields.first().copied() {
            Some("fpr") if fingerprint.is_none() => {
                fingerprint = fields.get(9).filter(|f| !f.is_empty()).map(|f| f.to_uppercase());
            }
            // Older gpg puts the user id on the pub record, newer on uid
            Some("pub") | Some("uid") if owner.is_none() => {
                owner = fields.get(9).filter(|f| !f.is_empty()).map(|f| f.to_string());
            }
            _ => {}
        }
    }
    Some(KeyIdentity {
        fingerprint: fingerprint?,
        owner: owner?,
    })
}

/// Verify that a repository's published key matches the signing key id
pub fn verify_release_key(key_file: &Path, signkey: &str) -> Result<KeyIdentity> {
    let identity = key_fingerprint(key_file)?;
    if !identity.fingerprint.ends_with(&signkey.to_uppercase()) {
        return Err(Error::Precondition(format!(
            "repository key {} has fingerprint {}, which does not match signing key {signkey}",
            key_file.display(),
            identity.fingerprint
        )));
    }
    Ok(identity)
}

/// Detached binary signature next to the file (`<name>.sig`)
pub fn detach_sign(file: &Path, signkey: &str) -> Result<()> {
    debug!("gpg --detach-sign {}", file.display());
    run_checked(
        Command::new("gpg")
            .args(["--detach-sign", "-u", signkey, "--no-armor"])
            .arg(file),
        "gpg",
    )
}

/// Armored detached signature (`<name>.asc`), overwriting a previous one.
/// Used for repository metadata that is re-signed on every publish.
pub fn detach_sign_armored(file: &Path, signkey: &str) -> Result<()> {
    debug!("gpg --detach-sign --armor {}", file.display());
    run_checked(
        Command::new("gpg")
            .args(["--yes", "--detach-sign", "-u", signkey, "--armor"])
            .arg(file),
        "gpg",
    )
}

/// Embedded signature on a Debian package
pub fn sign_deb(file: &Path, signkey: &str) -> Result<()> {
    debug!("dpkg-sig --sign {}", file.display());
    run_checked(
        Command::new("dpkg-sig")
            .args(["--sign", "builder", "-k", signkey])
            .arg(file),
        "dpkg-sig",
    )
}

/// Embedded signature on an RPM package.
///
/// `rpm --addsign` insists on reading a passphrase from its controlling
/// terminal, so it runs in its own session with empty input piped in.
pub fn rpm_addsign(file: &Path, owner: &str) -> Result<()> {
    debug!("rpm --addsign {}", file.display());
    let mut child = Command::new("rpm")
        .arg(format!("--define=_gpg_name {owner}"))
        .arg("--addsign")
        .arg(file)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .map_err(|e| tool_failure("rpm", format!("failed to run: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(b"\n\n");
    }
    let output = child
        .wait_with_output()
        .map_err(|e| tool_failure("rpm", format!("failed to wait: {e}")))?;
    if !output.status.success() {
        return Err(tool_failure(
            "rpm",
            format!(
                "--addsign {}: {}",
                file.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }
    Ok(())
}

fn tool_failure(tool: &str, detail: String) -> Error {
    Error::ToolFailure {
        tool: tool.to_string(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLONS: &str = "\
tru::1:1700000000:0:3:1:5
pub:-:4096:1:89D1A3E05FCBF54A:1388500000:::-:Crucible Builder <builder@example.org>::scSC:
fpr:::::::::0A1B2C3D4E5F67890A1B2C3D89D1A3E05FCBF54A:
uid:-::::1388500000::DEADBEEF::Crucible Builder <builder@example.org>:
sub:-:4096:1:0123456789ABCDEF:1388500000::::::e:
";

    #[test]
    fn test_parse_colons_extracts_identity() {
        let identity = parse_colons(COLONS).unwrap();
        assert_eq!(
            identity.fingerprint,
            "0A1B2C3D4E5F67890A1B2C3D89D1A3E05FCBF54A"
        );
        assert_eq!(identity.owner, "Crucible Builder <builder@example.org>");
    }

    #[test]
    fn test_parse_colons_without_key_records() {
        assert!(parse_colons("tru::1:1700000000:0:3:1:5\n").is_none());
    }

    #[test]
    fn test_fingerprint_suffix_matching() {
        let identity = parse_colons(COLONS).unwrap();
        assert!(identity.fingerprint.ends_with("5FCBF54A"));
        assert!(!identity.fingerprint.ends_with("AAAAAAAA"));
    }

    #[test]
    fn test_missing_key_file_is_config_error() {
        let err = key_fingerprint(Path::new("/nonexistent/Release.key")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
