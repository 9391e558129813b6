// src/publish/debian.rs

//! Debian repository workflow
//!
//! The destination is a reprepro-managed repository. Packages are signed
//! with `dpkg-sig` in the staging area, then handed to
//! `reprepro includedeb <codename>` under the repository lock; reprepro
//! owns the pool layout and the index, and refuses conflicting
//! re-includes itself.

use super::lock::RepoLock;
use super::{sign, stage_files};
use crate::{Error, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use tracing::info;

/// Debian package names embed the distribution codename:
/// `<name>~<codename>_<arch>.deb`
static DEB_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)~(.*)_(i386|amd64)\.deb$").unwrap());

const KNOWN_CODENAMES: &[&str] = &["wheezy", "jessie", "stretch", "sid"];

pub(super) fn publish(
    source: &Path,
    repository: &Path,
    signkey: &str,
    debs: &[String],
) -> Result<()> {
    let codename = codename_of(debs)?;

    if !repository.is_dir() {
        return Err(Error::Config(format!(
            "debian repository {} does not exist",
            repository.display()
        )));
    }
    let distributions = repository.join("conf/distributions");
    if !distributions.is_file() {
        return Err(Error::Config(format!(
            "{} is not a reprepro repository (no conf/distributions)",
            repository.display()
        )));
    }
    check_signwith(&distributions, signkey)?;
    sign::verify_release_key(&repository.join("../Release.key"), signkey)?;

    let staging = stage_files(source, debs)?;
    for name in debs {
        sign::sign_deb(&staging.path().join(name), signkey)?;
    }

    let _lock = RepoLock::acquire(repository)?;
    for name in debs {
        let output = Command::new("reprepro")
            .arg("-b")
            .arg(repository)
            .arg("includedeb")
            .arg(&codename)
            .arg(staging.path().join(name))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::ToolFailure {
                tool: "reprepro".to_string(),
                detail: format!("failed to run: {e}"),
            })?;
        if !output.status.success() {
            return Err(Error::ToolFailure {
                tool: "reprepro".to_string(),
                detail: format!(
                    "includedeb {name}: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        info!("included {name} into {codename}");
    }
    Ok(())
}

/// Extract the one codename all packages agree on
fn codename_of(debs: &[String]) -> Result<String> {
    let mut codename: Option<String> = None;
    for name in debs {
        let captures = DEB_NAME.captures(name).ok_or_else(|| {
            Error::Precondition(format!("{name} does not carry a distribution codename"))
        })?;
        let found = captures[2].to_string();
        match &codename {
            None => codename = Some(found),
            Some(existing) if *existing != found => {
                return Err(Error::Precondition(format!(
                    "packages target both {existing} and {found}"
                )));
            }
            Some(_) => {}
        }
    }
    let codename = codename.expect("family assertion guarantees at least one package");
    if !KNOWN_CODENAMES.contains(&codename.as_str()) {
        return Err(Error::Precondition(format!(
            "{codename} is not a known distribution codename"
        )));
    }
    Ok(codename)
}

/// Every `SignWith:` line of the reprepro config must name our key;
/// otherwise reprepro would sign the index with a different identity than
/// the packages carry
fn check_signwith(distributions: &Path, signkey: &str) -> Result<()> {
    let text = fs::read_to_string(distributions)?;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("signwith")
            && !value.trim().eq_ignore_ascii_case(signkey)
        {
            return Err(Error::Precondition(format!(
                "repository signs with {}, not {signkey}",
                value.trim()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_codename_extraction() {
        let debs = vec![
            "app_1.0-1~jessie_amd64.deb".to_string(),
            "app-dev_1.0-1~jessie_i386.deb".to_string(),
        ];
        assert_eq!(codename_of(&debs).unwrap(), "jessie");
    }

    #[test]
    fn test_mixed_codenames_refused() {
        let debs = vec![
            "app_1.0-1~jessie_amd64.deb".to_string(),
            "app_1.0-1~sid_amd64.deb".to_string(),
        ];
        assert!(matches!(codename_of(&debs).unwrap_err(), Error::Precondition(_)));
    }

    #[test]
    fn test_unknown_codename_refused() {
        let debs = vec!["app_1.0-1~warty_amd64.deb".to_string()];
        assert!(codename_of(&debs).is_err());
    }

    #[test]
    fn test_name_without_codename_refused() {
        let debs = vec!["app_1.0-1_amd64.deb".to_string()];
        assert!(codename_of(&debs).is_err());
    }

    #[test]
    fn test_signwith_must_match() {
        let dir = TempDir::new().unwrap();
        let conf = dir.path().join("distributions");
        fs::write(
            &conf,
            "Codename: jessie\nArchitectures: amd64 i386\nSignWith: 5FCBF54A\n",
        )
        .unwrap();
        assert!(check_signwith(&conf, "5FCBF54A").is_ok());
        assert!(check_signwith(&conf, "5fcbf54a").is_ok());
        assert!(matches!(
            check_signwith(&conf, "AAAAAAAA").unwrap_err(),
            Error::Precondition(_)
        ));
    }

    #[test]
    fn test_signwith_absent_passes() {
        let dir = TempDir::new().unwrap();
        let conf = dir.path().join("distributions");
        fs::write(&conf, "Codename: jessie\n").unwrap();
        assert!(check_signwith(&conf, "5FCBF54A").is_ok());
    }
}
