// src/publish/archlinux.rs

//! Arch Linux repository workflow
//!
//! Packages get detached gpg signatures in staging, then package and
//! sidecar move into the repository under its lock and `repo-add`
//! registers each one in the signed repository database.

use super::lock::RepoLock;
use super::{run_tool, sign, stage_files};
use crate::{Error, Result};
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::info;

/// Repository database maintained by repo-add
const REPO_DB: &str = "crucible.db.tar.gz";

pub(super) fn publish(
    source: &Path,
    repository: &Path,
    signkey: &str,
    pkgs: &[String],
) -> Result<()> {
    fs::create_dir_all(repository)?;
    sign::verify_release_key(&repository.join("../../Release.key"), signkey)?;

    let staging = stage_files(source, pkgs)?;
    for name in pkgs {
        sign::detach_sign(&staging.path().join(name), signkey)?;
    }

    let _lock = RepoLock::acquire(repository)?;

    // Nothing is copied unless every staged name is new
    for name in pkgs {
        for candidate in [name.clone(), format!("{name}.sig")] {
            if repository.join(&candidate).is_file() {
                return Err(Error::Precondition(format!(
                    "{candidate} would overwrite an existing package"
                )));
            }
        }
    }

    for name in pkgs {
        let sidecar = format!("{name}.sig");
        fs::copy(staging.path().join(name), repository.join(name))?;
        fs::copy(staging.path().join(&sidecar), repository.join(&sidecar))?;
    }

    // Index after copy: a crash here leaves an unindexed package, never a
    // dangling database entry
    for name in pkgs {
        run_tool(
            Command::new("repo-add")
                .args(["-v", "-s", "-k", signkey, "-d", "-f"])
                .arg(repository.join(REPO_DB))
                .arg(repository.join(name)),
            "repo-add",
        )?;
        info!("added {name} to {REPO_DB}");
    }
    Ok(())
}
