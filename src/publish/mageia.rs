// src/publish/mageia.rs

//! Mageia repository workflow
//!
//! RPMs are routed into per-architecture sub-repositories (`i586`,
//! `x86_64`), signed in place with `rpm --addsign`, and indexed with
//! `genhdlist2`. Besides the shared `Release.key`, every sub-repository
//! publishes its own `media_info/pubkey`, which must carry the same
//! signing key.

use super::lock::RepoLock;
use super::rpm::split_by_arch;
use super::{run_tool, sign, stage_files};
use crate::{Error, Result};
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::info;

const ARCHES: &str = "i586|x86_64";

pub(super) fn publish(
    source: &Path,
    repository: &Path,
    signkey: &str,
    rpms: &[String],
) -> Result<()> {
    let by_arch = split_by_arch(rpms, ARCHES)?;

    for arch in by_arch.keys() {
        fs::create_dir_all(repository.join(arch))?;
    }

    let identity = sign::verify_release_key(&repository.join("../../Release.key"), signkey)?;
    for arch in by_arch.keys() {
        sign::verify_release_key(&repository.join(arch).join("media_info/pubkey"), signkey)?;
    }

    let staging = stage_files(source, rpms)?;
    for name in rpms {
        sign::rpm_addsign(&staging.path().join(name), &identity.owner)?;
    }

    let _lock = RepoLock::acquire(repository)?;

    for (arch, names) in &by_arch {
        for name in names {
            if repository.join(arch).join(name).is_file() {
                return Err(Error::Precondition(format!(
                    "{name} would overwrite an existing package"
                )));
            }
        }
    }

    for (arch, names) in &by_arch {
        for name in names {
            fs::copy(staging.path().join(name), repository.join(arch).join(name))?;
        }
    }

    for arch in by_arch.keys() {
        run_tool(
            Command::new("genhdlist2")
                .arg("--xml-info")
                .arg(repository.join(arch)),
            "genhdlist2",
        )?;
        info!("regenerated hdlist for {arch}");
    }
    Ok(())
}
