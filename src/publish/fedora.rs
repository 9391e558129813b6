// src/publish/fedora.rs

//! Fedora repository workflow
//!
//! RPMs are routed into per-architecture sub-directories (`i686`,
//! `x86_64`) and signed with `rpm --addsign`; the yum metadata for the
//! whole repository is then regenerated with `createrepo` and its
//! `repomd.xml` gets an armored detached signature.

use super::lock::RepoLock;
use super::rpm::split_by_arch;
use super::{run_tool, sign, stage_files};
use crate::{Error, Result};
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::info;

const ARCHES: &str = "i686|x86_64";

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

    run_tool(Command::new("createrepo").arg(repository), "createrepo")?;
    sign::detach_sign_armored(&repository.join("repodata/repomd.xml"), signkey)?;
    info!("regenerated yum metadata for {}", repository.display());
    Ok(())
}
