// src/publish/macosx.rs

//! macOS repository workflow
//!
//! A plain directory of installer packages and portable tarballs, each
//! with a detached signature, indexed by a rolling `SHA256SUMS`. The
//! manifest is merged rather than recomputed so entries for packages that
//! were not re-touched survive verbatim.

use super::lock::RepoLock;
use super::{sign, stage_files};
use crate::manifest::{self, Algorithm};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

pub(super) fn publish(
    source: &Path,
    repository: &Path,
    signkey: &str,
    pkgs: &[String],
) -> Result<()> {
    fs::create_dir_all(repository)?;
    sign::verify_release_key(&repository.join("../../Release.key"), signkey)?;

    let staging = stage_files(source, pkgs)?;
    let mut checksums = BTreeMap::new();
    for name in pkgs {
        let staged = staging.path().join(name);
        sign::detach_sign(&staged, signkey)?;
        checksums.insert(name.clone(), manifest::file_digest(Algorithm::Sha256, &staged)?);
    }

    let _lock = RepoLock::acquire(repository)?;

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

    manifest::merge_manifest(&repository.join(manifest::SHA256SUMS), &checksums)?;
    info!("merged {} entries into {}", checksums.len(), manifest::SHA256SUMS);
    Ok(())
}
