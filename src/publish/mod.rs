// src/publish/mod.rs

//! Repository publish protocol
//!
//! Publishing is state-free: each invocation reads a build output
//! directory, signs the packages it finds, and merges them into one
//! platform repository. The shape is the same for every platform:
//!
//! 1. refuse unless the build's status marker reads exactly `0`
//! 2. classify loose files into package families; assert only the
//!    destination's family is present
//! 3. copy candidates into a private staging area and sign them there
//! 4. take the repository's directory lock
//! 5. under the lock, check no staged name already exists at the
//!    destination, then copy artifacts and sidecars in
//! 6. update the platform's native index, artifact copy first, so a crash
//!    leaves an unindexed package rather than a dangling index entry
//! 7. release the lock and discard the staging area
//!
//! The destination kind is decided once from the repository path and
//! dispatched as a value; an unrecognized path is a configuration error.

mod archlinux;
pub mod classify;
mod debian;
mod fedora;
pub mod lock;
mod macosx;
mod mageia;
mod rpm;
pub mod sign;
pub mod target;

pub use classify::{PackageFamily, PackageSet};
pub use lock::RepoLock;
pub use target::RepoKind;

use crate::{Error, Result, tools};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tracing::info;

/// Key id every publish signs with unless overridden on the command line
pub const DEFAULT_SIGNKEY: &str = "5FCBF54A";

/// Publish a build output directory into a platform repository
pub fn publish(source: &Path, repository: &str, signkey: &str) -> Result<()> {
    let status = read_build_status(source)?;
    if status != 0 {
        return Err(Error::Precondition(format!(
            "build finished with status {status}, not pushing to repository"
        )));
    }

    let packages = PackageSet::classify_dir(source)?;
    let target = target::RepoTarget::parse(repository)?;
    // The destination's own family must be the only one present
    let files = packages.only(target.kind.family())?;
    tools::require(target.kind.required_tools())?;

    info!(
        "publishing {} to {:?} repository {}",
        source.display(),
        target.kind,
        target.path.display()
    );

    match target.kind {
        RepoKind::Debian => debian::publish(source, &target.path, signkey, files),
        RepoKind::ArchLinux => archlinux::publish(source, &target.path, signkey, files),
        RepoKind::Mageia => mageia::publish(source, &target.path, signkey, files),
        RepoKind::Fedora => fedora::publish(source, &target.path, signkey, files),
        RepoKind::MacOsx => macosx::publish(source, &target.path, signkey, files),
    }
}

/// Read the build status marker; a missing marker is an unknown (aborted)
/// build and refuses the publish the same way a failed one does
fn read_build_status(source: &Path) -> Result<i32> {
    let path = source.join("status");
    if !path.exists() {
        return Err(Error::Precondition(format!(
            "no status marker in {}, build was aborted?",
            source.display()
        )));
    }
    let text = fs::read_to_string(&path)?;
    text.trim().parse().map_err(|_| {
        Error::Precondition(format!("status marker holds {:?}, not a number", text.trim()))
    })
}

/// Copy the named files from `source` into a fresh staging directory
fn stage_files(source: &Path, files: &[String]) -> Result<TempDir> {
    let staging = TempDir::new()?;
    for name in files {
        fs::copy(source.join(name), staging.path().join(name))?;
    }
    Ok(staging)
}

/// Run a repository tool, failing with its stderr on nonzero exit
pub(crate) fn run_tool(command: &mut std::process::Command, tool: &str) -> Result<()> {
    let output = command
        .stdin(std::process::Stdio::null())
        .output()
        .map_err(|e| Error::ToolFailure {
            tool: tool.to_string(),
            detail: format!("failed to run: {e}"),
        })?;
    if !output.status.success() {
        return Err(Error::ToolFailure {
            tool: tool.to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_status_zero_passes() {
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("status"), "0\n").unwrap();
        assert_eq!(read_build_status(source.path()).unwrap(), 0);
    }

    #[test]
    fn test_missing_status_refuses() {
        let source = TempDir::new().unwrap();
        let err = read_build_status(source.path()).unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
    }

    #[test]
    fn test_garbage_status_refuses() {
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("status"), "done\n").unwrap();
        assert!(read_build_status(source.path()).is_err());
    }

    #[test]
    fn test_nonzero_status_refuses_publish() {
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("status"), "2").unwrap();
        let err = publish(source.path(), "/srv/repos/debian", "ABCD1234").unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
    }

    #[test]
    fn test_stage_files_copies_into_private_dir() {
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("pkg_1.0~sid_amd64.deb"), b"contents").unwrap();

        let staging =
            stage_files(source.path(), &["pkg_1.0~sid_amd64.deb".to_string()]).unwrap();
        assert_eq!(
            fs::read(staging.path().join("pkg_1.0~sid_amd64.deb")).unwrap(),
            b"contents"
        );
    }
}
